//! APK Signing
//!
//! Align and sign packages with zipalign and apksigner.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use andworx_core::{BuildError, Result};

use crate::command::ToolCommand;
use crate::toolchain::SigningConfig;

/// APK Signer
#[derive(Debug, Clone)]
pub struct ApkSigner {
    apksigner: PathBuf,
    zipalign: Option<PathBuf>,
}

impl ApkSigner {
    pub fn new(apksigner: PathBuf, zipalign: Option<PathBuf>) -> Self {
        Self { apksigner, zipalign }
    }

    /// Align `apk` when zipalign is available, then sign it into `output`
    pub fn sign(&self, apk: &Path, config: &SigningConfig, output: &Path) -> Result<()> {
        if !config.keystore.exists() {
            return Err(BuildError::Config(format!(
                "keystore not found: {}",
                config.keystore.display()
            )));
        }
        info!("Signing APK: {:?}", apk);

        let aligned = match &self.zipalign {
            Some(zipalign) => {
                let aligned = apk.with_extension("aligned.apk");
                self.align(zipalign, apk, &aligned)?;
                aligned
            }
            None => apk.to_path_buf(),
        };

        let result = ToolCommand::new("apksigner", &self.apksigner)
            .arg("sign")
            .arg("--ks")
            .arg(&config.keystore)
            .arg("--ks-pass")
            .arg(format!("pass:{}", config.store_password))
            .arg("--ks-key-alias")
            .arg(&config.key_alias)
            .arg("--key-pass")
            .arg(format!("pass:{}", config.key_password()))
            .arg("--out")
            .arg(output)
            .arg(&aligned)
            .run();

        if aligned != apk {
            let _ = std::fs::remove_file(&aligned);
        }
        result?;

        debug!("APK signed: {:?}", output);
        Ok(())
    }

    fn align(&self, zipalign: &Path, input: &Path, output: &Path) -> Result<()> {
        ToolCommand::new("zipalign", zipalign)
            .args(["-f", "-p", "4"])
            .arg(input)
            .arg(output)
            .run()?;
        Ok(())
    }
}

/// Location of the SDK debug keystore
pub fn debug_keystore() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".android")
        .join("debug.keystore")
}
