//! d8 dexer, used both to build dex archives and to merge them

use std::path::{Path, PathBuf};

use andworx_core::{BuildError, Result};

use super::{DexArchiveBuilder, DexArchiveRequest, DexMerger};
use crate::command::ToolCommand;

pub struct D8Tool {
    path: PathBuf,
}

impl D8Tool {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn base(&self, min_sdk: u32, debuggable: bool) -> ToolCommand {
        ToolCommand::new("d8", &self.path)
            .arg(if debuggable { "--debug" } else { "--release" })
            .arg("--min-api")
            .arg(min_sdk.to_string())
    }
}

impl DexArchiveBuilder for D8Tool {
    fn convert(&self, request: &DexArchiveRequest<'_>) -> Result<()> {
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        self.base(request.min_sdk, request.debuggable)
            .arg("--intermediate")
            .each("--lib", request.boot_classpath)
            .each("--classpath", request.classpath)
            .arg("--output")
            .arg(request.output)
            .arg(request.input)
            .run()?;
        Ok(())
    }
}

impl DexMerger for D8Tool {
    fn merge(&self, archives: &[PathBuf], output_dir: &Path, min_sdk: u32, debuggable: bool) -> Result<()> {
        std::fs::create_dir_all(output_dir).map_err(|e| BuildError::io(output_dir, e))?;

        self.base(min_sdk, debuggable)
            .arg("--output")
            .arg(output_dir)
            .args(archives)
            .run()?;
        Ok(())
    }
}
