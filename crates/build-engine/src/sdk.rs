//! SDK Layout
//!
//! Locates the build-tools and platform files the command-line tools need.

use std::path::{Path, PathBuf};
use tracing::debug;

use andworx_core::{BuildError, Result};

/// One installed build-tools version
#[derive(Debug, Clone)]
pub struct BuildTools {
    sdk_dir: PathBuf,
    version: String,
}

impl BuildTools {
    /// Locate `version` under `sdk_dir`, or the latest installed version
    pub fn locate(sdk_dir: &Path, version: Option<&str>) -> Result<Self> {
        let build_tools = sdk_dir.join("build-tools");
        if !build_tools.is_dir() {
            return Err(BuildError::ToolNotFound(format!(
                "build-tools in {}",
                sdk_dir.display()
            )));
        }

        let version = match version {
            Some(v) => {
                if !build_tools.join(v).is_dir() {
                    return Err(BuildError::ToolNotFound(format!("build-tools {}", v)));
                }
                v.to_string()
            }
            None => latest_version(&build_tools).ok_or_else(|| {
                BuildError::ToolNotFound(format!(
                    "build-tools in {}",
                    sdk_dir.display()
                ))
            })?,
        };

        debug!("Using build-tools {} from {:?}", version, sdk_dir);
        Ok(Self {
            sdk_dir: sdk_dir.to_path_buf(),
            version,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dir(&self) -> PathBuf {
        self.sdk_dir.join("build-tools").join(&self.version)
    }

    /// Path of an executable tool, if installed
    pub fn executable(&self, name: &str) -> Option<PathBuf> {
        let candidates: &[&str] = if cfg!(windows) { &[".exe", ".bat", ""] } else { &[""] };
        candidates
            .iter()
            .map(|ext| self.dir().join(format!("{}{}", name, ext)))
            .find(|p| p.exists())
    }

    /// android.jar of a platform
    pub fn platform_jar(&self, platform: &str) -> PathBuf {
        self.sdk_dir.join("platforms").join(platform).join("android.jar")
    }

    /// framework.aidl of a platform
    pub fn framework_aidl(&self, platform: &str) -> PathBuf {
        self.sdk_dir.join("platforms").join(platform).join("framework.aidl")
    }
}

/// Highest version directory, comparing numerically component by component
fn latest_version(build_tools: &Path) -> Option<String> {
    let versions: Vec<String> = std::fs::read_dir(build_tools)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();

    versions.into_iter().max_by_key(|v| version_key(v))
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .split(|c: char| c == '.' || c == '-')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}
