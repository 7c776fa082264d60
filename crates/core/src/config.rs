//! Builder Configuration
//!
//! Manages the settings shared by every project build:
//! - Android SDK and tool locations
//! - Task wait timeout and worker pool size
//! - File pattern groups used to decide which stages must run

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use directories::ProjectDirs;
use tracing::{info, debug};

use crate::error::{BuildError, Result};

/// Android SDK configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Path to Android SDK
    pub sdk_dir: Option<PathBuf>,
    /// Build-tools version to use (latest installed when unset)
    pub build_tools_version: Option<String>,
    /// Platform providing android.jar
    pub platform: String,
    /// Java launcher used for jar based tools
    pub java: PathBuf,
    /// Desugar tool jar; the desugar stage is skipped when unset
    pub desugar_jar: Option<PathBuf>,
    /// Class-path of the manifest merger; merging copies the main manifest when unset
    pub manifest_merger_classpath: Option<PathBuf>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            sdk_dir: None,
            build_tools_version: None,
            platform: "android-34".to_string(),
            java: PathBuf::from("java"),
            desugar_jar: None,
            manifest_merger_classpath: None,
        }
    }
}

/// Background task configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Maximum time to wait for a single build task, unlimited when unset
    pub timeout_secs: Option<u64>,
    /// Worker threads for dex conversion (available cores when unset)
    pub worker_threads: Option<usize>,
}

impl TaskConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// A named set of glob patterns, relative to the project root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternGroup {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PatternGroup {
    fn new(include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Pattern groups classifying changed files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternGroups {
    pub manifest: PatternGroup,
    pub resources: PatternGroup,
    pub bytecode: PatternGroup,
    pub native_libs: PatternGroup,
    pub java_resources: PatternGroup,
    pub aidl: PatternGroup,
    pub renderscript: PatternGroup,
}

impl Default for PatternGroups {
    fn default() -> Self {
        Self {
            manifest: PatternGroup::new(&["AndroidManifest.xml"], &[]),
            resources: PatternGroup::new(&["res/**/*", "assets/**/*"], &[]),
            bytecode: PatternGroup::new(&["bin/classes/**/*.class", "libs/**/*.jar"], &[]),
            native_libs: PatternGroup::new(&["libs/**/*.so"], &[]),
            java_resources: PatternGroup::new(
                &["src/**/*"],
                &["**/*.java", "**/*.aidl", "**/*.rs", "**/*.rsh", "**/*.fs", "**/package.html"],
            ),
            aidl: PatternGroup::new(&["src/**/*.aidl"], &[]),
            renderscript: PatternGroup::new(&["src/**/*.rs", "src/**/*.rsh", "src/**/*.fs"], &[]),
        }
    }
}

/// Main builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Configuration version for migrations
    pub version: u32,
    /// Android SDK settings
    pub sdk: SdkConfig,
    /// Task settings
    pub tasks: TaskConfig,
    /// Change classification patterns
    pub patterns: PatternGroups,
    /// Per-project directory holding persisted build state
    pub state_dir: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            version: 1,
            sdk: SdkConfig::default(),
            tasks: TaskConfig::default(),
            patterns: PatternGroups::default(),
            state_dir: ".andworx".to_string(),
        }
    }
}

impl BuilderConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "andworx", "Andworx")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location.
    /// Defaults are used when no file exists.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_file = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_file() {
                Some(file) => file,
                None => {
                    info!("Cannot determine config path, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if config_file.exists() {
            debug!("Loading config from {:?}", config_file);
            let contents = tokio::fs::read_to_string(&config_file)
                .await
                .map_err(|e| BuildError::io(&config_file, e))?;
            let config: BuilderConfig = toml::from_str(&contents)?;
            Ok(config)
        } else if path.is_some() {
            Err(BuildError::Config(format!("Config file not found: {:?}", config_file)))
        } else {
            info!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        let config_file = Self::config_file()
            .ok_or_else(|| BuildError::Config("Cannot determine config path".into()))?;

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_file, contents).await?;

        debug!("Config saved to {:?}", config_file);
        Ok(())
    }

    /// Get Android SDK path, with auto-detection
    pub fn sdk_path(&self) -> Option<PathBuf> {
        self.sdk.sdk_dir.clone().or_else(|| {
            let from_env = ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
                .iter()
                .filter_map(|var| std::env::var_os(var))
                .map(PathBuf::from);

            let candidates = if cfg!(windows) {
                vec![
                    dirs::config_local_dir().map(|d| d.join("Android").join("Sdk")),
                    Some(PathBuf::from("C:\\Android\\sdk")),
                ]
            } else {
                vec![
                    dirs::home_dir().map(|h| h.join("Android").join("Sdk")),
                    Some(PathBuf::from("/usr/local/android-sdk")),
                ]
            };

            from_env
                .chain(candidates.into_iter().flatten())
                .find(|p| p.exists())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BuilderConfig::default();
        assert_eq!(config.state_dir, ".andworx");
        assert_eq!(config.sdk.platform, "android-34");
        assert!(config.tasks.timeout().is_none());
        assert!(config.tasks.worker_threads() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BuilderConfig = toml::from_str(
            r#"
            [tasks]
            timeout_secs = 30
            worker_threads = 4

            [patterns.resources]
            include = ["res/**/*"]
            "#,
        )
        .unwrap();

        assert_eq!(config.tasks.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.tasks.worker_threads(), 4);
        assert_eq!(config.patterns.resources.include, vec!["res/**/*".to_string()]);
        assert_eq!(config.patterns.manifest, PatternGroups::default().manifest);
    }

    #[tokio::test]
    async fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(BuilderConfig::load(Some(&missing)).await.is_err());
    }
}
