//! Persisted Project State
//!
//! Per-project dirty flags and the last known manifest package, stored as a
//! small TOML document inside the project's state directory. Anything
//! missing loads as "dirty" so an unreadable or absent record always leads
//! to a rebuild.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BuildError, Result};

const STATE_FILE: &str = "build-state.toml";

fn dirty() -> bool {
    true
}

/// A persisted flag naming a stage that must run on the next build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyFlag {
    MergeManifest,
    CompileResources,
    CreateBuildConfig,
    ConvertToDex,
    BuildApk,
}

impl DirtyFlag {
    pub const ALL: [DirtyFlag; 5] = [
        DirtyFlag::MergeManifest,
        DirtyFlag::CompileResources,
        DirtyFlag::CreateBuildConfig,
        DirtyFlag::ConvertToDex,
        DirtyFlag::BuildApk,
    ];

    /// Property key in the state file
    pub fn key(&self) -> &'static str {
        match self {
            DirtyFlag::MergeManifest => "mergeManifest",
            DirtyFlag::CompileResources => "compileResources",
            DirtyFlag::CreateBuildConfig => "createBuildConfig",
            DirtyFlag::ConvertToDex => "convertToDex",
            DirtyFlag::BuildApk => "buildApk",
        }
    }
}

/// Persisted build state of one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    #[serde(default = "dirty")]
    pub merge_manifest: bool,
    #[serde(default = "dirty")]
    pub compile_resources: bool,
    #[serde(default = "dirty")]
    pub create_build_config: bool,
    /// Debuggable mode the generated build config was last written for
    #[serde(default = "dirty")]
    pub build_config_mode: bool,
    #[serde(default = "dirty")]
    pub convert_to_dex: bool,
    #[serde(default = "dirty")]
    pub build_apk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_package: Option<String>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            merge_manifest: true,
            compile_resources: true,
            create_build_config: true,
            build_config_mode: true,
            convert_to_dex: true,
            build_apk: true,
            manifest_package: None,
        }
    }
}

impl ProjectState {
    pub fn get(&self, flag: DirtyFlag) -> bool {
        match flag {
            DirtyFlag::MergeManifest => self.merge_manifest,
            DirtyFlag::CompileResources => self.compile_resources,
            DirtyFlag::CreateBuildConfig => self.create_build_config,
            DirtyFlag::ConvertToDex => self.convert_to_dex,
            DirtyFlag::BuildApk => self.build_apk,
        }
    }

    pub fn set(&mut self, flag: DirtyFlag, value: bool) {
        let slot = match flag {
            DirtyFlag::MergeManifest => &mut self.merge_manifest,
            DirtyFlag::CompileResources => &mut self.compile_resources,
            DirtyFlag::CreateBuildConfig => &mut self.create_build_config,
            DirtyFlag::ConvertToDex => &mut self.convert_to_dex,
            DirtyFlag::BuildApk => &mut self.build_apk,
        };
        *slot = value;
    }

    /// Force every stage to run
    pub fn mark_all_dirty(&mut self) {
        for flag in DirtyFlag::ALL {
            self.set(flag, true);
        }
    }

    pub fn any_dirty(&self) -> bool {
        DirtyFlag::ALL.iter().any(|flag| self.get(*flag))
    }
}

/// Location of a project's persisted state
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `<project>/<state_dir>`
    pub fn new(project_root: &Path, state_dir: &str) -> Self {
        Self {
            dir: project_root.join(state_dir),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Directory holding file snapshots of the project and its libraries
    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.join("snapshots")
    }

    /// Load the state; a missing or corrupt file yields an all-dirty state
    pub fn load(&self) -> ProjectState {
        let path = self.state_file();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Ignoring unreadable build state {:?}: {}", path, e);
                    ProjectState::default()
                }
            },
            Err(_) => {
                debug!("No build state at {:?}, forcing a full build", path);
                ProjectState::default()
            }
        }
    }

    /// Write the state atomically
    pub fn save(&self, state: &ProjectState) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| BuildError::io(&self.dir, e))?;
        let path = self.state_file();
        let tmp = path.with_extension("toml.tmp");
        let contents = toml::to_string_pretty(state)?;
        std::fs::write(&tmp, contents).map_err(|e| BuildError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| BuildError::io(&path, e))?;
        debug!("Build state saved to {:?}", path);
        Ok(())
    }

    /// Drop the persisted state and snapshots
    pub fn reset(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BuildError::io(&self.dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_state_is_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), ".andworx");
        let state = store.load();
        assert!(DirtyFlag::ALL.iter().all(|f| state.get(*f)));
        assert!(state.manifest_package.is_none());
    }

    #[test]
    fn test_missing_keys_default_to_dirty() {
        let state: ProjectState = toml::from_str(
            r#"
            mergeManifest = false
            manifestPackage = "com.example.app"
            "#,
        )
        .unwrap();
        assert!(!state.merge_manifest);
        assert!(state.compile_resources);
        assert!(state.build_apk);
        assert_eq!(state.manifest_package.as_deref(), Some("com.example.app"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), ".andworx");

        let mut state = ProjectState::default();
        state.set(DirtyFlag::ConvertToDex, false);
        state.manifest_package = Some("com.example.app".into());
        store.save(&state).unwrap();

        let contents = std::fs::read_to_string(store.state_file()).unwrap();
        assert!(contents.contains("convertToDex = false"));
        assert_eq!(store.load(), state);

        store.reset().unwrap();
        assert_eq!(store.load(), ProjectState::default());
    }
}
