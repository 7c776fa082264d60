//! Intermediate Layout
//!
//! Where each stage writes inside the project's intermediates folder.
//! Stages hand files to each other through these paths; only commits touch
//! `gen/` and the output folder.

use std::path::{Path, PathBuf};

use andworx_core::Project;

use crate::pipeline::DexTransform;

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    apk_name: String,
}

impl ProjectLayout {
    pub fn new(project: &Project) -> Self {
        let apk_name = project
            .apk_path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.apk", project.name()));
        Self {
            root: project.intermediates_dir(),
            apk_name,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn merged_manifest(&self) -> PathBuf {
        self.root.join("manifest").join("AndroidManifest.xml")
    }

    pub fn build_config_dir(&self) -> PathBuf {
        self.root.join("buildconfig")
    }

    pub fn aidl_dir(&self) -> PathBuf {
        self.root.join("aidl")
    }

    pub fn renderscript_java_dir(&self) -> PathBuf {
        self.root.join("rs").join("java")
    }

    pub fn renderscript_res_dir(&self) -> PathBuf {
        self.root.join("rs").join("res")
    }

    /// Flat archives of compiled resource folders
    pub fn compiled_res_dir(&self) -> PathBuf {
        self.root.join("res").join("compiled")
    }

    pub fn resource_package(&self) -> PathBuf {
        self.root.join("res").join("resources.ap_")
    }

    pub fn r_source_dir(&self) -> PathBuf {
        self.root.join("res").join("r")
    }

    pub fn symbols(&self) -> PathBuf {
        self.root.join("res").join("R.txt")
    }

    /// Directory owned by the transform `name`
    pub fn transform_dir(&self, name: &str) -> PathBuf {
        self.root.join("transforms").join(name)
    }

    pub fn merged_dex_dir(&self) -> PathBuf {
        DexTransform::merged_dir(&self.transform_dir("dex"))
    }

    pub fn package_dir(&self) -> PathBuf {
        self.root.join("apk")
    }

    /// Package written by the package stage before it is committed
    pub fn staged_apk(&self) -> PathBuf {
        self.package_dir().join(&self.apk_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_lives_under_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path()).unwrap();
        let layout = ProjectLayout::new(&project);

        for path in [
            layout.merged_manifest(),
            layout.resource_package(),
            layout.merged_dex_dir(),
            layout.staged_apk(),
        ] {
            assert!(path.starts_with(project.intermediates_dir()));
        }
        assert_eq!(layout.staged_apk().file_name(), project.apk_path().file_name());
    }
}
