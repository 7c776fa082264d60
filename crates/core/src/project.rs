//! Project Description
//!
//! Handles the Android project layout read from `andworx.toml`: source and
//! resource folders, build variant, library dependencies and signing.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BuildError, Result};

/// Name of the per-project descriptor file
pub const DESCRIPTOR_FILE: &str = "andworx.toml";

/// Build variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildVariant {
    #[default]
    Debug,
    Release,
}

impl BuildVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildVariant::Debug => "debug",
            BuildVariant::Release => "release",
        }
    }

    pub fn is_debuggable(&self) -> bool {
        matches!(self, BuildVariant::Debug)
    }
}

/// Signing information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    pub keystore_path: PathBuf,
    pub keystore_password: String,
    pub key_alias: String,
    pub key_password: Option<String>,
}

/// Contents of `andworx.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectDescriptor {
    /// Project name
    pub name: String,
    /// Whether this project is a library consumed by other projects
    pub library: bool,
    /// Build variant
    pub variant: BuildVariant,
    /// Minimum SDK version
    pub min_sdk: u32,
    /// Target SDK version
    pub target_sdk: u32,
    pub manifest: PathBuf,
    pub res_dirs: Vec<PathBuf>,
    pub source_dirs: Vec<PathBuf>,
    /// Folders searched for .aidl files (source folders when empty)
    pub aidl_dirs: Vec<PathBuf>,
    /// Folders searched for RenderScript files (source folders when empty)
    pub renderscript_dirs: Vec<PathBuf>,
    /// Output of the java compiler
    pub class_dir: PathBuf,
    /// Jar dependencies and native libraries
    pub libs_dir: PathBuf,
    /// Generated sources
    pub gen_dir: PathBuf,
    /// Final package location
    pub output_dir: PathBuf,
    /// Intermediate build artifacts
    pub intermediates_dir: PathBuf,
    /// Manifest placeholder values
    pub placeholders: BTreeMap<String, String>,
    /// Library projects, relative to this project
    pub libraries: Vec<PathBuf>,
    /// Signing configuration
    pub signing: Option<SigningInfo>,
}

impl Default for ProjectDescriptor {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            library: false,
            variant: BuildVariant::Debug,
            min_sdk: 21,
            target_sdk: 34,
            manifest: PathBuf::from("AndroidManifest.xml"),
            res_dirs: vec![PathBuf::from("res")],
            source_dirs: vec![PathBuf::from("src")],
            aidl_dirs: Vec::new(),
            renderscript_dirs: Vec::new(),
            class_dir: PathBuf::from("bin").join("classes"),
            libs_dir: PathBuf::from("libs"),
            gen_dir: PathBuf::from("gen"),
            output_dir: PathBuf::from("bin"),
            intermediates_dir: PathBuf::from("build").join("intermediates"),
            placeholders: BTreeMap::new(),
            libraries: Vec::new(),
            signing: None,
        }
    }
}

/// An Android project on disk
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root directory
    pub root: PathBuf,
    pub descriptor: ProjectDescriptor,
}

impl Project {
    /// Open the project rooted at `root`. A missing descriptor yields the
    /// default layout named after the directory.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(BuildError::Config(format!("Project path not found: {:?}", root)));
        }

        let descriptor_path = root.join(DESCRIPTOR_FILE);
        let descriptor = if descriptor_path.exists() {
            let contents = std::fs::read_to_string(&descriptor_path)
                .map_err(|e| BuildError::io(&descriptor_path, e))?;
            toml::from_str(&contents)?
        } else {
            debug!("No {} in {:?}, using default layout", DESCRIPTOR_FILE, root);
            ProjectDescriptor {
                name: root
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "app".to_string()),
                ..Default::default()
            }
        };

        Ok(Self {
            root: root.to_path_buf(),
            descriptor,
        })
    }

    /// Open a project and every library it depends on, transitively.
    /// Libraries are returned in dependency-first order without duplicates.
    pub fn open_with_libraries(root: &Path) -> Result<(Self, Vec<Project>)> {
        let project = Self::open(root)?;
        let mut seen = HashSet::new();
        seen.insert(canonical(root));
        let mut libraries = Vec::new();
        collect_libraries(&project, &mut seen, &mut libraries)?;
        info!(
            "Opened project {} with {} library projects",
            project.name(),
            libraries.len()
        );
        Ok((project, libraries))
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.descriptor.manifest)
    }

    pub fn res_dirs(&self) -> Vec<PathBuf> {
        self.resolve(&self.descriptor.res_dirs)
    }

    pub fn source_dirs(&self) -> Vec<PathBuf> {
        self.resolve(&self.descriptor.source_dirs)
    }

    pub fn aidl_dirs(&self) -> Vec<PathBuf> {
        if self.descriptor.aidl_dirs.is_empty() {
            self.source_dirs()
        } else {
            self.resolve(&self.descriptor.aidl_dirs)
        }
    }

    pub fn renderscript_dirs(&self) -> Vec<PathBuf> {
        if self.descriptor.renderscript_dirs.is_empty() {
            self.source_dirs()
        } else {
            self.resolve(&self.descriptor.renderscript_dirs)
        }
    }

    pub fn class_dir(&self) -> PathBuf {
        self.root.join(&self.descriptor.class_dir)
    }

    pub fn libs_dir(&self) -> PathBuf {
        self.root.join(&self.descriptor.libs_dir)
    }

    pub fn gen_dir(&self) -> PathBuf {
        self.root.join(&self.descriptor.gen_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.descriptor.output_dir)
    }

    pub fn intermediates_dir(&self) -> PathBuf {
        self.root.join(&self.descriptor.intermediates_dir)
    }

    /// Jar dependencies found directly in the libs folder
    pub fn jar_dependencies(&self) -> Vec<PathBuf> {
        let mut jars: Vec<PathBuf> = std::fs::read_dir(self.libs_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().map(|ext| ext == "jar").unwrap_or(false))
                    .collect()
            })
            .unwrap_or_default();
        jars.sort();
        jars
    }

    pub fn is_debuggable(&self) -> bool {
        self.descriptor.variant.is_debuggable()
    }

    /// Expected final package path
    pub fn apk_path(&self) -> PathBuf {
        self.output_dir().join(format!(
            "{}-{}.apk",
            self.name(),
            self.descriptor.variant.as_str()
        ))
    }

    fn resolve(&self, dirs: &[PathBuf]) -> Vec<PathBuf> {
        dirs.iter().map(|d| self.root.join(d)).collect()
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn collect_libraries(
    project: &Project,
    seen: &mut HashSet<PathBuf>,
    out: &mut Vec<Project>,
) -> Result<()> {
    for relative in &project.descriptor.libraries {
        let root = project.root.join(relative);
        if !seen.insert(canonical(&root)) {
            continue;
        }
        let library = Project::open(&root)?;
        if !library.descriptor.library {
            return Err(BuildError::Config(format!(
                "{} depends on {:?}, which is not a library project",
                project.name(),
                root
            )));
        }
        collect_libraries(&library, seen, out)?;
        out.push(library);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_descriptor(dir: &Path, contents: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), contents).unwrap();
    }

    #[test]
    fn test_default_layout() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path()).unwrap();
        assert_eq!(project.manifest_path(), dir.path().join("AndroidManifest.xml"));
        assert_eq!(project.class_dir(), dir.path().join("bin").join("classes"));
        assert!(project.is_debuggable());
        assert_eq!(project.aidl_dirs(), project.source_dirs());
    }

    #[test]
    fn test_libraries_are_collected_transitively_once() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        write_descriptor(&app, "name = \"app\"\nlibraries = [\"../lib-a\", \"../lib-b\"]\n");
        write_descriptor(
            &dir.path().join("lib-a"),
            "name = \"lib-a\"\nlibrary = true\nlibraries = [\"../lib-b\"]\n",
        );
        write_descriptor(&dir.path().join("lib-b"), "name = \"lib-b\"\nlibrary = true\n");

        let (project, libraries) = Project::open_with_libraries(&app).unwrap();
        assert_eq!(project.name(), "app");
        let names: Vec<&str> = libraries.iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["lib-b", "lib-a"]);
    }

    #[test]
    fn test_dependency_must_be_library() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        write_descriptor(&app, "libraries = [\"../other\"]\n");
        write_descriptor(&dir.path().join("other"), "name = \"other\"\n");

        assert!(matches!(
            Project::open_with_libraries(&app),
            Err(BuildError::Config(_))
        ));
    }
}
