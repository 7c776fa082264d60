//! Pipeline artifacts
//!
//! Jar files and class directories handed from one pipeline stage to the
//! next, tagged with what they contain and where they came from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Kind of data held by an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// Compiled java byte-code
    Classes,
    /// Byte-code rewritten by the desugar stage
    DesugaredClasses,
    /// Java resources (non-class files travelling with byte-code)
    Resources,
    /// Dex files or dex archives
    Dex,
}

/// Origin of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// The project being built
    Project,
    /// Library projects the project depends on
    SubProjects,
    /// Jar dependencies
    ExternalLibraries,
    /// Android platform classes, only ever referenced
    ProvidedOnly,
}

/// Change status of an artifact relative to the previous build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    NotChanged,
    Added,
    Changed,
    Removed,
}

impl Status {
    /// Whether the artifact has to be processed again
    pub fn needs_processing(&self) -> bool {
        matches!(self, Status::Added | Status::Changed)
    }
}

/// Attributes shared by every artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Unique name within one pipeline input set
    pub name: String,
    /// Location on disk
    pub file: PathBuf,
    pub content_types: BTreeSet<ContentType>,
    pub scopes: BTreeSet<Scope>,
}

impl ContentInfo {
    pub fn new(
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        content_type: ContentType,
        scope: Scope,
    ) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            content_types: BTreeSet::from([content_type]),
            scopes: BTreeSet::from([scope]),
        }
    }
}

/// A single jar file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JarInfo {
    pub info: ContentInfo,
    pub status: Status,
}

/// A directory tree, with per-file change status for incremental runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub info: ContentInfo,
    pub status: Status,
    /// Files below the directory that changed, keyed by relative path
    pub changed_files: BTreeMap<PathBuf, Status>,
}

/// One artifact handed between pipeline stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualifiedContent {
    Jar(JarInfo),
    Directory(DirectoryInfo),
}

impl QualifiedContent {
    /// Create a jar artifact
    pub fn jar(info: ContentInfo, status: Status) -> Self {
        QualifiedContent::Jar(JarInfo { info, status })
    }

    /// Create a directory artifact
    pub fn directory(info: ContentInfo, status: Status) -> Self {
        QualifiedContent::Directory(DirectoryInfo {
            info,
            status,
            changed_files: BTreeMap::new(),
        })
    }

    pub fn info(&self) -> &ContentInfo {
        match self {
            QualifiedContent::Jar(jar) => &jar.info,
            QualifiedContent::Directory(dir) => &dir.info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn file(&self) -> &Path {
        &self.info().file
    }

    pub fn status(&self) -> Status {
        match self {
            QualifiedContent::Jar(jar) => jar.status,
            QualifiedContent::Directory(dir) => dir.status,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, QualifiedContent::Directory(_))
    }

    pub fn has_type(&self, content_type: ContentType) -> bool {
        self.info().content_types.contains(&content_type)
    }

    /// Whether this artifact carries any of `types` from any of `scopes`
    pub fn matches(&self, types: &[ContentType], scopes: &[Scope]) -> bool {
        let info = self.info();
        types.iter().any(|t| info.content_types.contains(t))
            && scopes.iter().any(|s| info.scopes.contains(s))
    }

    /// Derive the artifact a stage produced from this one. The new artifact
    /// must live at a different path than the input.
    pub fn derive(
        &self,
        file: impl Into<PathBuf>,
        content_type: ContentType,
        status: Status,
    ) -> Self {
        let info = ContentInfo {
            name: self.name().to_string(),
            file: file.into(),
            content_types: BTreeSet::from([content_type]),
            scopes: self.info().scopes.clone(),
        };
        if self.is_directory() {
            QualifiedContent::directory(info, status)
        } else {
            QualifiedContent::jar(info, status)
        }
    }
}
