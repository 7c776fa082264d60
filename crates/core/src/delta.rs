//! Change detection and dirty-state tracking
//!
//! A build starts from a [`ChangeSet`] (paths added, removed or modified
//! since the previous build, relative to the project root) or from no
//! change-set at all. The [`DirtyTracker`] classifies the changes against
//! the configured pattern groups and decides which stages have to run.
//! Without a change-set every stage runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{PatternGroup, PatternGroups};
use crate::content::Status;
use crate::error::{BuildError, Result};
use crate::manifest::ManifestInfo;
use crate::state::{DirtyFlag, ProjectState};

/// How a path changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

impl From<ChangeKind> for Status {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Added => Status::Added,
            ChangeKind::Removed => Status::Removed,
            ChangeKind::Changed => Status::Changed,
        }
    }
}

/// One changed path, relative to the project root with `/` separators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// Paths changed since the previous build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<PathChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, kind: ChangeKind) {
        self.changes.push(PathChange {
            path: path.into(),
            kind,
        });
    }

    pub fn with(mut self, path: impl Into<String>, kind: ChangeKind) -> Self {
        self.push(path, kind);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Status of the file at `path`
    pub fn file_status(&self, path: &str) -> Status {
        self.changes
            .iter()
            .find(|c| c.path == path)
            .map(|c| c.kind.into())
            .unwrap_or(Status::NotChanged)
    }

    /// Changes strictly below the directory `dir`, with paths made
    /// relative to it
    pub fn below(&self, dir: &str) -> Vec<PathChange> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.changes
            .iter()
            .filter_map(|c| {
                c.path.strip_prefix(&prefix).map(|rest| PathChange {
                    path: rest.to_string(),
                    kind: c.kind,
                })
            })
            .collect()
    }
}

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    pub modified_ms: u64,
}

/// Fingerprints of every file below a project root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    files: BTreeMap<String, Fingerprint>,
}

/// Convert a relative path into the `/`-separated form used in change-sets
pub fn normalize(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl Snapshot {
    /// Record every file below `root`, skipping the `skip` directories
    pub fn scan(root: &Path, skip: &[PathBuf]) -> Result<Self> {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| !skip.iter().any(|s| e.path() == s.as_path()));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                BuildError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| BuildError::io(entry.path(), e.into()))?;
            let modified_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.insert(
                normalize(relative),
                Fingerprint {
                    size: metadata.len(),
                    modified_ms,
                },
            );
        }

        Ok(Self { files })
    }

    /// Load a snapshot; `None` when absent or unreadable
    pub fn load(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Ignoring unreadable snapshot {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let contents = serde_json::to_string(self)?;
        std::fs::write(path, contents).map_err(|e| BuildError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Changes leading from `self` to `current`
    pub fn diff(&self, current: &Snapshot) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for (path, fingerprint) in &current.files {
            match self.files.get(path) {
                None => changes.push(path.clone(), ChangeKind::Added),
                Some(previous) if previous != fingerprint => {
                    changes.push(path.clone(), ChangeKind::Changed)
                }
                Some(_) => {}
            }
        }
        for path in self.files.keys() {
            if !current.files.contains_key(path) {
                changes.push(path.clone(), ChangeKind::Removed);
            }
        }
        changes
    }
}

/// Stages a build must run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub merge_manifest: bool,
    pub compile_resources: bool,
    pub create_build_config: bool,
    pub convert_to_dex: bool,
    pub build_apk: bool,
    /// Not persisted: AIDL sources changed
    pub compile_aidl: bool,
    /// Not persisted: RenderScript sources changed
    pub compile_renderscript: bool,
}

impl DirtyFlags {
    /// Every stage runs
    pub fn all() -> Self {
        Self {
            merge_manifest: true,
            compile_resources: true,
            create_build_config: true,
            convert_to_dex: true,
            build_apk: true,
            compile_aidl: true,
            compile_renderscript: true,
        }
    }

    pub fn union(&mut self, other: &DirtyFlags) {
        self.merge_manifest |= other.merge_manifest;
        self.compile_resources |= other.compile_resources;
        self.create_build_config |= other.create_build_config;
        self.convert_to_dex |= other.convert_to_dex;
        self.build_apk |= other.build_apk;
        self.compile_aidl |= other.compile_aidl;
        self.compile_renderscript |= other.compile_renderscript;
    }

    /// Set downstream flags implied by upstream ones
    pub fn propagate(&mut self) {
        if self.merge_manifest {
            self.compile_resources = true;
            self.create_build_config = true;
        }
        if self.compile_resources || self.convert_to_dex {
            self.build_apk = true;
        }
    }

    pub fn get(&self, flag: DirtyFlag) -> bool {
        match flag {
            DirtyFlag::MergeManifest => self.merge_manifest,
            DirtyFlag::CompileResources => self.compile_resources,
            DirtyFlag::CreateBuildConfig => self.create_build_config,
            DirtyFlag::ConvertToDex => self.convert_to_dex,
            DirtyFlag::BuildApk => self.build_apk,
        }
    }

    /// Raise one persisted flag
    pub fn set(&mut self, flag: DirtyFlag) {
        match flag {
            DirtyFlag::MergeManifest => self.merge_manifest = true,
            DirtyFlag::CompileResources => self.compile_resources = true,
            DirtyFlag::CreateBuildConfig => self.create_build_config = true,
            DirtyFlag::ConvertToDex => self.convert_to_dex = true,
            DirtyFlag::BuildApk => self.build_apk = true,
        }
    }

    /// OR the persisted flags into `state`. Flags are never cleared here.
    pub fn apply(&self, state: &mut ProjectState) {
        for flag in DirtyFlag::ALL {
            if self.get(flag) {
                state.set(flag, true);
            }
        }
    }
}

/// Flags left set by a previous build that did not complete
impl From<&ProjectState> for DirtyFlags {
    fn from(state: &ProjectState) -> Self {
        let mut flags = DirtyFlags::default();
        for flag in DirtyFlag::ALL {
            if state.get(flag) {
                flags.set(flag);
            }
        }
        flags
    }
}

struct CompiledGroup {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl CompiledGroup {
    fn new(name: &str, group: &PatternGroup) -> Result<Self> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        BuildError::Config(format!("invalid pattern '{}' in group {}: {}", p, name, e))
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            include: compile(&group.include)?,
            exclude: compile(&group.exclude)?,
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.include.iter().any(|p| p.matches(path)) && !self.exclude.iter().any(|p| p.matches(path))
    }
}

/// Compiled pattern groups
pub struct ChangeClassifier {
    manifest: CompiledGroup,
    resources: CompiledGroup,
    bytecode: CompiledGroup,
    native_libs: CompiledGroup,
    java_resources: CompiledGroup,
    aidl: CompiledGroup,
    renderscript: CompiledGroup,
}

impl ChangeClassifier {
    pub fn new(groups: &PatternGroups) -> Result<Self> {
        Ok(Self {
            manifest: CompiledGroup::new("manifest", &groups.manifest)?,
            resources: CompiledGroup::new("resources", &groups.resources)?,
            bytecode: CompiledGroup::new("bytecode", &groups.bytecode)?,
            native_libs: CompiledGroup::new("native_libs", &groups.native_libs)?,
            java_resources: CompiledGroup::new("java_resources", &groups.java_resources)?,
            aidl: CompiledGroup::new("aidl", &groups.aidl)?,
            renderscript: CompiledGroup::new("renderscript", &groups.renderscript)?,
        })
    }

    /// Classify the changes of the project being built. Pure: the same
    /// change-set always yields the same flags.
    pub fn classify(&self, changes: Option<&ChangeSet>) -> DirtyFlags {
        let Some(changes) = changes else {
            return DirtyFlags::all();
        };

        let mut flags = DirtyFlags::default();
        for change in changes.iter() {
            let path = change.path.as_str();
            if self.manifest.matches(path) {
                flags.merge_manifest = true;
            }
            if self.resources.matches(path) {
                flags.compile_resources = true;
            }
            if self.bytecode.matches(path) {
                flags.convert_to_dex = true;
            }
            if self.native_libs.matches(path) || self.java_resources.matches(path) {
                flags.build_apk = true;
            }
            if self.aidl.matches(path) {
                flags.compile_aidl = true;
            }
            if self.renderscript.matches(path) {
                flags.compile_renderscript = true;
            }
        }
        flags.propagate();
        flags
    }

    /// Classify the changes of a library project, as seen by a project
    /// depending on it
    pub fn classify_library(&self, changes: Option<&ChangeSet>) -> DirtyFlags {
        let own = match changes {
            Some(_) => self.classify(changes),
            None => DirtyFlags::all(),
        };
        let mut flags = DirtyFlags {
            merge_manifest: own.merge_manifest,
            compile_resources: own.compile_resources,
            convert_to_dex: own.convert_to_dex,
            build_apk: own.build_apk,
            ..Default::default()
        };
        flags.propagate();
        flags
    }
}

/// Change-set of one library project
#[derive(Debug, Clone)]
pub struct LibraryChanges {
    pub name: String,
    pub changes: Option<ChangeSet>,
}

/// Everything the tracker looks at before a build
#[derive(Debug, Clone, Copy)]
pub struct DirtyInputs<'a> {
    /// Changes of the project itself; `None` forces a full build
    pub changes: Option<&'a ChangeSet>,
    /// Library projects, already flattened transitively
    pub libraries: &'a [LibraryChanges],
    /// Parsed main manifest; `None` when it could not be read
    pub manifest: Option<&'a ManifestInfo>,
    /// Minimum SDK configured for the project
    pub min_sdk: u32,
    /// Whether the variant being built is debuggable
    pub debuggable: bool,
}

/// Outcome of dirty-state analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyDecision {
    pub flags: DirtyFlags,
    /// Set when a validation failure forced a full rebuild
    pub full_rebuild: Option<String>,
}

/// Decides which stages are necessary before a build runs
pub struct DirtyTracker {
    classifier: ChangeClassifier,
}

impl DirtyTracker {
    pub fn new(groups: &PatternGroups) -> Result<Self> {
        Ok(Self {
            classifier: ChangeClassifier::new(groups)?,
        })
    }

    pub fn classifier(&self) -> &ChangeClassifier {
        &self.classifier
    }

    /// Compute the stages to run given the persisted `state`
    pub fn evaluate(&self, state: &ProjectState, inputs: DirtyInputs<'_>) -> DirtyDecision {
        if let Some(reason) = Self::validate(state, &inputs) {
            info!("Forcing full rebuild: {}", reason);
            return DirtyDecision {
                flags: DirtyFlags::all(),
                full_rebuild: Some(reason),
            };
        }

        let mut flags = self.classifier.classify(inputs.changes);
        for library in inputs.libraries {
            let library_flags = self.classifier.classify_library(library.changes.as_ref());
            if library_flags != DirtyFlags::default() {
                debug!("Library {} contributes {:?}", library.name, library_flags);
            }
            flags.union(&library_flags);
        }

        if state.build_config_mode != inputs.debuggable {
            flags.create_build_config = true;
        }

        flags.propagate();
        DirtyDecision {
            flags,
            full_rebuild: None,
        }
    }

    fn validate(state: &ProjectState, inputs: &DirtyInputs<'_>) -> Option<String> {
        let Some(manifest) = inputs.manifest else {
            return Some("manifest could not be read".to_string());
        };
        if let Some(previous) = &state.manifest_package {
            if previous != &manifest.package {
                return Some(format!(
                    "package changed from {} to {}",
                    previous, manifest.package
                ));
            }
        }
        if let Some(min_sdk) = manifest.min_sdk {
            if min_sdk != inputs.min_sdk {
                return Some(format!(
                    "manifest minSdkVersion {} does not match configured {}",
                    min_sdk, inputs.min_sdk
                ));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DirtyTracker {
        DirtyTracker::new(&PatternGroups::default()).unwrap()
    }

    fn manifest() -> ManifestInfo {
        ManifestInfo {
            package: "com.example.app".into(),
            min_sdk: Some(21),
        }
    }

    fn clean_state() -> ProjectState {
        let mut state = ProjectState::default();
        for flag in DirtyFlag::ALL {
            state.set(flag, false);
        }
        state.build_config_mode = true;
        state.manifest_package = Some("com.example.app".into());
        state
    }

    fn inputs<'a>(
        changes: Option<&'a ChangeSet>,
        libraries: &'a [LibraryChanges],
        manifest: &'a ManifestInfo,
    ) -> DirtyInputs<'a> {
        DirtyInputs {
            changes,
            libraries,
            manifest: Some(manifest),
            min_sdk: 21,
            debuggable: true,
        }
    }

    #[test]
    fn test_absent_change_set_forces_everything() {
        let tracker = tracker();
        let manifest = manifest();
        let decision = tracker.evaluate(&clean_state(), inputs(None, &[], &manifest));
        assert_eq!(decision.flags, DirtyFlags::all());
        assert!(decision.full_rebuild.is_none());
    }

    #[test]
    fn test_class_change_only_dexes_and_packages() {
        let tracker = tracker();
        let manifest = manifest();
        let changes = ChangeSet::new().with("bin/classes/com/example/Main.class", ChangeKind::Changed);

        let flags = tracker
            .evaluate(&clean_state(), inputs(Some(&changes), &[], &manifest))
            .flags;

        assert!(!flags.merge_manifest);
        assert!(!flags.compile_resources);
        assert!(flags.convert_to_dex);
        assert!(flags.build_apk);
        assert!(!flags.create_build_config);
    }

    #[test]
    fn test_classification_is_pure() {
        let classifier = ChangeClassifier::new(&PatternGroups::default()).unwrap();
        let changes = ChangeSet::new()
            .with("res/layout/main.xml", ChangeKind::Changed)
            .with("src/com/example/IRemote.aidl", ChangeKind::Added);

        let first = classifier.classify(Some(&changes));
        let second = classifier.classify(Some(&changes));
        assert_eq!(first, second);
        assert!(first.compile_resources);
        assert!(first.compile_aidl);
        assert!(!first.convert_to_dex);
    }

    #[test]
    fn test_manifest_change_propagates() {
        let classifier = ChangeClassifier::new(&PatternGroups::default()).unwrap();
        let changes = ChangeSet::new().with("AndroidManifest.xml", ChangeKind::Changed);
        let flags = classifier.classify(Some(&changes));
        assert!(flags.merge_manifest);
        assert!(flags.compile_resources);
        assert!(flags.create_build_config);
        assert!(flags.build_apk);
        assert!(!flags.convert_to_dex);
    }

    #[test]
    fn test_java_resources_exclude_sources() {
        let classifier = ChangeClassifier::new(&PatternGroups::default()).unwrap();

        let source = ChangeSet::new().with("src/com/example/Main.java", ChangeKind::Changed);
        assert_eq!(classifier.classify(Some(&source)), DirtyFlags::default());

        let resource = ChangeSet::new().with("src/com/example/config.properties", ChangeKind::Added);
        assert!(classifier.classify(Some(&resource)).build_apk);

        let native = ChangeSet::new().with("libs/arm64-v8a/libnative.so", ChangeKind::Changed);
        let flags = classifier.classify(Some(&native));
        assert!(flags.build_apk);
        assert!(!flags.convert_to_dex);
    }

    #[test]
    fn test_library_changes_are_ored_in() {
        let tracker = tracker();
        let manifest = manifest();
        let own = ChangeSet::new();
        let libraries = vec![
            LibraryChanges {
                name: "lib-res".into(),
                changes: Some(ChangeSet::new().with("res/values/strings.xml", ChangeKind::Changed)),
            },
            LibraryChanges {
                name: "lib-code".into(),
                changes: Some(ChangeSet::new().with("bin/classes/lib/Util.class", ChangeKind::Added)),
            },
        ];

        let flags = tracker
            .evaluate(&clean_state(), inputs(Some(&own), &libraries, &manifest))
            .flags;
        assert!(flags.compile_resources);
        assert!(flags.convert_to_dex);
        assert!(flags.build_apk);
        assert!(!flags.merge_manifest);
    }

    #[test]
    fn test_library_without_change_set_is_fully_dirty() {
        let tracker = tracker();
        let manifest = manifest();
        let own = ChangeSet::new();
        let libraries = vec![LibraryChanges {
            name: "lib".into(),
            changes: None,
        }];
        let flags = tracker
            .evaluate(&clean_state(), inputs(Some(&own), &libraries, &manifest))
            .flags;
        assert!(flags.merge_manifest && flags.compile_resources && flags.convert_to_dex);
        assert!(!flags.compile_aidl);
    }

    #[test]
    fn test_package_mismatch_forces_full_rebuild() {
        let tracker = tracker();
        let manifest = ManifestInfo {
            package: "com.example.renamed".into(),
            min_sdk: Some(21),
        };
        let changes = ChangeSet::new();
        let decision = tracker.evaluate(&clean_state(), inputs(Some(&changes), &[], &manifest));
        assert_eq!(decision.flags, DirtyFlags::all());
        assert!(decision.full_rebuild.is_some());
    }

    #[test]
    fn test_min_sdk_mismatch_forces_full_rebuild() {
        let tracker = tracker();
        let manifest = ManifestInfo {
            package: "com.example.app".into(),
            min_sdk: Some(26),
        };
        let changes = ChangeSet::new();
        let decision = tracker.evaluate(&clean_state(), inputs(Some(&changes), &[], &manifest));
        assert_eq!(decision.flags, DirtyFlags::all());
    }

    #[test]
    fn test_build_config_mode_change() {
        let tracker = tracker();
        let manifest = manifest();
        let changes = ChangeSet::new();
        let mut state = clean_state();
        state.build_config_mode = false;

        let flags = tracker
            .evaluate(&state, inputs(Some(&changes), &[], &manifest))
            .flags;
        assert!(flags.create_build_config);
        assert!(!flags.convert_to_dex);
    }

    #[test]
    fn test_apply_never_clears() {
        let mut state = clean_state();
        state.convert_to_dex = true;
        let flags = DirtyFlags {
            compile_resources: true,
            ..Default::default()
        };
        flags.apply(&mut state);
        assert!(state.convert_to_dex);
        assert!(state.compile_resources);
        assert!(!state.merge_manifest);
    }

    #[test]
    fn test_leftover_flags_carry_over() {
        let mut state = clean_state();
        state.compile_resources = true;

        let mut flags = DirtyFlags::from(&state);
        assert!(flags.compile_resources);
        assert!(!flags.convert_to_dex);

        flags.set(DirtyFlag::ConvertToDex);
        flags.propagate();
        assert!(flags.build_apk);
        assert!(!flags.merge_manifest);
    }

    #[test]
    fn test_snapshot_diff() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("res/values")).unwrap();
        std::fs::create_dir_all(root.join(".andworx")).unwrap();
        std::fs::write(root.join("res/values/strings.xml"), "<resources/>").unwrap();
        std::fs::write(root.join("AndroidManifest.xml"), "<manifest/>").unwrap();
        std::fs::write(root.join(".andworx/ignored"), "x").unwrap();

        let skip = vec![root.join(".andworx")];
        let before = Snapshot::scan(root, &skip).unwrap();
        assert_eq!(before.len(), 2);

        std::fs::write(root.join("res/values/strings.xml"), "<resources><string/></resources>").unwrap();
        std::fs::remove_file(root.join("AndroidManifest.xml")).unwrap();
        std::fs::write(root.join("res/values/colors.xml"), "<resources/>").unwrap();

        let after = Snapshot::scan(root, &skip).unwrap();
        let changes = before.diff(&after);

        assert_eq!(changes.file_status("res/values/strings.xml"), Status::Changed);
        assert_eq!(changes.file_status("res/values/colors.xml"), Status::Added);
        assert_eq!(changes.file_status("AndroidManifest.xml"), Status::Removed);
        assert_eq!(changes.below("res").len(), 2);

        let path = root.join(".andworx/snapshots/self.json");
        after.save(&path).unwrap();
        assert_eq!(Snapshot::load(&path), Some(after));
    }
}
