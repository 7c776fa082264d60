//! Build Runner
//!
//! Coordinates one project build:
//! 1. open the project and its library projects
//! 2. load the persisted dirty state and diff file snapshots into
//!    change-sets
//! 3. let the dirty tracker decide which stages run, persisting the result
//! 4. seed the pipeline input with the project's byte-code
//! 5. run the stage queue inside a task factory scope
//! 6. record new snapshots once the build succeeded

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use andworx_core::delta::normalize;
use andworx_core::{
    BuildContext, BuildOutcome, BuildServices, BuilderConfig, ChangeKind, ChangeSet, ContentInfo,
    ContentType, DirtyFlag, DirtyFlags, DirtyInputs, DirtyTracker, EventBus, LibraryChanges,
    ManifestInfo, Project, QualifiedContent, Result, Scope, Snapshot, StateStore, Status,
    TaskFactory,
};
use andworx_core::content::DirectoryInfo;

use crate::layout::ProjectLayout;
use crate::ops::plan_queue;
use crate::pipeline::D8Task;
use crate::toolchain::Toolchain;

/// Options of one build invocation
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Ignore previous snapshots and rebuild everything
    pub full: bool,
}

/// Snapshots taken before the build, saved once it succeeds
struct PendingSnapshots {
    entries: Vec<(PathBuf, Snapshot)>,
}

impl PendingSnapshots {
    fn save(self) -> Result<()> {
        for (path, snapshot) in self.entries {
            snapshot.save(&path)?;
        }
        Ok(())
    }
}

/// Change-sets of a project and its libraries
struct Changes {
    own: Option<ChangeSet>,
    libraries: Vec<LibraryChanges>,
    pending: PendingSnapshots,
}

/// Build runner that coordinates the build process
pub struct BuildRunner {
    config: BuilderConfig,
    toolchain: Toolchain,
    events: Arc<EventBus>,
}

impl BuildRunner {
    pub fn new(config: BuilderConfig, toolchain: Toolchain) -> Self {
        Self {
            config,
            toolchain,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Report progress on `events`
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Build the project rooted at `root`, scheduling tasks on `handle`.
    ///
    /// Blocks until the build is done; must not be called from inside an
    /// async context.
    pub fn build(&self, root: &Path, handle: Handle, options: &BuildOptions) -> Result<BuildOutcome> {
        let (project, libraries) = Project::open_with_libraries(root)?;
        let store = StateStore::new(&project.root, &self.config.state_dir);
        let mut state = store.load();
        let layout = ProjectLayout::new(&project);

        let changes = self.collect_changes(&project, &libraries, &store, options)?;
        let manifest = match ManifestInfo::read(&project.manifest_path()) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("{}: {}", project.name(), e);
                None
            }
        };

        let tracker = DirtyTracker::new(&self.config.patterns)?;
        let decision = tracker.evaluate(
            &state,
            DirtyInputs {
                changes: changes.own.as_ref(),
                libraries: &changes.libraries,
                manifest: manifest.as_ref(),
                min_sdk: project.descriptor.min_sdk,
                debuggable: project.is_debuggable(),
            },
        );
        let incremental = changes.own.is_some() && decision.full_rebuild.is_none();

        let mut flags = decision.flags;
        flags.union(&DirtyFlags::from(&state));
        reconcile_outputs(&mut flags, &project, &layout);
        flags.propagate();
        flags.apply(&mut state);
        store.save(&state)?;
        debug!("{}: stages to run {:?}", project.name(), flags);

        let input = if incremental {
            seed_pipeline_input(&project, &libraries, changes.own.as_ref(), &changes.libraries)
        } else {
            seed_pipeline_input(&project, &libraries, None, &[])
        };

        let factory = Arc::new(
            TaskFactory::new(handle, self.config.tasks.timeout()).with_events(self.events.clone()),
        );
        let services = BuildServices {
            task_factory: factory.clone(),
            events: self.events.clone(),
        };
        let mut ctx = BuildContext::new(
            Arc::new(project),
            Arc::new(libraries),
            services,
            store,
            state,
        )
        .with_incremental(incremental);
        ctx.set_pipeline_input(input);

        let d8 = Arc::new(D8Task::new(
            self.toolchain.dex_builder.clone(),
            self.toolchain.dex_merger.clone(),
            self.config.tasks.worker_threads(),
        )?);
        let queue = plan_queue(&ctx, &flags, &self.toolchain, d8);

        let outcome = {
            let _scope = factory.start();
            queue.run(&mut ctx)
        };

        if outcome.is_success() {
            changes.pending.save()?;
            debug!("{}: snapshots recorded", outcome.project);
        } else {
            warn!("{}: build did not complete: {:?}", outcome.project, outcome.status);
        }
        Ok(outcome)
    }

    fn collect_changes(
        &self,
        project: &Project,
        libraries: &[Project],
        store: &StateStore,
        options: &BuildOptions,
    ) -> Result<Changes> {
        let snapshot_dir = store.snapshot_dir();
        let mut pending = Vec::with_capacity(libraries.len() + 1);

        let mut diff = |target: &Project, file: String| -> Result<Option<ChangeSet>> {
            let path = snapshot_dir.join(file);
            let current = Snapshot::scan(&target.root, &snapshot_skips(target, &self.config.state_dir))?;
            let previous = if options.full { None } else { Snapshot::load(&path) };
            let changes = previous.map(|previous| previous.diff(&current));
            pending.push((path, current));
            Ok(changes)
        };

        let own = diff(project, "self.json".to_string())?;
        match &own {
            Some(changes) => info!("{}: {} changed files", project.name(), changes.len()),
            None => info!("{}: no previous snapshot, building everything", project.name()),
        }

        let mut library_changes = Vec::with_capacity(libraries.len());
        for library in libraries {
            let changes = diff(library, format!("lib-{}.json", library.name()))?;
            library_changes.push(LibraryChanges {
                name: library.name().to_string(),
                changes,
            });
        }

        Ok(Changes {
            own,
            libraries: library_changes,
            pending: PendingSnapshots { entries: pending },
        })
    }
}

/// Folders whose contents the build itself writes
fn snapshot_skips(project: &Project, state_dir: &str) -> Vec<PathBuf> {
    vec![
        project.root.join(state_dir),
        project.intermediates_dir(),
        project.gen_dir(),
    ]
}

/// Raise the flag of any stage whose output went missing since it last ran
fn reconcile_outputs(flags: &mut DirtyFlags, project: &Project, layout: &ProjectLayout) {
    let mut expected = vec![
        (layout.merged_manifest(), DirtyFlag::MergeManifest),
        (layout.resource_package(), DirtyFlag::CompileResources),
    ];
    if !project.descriptor.library {
        expected.push((layout.merged_dex_dir(), DirtyFlag::ConvertToDex));
        expected.push((project.apk_path(), DirtyFlag::BuildApk));
    }

    for (path, flag) in expected {
        if !path.exists() && !flags.get(flag) {
            debug!("{:?} is missing, raising {}", path, flag.key());
            flags.set(flag);
        }
    }
}

fn relative(root: &Path, path: &Path) -> String {
    normalize(path.strip_prefix(root).unwrap_or(path))
}

/// Class folder artifact with the changes recorded below it
fn class_dir(
    name: String,
    dir: &Path,
    scope: Scope,
    root: &Path,
    changes: Option<&ChangeSet>,
) -> Option<QualifiedContent> {
    if !dir.is_dir() {
        return None;
    }
    let info = ContentInfo::new(name, dir, ContentType::Classes, scope);
    let Some(changes) = changes else {
        return Some(QualifiedContent::directory(info, Status::Added));
    };

    let changed_files: std::collections::BTreeMap<PathBuf, Status> = changes
        .below(&relative(root, dir))
        .into_iter()
        .map(|change| (PathBuf::from(change.path), change.kind.into()))
        .collect();
    let status = if changed_files.is_empty() {
        Status::NotChanged
    } else {
        Status::Changed
    };
    Some(QualifiedContent::Directory(DirectoryInfo {
        info,
        status,
        changed_files,
    }))
}

/// Jar dependencies of `project`, including removed ones
fn jars(
    project: &Project,
    scope: Scope,
    changes: Option<&ChangeSet>,
    seen: &mut HashSet<String>,
) -> Vec<QualifiedContent> {
    let mut found: Vec<(PathBuf, Status)> = project
        .jar_dependencies()
        .into_iter()
        .map(|jar| {
            let status = match changes {
                Some(changes) => changes.file_status(&relative(&project.root, &jar)),
                None => Status::Added,
            };
            (jar, status)
        })
        .collect();

    if let Some(changes) = changes {
        let libs = relative(&project.root, &project.libs_dir());
        for change in changes.below(&libs) {
            let top_level_jar = change.path.ends_with(".jar") && !change.path.contains('/');
            if top_level_jar && change.kind == ChangeKind::Removed {
                found.push((project.libs_dir().join(&change.path), Status::Removed));
            }
        }
    }

    found
        .into_iter()
        .filter_map(|(jar, status)| {
            let file_name = jar.file_name()?.to_string_lossy().to_string();
            if !seen.insert(file_name.clone()) {
                debug!("Skipping duplicate jar {:?}", jar);
                return None;
            }
            let info = ContentInfo::new(format!("jar-{}", file_name), jar, ContentType::Classes, scope);
            Some(QualifiedContent::jar(info, status))
        })
        .collect()
}

/// Byte-code of the project and its libraries. Without change-sets every
/// artifact is new.
pub fn seed_pipeline_input(
    project: &Project,
    libraries: &[Project],
    changes: Option<&ChangeSet>,
    library_changes: &[LibraryChanges],
) -> Vec<QualifiedContent> {
    let mut input = Vec::new();
    let mut seen = HashSet::new();

    input.extend(class_dir(
        "project-classes".to_string(),
        &project.class_dir(),
        Scope::Project,
        &project.root,
        changes,
    ));
    input.extend(jars(project, Scope::ExternalLibraries, changes, &mut seen));

    for library in libraries {
        let library_changes = match changes {
            Some(_) => library_changes
                .iter()
                .find(|l| l.name == library.name())
                .and_then(|l| l.changes.as_ref()),
            None => None,
        };
        input.extend(class_dir(
            format!("library-{}", library.name()),
            &library.class_dir(),
            Scope::SubProjects,
            &library.root,
            library_changes,
        ));
        input.extend(jars(library, Scope::ExternalLibraries, library_changes, &mut seen));
    }

    debug!("Pipeline input: {:?}", input.iter().map(|c| c.name()).collect::<Vec<_>>());
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_support::{project as write_project, toolchain, Calls};
    use andworx_core::BuildStatus;

    fn runner(calls: &Calls) -> (BuildRunner, Arc<crate::ops::test_support::FakeMerger>) {
        let (toolchain, merger) = toolchain(calls);
        let mut config = BuilderConfig::default();
        config.tasks.worker_threads = Some(2);
        (BuildRunner::new(config, toolchain), merger)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_incremental_builds() {
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let calls = Calls::default();
        let (runner, _) = runner(&calls);

        let first = runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();
        assert!(first.is_success(), "{:?}", first.status);
        assert_eq!(
            first.executed,
            vec![
                "Merge manifest",
                "Create BuildConfig",
                "Compile AIDL",
                "Compile resources",
                "Bind resources",
                "Convert to dex",
                "Package",
            ]
        );
        assert!(dir.path().join("bin/app-debug.apk").exists());
        assert!(dir.path().join("gen/com/example/app/BuildConfig.java").exists());
        assert!(dir.path().join("gen/com/example/app/R.java").exists());

        let second = runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();
        assert!(second.is_success());
        assert!(second.executed.is_empty(), "{:?}", second.executed);

        std::fs::write(
            dir.path().join("bin/classes/com/example/app/Main.class"),
            vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34],
        )
        .unwrap();
        calls.lock().clear();
        let third = runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();
        assert!(third.is_success());
        assert_eq!(third.executed, vec!["Convert to dex", "Package"]);
        assert!(calls.lock().iter().any(|c| c.starts_with("dex ")));
    }

    #[test]
    fn test_failed_build_keeps_rebuild_intent() {
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let calls = Calls::default();
        let (runner, merger) = runner(&calls);
        merger.errors.lock().push("Duplicate activity".into());

        let failed = runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();
        assert_eq!(
            failed.status,
            BuildStatus::StageFailed {
                stage: "Merge manifest".into()
            }
        );
        let state = StateStore::new(dir.path(), ".andworx");
        assert!(state.load().merge_manifest);
        assert!(!state.snapshot_dir().join("self.json").exists());

        let retried = runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();
        assert!(retried.is_success());
        assert_eq!(retried.executed.first().map(String::as_str), Some("Merge manifest"));
    }

    #[test]
    fn test_missing_output_is_rebuilt() {
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let calls = Calls::default();
        let (runner, _) = runner(&calls);
        runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();

        std::fs::remove_file(dir.path().join("bin/app-debug.apk")).unwrap();
        let outcome = runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();
        assert_eq!(outcome.executed, vec!["Package"]);
    }

    #[test]
    fn test_full_option_rebuilds_everything() {
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let calls = Calls::default();
        let (runner, _) = runner(&calls);
        runner.build(dir.path(), rt.handle().clone(), &BuildOptions::default()).unwrap();

        let outcome = runner
            .build(dir.path(), rt.handle().clone(), &BuildOptions { full: true })
            .unwrap();
        assert_eq!(outcome.executed.len(), 7);
    }

    #[test]
    fn test_seed_marks_changed_class_folders() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        std::fs::create_dir_all(dir.path().join("libs")).unwrap();
        std::fs::write(dir.path().join("libs/support.jar"), b"jar").unwrap();
        let project = Project::open(dir.path()).unwrap();

        let changes = ChangeSet::new()
            .with("bin/classes/com/example/app/Main.class", ChangeKind::Changed)
            .with("libs/old.jar", ChangeKind::Removed);
        let input = seed_pipeline_input(&project, &[], Some(&changes), &[]);

        let names: Vec<&str> = input.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["project-classes", "jar-support.jar", "jar-old.jar"]);
        assert_eq!(input[0].status(), Status::Changed);
        assert_eq!(input[1].status(), Status::NotChanged);
        assert_eq!(input[2].status(), Status::Removed);
        match &input[0] {
            QualifiedContent::Directory(dir) => {
                assert_eq!(
                    dir.changed_files.get(Path::new("com/example/app/Main.class")),
                    Some(&Status::Changed)
                );
            }
            other => panic!("unexpected artifact {:?}", other),
        }

        let full = seed_pipeline_input(&project, &[], None, &[]);
        assert!(full.iter().all(|c| c.status() == Status::Added));
    }
}
