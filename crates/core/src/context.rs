//! Build Context
//!
//! The per-project state a build mutates as its stages run: persisted dirty
//! flags, the shared services handed to every stage, and the pipeline input
//! (the artifacts currently available to the next stage).

use std::sync::Arc;
use tracing::{debug, error};

use crate::content::QualifiedContent;
use crate::error::{BuildError, Result};
use crate::events::{BuildEvent, EventBus};
use crate::project::Project;
use crate::state::{DirtyFlag, ProjectState, StateStore};
use crate::task::TaskFactory;

/// Phase of the current build, as driven by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Stages are being queued
    Idle,
    /// Stages are executing
    Executing,
    /// Executed stages are committing their outputs
    Committing,
    Done,
}

/// Services shared by every stage of a build
#[derive(Clone)]
pub struct BuildServices {
    pub task_factory: Arc<TaskFactory>,
    pub events: Arc<EventBus>,
}

/// Mutable state of one project build
pub struct BuildContext {
    project: Arc<Project>,
    libraries: Arc<Vec<Project>>,
    services: BuildServices,
    store: StateStore,
    state: ProjectState,
    phase: BuildPhase,
    incremental: bool,
    pipeline_input: Vec<QualifiedContent>,
    problems: Vec<String>,
}

impl BuildContext {
    pub fn new(
        project: Arc<Project>,
        libraries: Arc<Vec<Project>>,
        services: BuildServices,
        store: StateStore,
        state: ProjectState,
    ) -> Self {
        Self {
            project,
            libraries,
            services,
            store,
            state,
            phase: BuildPhase::Idle,
            incremental: true,
            pipeline_input: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Mark the build as a full (non-incremental) one
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_name(&self) -> &str {
        self.project.name()
    }

    /// Library projects, dependency-first
    pub fn libraries(&self) -> &[Project] {
        &self.libraries
    }

    pub fn task_factory(&self) -> &Arc<TaskFactory> {
        &self.services.task_factory
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.services.events
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: BuildPhase) {
        debug!("Build phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn is_dirty(&self, flag: DirtyFlag) -> bool {
        self.state.get(flag)
    }

    /// Clear a dirty flag and persist the state immediately. Flags only
    /// come down while committing.
    pub fn clear_flag(&mut self, flag: DirtyFlag) -> Result<()> {
        if self.phase != BuildPhase::Committing {
            return Err(BuildError::InvalidState(format!(
                "flag {} cleared outside the commit phase",
                flag.key()
            )));
        }
        if !self.state.get(flag) {
            return Ok(());
        }
        self.state.set(flag, false);
        debug!("Cleared {} for {}", flag.key(), self.project_name());
        self.store.save(&self.state)
    }

    /// Record the package of the last merged manifest
    pub fn set_manifest_package(&mut self, package: &str) -> Result<()> {
        if self.state.manifest_package.as_deref() == Some(package) {
            return Ok(());
        }
        self.state.manifest_package = Some(package.to_string());
        self.store.save(&self.state)
    }

    /// Record the debuggable mode the build config was generated for
    pub fn set_build_config_mode(&mut self, debuggable: bool) -> Result<()> {
        if self.state.build_config_mode == debuggable {
            return Ok(());
        }
        self.state.build_config_mode = debuggable;
        self.store.save(&self.state)
    }

    /// Artifacts available to the next stage
    pub fn pipeline_input(&self) -> &[QualifiedContent] {
        &self.pipeline_input
    }

    /// Hand the current pipeline input to a stage, leaving it empty
    pub fn take_pipeline_input(&mut self) -> Vec<QualifiedContent> {
        std::mem::take(&mut self.pipeline_input)
    }

    pub fn set_pipeline_input(&mut self, input: Vec<QualifiedContent>) {
        self.pipeline_input = input;
    }

    /// Record a problem to show to the user
    pub fn report_problem(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}: {}", self.project_name(), message);
        self.services.events.emit(BuildEvent::Problem {
            project: self.project_name().to_string(),
            message: message.clone(),
        });
        self.problems.push(message);
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    pub fn emit(&self, event: BuildEvent) {
        self.services.events.emit(event);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::Path;

    /// Context over a default project rooted at `root`, with a runtime
    /// owned by the caller
    pub fn context(root: &Path, handle: tokio::runtime::Handle) -> BuildContext {
        let project = Project::open(root).unwrap();
        let services = BuildServices {
            task_factory: Arc::new(TaskFactory::new(handle, None)),
            events: Arc::new(EventBus::new()),
        };
        let store = StateStore::new(root, ".andworx");
        let state = store.load();
        BuildContext::new(Arc::new(project), Arc::new(Vec::new()), services, store, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_clear_only_while_committing() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_support::context(dir.path(), rt.handle().clone());

        ctx.set_phase(BuildPhase::Executing);
        assert!(matches!(
            ctx.clear_flag(DirtyFlag::ConvertToDex),
            Err(BuildError::InvalidState(_))
        ));
        assert!(ctx.is_dirty(DirtyFlag::ConvertToDex));

        ctx.set_phase(BuildPhase::Committing);
        ctx.clear_flag(DirtyFlag::ConvertToDex).unwrap();
        assert!(!ctx.is_dirty(DirtyFlag::ConvertToDex));

        let persisted = StateStore::new(dir.path(), ".andworx").load();
        assert!(!persisted.convert_to_dex);
        assert!(persisted.build_apk);
    }

    #[test]
    fn test_problems_are_recorded_and_emitted() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_support::context(dir.path(), rt.handle().clone());
        let sub = ctx.events().subscribe();

        ctx.report_problem("duplicate activity declaration");

        assert_eq!(ctx.problems().len(), 1);
        assert!(matches!(sub.try_recv(), Ok(BuildEvent::Problem { .. })));
    }
}
