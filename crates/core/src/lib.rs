//! Andworx Core - build model and orchestration
//!
//! This crate holds what every build stage shares: the project model, the
//! persisted dirty state and the change tracker that drives it, the task
//! factory running background work, and the orchestrator that executes and
//! commits the stages of a build.

pub mod config;
pub mod content;
pub mod context;
pub mod delta;
pub mod error;
pub mod events;
pub mod manifest;
pub mod orchestrator;
pub mod project;
pub mod state;
pub mod task;

pub use config::{BuilderConfig, PatternGroup, PatternGroups, SdkConfig, TaskConfig};
pub use content::{ContentInfo, ContentType, QualifiedContent, Scope, Status};
pub use context::{BuildContext, BuildPhase, BuildServices};
pub use delta::{
    ChangeKind, ChangeSet, DirtyDecision, DirtyFlags, DirtyInputs, DirtyTracker, LibraryChanges,
    Snapshot,
};
pub use error::{BuildError, Result};
pub use events::{BuildEvent, EventBus, EventSubscription};
pub use manifest::ManifestInfo;
pub use orchestrator::{BuildOp, BuildOpQueue, BuildOutcome, BuildStatus};
pub use project::{BuildVariant, Project, ProjectDescriptor};
pub use state::{DirtyFlag, ProjectState, StateStore};
pub use task::{
    BuildTask, EnteredTask, StandardBuildTask, TaskContext, TaskFactory, TaskHandle, TaskScope,
};

/// Andworx version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Andworx";
