//! Andworx - incremental Android build pipeline
//!
//! Builds Android application and library projects from their sources,
//! re-running only the stages whose inputs changed since the last build.
//!
//! ## Architecture
//!
//! Andworx is organized into specialized crates:
//!
//! - `andworx-core`: Project model, dirty-state tracking, task factory and
//!   the build-op orchestrator
//! - `andworx-build-engine`: Build stages, the desugar/dex pipeline, SDK
//!   tools and APK packaging

pub mod commands;

// Re-export main components for library usage
pub use andworx_build_engine as build;
pub use andworx_core as core;

/// Prelude module for convenient imports
pub mod prelude {
    pub use andworx_build_engine::{BuildOptions, BuildRunner, Toolchain};
    pub use andworx_core::{BuildOutcome, BuilderConfig, Project, StateStore};
}
