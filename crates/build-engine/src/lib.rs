//! Andworx Build Engine
//!
//! The stages of an incremental Android build and the tools behind them:
//! manifest merging, resource compilation, AIDL and RenderScript, the
//! desugar and dex pipeline, packaging and signing.

pub mod apk;
pub mod command;
pub mod layout;
pub mod ops;
pub mod pipeline;
pub mod runner;
pub mod sdk;
pub mod signing;
pub mod toolchain;

pub use apk::{ApkBuilder, ApkEntry, ApkPackager};
pub use layout::ProjectLayout;
pub use ops::plan_queue;
pub use pipeline::{D8Task, DexConversionParameters, PipelineBuildTask, Transform, TransformInvocation};
pub use runner::{BuildOptions, BuildRunner};
pub use signing::ApkSigner;
pub use toolchain::{SigningConfig, Toolchain};
