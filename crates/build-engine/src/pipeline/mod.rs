//! Transform pipeline
//!
//! Byte-code stages are transforms: each consumes the artifacts of the
//! current pipeline input that match its content types and scopes and
//! produces a new artifact set for the next stage. Stages only meet through
//! the pipeline input held by the build context.

mod d8;
mod desugar;
mod dex;

pub use d8::{
    bucket_count, bucket_of, class_entries, dex_files, ConversionSettings, D8Task,
    DexConversionParameters, BUCKET_THRESHOLD,
};
pub use desugar::DesugarTransform;
pub use dex::DexTransform;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use andworx_core::{BuildError, BuildTask, ContentType, QualifiedContent, Result, Scope, Status};

/// A byte-code processing stage
pub trait Transform: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Content types this transform consumes
    fn input_types(&self) -> &[ContentType];

    /// Scopes this transform consumes
    fn scopes(&self) -> &[Scope];

    /// Process the invocation's inputs, returning the artifacts that
    /// replace them in the pipeline input
    fn transform(&self, invocation: &TransformInvocation) -> Result<Vec<QualifiedContent>>;
}

/// Everything a transform sees in one run
#[derive(Debug, Clone)]
pub struct TransformInvocation {
    /// Artifacts to process
    pub inputs: Vec<QualifiedContent>,
    /// Artifacts only referenced, never processed
    pub referenced: Vec<QualifiedContent>,
    pub boot_classpath: Vec<PathBuf>,
    /// Directory owned by this transform
    pub output_dir: PathBuf,
    /// False when previous outputs must be discarded
    pub incremental: bool,
    pub min_sdk: u32,
    pub debuggable: bool,
}

impl TransformInvocation {
    /// Class-path for processing `input`: every other artifact
    pub fn classpath_for(&self, input: &QualifiedContent) -> Vec<PathBuf> {
        self.inputs
            .iter()
            .chain(self.referenced.iter())
            .filter(|c| c.name() != input.name() && c.status() != Status::Removed)
            .map(|c| c.file().to_path_buf())
            .collect()
    }

    /// Stable file name for the output of `input`
    pub fn output_name(input: &QualifiedContent) -> String {
        input
            .name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }
}

/// Build task running one transform invocation
pub struct PipelineBuildTask {
    name: String,
    transform: Arc<dyn Transform>,
    invocation: TransformInvocation,
}

impl PipelineBuildTask {
    pub fn new(transform: Arc<dyn Transform>, invocation: TransformInvocation) -> Self {
        Self {
            name: format!("transform:{}", transform.name()),
            transform,
            invocation,
        }
    }
}

impl BuildTask for PipelineBuildTask {
    type Output = Vec<QualifiedContent>;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(self) -> Result<Self::Output> {
        std::fs::create_dir_all(&self.invocation.output_dir)
            .map_err(|e| BuildError::io(&self.invocation.output_dir, e))?;
        self.transform.transform(&self.invocation)
    }
}

/// Remove a file or directory tree if present
pub(crate) fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(path, e)),
    }
}
