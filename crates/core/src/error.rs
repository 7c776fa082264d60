//! Error types for Andworx
//!
//! Centralized error handling using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the build pipeline
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path:?}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Manifest merge failed:\n{0}")]
    ManifestMerge(String),

    #[error("Resource compilation failed: {0}")]
    Resource(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing input: {0:?}")]
    MissingInput(PathBuf),

    #[error("Build aborted: {0}")]
    Abort(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Create a tool failure
    pub fn tool(tool: impl Into<String>, message: impl ToString) -> Self {
        BuildError::Tool {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error ends the current project's build without being
    /// treated as an application error.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            BuildError::Abort(_) | BuildError::Cancelled | BuildError::Timeout(_)
        )
    }

    /// Whether this error came from the file system
    pub fn is_io(&self) -> bool {
        matches!(self, BuildError::Io(_) | BuildError::IoAt { .. })
    }

    /// Message for the person running the build
    pub fn user_message(&self) -> String {
        match self {
            BuildError::Io(e) => format!("File operation failed: {}", e),
            BuildError::IoAt { path, source } => {
                format!("File operation failed on {}: {}", path.display(), source)
            }
            BuildError::Config(msg) => format!("Configuration error: {}", msg),
            BuildError::TomlParse(e) => format!("Could not read TOML file: {}", e),
            BuildError::TomlSerialize(e) => format!("Could not write TOML file: {}", e),
            BuildError::Json(e) => format!("Could not read or write build snapshot: {}", e),
            BuildError::Zip(e) => format!("Archive could not be read or written: {}", e),
            BuildError::Manifest(msg) => format!("Invalid AndroidManifest.xml: {}", msg),
            BuildError::ManifestMerge(msg) => format!("Manifests could not be merged:\n{}", msg),
            BuildError::Resource(msg) => format!("Resources could not be compiled: {}", msg),
            BuildError::Tool { tool, message } => format!("{} reported an error: {}", tool, message),
            BuildError::ToolNotFound(tool) => {
                format!("{} not found. Check the Android SDK configuration.", tool)
            }
            BuildError::MissingInput(path) => {
                format!("Required build input is missing: {}", path.display())
            }
            BuildError::Abort(reason) => format!("Build stopped: {}", reason),
            BuildError::Timeout(what) => {
                format!("Build stopped, {}. Raise tasks.timeout_secs to allow more time.", what)
            }
            BuildError::InvalidState(msg) => format!("Build is in an unexpected state: {}", msg),
            BuildError::Internal(msg) => format!("Internal error: {}", msg),
            BuildError::Cancelled => "Build was cancelled".to_string(),
        }
    }
}
