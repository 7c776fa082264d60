//! aidl interface compiler

use std::path::{Path, PathBuf};

use andworx_core::{BuildError, Result};

use super::AidlCompiler;
use crate::command::ToolCommand;

pub struct AidlTool {
    path: PathBuf,
    framework: Option<PathBuf>,
}

impl AidlTool {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            framework: None,
        }
    }

    /// Preprocessed framework parcelables to import
    pub fn with_framework(mut self, framework: Option<PathBuf>) -> Self {
        self.framework = framework;
        self
    }
}

impl AidlCompiler for AidlTool {
    fn compile(&self, source: &Path, import_dirs: &[PathBuf], output_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(output_dir).map_err(|e| BuildError::io(output_dir, e))?;

        let mut command = ToolCommand::new("aidl", &self.path);
        if let Some(framework) = &self.framework {
            command = command.arg(format!("-p{}", framework.display()));
        }
        for dir in import_dirs {
            command = command.arg(format!("-I{}", dir.display()));
        }
        command
            .arg(format!("-o{}", output_dir.display()))
            .arg(source)
            .run()?;
        Ok(())
    }
}
