//! Desugar tool, run as `java -jar desugar.jar`

use std::path::PathBuf;

use andworx_core::{BuildError, Result};

use super::{DesugarRequest, Desugarer};
use crate::command::ToolCommand;

pub struct DesugarTool {
    java: PathBuf,
    jar: PathBuf,
}

impl DesugarTool {
    pub fn new(java: PathBuf, jar: PathBuf) -> Self {
        Self { java, jar }
    }
}

impl Desugarer for DesugarTool {
    fn desugar(&self, request: &DesugarRequest<'_>) -> Result<()> {
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        ToolCommand::new("desugar", &self.java)
            .arg("-jar")
            .arg(&self.jar)
            .arg("--input")
            .arg(request.input)
            .arg("--output")
            .arg(request.output)
            .each("--bootclasspath_entry", request.boot_classpath)
            .each("--classpath_entry", request.classpath)
            .arg("--min_sdk_version")
            .arg(request.min_sdk.to_string())
            .arg("--desugar_try_with_resources_if_needed")
            .arg("--copy_bridges_from_classpath")
            .run()?;
        Ok(())
    }
}
