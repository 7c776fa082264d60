//! aapt2 resource compiler and linker

use std::path::{Path, PathBuf};
use tracing::warn;

use andworx_core::{BuildError, Result};

use super::{LinkRequest, ResourceCompiler};
use crate::command::{ToolCommand, ToolOutput};

pub struct Aapt2 {
    path: PathBuf,
}

impl Aapt2 {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Tool failures are resource errors; anything else passes through
    fn run(&self, command: ToolCommand) -> Result<ToolOutput> {
        let output = command.run().map_err(|e| match e {
            BuildError::Tool { message, .. } => BuildError::Resource(message),
            other => other,
        })?;
        for line in output.stderr.lines().filter(|l| l.contains("warn")) {
            warn!("aapt2: {}", line.trim());
        }
        Ok(output)
    }
}

impl ResourceCompiler for Aapt2 {
    fn compile(&self, res_dir: &Path, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        self.run(
            ToolCommand::new("aapt2", &self.path)
                .arg("compile")
                .arg("--dir")
                .arg(res_dir)
                .arg("-o")
                .arg(output),
        )?;
        Ok(())
    }

    fn link(&self, request: &LinkRequest) -> Result<()> {
        for dir in [
            request.output_apk.parent(),
            Some(request.r_source_dir.as_path()),
            request.symbols.parent(),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }

        let mut command = ToolCommand::new("aapt2", &self.path)
            .arg("link")
            .arg("-o")
            .arg(&request.output_apk)
            .arg("--manifest")
            .arg(&request.manifest)
            .each("-I", &request.boot_classpath)
            .arg("--java")
            .arg(&request.r_source_dir)
            .arg("--output-text-symbols")
            .arg(&request.symbols)
            .arg("--min-sdk-version")
            .arg(request.min_sdk.to_string())
            .arg("--target-sdk-version")
            .arg(request.target_sdk.to_string())
            .arg("--auto-add-overlay");

        if request.debuggable {
            command = command.arg("--debug-mode");
        }
        if !request.extra_packages.is_empty() {
            command = command
                .arg("--extra-packages")
                .arg(request.extra_packages.join(":"));
        }

        command = command.args(&request.compiled).each("-R", &request.overlays);
        self.run(command)?;
        Ok(())
    }
}
