//! llvm-rs-cc RenderScript compiler

use std::path::PathBuf;

use andworx_core::{BuildError, Result};

use super::{RenderScriptCompiler, RenderScriptRequest};
use crate::command::ToolCommand;

pub struct LlvmRsCc {
    path: PathBuf,
    /// Directory holding the RenderScript headers and clang includes
    include_root: PathBuf,
}

impl LlvmRsCc {
    pub fn new(path: PathBuf, include_root: PathBuf) -> Self {
        Self { path, include_root }
    }
}

impl RenderScriptCompiler for LlvmRsCc {
    fn compile(&self, request: &RenderScriptRequest) -> Result<()> {
        for dir in [&request.java_output, &request.resource_output] {
            std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }
        let raw = request.resource_output.join("raw");
        std::fs::create_dir_all(&raw).map_err(|e| BuildError::io(&raw, e))?;

        let includes = [
            self.include_root.join("include"),
            self.include_root.join("clang-include"),
        ];

        let mut command = ToolCommand::new("llvm-rs-cc", &self.path)
            .each("-I", &includes)
            .each("-I", &request.import_dirs)
            .arg("-java-reflection-path-base")
            .arg(&request.java_output)
            .arg("-o")
            .arg(&raw)
            .arg("-target-api")
            .arg(request.target_api.to_string());

        if request.debuggable {
            command = command.arg("-g");
        }
        command.args(&request.sources).run()?;
        Ok(())
    }
}
