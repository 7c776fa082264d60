//! External process invocation
//!
//! Every command-line tool goes through [`ToolCommand`] so failures are
//! reported the same way: a missing executable becomes `ToolNotFound`, a
//! non-zero exit becomes `Tool` carrying the tool's stderr.
//!
//! Inside a build task the tool is killed as soon as the task is cancelled
//! or its wait times out.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, trace};

use andworx_core::{BuildError, Result, TaskContext};

/// Captured output of a successful tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Builder around [`tokio::process::Command`]
pub struct ToolCommand {
    tool: String,
    command: Command,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl AsRef<OsStr>) -> Self {
        Self {
            tool: tool.into(),
            command: {
                let mut command = Command::new(program);
                command.stdin(Stdio::null()).kill_on_drop(true);
                command
            },
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Add `flag value` when `value` is set
    pub fn opt(self, flag: &str, value: Option<impl AsRef<OsStr>>) -> Self {
        match value {
            Some(value) => self.arg(flag).arg(value),
            None => self,
        }
    }

    /// Add `flag path` for every path
    pub fn each(mut self, flag: &str, paths: &[PathBuf]) -> Self {
        for path in paths {
            self.command.arg(flag).arg(path);
        }
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.current_dir(dir);
        self
    }

    /// Run to completion; a non-zero exit is an error.
    ///
    /// Blocks the calling thread, which must not be a runtime worker.
    pub fn run(mut self) -> Result<ToolOutput> {
        debug!("{} {:?}", self.tool, self.command);
        let output = match TaskContext::current() {
            Some(task) => task.handle().block_on(async {
                tokio::select! {
                    biased;
                    _ = task.cancelled() => None,
                    output = self.command.output() => Some(output),
                }
            }),
            None => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| BuildError::tool(&self.tool, e))?;
                Some(runtime.block_on(self.command.output()))
            }
        };

        let Some(output) = output else {
            debug!("{} killed, its task was cancelled", self.tool);
            return Err(BuildError::Cancelled);
        };
        let output = output.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::ToolNotFound(format!(
                    "{} ({:?})",
                    self.tool,
                    self.command.as_std().get_program()
                ))
            } else {
                BuildError::tool(&self.tool, e)
            }
        })?;
        self.check(output)
    }

    fn check(&self, output: Output) -> Result<ToolOutput> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!("{} stdout: {}", self.tool, stdout);

        if !output.status.success() {
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(BuildError::tool(&self.tool, message.trim()));
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

/// Join paths with the platform's class-path separator
pub fn classpath(paths: &[PathBuf]) -> String {
    let separator = if cfg!(windows) { ";" } else { ":" };
    paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(separator)
}
