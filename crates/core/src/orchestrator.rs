//! Build-op Orchestrator
//!
//! Runs an ordered sequence of build stages against a [`BuildContext`] in
//! two phases:
//! - execute: stages run one after another; the first failure stops the
//!   chain and no further stage executes
//! - commit: every stage that executed successfully commits its outputs,
//!   most recently executed first. A commit failure is reported and the
//!   remaining commits still run.

use tracing::{error, info, warn};

use crate::context::{BuildContext, BuildPhase};
use crate::error::{BuildError, Result};
use crate::events::BuildEvent;

/// One stage of the build pipeline
pub trait BuildOp: Send {
    /// Human readable description used in logs and reports
    fn description(&self) -> &str;

    /// Do the work of the stage, writing only to intermediate locations.
    /// `Ok(false)` marks the stage as failed and stops the chain.
    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool>;

    /// Copy the stage's outputs to their final locations and clear the
    /// dirty flags it satisfied
    fn commit(&mut self, _ctx: &mut BuildContext) -> Result<()> {
        Ok(())
    }
}

/// How the execute phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    /// Every queued stage executed
    Succeeded,
    /// A stage reported failure
    StageFailed { stage: String },
    /// A stage raised the abort signal or timed out
    Aborted { stage: String, reason: String },
    /// The build was cancelled while a stage was running
    Cancelled { stage: String },
    /// A stage failed with an unexpected error
    Failed { stage: String, message: String },
}

/// A commit that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    pub stage: String,
    pub error: String,
}

/// Result of running a queue against one project
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub project: String,
    pub status: BuildStatus,
    /// Stages that executed successfully, in execution order
    pub executed: Vec<String>,
    /// Stages whose commit succeeded, in commit order
    pub committed: Vec<String>,
    pub commit_failures: Vec<CommitFailure>,
    pub problems: Vec<String>,
}

impl BuildOutcome {
    /// Every stage executed and every commit went through
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Succeeded && self.commit_failures.is_empty()
    }

    /// The build stopped without an application error
    pub fn was_aborted(&self) -> bool {
        matches!(
            self.status,
            BuildStatus::Aborted { .. } | BuildStatus::Cancelled { .. }
        )
    }
}

/// Ordered sequence of build stages
#[derive(Default)]
pub struct BuildOpQueue {
    ops: Vec<Box<dyn BuildOp>>,
}

impl BuildOpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages execute in the order they were pushed
    pub fn push(&mut self, op: Box<dyn BuildOp>) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.ops.iter().map(|op| op.description().to_string()).collect()
    }

    /// Run every stage, then commit the ones that executed
    pub fn run(self, ctx: &mut BuildContext) -> BuildOutcome {
        let project = ctx.project_name().to_string();
        info!("Building {} ({} stages)", project, self.ops.len());
        ctx.emit(BuildEvent::BuildStarted {
            project: project.clone(),
        });

        ctx.set_phase(BuildPhase::Executing);
        let mut status = BuildStatus::Succeeded;
        let mut executed: Vec<Box<dyn BuildOp>> = Vec::with_capacity(self.ops.len());
        let mut executed_names = Vec::with_capacity(self.ops.len());

        for mut op in self.ops {
            let stage = op.description().to_string();
            info!("{}: {}", project, stage);
            ctx.emit(BuildEvent::StageStarted {
                project: project.clone(),
                stage: stage.clone(),
            });

            let failure = match op.execute(ctx) {
                Ok(true) => {
                    ctx.emit(BuildEvent::StageCompleted {
                        project: project.clone(),
                        stage: stage.clone(),
                    });
                    executed_names.push(stage);
                    executed.push(op);
                    continue;
                }
                Ok(false) => {
                    warn!("{}: {} failed", project, stage);
                    BuildStatus::StageFailed { stage: stage.clone() }
                }
                Err(BuildError::Cancelled) => {
                    info!("{}: build cancelled during {}", project, stage);
                    BuildStatus::Cancelled { stage: stage.clone() }
                }
                Err(e) if e.is_abort() => {
                    warn!("{}: build aborted during {}: {}", project, stage, e);
                    BuildStatus::Aborted {
                        stage: stage.clone(),
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    error!("{}: {} failed: {}", project, stage, e);
                    ctx.report_problem(format!("{}: {}", stage, e.user_message()));
                    BuildStatus::Failed {
                        stage: stage.clone(),
                        message: e.to_string(),
                    }
                }
            };

            ctx.emit(BuildEvent::StageFailed {
                project: project.clone(),
                stage,
                reason: format!("{:?}", failure),
            });
            status = failure;
            break;
        }

        ctx.set_phase(BuildPhase::Committing);
        let mut committed = Vec::with_capacity(executed.len());
        let mut commit_failures = Vec::new();

        while let Some(mut op) = executed.pop() {
            let stage = op.description().to_string();
            match op.commit(ctx) {
                Ok(()) => committed.push(stage),
                Err(e) => {
                    error!("{}: failed to commit {}: {}", project, stage, e);
                    ctx.emit(BuildEvent::CommitFailed {
                        project: project.clone(),
                        stage: stage.clone(),
                        error: e.to_string(),
                    });
                    commit_failures.push(CommitFailure {
                        stage,
                        error: e.to_string(),
                    });
                }
            }
        }

        ctx.set_phase(BuildPhase::Done);

        let outcome = BuildOutcome {
            project: project.clone(),
            status,
            executed: executed_names,
            committed,
            commit_failures,
            problems: ctx.problems().to_vec(),
        };
        if outcome.is_success() {
            info!("{}: build succeeded", project);
        }
        ctx.emit(BuildEvent::BuildFinished {
            project,
            success: outcome.is_success(),
        });
        outcome
    }
}
