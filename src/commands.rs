//! CLI commands for Andworx
//!
//! Provides command-line interface functionality for automation and scripting.

use std::path::PathBuf;
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use andworx_build_engine::{BuildOptions, BuildRunner, Toolchain};
use andworx_core::{BuildEvent, BuildOutcome, BuilderConfig, DirtyFlag, Project, StateStore};

/// Build command options
pub struct BuildCommand {
    pub project_path: PathBuf,
    pub full: bool,
}

impl BuildCommand {
    /// Execute the build command
    pub async fn execute(&self, config: BuilderConfig) -> Result<BuildOutcome> {
        info!("Building project: {:?}", self.project_path);

        let toolchain = Toolchain::from_config(&config).context("Android toolchain unavailable")?;
        let runner = BuildRunner::new(config, toolchain);

        // The bus goes away with the runner, which ends the printer
        let subscription = runner.events().subscribe();
        let printer = std::thread::spawn(move || {
            while let Ok(event) = subscription.recv() {
                print_event(&event);
            }
        });

        let root = self.project_path.clone();
        let options = BuildOptions { full: self.full };
        let handle = tokio::runtime::Handle::current();
        let outcome = tokio::task::spawn_blocking(move || runner.build(&root, handle, &options))
            .await
            .context("build thread panicked")??;

        if printer.join().is_err() {
            warn!("Event printer panicked");
        }
        Ok(outcome)
    }
}

fn print_event(event: &BuildEvent) {
    match event {
        BuildEvent::StageStarted { project, stage } => println!("[{}] {}", project, stage),
        BuildEvent::StageFailed { project, stage, reason } => {
            println!("[{}] {} failed: {}", project, stage, reason)
        }
        BuildEvent::CommitFailed { project, stage, error } => {
            println!("[{}] {} could not publish its output: {}", project, stage, error)
        }
        BuildEvent::Problem { project, message } => println!("[{}] {}", project, message),
        other => debug!("{:?}", other),
    }
}

/// Clean command options
pub struct CleanCommand {
    pub project_path: PathBuf,
}

impl CleanCommand {
    /// Drop intermediates and persisted state so the next build starts over
    pub fn execute(&self, config: &BuilderConfig) -> Result<()> {
        let project = Project::open(&self.project_path)?;
        let intermediates = project.intermediates_dir();
        if intermediates.exists() {
            std::fs::remove_dir_all(&intermediates)
                .with_context(|| format!("Failed to remove {:?}", intermediates))?;
        }

        StateStore::new(&project.root, &config.state_dir).reset()?;
        info!("Cleaned project {}", project.name());
        Ok(())
    }
}

/// Status command options
pub struct StatusCommand {
    pub project_path: PathBuf,
}

impl StatusCommand {
    /// Print the persisted rebuild flags of the project
    pub fn execute(&self, config: &BuilderConfig) -> Result<()> {
        let project = Project::open(&self.project_path)?;
        let state = StateStore::new(&project.root, &config.state_dir).load();

        println!("Project: {} ({})", project.name(), project.root.display());
        if let Some(package) = &state.manifest_package {
            println!("Package: {}", package);
        }
        for flag in DirtyFlag::ALL {
            let mark = if state.get(flag) { "dirty" } else { "clean" };
            println!("  {:<20} {}", flag.key(), mark);
        }
        Ok(())
    }
}

/// Print a one-line summary and the problems of a build
pub fn report(outcome: &BuildOutcome) {
    for problem in &outcome.problems {
        println!("problem: {}", problem);
    }
    for failure in &outcome.commit_failures {
        println!("commit failed: {}: {}", failure.stage, failure.error);
    }

    if outcome.is_success() {
        if outcome.executed.is_empty() {
            println!("{} is up to date", outcome.project);
        } else {
            println!("{} built: {}", outcome.project, outcome.executed.join(", "));
        }
    } else {
        println!("{} failed: {:?}", outcome.project, outcome.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_marks_everything_dirty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("andworx.toml"), "name = \"app\"\n").unwrap();
        let config = BuilderConfig::default();
        let project = Project::open(dir.path()).unwrap();

        let store = StateStore::new(dir.path(), &config.state_dir);
        let mut state = store.load();
        for flag in DirtyFlag::ALL {
            state.set(flag, false);
        }
        store.save(&state).unwrap();
        std::fs::create_dir_all(project.intermediates_dir()).unwrap();

        CleanCommand {
            project_path: dir.path().to_path_buf(),
        }
        .execute(&config)
        .unwrap();

        assert!(!project.intermediates_dir().exists());
        assert!(store.load().any_dirty());
    }
}
