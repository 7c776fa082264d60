//! Compile AIDL interfaces into java sources

use std::sync::Arc;
use tracing::info;

use andworx_core::{BuildContext, BuildOp, Result, StandardBuildTask};

use super::{copy_tree, find_sources, reset_dir};
use crate::layout::ProjectLayout;
use crate::toolchain::AidlCompiler;

pub struct AidlOp {
    compiler: Arc<dyn AidlCompiler>,
    layout: ProjectLayout,
}

impl AidlOp {
    pub fn new(compiler: Arc<dyn AidlCompiler>, layout: ProjectLayout) -> Self {
        Self { compiler, layout }
    }
}

impl BuildOp for AidlOp {
    fn description(&self) -> &str {
        "Compile AIDL"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let output_dir = self.layout.aidl_dir();
        reset_dir(&output_dir)?;

        let source_dirs = ctx.project().aidl_dirs();
        let sources = find_sources(&source_dirs, &["aidl"]);
        if sources.is_empty() {
            return Ok(true);
        }

        let mut import_dirs = source_dirs;
        for library in ctx.libraries() {
            import_dirs.extend(library.aidl_dirs());
        }

        let tasks = sources
            .into_iter()
            .map(|source| {
                let compiler = self.compiler.clone();
                let import_dirs = import_dirs.clone();
                let output_dir = output_dir.clone();
                let name = format!("aidl:{}", source.display());
                StandardBuildTask::new(name, move || {
                    compiler.compile(&source, &import_dirs, &output_dir)
                })
            })
            .collect::<Vec<_>>();

        let count = tasks.len();
        ctx.task_factory().run_all(tasks)?;
        info!("Compiled {} AIDL files", count);
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        copy_tree(&self.layout.aidl_dir(), &ctx.project().gen_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use andworx_core::BuildPhase;

    #[test]
    fn test_one_task_per_interface() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        project(dir.path());
        let package = dir.path().join("src/com/example/app");
        std::fs::create_dir_all(&package).unwrap();
        std::fs::write(package.join("IRemote.aidl"), "interface IRemote {}").unwrap();
        std::fs::write(package.join("IOther.aidl"), "interface IOther {}").unwrap();
        std::fs::write(package.join("Main.java"), "class Main {}").unwrap();

        let calls = Calls::default();
        let mut ctx = context(dir.path(), rt.handle().clone());
        let mut op = AidlOp::new(
            Arc::new(FakeAidl {
                calls: calls.clone(),
            }),
            ProjectLayout::new(ctx.project()),
        );

        let factory = ctx.task_factory().clone();
        let _scope = factory.start();
        ctx.set_phase(BuildPhase::Executing);
        assert!(op.execute(&mut ctx).unwrap());
        assert_eq!(calls.lock().len(), 2);

        ctx.set_phase(BuildPhase::Committing);
        op.commit(&mut ctx).unwrap();
        assert!(dir.path().join("gen/IRemote.java").exists());
        assert!(dir.path().join("gen/IOther.java").exists());
    }
}
