//! Compile RenderScript sources
//!
//! All scripts go through a single compiler run. Reflected java classes are
//! committed to `gen/`; compiled bitcode stays in intermediates, where the
//! resource compiler picks it up as raw resources.

use std::sync::Arc;
use tracing::info;

use andworx_core::{BuildContext, BuildOp, Result, StandardBuildTask};

use super::{copy_tree, find_sources, reset_dir};
use crate::layout::ProjectLayout;
use crate::toolchain::{RenderScriptCompiler, RenderScriptRequest};

pub struct RenderScriptOp {
    compiler: Arc<dyn RenderScriptCompiler>,
    layout: ProjectLayout,
}

impl RenderScriptOp {
    pub fn new(compiler: Arc<dyn RenderScriptCompiler>, layout: ProjectLayout) -> Self {
        Self { compiler, layout }
    }
}

impl BuildOp for RenderScriptOp {
    fn description(&self) -> &str {
        "Compile RenderScript"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let java_output = self.layout.renderscript_java_dir();
        let resource_output = self.layout.renderscript_res_dir();
        reset_dir(&java_output)?;
        reset_dir(&resource_output)?;

        let project = ctx.project();
        let source_dirs = project.renderscript_dirs();
        let sources = find_sources(&source_dirs, &["rs", "fs"]);
        if sources.is_empty() {
            return Ok(true);
        }

        let mut import_dirs = source_dirs;
        for library in ctx.libraries() {
            import_dirs.extend(library.renderscript_dirs());
        }

        let count = sources.len();
        let request = RenderScriptRequest {
            sources,
            import_dirs,
            target_api: project.descriptor.min_sdk.max(11),
            debuggable: project.is_debuggable(),
            java_output,
            resource_output,
        };
        let compiler = self.compiler.clone();
        ctx.task_factory()
            .run(StandardBuildTask::new("renderscript", move || compiler.compile(&request)))?;

        info!("Compiled {} RenderScript files", count);
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        copy_tree(&self.layout.renderscript_java_dir(), &ctx.project().gen_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use andworx_core::{BuildError, BuildPhase, DirtyFlag};
    use parking_lot::Mutex;

    /// Records requests and writes one reflected class and one bitcode file
    /// per script
    #[derive(Default)]
    struct FakeRenderScript {
        requests: Mutex<Vec<RenderScriptRequest>>,
    }

    impl RenderScriptCompiler for FakeRenderScript {
        fn compile(&self, request: &RenderScriptRequest) -> Result<()> {
            self.requests.lock().push(request.clone());
            let java_dir = request.java_output.join("com/example/app");
            let raw_dir = request.resource_output.join("raw");
            for dir in [&java_dir, &raw_dir] {
                std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
            }
            for source in &request.sources {
                let stem = source.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                std::fs::write(java_dir.join(format!("ScriptC_{}.java", stem)), "class Script {}")?;
                std::fs::write(raw_dir.join(format!("{}.bc", stem)), b"BC")?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_scripts_compile_once_and_commit_to_gen() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        project(dir.path());
        std::fs::write(dir.path().join("andworx.toml"), "name = \"app\"\nmin_sdk = 8\n").unwrap();
        let package = dir.path().join("src/com/example/app");
        std::fs::create_dir_all(&package).unwrap();
        std::fs::write(package.join("blur.rs"), "#pragma version(1)").unwrap();
        std::fs::write(package.join("tint.fs"), "#pragma version(1)").unwrap();
        std::fs::write(package.join("common.rsh"), "").unwrap();

        let compiler = Arc::new(FakeRenderScript::default());
        let mut ctx = context(dir.path(), rt.handle().clone());
        let layout = ProjectLayout::new(ctx.project());
        let mut op = RenderScriptOp::new(compiler.clone(), layout.clone());

        let factory = ctx.task_factory().clone();
        let _scope = factory.start();
        ctx.set_phase(BuildPhase::Executing);
        assert!(op.execute(&mut ctx).unwrap());

        {
            let requests = compiler.requests.lock();
            assert_eq!(requests.len(), 1);
            let names: Vec<String> = requests[0]
                .sources
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                .collect();
            assert_eq!(names, vec!["blur.rs", "tint.fs"]);
            assert_eq!(requests[0].target_api, 11);
        }
        let generated = dir.path().join("gen/com/example/app/ScriptC_blur.java");
        assert!(!generated.exists());
        assert!(layout.renderscript_res_dir().join("raw/blur.bc").exists());

        ctx.set_phase(BuildPhase::Committing);
        op.commit(&mut ctx).unwrap();
        assert!(generated.exists());
        assert!(dir.path().join("gen/com/example/app/ScriptC_tint.java").exists());
        assert!(!dir.path().join("gen/raw").exists());
        assert!(DirtyFlag::ALL.iter().all(|f| ctx.is_dirty(*f)));
    }

    #[test]
    fn test_no_scripts_skips_the_compiler() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        project(dir.path());

        let compiler = Arc::new(FakeRenderScript::default());
        let mut ctx = context(dir.path(), rt.handle().clone());
        let layout = ProjectLayout::new(ctx.project());
        std::fs::create_dir_all(layout.renderscript_java_dir().join("stale")).unwrap();
        let mut op = RenderScriptOp::new(compiler.clone(), layout.clone());

        ctx.set_phase(BuildPhase::Executing);
        assert!(op.execute(&mut ctx).unwrap());
        assert!(compiler.requests.lock().is_empty());
        assert!(!layout.renderscript_java_dir().join("stale").exists());
    }
}
