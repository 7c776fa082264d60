//! Resource compilation and linking
//!
//! Compiling turns each resource folder of the project and its libraries
//! into a flat archive. Binding links the archives against the merged
//! manifest into the resource package, the R sources and the symbol table.
//! Archive names carry their link priority: library archives are linked
//! first and project archives overlay them.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use andworx_core::{
    BuildContext, BuildError, BuildOp, DirtyFlag, ManifestInfo, Result, StandardBuildTask,
};

use super::{copy_tree, reset_dir};
use crate::layout::ProjectLayout;
use crate::toolchain::{LinkRequest, ResourceCompiler};

const LIBRARY_PREFIX: &str = "lib-";
const PROJECT_PREFIX: &str = "project-";

pub struct CompileResourcesOp {
    compiler: Arc<dyn ResourceCompiler>,
    layout: ProjectLayout,
}

impl CompileResourcesOp {
    pub fn new(compiler: Arc<dyn ResourceCompiler>, layout: ProjectLayout) -> Self {
        Self { compiler, layout }
    }

    /// Resource folders with the archive each one compiles into
    fn inputs(&self, ctx: &BuildContext) -> Vec<(PathBuf, PathBuf)> {
        let out = self.layout.compiled_res_dir();
        let mut inputs = Vec::new();

        for (i, library) in ctx.libraries().iter().enumerate() {
            for (j, dir) in library.res_dirs().into_iter().enumerate() {
                let archive = format!("{}{:03}-{:02}-{}.zip", LIBRARY_PREFIX, i, j, library.name());
                inputs.push((dir, out.join(archive)));
            }
        }

        let mut project_dirs = ctx.project().res_dirs();
        project_dirs.push(self.layout.renderscript_res_dir());
        for (j, dir) in project_dirs.into_iter().enumerate() {
            inputs.push((dir, out.join(format!("{}{:02}.zip", PROJECT_PREFIX, j))));
        }

        inputs.retain(|(dir, _)| dir.is_dir());
        inputs
    }
}

impl BuildOp for CompileResourcesOp {
    fn description(&self) -> &str {
        "Compile resources"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        reset_dir(&self.layout.compiled_res_dir())?;

        let tasks = self
            .inputs(ctx)
            .into_iter()
            .map(|(dir, archive)| {
                let compiler = self.compiler.clone();
                StandardBuildTask::new(format!("compile-res:{}", dir.display()), move || {
                    compiler.compile(&dir, &archive)
                })
            })
            .collect::<Vec<_>>();

        let count = tasks.len();
        ctx.task_factory().run_all(tasks)?;
        info!("Compiled {} resource folders", count);
        Ok(true)
    }
}

pub struct BindResourcesOp {
    compiler: Arc<dyn ResourceCompiler>,
    boot_classpath: Vec<PathBuf>,
    layout: ProjectLayout,
}

impl BindResourcesOp {
    pub fn new(
        compiler: Arc<dyn ResourceCompiler>,
        boot_classpath: Vec<PathBuf>,
        layout: ProjectLayout,
    ) -> Self {
        Self {
            compiler,
            boot_classpath,
            layout,
        }
    }

    /// Compiled archives split into base archives and overlays
    fn archives(&self) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let dir = self.layout.compiled_res_dir();
        let mut archives: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| BuildError::io(&dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        archives.sort();

        let (libraries, project): (Vec<PathBuf>, Vec<PathBuf>) =
            archives.into_iter().partition(|path| {
                path.file_name()
                    .map_or(false, |n| n.to_string_lossy().starts_with(LIBRARY_PREFIX))
            });

        if libraries.is_empty() {
            Ok((project, Vec::new()))
        } else {
            Ok((libraries, project))
        }
    }
}

impl BuildOp for BindResourcesOp {
    fn description(&self) -> &str {
        "Bind resources"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let manifest = self.layout.merged_manifest();
        if !manifest.exists() {
            return Err(BuildError::MissingInput(manifest));
        }
        let (compiled, overlays) = self.archives()?;

        let extra_packages = ctx
            .libraries()
            .iter()
            .filter_map(|library| match ManifestInfo::read(&library.manifest_path()) {
                Ok(info) => Some(info.package),
                Err(e) => {
                    warn!("No R class for library {}: {}", library.name(), e);
                    None
                }
            })
            .collect();

        reset_dir(&self.layout.r_source_dir())?;
        let project = ctx.project();
        let request = LinkRequest {
            manifest,
            compiled,
            overlays,
            boot_classpath: self.boot_classpath.clone(),
            extra_packages,
            min_sdk: project.descriptor.min_sdk,
            target_sdk: project.descriptor.target_sdk,
            debuggable: project.is_debuggable(),
            output_apk: self.layout.resource_package(),
            r_source_dir: self.layout.r_source_dir(),
            symbols: self.layout.symbols(),
        };

        let compiler = self.compiler.clone();
        ctx.task_factory()
            .run(StandardBuildTask::new("link-resources", move || compiler.link(&request)))?;
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        copy_tree(&self.layout.r_source_dir(), &ctx.project().gen_dir())?;
        ctx.clear_flag(DirtyFlag::CompileResources)
    }
}
