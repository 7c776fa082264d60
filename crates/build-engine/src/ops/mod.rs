//! Build Stages
//!
//! The stages of an Android build, in the order they run:
//! merge manifest, build config, AIDL, RenderScript, resource compile and
//! bind, desugar, dex and package. Each stage writes to the intermediates
//! folder while executing and copies its results to `gen/` or the output
//! folder when it commits.

mod aidl;
mod build_config;
mod manifest;
mod package;
mod renderscript;
mod resources;

pub use aidl::AidlOp;
pub use build_config::{build_config_source, CreateBuildConfigOp};
pub use manifest::MergeManifestOp;
pub use package::PackageOp;
pub use renderscript::RenderScriptOp;
pub use resources::{BindResourcesOp, CompileResourcesOp};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use andworx_core::{
    BuildContext, BuildError, BuildOp, BuildOpQueue, DirtyFlag, DirtyFlags, QualifiedContent,
    Result,
};

use crate::layout::ProjectLayout;
use crate::pipeline::{
    remove_path, D8Task, DesugarTransform, DexTransform, PipelineBuildTask, Transform,
    TransformInvocation,
};
use crate::toolchain::Toolchain;

/// Queue the stages `flags` call for, in execution order
pub fn plan_queue(
    ctx: &BuildContext,
    flags: &DirtyFlags,
    toolchain: &Toolchain,
    d8: Arc<D8Task>,
) -> BuildOpQueue {
    let project = ctx.project();
    let layout = ProjectLayout::new(project);
    let mut queue = BuildOpQueue::new();

    if ctx.is_dirty(DirtyFlag::MergeManifest) {
        queue.push(Box::new(MergeManifestOp::new(
            toolchain.manifest_merger.clone(),
            layout.clone(),
        )));
    }
    if ctx.is_dirty(DirtyFlag::CreateBuildConfig) {
        queue.push(Box::new(CreateBuildConfigOp::new(layout.clone())));
    }
    if flags.compile_aidl {
        if let Some(aidl) = &toolchain.aidl {
            queue.push(Box::new(AidlOp::new(aidl.clone(), layout.clone())));
        }
    }
    if flags.compile_renderscript {
        if let Some(renderscript) = &toolchain.renderscript {
            queue.push(Box::new(RenderScriptOp::new(renderscript.clone(), layout.clone())));
        }
    }
    if ctx.is_dirty(DirtyFlag::CompileResources) {
        queue.push(Box::new(CompileResourcesOp::new(
            toolchain.resources.clone(),
            layout.clone(),
        )));
        queue.push(Box::new(BindResourcesOp::new(
            toolchain.resources.clone(),
            toolchain.boot_classpath.clone(),
            layout.clone(),
        )));
    }

    if project.descriptor.library {
        debug!("{} is a library project, no package is built", project.name());
        return queue;
    }

    if ctx.is_dirty(DirtyFlag::ConvertToDex) {
        if let Some(desugarer) = &toolchain.desugarer {
            queue.push(Box::new(TransformOp::new(
                "Desugar",
                Arc::new(DesugarTransform::new(desugarer.clone())),
                toolchain.boot_classpath.clone(),
                &layout,
                None,
            )));
        }
        queue.push(Box::new(TransformOp::new(
            "Convert to dex",
            Arc::new(DexTransform::new(d8)),
            toolchain.boot_classpath.clone(),
            &layout,
            Some(DirtyFlag::ConvertToDex),
        )));
    }
    if ctx.is_dirty(DirtyFlag::BuildApk) {
        queue.push(Box::new(PackageOp::new(toolchain.packager.clone(), layout)));
    }

    info!("{}: queued {:?}", project.name(), queue.descriptions());
    queue
}

/// Runs one [`Transform`] over the pipeline input
pub struct TransformOp {
    description: String,
    transform: Arc<dyn Transform>,
    boot_classpath: Vec<PathBuf>,
    output_dir: PathBuf,
    clears: Option<DirtyFlag>,
}

impl TransformOp {
    pub fn new(
        description: impl Into<String>,
        transform: Arc<dyn Transform>,
        boot_classpath: Vec<PathBuf>,
        layout: &ProjectLayout,
        clears: Option<DirtyFlag>,
    ) -> Self {
        let output_dir = layout.transform_dir(transform.name());
        Self {
            description: description.into(),
            transform,
            boot_classpath,
            output_dir,
            clears,
        }
    }
}

impl BuildOp for TransformOp {
    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let types = self.transform.input_types();
        let scopes = self.transform.scopes();
        let (consumed, mut passed): (Vec<QualifiedContent>, Vec<QualifiedContent>) = ctx
            .take_pipeline_input()
            .into_iter()
            .partition(|content| content.matches(types, scopes));

        debug!(
            "{}: {} inputs consumed, {} passed through",
            self.description,
            consumed.len(),
            passed.len()
        );

        let invocation = TransformInvocation {
            inputs: consumed,
            referenced: passed.clone(),
            boot_classpath: self.boot_classpath.clone(),
            output_dir: self.output_dir.clone(),
            incremental: ctx.is_incremental(),
            min_sdk: ctx.project().descriptor.min_sdk,
            debuggable: ctx.project().is_debuggable(),
        };
        let outputs = ctx
            .task_factory()
            .run(PipelineBuildTask::new(self.transform.clone(), invocation))?;

        passed.extend(outputs);
        ctx.set_pipeline_input(passed);
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        match self.clears {
            Some(flag) => ctx.clear_flag(flag),
            None => Ok(()),
        }
    }
}

/// Copy a file, creating the destination folder
pub(crate) fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        return Err(BuildError::MissingInput(from.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    std::fs::copy(from, to).map_err(|e| BuildError::io(to, e))?;
    Ok(())
}

/// Copy every file below `from` into `to`, keeping relative paths.
/// Returns the number of files copied.
pub(crate) fn copy_tree(from: &Path, to: &Path) -> Result<usize> {
    if !from.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| BuildError::io(from, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        copy_file(entry.path(), &to.join(relative))?;
        copied += 1;
    }
    debug!("Copied {} files from {:?} to {:?}", copied, from, to);
    Ok(copied)
}

/// Empty `dir`, leaving it in place
pub(crate) fn reset_dir(dir: &Path) -> Result<()> {
    remove_path(dir)?;
    std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))
}

/// Files below `dirs` whose extension is one of `extensions`, sorted
pub(crate) fn find_sources(dirs: &[PathBuf], extensions: &[&str]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = dirs
        .iter()
        .filter(|d| d.is_dir())
        .flat_map(|d| WalkDir::new(d).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| extensions.contains(&ext))
        })
        .collect();
    found.sort();
    found
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fake tools writing just enough for the stages to hand files on

    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    use andworx_core::{
        BuildContext, BuildError, BuildServices, EventBus, Project, Result, StateStore,
        TaskFactory,
    };

    use crate::apk::ApkPackager;
    use crate::toolchain::*;

    pub type Calls = Arc<Mutex<Vec<String>>>;

    pub struct FakeMerger {
        pub calls: Calls,
        pub errors: Mutex<Vec<String>>,
    }

    impl ManifestMerger for FakeMerger {
        fn merge(&self, request: &MergeRequest) -> Result<MergeReport> {
            self.calls.lock().push("merge".into());
            let errors = std::mem::take(&mut *self.errors.lock());
            if !errors.is_empty() {
                return Ok(MergeReport::from_records(
                    errors
                        .into_iter()
                        .map(|message| MergeRecord {
                            severity: Severity::Error,
                            message,
                        })
                        .collect(),
                ));
            }
            super::copy_file(&request.main_manifest, &request.output)?;
            Ok(MergeReport::from_records(Vec::new()))
        }
    }

    pub struct FakeResources {
        pub calls: Calls,
    }

    impl ResourceCompiler for FakeResources {
        fn compile(&self, res_dir: &Path, output: &Path) -> Result<()> {
            self.calls.lock().push(format!("compile {}", res_dir.display()));
            std::fs::write(output, b"flat").map_err(|e| BuildError::io(output, e))
        }

        fn link(&self, request: &LinkRequest) -> Result<()> {
            self.calls.lock().push("link".into());
            let manifest = std::fs::read(&request.manifest).map_err(|e| BuildError::io(&request.manifest, e))?;
            let mut zip = ZipWriter::new(File::create(&request.output_apk)?);
            zip.start_file("AndroidManifest.xml", FileOptions::default())?;
            zip.write_all(&manifest)?;
            zip.start_file("resources.arsc", FileOptions::default())?;
            zip.write_all(b"arsc")?;
            zip.finish()?;

            let package_dir = request.r_source_dir.join("com/example/app");
            std::fs::create_dir_all(&package_dir).map_err(|e| BuildError::io(&package_dir, e))?;
            std::fs::write(package_dir.join("R.java"), "package com.example.app;\npublic final class R {}\n")?;
            std::fs::write(&request.symbols, "int string app_name 0x7f010000\n")?;
            Ok(())
        }
    }

    pub struct FakeDex {
        pub calls: Calls,
    }

    impl DexArchiveBuilder for FakeDex {
        fn convert(&self, request: &DexArchiveRequest<'_>) -> Result<()> {
            self.calls.lock().push(format!("dex {}", request.input.display()));
            std::fs::write(request.output, b"archive").map_err(|e| BuildError::io(request.output, e))
        }
    }

    impl DexMerger for FakeDex {
        fn merge(&self, archives: &[PathBuf], output_dir: &Path, _: u32, _: bool) -> Result<()> {
            self.calls.lock().push(format!("merge-dex {}", archives.len()));
            std::fs::write(output_dir.join("classes.dex"), b"dex\n035")?;
            Ok(())
        }
    }

    pub struct FakeAidl {
        pub calls: Calls,
    }

    impl AidlCompiler for FakeAidl {
        fn compile(&self, source: &Path, _: &[PathBuf], output_dir: &Path) -> Result<()> {
            self.calls.lock().push(format!("aidl {}", source.display()));
            let stem = source.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            std::fs::create_dir_all(output_dir).map_err(|e| BuildError::io(output_dir, e))?;
            std::fs::write(output_dir.join(format!("{}.java", stem)), "interface")?;
            Ok(())
        }
    }

    /// Fake tools sharing one call log
    pub fn toolchain(calls: &Calls) -> (Toolchain, Arc<FakeMerger>) {
        let merger = Arc::new(FakeMerger {
            calls: calls.clone(),
            errors: Mutex::new(Vec::new()),
        });
        let dex = Arc::new(FakeDex {
            calls: calls.clone(),
        });
        let toolchain = Toolchain {
            manifest_merger: merger.clone(),
            resources: Arc::new(FakeResources {
                calls: calls.clone(),
            }),
            aidl: Some(Arc::new(FakeAidl {
                calls: calls.clone(),
            })),
            renderscript: None,
            desugarer: None,
            dex_builder: dex.clone(),
            dex_merger: dex,
            packager: Arc::new(ApkPackager::new(None)),
            boot_classpath: vec![PathBuf::from("android.jar")],
        };
        (toolchain, merger)
    }

    pub const MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <uses-sdk android:minSdkVersion="21"/>
    <application android:label="${appLabel}"/>
</manifest>"#;

    /// Minimal application project
    pub fn project(root: &Path) {
        std::fs::write(
            root.join("andworx.toml"),
            "name = \"app\"\n[placeholders]\nappLabel = \"Example\"\n",
        )
        .unwrap();
        std::fs::write(root.join("AndroidManifest.xml"), MANIFEST).unwrap();
        std::fs::create_dir_all(root.join("res/values")).unwrap();
        std::fs::write(root.join("res/values/strings.xml"), "<resources/>").unwrap();
        let classes = root.join("bin/classes/com/example/app");
        std::fs::create_dir_all(&classes).unwrap();
        std::fs::write(classes.join("Main.class"), vec![0xCA, 0xFE, 0xBA, 0xBE]).unwrap();
    }

    pub fn context(root: &Path, handle: tokio::runtime::Handle) -> BuildContext {
        let project = Project::open(root).unwrap();
        let services = BuildServices {
            task_factory: Arc::new(TaskFactory::new(handle, None)),
            events: Arc::new(EventBus::new()),
        };
        let store = StateStore::new(root, ".andworx");
        let state = store.load();
        BuildContext::new(Arc::new(project), Arc::new(Vec::new()), services, store, state)
    }
}
