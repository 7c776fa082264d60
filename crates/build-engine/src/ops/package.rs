//! Assemble, sign and publish the application package

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use andworx_core::delta::normalize;
use andworx_core::{
    BuildContext, BuildError, BuildOp, ContentType, DirtyFlag, Project, Result, StandardBuildTask,
};

use super::copy_file;
use crate::layout::ProjectLayout;
use crate::pipeline::dex_files;
use crate::signing::debug_keystore;
use crate::toolchain::{PackageRequest, Packager, SigningConfig};

/// Source files that never travel into the package
const SOURCE_EXTENSIONS: [&str; 5] = ["java", "aidl", "rs", "rsh", "fs"];

pub struct PackageOp {
    packager: Arc<dyn Packager>,
    layout: ProjectLayout,
}

impl PackageOp {
    pub fn new(packager: Arc<dyn Packager>, layout: ProjectLayout) -> Self {
        Self { packager, layout }
    }

    /// Dex directory produced by this build, or the one left by the last
    fn dex_dir(&self, ctx: &BuildContext) -> PathBuf {
        ctx.pipeline_input()
            .iter()
            .find(|content| content.has_type(ContentType::Dex) && content.is_directory())
            .map(|content| content.file().to_path_buf())
            .unwrap_or_else(|| self.layout.merged_dex_dir())
    }
}

/// Signing material from the descriptor, or the debug key for debuggable
/// builds when one exists
fn signing_config(project: &Project) -> Option<SigningConfig> {
    if let Some(signing) = &project.descriptor.signing {
        return Some(SigningConfig {
            keystore: project.root.join(&signing.keystore_path),
            store_password: signing.keystore_password.clone(),
            key_alias: signing.key_alias.clone(),
            key_password: signing.key_password.clone(),
        });
    }
    let keystore = debug_keystore();
    (project.is_debuggable() && keystore.exists()).then(|| SigningConfig::debug(keystore))
}

/// Non-source files below the source folders, keyed by package path.
/// The first folder providing a path wins.
fn java_resources(dirs: &[PathBuf]) -> BTreeMap<String, PathBuf> {
    let mut resources = BTreeMap::new();
    for dir in dirs.iter().filter(|d| d.is_dir()) {
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_java_resource(path) {
                continue;
            }
            let relative = path.strip_prefix(dir).unwrap_or(path);
            resources
                .entry(normalize(relative))
                .or_insert_with(|| path.to_path_buf());
        }
    }
    resources
}

fn is_java_resource(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let source = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| SOURCE_EXTENSIONS.contains(&ext));
    !source && name != "package.html" && !name.starts_with('.')
}

impl BuildOp for PackageOp {
    fn description(&self) -> &str {
        "Package"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let project = ctx.project();
        let dex_dir = self.dex_dir(ctx);
        if !dex_dir.is_dir() {
            return Err(BuildError::MissingInput(dex_dir));
        }
        debug!("Packaging dex files from {:?}", dex_dir);

        let mut source_dirs = project.source_dirs();
        let mut native_lib_dirs = vec![project.libs_dir()];
        for library in ctx.libraries() {
            source_dirs.extend(library.source_dirs());
            native_lib_dirs.push(library.libs_dir());
        }

        let request = PackageRequest {
            dex_files: dex_files(&dex_dir)?,
            resources: self.layout.resource_package(),
            manifest: self.layout.merged_manifest(),
            native_lib_dirs,
            java_resources: java_resources(&source_dirs),
            signing: signing_config(project),
            intermediate_dir: self.layout.package_dir(),
            output: self.layout.staged_apk(),
        };

        let packager = self.packager.clone();
        ctx.task_factory()
            .run(StandardBuildTask::new("package", move || packager.package(&request)))?;
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let target = ctx.project().apk_path();
        copy_file(&self.layout.staged_apk(), &target)?;
        info!("Package ready: {:?}", target);
        ctx.clear_flag(DirtyFlag::BuildApk)
    }
}
