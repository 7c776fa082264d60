//! Generate BuildConfig.java for the merged manifest's package

use std::path::PathBuf;
use tracing::debug;

use andworx_core::{BuildContext, BuildError, BuildOp, DirtyFlag, ManifestInfo, Result};

use super::{copy_tree, reset_dir};
use crate::layout::ProjectLayout;

/// Source of the BuildConfig class
pub fn build_config_source(package: &str, debuggable: bool, build_type: &str) -> String {
    format!(
        "/** Automatically generated file. DO NOT MODIFY */\n\
         package {package};\n\
         \n\
         public final class BuildConfig {{\n\
         \x20   public static final boolean DEBUG = {debuggable};\n\
         \x20   public static final String APPLICATION_ID = \"{package}\";\n\
         \x20   public static final String BUILD_TYPE = \"{build_type}\";\n\
         }}\n"
    )
}

pub struct CreateBuildConfigOp {
    layout: ProjectLayout,
    debuggable: bool,
}

impl CreateBuildConfigOp {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            debuggable: true,
        }
    }

    fn source_path(&self, package: &str) -> PathBuf {
        package
            .split('.')
            .fold(self.layout.build_config_dir(), |dir, segment| dir.join(segment))
            .join("BuildConfig.java")
    }
}

impl BuildOp for CreateBuildConfigOp {
    fn description(&self) -> &str {
        "Create BuildConfig"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let manifest = ManifestInfo::read(&self.layout.merged_manifest())?;
        let variant = ctx.project().descriptor.variant;
        self.debuggable = variant.is_debuggable();

        reset_dir(&self.layout.build_config_dir())?;
        let path = self.source_path(&manifest.package);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let source = build_config_source(&manifest.package, self.debuggable, variant.as_str());
        std::fs::write(&path, source).map_err(|e| BuildError::io(&path, e))?;
        debug!("Generated {:?}", path);
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        copy_tree(&self.layout.build_config_dir(), &ctx.project().gen_dir())?;
        ctx.set_build_config_mode(self.debuggable)?;
        ctx.clear_flag(DirtyFlag::CreateBuildConfig)
    }
}
