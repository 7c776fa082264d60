//! Merge the main manifest with overlays and library manifests

use std::sync::Arc;
use tracing::{info, warn};

use andworx_core::{
    BuildContext, BuildOp, DirtyFlag, ManifestInfo, Result, StandardBuildTask,
};

use super::copy_file;
use crate::layout::ProjectLayout;
use crate::toolchain::{ManifestMerger, MergeRequest, Severity};

pub struct MergeManifestOp {
    merger: Arc<dyn ManifestMerger>,
    layout: ProjectLayout,
    package: Option<String>,
}

impl MergeManifestOp {
    pub fn new(merger: Arc<dyn ManifestMerger>, layout: ProjectLayout) -> Self {
        Self {
            merger,
            layout,
            package: None,
        }
    }
}

impl BuildOp for MergeManifestOp {
    fn description(&self) -> &str {
        "Merge manifest"
    }

    fn execute(&mut self, ctx: &mut BuildContext) -> Result<bool> {
        let project = ctx.project();
        let request = MergeRequest {
            main_manifest: project.manifest_path(),
            overlays: Vec::new(),
            libraries: ctx
                .libraries()
                .iter()
                .map(|library| library.manifest_path())
                .filter(|path| path.exists())
                .collect(),
            placeholders: project.descriptor.placeholders.clone(),
            remove_tools_declarations: !project.descriptor.library,
            output: self.layout.merged_manifest(),
        };

        let merger = self.merger.clone();
        let report = ctx
            .task_factory()
            .run(StandardBuildTask::new("merge-manifest", move || merger.merge(&request)))?;

        for record in report.records.iter().filter(|r| r.severity == Severity::Warning) {
            warn!("{}", record.message);
        }
        if report.is_error() {
            ctx.report_problem(report.error_message());
            return Ok(false);
        }

        let merged = ManifestInfo::read(&self.layout.merged_manifest())?;
        info!("Merged manifest for package {}", merged.package);
        self.package = Some(merged.package);
        Ok(true)
    }

    fn commit(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let target = ctx.project().output_dir().join("AndroidManifest.xml");
        copy_file(&self.layout.merged_manifest(), &target)?;
        if let Some(package) = &self.package {
            ctx.set_manifest_package(package)?;
        }
        ctx.clear_flag(DirtyFlag::MergeManifest)
    }
}
