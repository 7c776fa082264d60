//! Dex transform
//!
//! Converts every class artifact of the pipeline input into dex archives,
//! one archive directory per artifact, then merges all archives into a
//! single dex directory that replaces the byte-code in the pipeline input.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use andworx_core::{BuildError, ContentInfo, ContentType, QualifiedContent, Result, Scope, Status};

use super::d8::{ConversionSettings, D8Task};
use super::{remove_path, Transform, TransformInvocation};

const SCOPES: [Scope; 3] = [Scope::Project, Scope::SubProjects, Scope::ExternalLibraries];

pub struct DexTransform {
    d8: Arc<D8Task>,
}

impl DexTransform {
    pub fn new(d8: Arc<D8Task>) -> Self {
        Self { d8 }
    }

    pub fn archive_root(output_dir: &Path) -> PathBuf {
        output_dir.join("archives")
    }

    /// Directory receiving the merged dex files
    pub fn merged_dir(output_dir: &Path) -> PathBuf {
        output_dir.join("merged")
    }
}

/// Archives left in `dir` by a previous run
fn existing_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| BuildError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "zip"))
        .collect();
    archives.sort();
    Ok(archives)
}

impl Transform for DexTransform {
    fn name(&self) -> &str {
        "dex"
    }

    fn input_types(&self) -> &[ContentType] {
        &[ContentType::Classes, ContentType::DesugaredClasses]
    }

    fn scopes(&self) -> &[Scope] {
        &SCOPES
    }

    fn transform(&self, invocation: &TransformInvocation) -> Result<Vec<QualifiedContent>> {
        let archive_root = Self::archive_root(&invocation.output_dir);
        if !invocation.incremental {
            remove_path(&archive_root)?;
        }

        let mut archives = Vec::new();
        let mut jobs = Vec::new();
        for input in &invocation.inputs {
            let archive_dir = archive_root.join(TransformInvocation::output_name(input));

            match input.status() {
                Status::Removed => {
                    debug!("Dropping dex archives of removed {}", input.name());
                    remove_path(&archive_dir)?;
                    continue;
                }
                Status::NotChanged if invocation.incremental && archive_dir.is_dir() => {
                    archives.extend(existing_archives(&archive_dir)?);
                    continue;
                }
                _ => {}
            }

            remove_path(&archive_dir)?;
            let classpath = invocation.classpath_for(input);
            let settings = ConversionSettings {
                boot_classpath: &invocation.boot_classpath,
                classpath: &classpath,
                min_sdk: invocation.min_sdk,
                debuggable: invocation.debuggable,
            };
            jobs.extend(self.d8.plan(input.file(), &archive_dir, &settings)?);
        }

        let reused = archives.len();
        archives.extend(self.d8.convert(&jobs)?);
        archives.sort();
        info!(
            "Dexing {} inputs: {} jobs, {} archives reused",
            invocation.inputs.len(),
            jobs.len(),
            reused
        );

        let merged = Self::merged_dir(&invocation.output_dir);
        self.d8
            .merge(&archives, &merged, invocation.min_sdk, invocation.debuggable)?;

        let mut info = ContentInfo::new("dex", merged, ContentType::Dex, Scope::Project);
        info.scopes.extend(SCOPES);
        Ok(vec![QualifiedContent::directory(info, Status::Changed)])
    }
}
