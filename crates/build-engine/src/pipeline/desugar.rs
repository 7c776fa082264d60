//! Desugar transform
//!
//! Rewrites every class artifact of the pipeline input into a new artifact
//! under the transform's own directory. Unchanged inputs keep their previous
//! output; removed inputs lose it.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use andworx_core::{ContentType, QualifiedContent, Result, Scope, Status};

use super::{remove_path, Transform, TransformInvocation};
use crate::toolchain::{DesugarRequest, Desugarer};

pub struct DesugarTransform {
    desugarer: Arc<dyn Desugarer>,
}

impl DesugarTransform {
    pub fn new(desugarer: Arc<dyn Desugarer>) -> Self {
        Self { desugarer }
    }

    fn output_for(invocation: &TransformInvocation, input: &QualifiedContent) -> PathBuf {
        let name = TransformInvocation::output_name(input);
        if input.is_directory() {
            invocation.output_dir.join(name)
        } else {
            invocation.output_dir.join(format!("{}.jar", name))
        }
    }
}

impl Transform for DesugarTransform {
    fn name(&self) -> &str {
        "desugar"
    }

    fn input_types(&self) -> &[ContentType] {
        &[ContentType::Classes]
    }

    fn scopes(&self) -> &[Scope] {
        &[Scope::Project, Scope::SubProjects, Scope::ExternalLibraries]
    }

    fn transform(&self, invocation: &TransformInvocation) -> Result<Vec<QualifiedContent>> {
        let mut outputs = Vec::with_capacity(invocation.inputs.len());
        let mut processed = 0;

        for input in &invocation.inputs {
            let output = Self::output_for(invocation, input);

            if input.status() == Status::Removed {
                debug!("Dropping desugared output of removed {}", input.name());
                remove_path(&output)?;
                continue;
            }

            let reusable = invocation.incremental && input.status() == Status::NotChanged && output.exists();
            if reusable {
                outputs.push(input.derive(&output, ContentType::DesugaredClasses, Status::NotChanged));
                continue;
            }

            remove_path(&output)?;
            let classpath = invocation.classpath_for(input);
            self.desugarer.desugar(&DesugarRequest {
                input: input.file(),
                output: &output,
                boot_classpath: &invocation.boot_classpath,
                classpath: &classpath,
                min_sdk: invocation.min_sdk,
            })?;
            processed += 1;

            let status = if input.status() == Status::NotChanged {
                Status::Changed
            } else {
                input.status()
            };
            outputs.push(input.derive(&output, ContentType::DesugaredClasses, status));
        }

        info!("Desugared {} of {} inputs", processed, invocation.inputs.len());
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use andworx_core::ContentInfo;
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Default)]
    struct CopyDesugarer {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl Desugarer for CopyDesugarer {
        fn desugar(&self, request: &DesugarRequest<'_>) -> Result<()> {
            self.calls.lock().push(request.input.to_path_buf());
            std::fs::write(request.output, b"desugared").unwrap();
            Ok(())
        }
    }

    fn jar(dir: &Path, name: &str, status: Status) -> QualifiedContent {
        let file = dir.join(format!("{}.jar", name));
        std::fs::write(&file, b"jar").unwrap();
        QualifiedContent::jar(
            ContentInfo::new(name, file, ContentType::Classes, Scope::ExternalLibraries),
            status,
        )
    }

    #[test]
    fn test_outputs_are_new_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let desugarer = Arc::new(CopyDesugarer::default());
        let transform = DesugarTransform::new(desugarer.clone());

        let out = dir.path().join("desugar");
        std::fs::create_dir_all(&out).unwrap();
        let stale = out.join("gone.jar");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(out.join("kept.jar"), b"old").unwrap();

        let invocation = TransformInvocation {
            inputs: vec![
                jar(dir.path(), "added", Status::Added),
                jar(dir.path(), "kept", Status::NotChanged),
                jar(dir.path(), "gone", Status::Removed),
            ],
            referenced: Vec::new(),
            boot_classpath: vec![PathBuf::from("android.jar")],
            output_dir: out.clone(),
            incremental: true,
            min_sdk: 21,
            debuggable: true,
        };

        let outputs = transform.transform(&invocation).unwrap();

        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.has_type(ContentType::DesugaredClasses)));
        assert!(outputs.iter().all(|o| o.file().starts_with(&out)));
        assert_eq!(desugarer.calls.lock().len(), 1);
        assert!(!stale.exists());
        assert_eq!(outputs[1].status(), Status::NotChanged);
    }
}
