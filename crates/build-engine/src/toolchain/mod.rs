//! External tools
//!
//! Each collaborator the build stages drive is a narrow trait so stages never
//! know how the work is done. [`Toolchain`] carries one implementation of
//! each and is handed to the stages explicitly.

mod aapt2;
mod aidl;
mod d8;
mod desugar;
mod manifest_merger;
mod renderscript;

pub use aapt2::Aapt2;
pub use aidl::AidlTool;
pub use d8::D8Tool;
pub use desugar::DesugarTool;
pub use manifest_merger::{CommandLineMerger, PlaceholderMerger};
pub use renderscript::LlvmRsCc;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use andworx_core::{BuilderConfig, BuildError, Result};

use crate::apk::ApkPackager;
use crate::sdk::BuildTools;
use crate::signing::ApkSigner;

/// Severity of a manifest merger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One message logged by the manifest merger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    pub severity: Severity,
    pub message: String,
}

/// Overall result of a manifest merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Success,
    Warning,
    Error,
}

/// Structured outcome of a manifest merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub result: MergeResult,
    pub records: Vec<MergeRecord>,
}

impl MergeReport {
    /// Report classified from its records
    pub fn from_records(records: Vec<MergeRecord>) -> Self {
        let result = match records.iter().map(|r| r.severity).max() {
            Some(Severity::Error) => MergeResult::Error,
            Some(Severity::Warning) => MergeResult::Warning,
            _ => MergeResult::Success,
        };
        Self { result, records }
    }

    pub fn is_error(&self) -> bool {
        self.result == MergeResult::Error
    }

    /// Every error record, one per line
    pub fn error_message(&self) -> String {
        self.records
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Inputs of a manifest merge
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub main_manifest: PathBuf,
    pub overlays: Vec<PathBuf>,
    /// Manifests of library projects, dependency-first
    pub libraries: Vec<PathBuf>,
    pub placeholders: BTreeMap<String, String>,
    /// Strip `tools:` attributes and other merge-only markup
    pub remove_tools_declarations: bool,
    pub output: PathBuf,
}

pub trait ManifestMerger: Send + Sync {
    fn merge(&self, request: &MergeRequest) -> Result<MergeReport>;
}

/// Inputs of a resource link
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub manifest: PathBuf,
    /// Compiled resources, lowest priority first
    pub compiled: Vec<PathBuf>,
    /// Compiled resources overlaying `compiled`
    pub overlays: Vec<PathBuf>,
    pub boot_classpath: Vec<PathBuf>,
    /// Packages of library projects that also receive an R class
    pub extra_packages: Vec<String>,
    pub min_sdk: u32,
    pub target_sdk: u32,
    pub debuggable: bool,
    /// Resource package written by the link
    pub output_apk: PathBuf,
    /// Directory receiving the R class sources
    pub r_source_dir: PathBuf,
    /// Text symbol table
    pub symbols: PathBuf,
}

/// Resource compiler and linker
pub trait ResourceCompiler: Send + Sync {
    /// Compile one resource directory into a flat archive
    fn compile(&self, res_dir: &Path, output: &Path) -> Result<()>;

    fn link(&self, request: &LinkRequest) -> Result<()>;
}

pub trait AidlCompiler: Send + Sync {
    /// Generate the java interface of one `.aidl` file into `output_dir`
    fn compile(&self, source: &Path, import_dirs: &[PathBuf], output_dir: &Path) -> Result<()>;
}

/// Inputs of a RenderScript compilation
#[derive(Debug, Clone)]
pub struct RenderScriptRequest {
    pub sources: Vec<PathBuf>,
    pub import_dirs: Vec<PathBuf>,
    pub target_api: u32,
    pub debuggable: bool,
    pub java_output: PathBuf,
    pub resource_output: PathBuf,
}

pub trait RenderScriptCompiler: Send + Sync {
    fn compile(&self, request: &RenderScriptRequest) -> Result<()>;
}

/// Inputs of desugaring one class artifact
#[derive(Debug, Clone)]
pub struct DesugarRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub boot_classpath: &'a [PathBuf],
    pub classpath: &'a [PathBuf],
    pub min_sdk: u32,
}

pub trait Desugarer: Send + Sync {
    fn desugar(&self, request: &DesugarRequest<'_>) -> Result<()>;
}

/// Inputs of converting classes into one dex archive
#[derive(Debug, Clone)]
pub struct DexArchiveRequest<'a> {
    /// Jar or class directory holding the classes to convert
    pub input: &'a Path,
    /// Dex archive to write
    pub output: &'a Path,
    pub boot_classpath: &'a [PathBuf],
    pub classpath: &'a [PathBuf],
    pub min_sdk: u32,
    pub debuggable: bool,
}

pub trait DexArchiveBuilder: Send + Sync {
    fn convert(&self, request: &DexArchiveRequest<'_>) -> Result<()>;
}

pub trait DexMerger: Send + Sync {
    /// Merge dex archives into final dex files written to `output_dir`
    fn merge(&self, archives: &[PathBuf], output_dir: &Path, min_sdk: u32, debuggable: bool)
        -> Result<()>;
}

/// Signing material for the final package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    pub keystore: PathBuf,
    pub store_password: String,
    pub key_alias: String,
    pub key_password: Option<String>,
}

impl SigningConfig {
    /// The SDK's debug keystore
    pub fn debug(keystore: PathBuf) -> Self {
        Self {
            keystore,
            store_password: "android".to_string(),
            key_alias: "androiddebugkey".to_string(),
            key_password: None,
        }
    }

    pub fn key_password(&self) -> &str {
        self.key_password.as_deref().unwrap_or(&self.store_password)
    }
}

/// Inputs of final packaging
#[derive(Debug, Clone)]
pub struct PackageRequest {
    /// Dex files, placed at the package root
    pub dex_files: Vec<PathBuf>,
    /// Resource package produced by the linker
    pub resources: PathBuf,
    pub manifest: PathBuf,
    /// Native libraries laid out as `<abi>/<lib>.so`
    pub native_lib_dirs: Vec<PathBuf>,
    /// Java resources keyed by their path inside the package
    pub java_resources: BTreeMap<String, PathBuf>,
    pub signing: Option<SigningConfig>,
    pub intermediate_dir: PathBuf,
    pub output: PathBuf,
}

pub trait Packager: Send + Sync {
    fn package(&self, request: &PackageRequest) -> Result<()>;
}

/// The external tools of one build
#[derive(Clone)]
pub struct Toolchain {
    pub manifest_merger: Arc<dyn ManifestMerger>,
    pub resources: Arc<dyn ResourceCompiler>,
    pub aidl: Option<Arc<dyn AidlCompiler>>,
    pub renderscript: Option<Arc<dyn RenderScriptCompiler>>,
    pub desugarer: Option<Arc<dyn Desugarer>>,
    pub dex_builder: Arc<dyn DexArchiveBuilder>,
    pub dex_merger: Arc<dyn DexMerger>,
    pub packager: Arc<dyn Packager>,
    /// Platform classes every stage compiles against
    pub boot_classpath: Vec<PathBuf>,
}

impl Toolchain {
    /// Command-line tools from the configured Android SDK
    pub fn from_config(config: &BuilderConfig) -> Result<Self> {
        let sdk_dir = config
            .sdk_path()
            .ok_or_else(|| BuildError::ToolNotFound("Android SDK".into()))?;
        let tools = BuildTools::locate(&sdk_dir, config.sdk.build_tools_version.as_deref())?;
        info!("Android SDK {:?}, build-tools {}", sdk_dir, tools.version());

        let require = |name: &str| {
            tools
                .executable(name)
                .ok_or_else(|| BuildError::ToolNotFound(format!("{} in build-tools {}", name, tools.version())))
        };

        let android_jar = tools.platform_jar(&config.sdk.platform);
        if !android_jar.exists() {
            return Err(BuildError::ToolNotFound(format!(
                "platform {} ({:?})",
                config.sdk.platform, android_jar
            )));
        }

        let d8 = Arc::new(D8Tool::new(require("d8")?));

        let manifest_merger: Arc<dyn ManifestMerger> = match &config.sdk.manifest_merger_classpath {
            Some(classpath) => Arc::new(CommandLineMerger::new(config.sdk.java.clone(), classpath.clone())),
            None => Arc::new(PlaceholderMerger),
        };

        let framework_aidl = tools.framework_aidl(&config.sdk.platform);
        let framework_aidl = framework_aidl.exists().then_some(framework_aidl);
        let aidl = tools.executable("aidl").map(|path| {
            Arc::new(AidlTool::new(path).with_framework(framework_aidl.clone()))
                as Arc<dyn AidlCompiler>
        });
        let renderscript = tools.executable("llvm-rs-cc").map(|path| {
            Arc::new(LlvmRsCc::new(path, tools.dir().join("renderscript")))
                as Arc<dyn RenderScriptCompiler>
        });
        let desugarer = config.sdk.desugar_jar.as_ref().map(|jar| {
            Arc::new(DesugarTool::new(config.sdk.java.clone(), jar.clone())) as Arc<dyn Desugarer>
        });

        let signer = match (tools.executable("apksigner"), tools.executable("zipalign")) {
            (Some(apksigner), zipalign) => Some(ApkSigner::new(apksigner, zipalign)),
            (None, _) => {
                warn!("apksigner not found, packages will be unsigned");
                None
            }
        };

        Ok(Self {
            manifest_merger,
            resources: Arc::new(Aapt2::new(require("aapt2")?)),
            aidl,
            renderscript,
            desugarer,
            dex_builder: d8.clone(),
            dex_merger: d8,
            packager: Arc::new(ApkPackager::new(signer)),
            boot_classpath: vec![android_jar],
        })
    }
}
