//! APK Assembly
//!
//! Writes the final package: the linked resource package, dex files,
//! native libraries and java resources, then aligns and signs it.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use andworx_core::{BuildError, Result};

use crate::signing::ApkSigner;
use crate::toolchain::{PackageRequest, Packager};

/// Entry of an existing package
#[derive(Debug, Clone)]
pub struct ApkEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
}

/// List the entries of a package
pub fn list_entries(path: &Path) -> Result<Vec<ApkEntry>> {
    let file = File::open(path).map_err(|e| BuildError::io(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        entries.push(ApkEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
        });
    }
    Ok(entries)
}

/// Incrementally written package. The first entry with a given name wins.
pub struct ApkBuilder {
    path: PathBuf,
    writer: ZipWriter<BufWriter<File>>,
    names: HashSet<String>,
}

impl ApkBuilder {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| BuildError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: ZipWriter::new(BufWriter::new(file)),
            names: HashSet::new(),
        })
    }

    fn claim(&mut self, name: &str) -> bool {
        if self.names.insert(name.to_string()) {
            true
        } else {
            warn!("Duplicate package entry {} ignored", name);
            false
        }
    }

    /// Copy every entry of an existing archive without recompressing it
    pub fn add_archive(&mut self, archive_path: &Path) -> Result<()> {
        let file = File::open(archive_path).map_err(|e| BuildError::io(archive_path, e))?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.is_dir() || !self.claim(entry.name()) {
                continue;
            }
            self.writer.raw_copy_file(entry)?;
        }
        Ok(())
    }

    /// Add a file under `name`
    pub fn add_file(&mut self, name: &str, source: &Path, compress: bool) -> Result<()> {
        if !self.claim(name) {
            return Ok(());
        }
        let method = if compress {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = FileOptions::default().compression_method(method);

        let mut contents = Vec::new();
        File::open(source)
            .and_then(|mut f| f.read_to_end(&mut contents))
            .map_err(|e| BuildError::io(source, e))?;

        self.writer.start_file(name, options)?;
        self.writer
            .write_all(&contents)
            .map_err(|e| BuildError::io(&self.path, e))?;
        Ok(())
    }

    /// Add native libraries laid out as `<abi>/<name>.so` below `dir`
    pub fn add_native_libs(&mut self, dir: &Path) -> Result<()> {
        for entry in WalkDir::new(dir).min_depth(2).max_depth(2).sort_by_file_name() {
            let entry = entry.map_err(|e| BuildError::io(dir, e.into()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "so") {
                continue;
            }
            let (Some(abi), Some(name)) = (
                path.parent().and_then(Path::file_name),
                path.file_name(),
            ) else {
                continue;
            };
            let entry_name = format!("lib/{}/{}", abi.to_string_lossy(), name.to_string_lossy());
            self.add_file(&entry_name, path, false)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        let mut inner = self.writer.finish()?;
        inner.flush().map_err(|e| BuildError::io(&self.path, e))?;
        debug!("Wrote {} entries to {:?}", self.names.len(), self.path);
        Ok(self.path)
    }
}

/// Default [`Packager`]: zip assembly plus optional signing
pub struct ApkPackager {
    signer: Option<ApkSigner>,
}

impl ApkPackager {
    pub fn new(signer: Option<ApkSigner>) -> Self {
        Self { signer }
    }
}

impl Packager for ApkPackager {
    fn package(&self, request: &PackageRequest) -> Result<()> {
        if !request.resources.exists() {
            return Err(BuildError::MissingInput(request.resources.clone()));
        }
        if let Some(missing) = request.dex_files.iter().find(|f| !f.exists()) {
            return Err(BuildError::MissingInput(missing.clone()));
        }

        let stem = request
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "package".to_string());
        let unsigned = request.intermediate_dir.join(format!("{}-unsigned.apk", stem));

        let mut builder = ApkBuilder::create(&unsigned)?;
        builder.add_archive(&request.resources)?;
        for dex in &request.dex_files {
            let name = dex
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| BuildError::MissingInput(dex.clone()))?;
            builder.add_file(&name, dex, true)?;
        }
        for dir in request.native_lib_dirs.iter().filter(|d| d.is_dir()) {
            builder.add_native_libs(dir)?;
        }
        for (name, source) in &request.java_resources {
            builder.add_file(name, source, true)?;
        }
        builder.finish()?;

        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        match (&request.signing, &self.signer) {
            (Some(config), Some(signer)) => signer.sign(&unsigned, config, &request.output)?,
            (Some(_), None) => {
                warn!("No apksigner available, {:?} is unsigned", request.output);
                copy(&unsigned, &request.output)?;
            }
            (None, _) => copy(&unsigned, &request.output)?,
        }

        info!("Packaged {:?}", request.output);
        Ok(())
    }
}

fn copy(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to).map_err(|e| BuildError::io(to, e))?;
    Ok(())
}
