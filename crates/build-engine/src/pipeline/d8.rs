//! Dex conversion partitioning
//!
//! Class files are converted into dex archives in parallel and the archives
//! are then merged into the final dex files in one go:
//! - a jar smaller than [`BUCKET_THRESHOLD`] is converted as a single unit
//!   (bucket count 0, bucket id 0)
//! - any other input is split into `max(workers / 2, 1)` buckets. A class
//!   entry belongs to bucket `fnv1a64(path) % bucket_count`.
//! - every bucket is converted on a bounded worker pool and all of them are
//!   awaited before the merge starts; the first failure fails the batch
//! - a bucket without entries writes no archive and is skipped by the merge
//! - the merge is a single job that sees every archive, because dex files
//!   share symbol tables across classes
//! - the merge output directory is deleted and recreated on every merge

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use andworx_core::delta::normalize;
use andworx_core::{BuildError, Result, TaskContext};

use super::remove_path;
use crate::toolchain::{DexArchiveBuilder, DexArchiveRequest, DexMerger};

/// Inputs below this size (in bytes) are never partitioned
pub const BUCKET_THRESHOLD: u64 = 20_000;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Number of buckets used for a partitioned input
pub fn bucket_count(workers: usize) -> usize {
    (workers / 2).max(1)
}

/// Bucket of a class entry, identified by its `/`-separated path
pub fn bucket_of(entry_path: &str, bucket_count: usize) -> usize {
    let hash = entry_path
        .as_bytes()
        .iter()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME));
    (hash % bucket_count.max(1) as u64) as usize
}

/// One dex conversion job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexConversionParameters {
    /// Jar or class directory
    pub input: PathBuf,
    pub boot_classpath: Vec<PathBuf>,
    pub classpath: Vec<PathBuf>,
    /// Dex archive written by this job
    pub output: PathBuf,
    /// 0 when the input is converted as a single unit
    pub bucket_count: usize,
    pub bucket_id: usize,
    pub min_sdk: u32,
    pub debuggable: bool,
}

impl DexConversionParameters {
    pub fn is_partitioned(&self) -> bool {
        self.bucket_count > 0
    }

    /// Whether the class entry at `entry_path` is converted by this job
    pub fn belongs(&self, entry_path: &str) -> bool {
        !self.is_partitioned() || bucket_of(entry_path, self.bucket_count) == self.bucket_id
    }
}

/// Shared settings for the jobs planned from one input
#[derive(Debug, Clone)]
pub struct ConversionSettings<'a> {
    pub boot_classpath: &'a [PathBuf],
    pub classpath: &'a [PathBuf],
    pub min_sdk: u32,
    pub debuggable: bool,
}

/// Dex converter with its worker pool
pub struct D8Task {
    builder: Arc<dyn DexArchiveBuilder>,
    merger: Arc<dyn DexMerger>,
    workers: usize,
    pool: ThreadPool,
}

impl D8Task {
    pub fn new(
        builder: Arc<dyn DexArchiveBuilder>,
        merger: Arc<dyn DexMerger>,
        workers: usize,
    ) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("andworx-d8-{}", i))
            .build()
            .map_err(|e| BuildError::Internal(format!("cannot start dex worker pool: {}", e)))?;
        Ok(Self {
            builder,
            merger,
            workers,
            pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs converting `input` into archives below `archive_dir`
    pub fn plan(
        &self,
        input: &Path,
        archive_dir: &Path,
        settings: &ConversionSettings<'_>,
    ) -> Result<Vec<DexConversionParameters>> {
        let metadata = std::fs::metadata(input).map_err(|_| BuildError::MissingInput(input.to_path_buf()))?;
        let buckets = if metadata.is_file() && metadata.len() < BUCKET_THRESHOLD {
            0
        } else {
            bucket_count(self.workers)
        };

        let job = |bucket_id: usize| DexConversionParameters {
            input: input.to_path_buf(),
            boot_classpath: settings.boot_classpath.to_vec(),
            classpath: settings.classpath.to_vec(),
            output: archive_dir.join(format!("bucket-{}.zip", bucket_id)),
            bucket_count: buckets,
            bucket_id,
            min_sdk: settings.min_sdk,
            debuggable: settings.debuggable,
        };

        let jobs: Vec<_> = (0..buckets.max(1)).map(job).collect();
        debug!("{:?}: {} dex jobs ({} buckets)", input, jobs.len(), buckets);
        Ok(jobs)
    }

    /// Run every job on the worker pool, waiting for all of them. Returns
    /// the archives written; empty buckets contribute none.
    pub fn convert(&self, jobs: &[DexConversionParameters]) -> Result<Vec<PathBuf>> {
        // Workers take on the caller's task so a cancelled build stops them
        let task = TaskContext::current();
        let results = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let _entered = task.as_ref().map(TaskContext::enter);
                    if task.as_ref().map_or(false, TaskContext::is_cancelled) {
                        return Err(BuildError::Cancelled);
                    }
                    self.convert_bucket(job)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let archives: Vec<PathBuf> = results.into_iter().flatten().collect();
        info!("Converted {} dex jobs into {} archives", jobs.len(), archives.len());
        Ok(archives)
    }

    /// Convert the classes of one bucket. `None` when the bucket is empty.
    pub fn convert_bucket(&self, job: &DexConversionParameters) -> Result<Option<PathBuf>> {
        remove_path(&job.output)?;
        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        if !job.is_partitioned() {
            self.run_builder(job, &job.input)?;
            return Ok(Some(job.output.clone()));
        }

        let Some(bucket) = write_bucket(job)? else {
            debug!("{:?} bucket {} is empty", job.input, job.bucket_id);
            return Ok(None);
        };
        self.run_builder(job, bucket.path())?;
        Ok(Some(job.output.clone()))
    }

    fn run_builder(&self, job: &DexConversionParameters, input: &Path) -> Result<()> {
        self.builder.convert(&DexArchiveRequest {
            input,
            output: &job.output,
            boot_classpath: &job.boot_classpath,
            classpath: &job.classpath,
            min_sdk: job.min_sdk,
            debuggable: job.debuggable,
        })
    }

    /// Merge `archives` into `output_dir`, replacing its previous contents.
    /// Returns the dex files written.
    pub fn merge(
        &self,
        archives: &[PathBuf],
        output_dir: &Path,
        min_sdk: u32,
        debuggable: bool,
    ) -> Result<Vec<PathBuf>> {
        if let Some(missing) = archives.iter().find(|a| !a.exists()) {
            return Err(BuildError::MissingInput(missing.clone()));
        }

        remove_path(output_dir)?;
        std::fs::create_dir_all(output_dir).map_err(|e| BuildError::io(output_dir, e))?;

        if archives.is_empty() {
            info!("No dex archives to merge");
            return Ok(Vec::new());
        }

        let merger = &self.merger;
        let task = TaskContext::current();
        self.pool.install(|| {
            let _entered = task.as_ref().map(TaskContext::enter);
            merger.merge(archives, output_dir, min_sdk, debuggable)
        })?;

        let dex_files = dex_files(output_dir)?;
        info!("Merged {} archives into {} dex files", archives.len(), dex_files.len());
        Ok(dex_files)
    }
}

/// `classes.dex`, `classes2.dex`, ... in `dir`, in load order
pub fn dex_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| BuildError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "dex"))
        .collect();
    files.sort_by_key(|p| {
        let stem = p.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let index = stem.trim_start_matches("classes").parse::<u32>().unwrap_or(1);
        (index, stem)
    });
    Ok(files)
}

/// Class entries of a jar or directory, as `/`-separated paths
pub fn class_entries(input: &Path) -> Result<Vec<String>> {
    if input.is_dir() {
        let mut entries = Vec::new();
        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry = entry.map_err(|e| BuildError::io(input, e.into()))?;
            if entry.file_type().is_file() && is_class(entry.path()) {
                let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
                entries.push(normalize(relative));
            }
        }
        Ok(entries)
    } else {
        let file = File::open(input).map_err(|e| BuildError::io(input, e))?;
        let archive = ZipArchive::new(BufReader::new(file))?;
        Ok(archive
            .file_names()
            .filter(|name| name.ends_with(".class"))
            .map(str::to_string)
            .collect())
    }
}

fn is_class(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "class")
}

/// Write the classes of one bucket into a scratch jar next to the job's
/// output. `None` when no class belongs to the bucket.
fn write_bucket(job: &DexConversionParameters) -> Result<Option<tempfile::NamedTempFile>> {
    let dir = job.output.parent().unwrap_or_else(|| Path::new("."));
    let scratch = tempfile::Builder::new()
        .prefix(&format!("bucket-{}-", job.bucket_id))
        .suffix(".jar")
        .tempfile_in(dir)
        .map_err(|e| BuildError::io(dir, e))?;
    let mut writer = ZipWriter::new(scratch);
    let mut written = 0usize;

    if job.input.is_dir() {
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        for entry in class_entries(&job.input)? {
            if !job.belongs(&entry) {
                continue;
            }
            let source = job.input.join(&entry);
            let contents = std::fs::read(&source).map_err(|e| BuildError::io(&source, e))?;
            writer.start_file(entry.as_str(), options)?;
            writer.write_all(&contents).map_err(|e| BuildError::io(&job.output, e))?;
            written += 1;
        }
    } else {
        let file = File::open(&job.input).map_err(|e| BuildError::io(&job.input, e))?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if !entry.name().ends_with(".class") || !job.belongs(entry.name()) {
                continue;
            }
            writer.raw_copy_file(entry)?;
            written += 1;
        }
    }

    let scratch = writer.finish()?;
    if written == 0 {
        return Ok(None);
    }
    Ok(Some(scratch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    /// Writes the class entries it was given into the archive, one per line
    #[derive(Default)]
    struct ListingBuilder {
        requests: Mutex<Vec<PathBuf>>,
    }

    impl DexArchiveBuilder for ListingBuilder {
        fn convert(&self, request: &DexArchiveRequest<'_>) -> Result<()> {
            self.requests.lock().push(request.input.to_path_buf());
            let entries = class_entries(request.input)?;
            let file = File::create(request.output).map_err(|e| BuildError::io(request.output, e))?;
            let mut zip = ZipWriter::new(file);
            zip.start_file("classes.dex", FileOptions::default())?;
            zip.write_all(entries.join("\n").as_bytes())
                .map_err(|e| BuildError::io(request.output, e))?;
            zip.finish()?;
            Ok(())
        }
    }

    /// Concatenates archive listings into classes.dex
    #[derive(Default)]
    struct ListingMerger {
        merged: Mutex<Vec<PathBuf>>,
    }

    impl DexMerger for ListingMerger {
        fn merge(&self, archives: &[PathBuf], output_dir: &Path, _: u32, _: bool) -> Result<()> {
            self.merged.lock().extend(archives.iter().cloned());
            let mut all = Vec::new();
            for archive in archives {
                all.extend(read_listing(archive));
            }
            let dex = output_dir.join("classes.dex");
            std::fs::write(&dex, all.join("\n")).map_err(|e| BuildError::io(&dex, e))
        }
    }

    fn read_listing(archive: &Path) -> Vec<String> {
        let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut zip.by_name("classes.dex").unwrap(), &mut contents)
            .unwrap();
        contents.lines().map(str::to_string).collect()
    }

    fn task(workers: usize) -> (D8Task, Arc<ListingBuilder>, Arc<ListingMerger>) {
        let builder = Arc::new(ListingBuilder::default());
        let merger = Arc::new(ListingMerger::default());
        let task = D8Task::new(builder.clone(), merger.clone(), workers).unwrap();
        (task, builder, merger)
    }

    fn settings() -> ConversionSettings<'static> {
        ConversionSettings {
            boot_classpath: &[],
            classpath: &[],
            min_sdk: 21,
            debuggable: true,
        }
    }

    fn class_dir(root: &Path, count: usize) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for i in 0..count {
            let entry = format!("com/example/pkg{}/Class{}.class", i % 7, i);
            let path = root.join(&entry);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, vec![0xCA; 64]).unwrap();
            names.insert(entry);
        }
        names
    }

    /// Jar of `count` stored entries of `size` bytes each
    fn jar(path: &Path, count: usize, size: usize) -> BTreeSet<String> {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        let mut names = BTreeSet::new();
        for i in 0..count {
            let name = format!("com/example/lib/Type{}.class", i);
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(&vec![(i % 251) as u8; size]).unwrap();
            names.insert(name);
        }
        zip.finish().unwrap();
        names
    }

    #[test]
    fn test_bucket_assignment_is_stable_and_in_range() {
        for count in 1..=8 {
            for path in ["a/A.class", "com/example/Main.class", "", "x/y/z/Z$1.class"] {
                let bucket = bucket_of(path, count);
                assert!(bucket < count);
                assert_eq!(bucket, bucket_of(path, count));
            }
        }
        assert_eq!(bucket_count(4), 2);
        assert_eq!(bucket_count(1), 1);
        assert_eq!(bucket_count(0), 1);
    }

    #[test]
    fn test_buckets_cover_every_entry_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        let expected = class_dir(&classes, 200);
        let (task, _, _) = task(8);

        let jobs = task.plan(&classes, &dir.path().join("archives"), &settings()).unwrap();
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.bucket_count == 4));

        let archives = task.convert(&jobs).unwrap();
        let mut seen = Vec::new();
        for archive in &archives {
            seen.extend(read_listing(archive));
        }
        let unique: BTreeSet<String> = seen.iter().cloned().collect();

        assert_eq!(seen.len(), expected.len(), "an entry was duplicated or lost");
        assert_eq!(unique, expected);
    }

    #[test]
    fn test_empty_buckets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        class_dir(&classes, 1);
        let (task, builder, merger) = task(8);

        let jobs = task.plan(&classes, &dir.path().join("archives"), &settings()).unwrap();
        let archives = task.convert(&jobs).unwrap();

        assert_eq!(jobs.len(), 4);
        assert_eq!(archives.len(), 1);
        assert_eq!(builder.requests.lock().len(), 1);
        let empty: Vec<_> = jobs.iter().filter(|j| !archives.contains(&j.output)).collect();
        assert!(empty.iter().all(|j| !j.output.exists()));

        let dex = task.merge(&archives, &dir.path().join("dex"), 21, true).unwrap();
        assert_eq!(dex.len(), 1);
        assert_eq!(merger.merged.lock().len(), 1);
    }

    #[test]
    fn test_small_jar_is_a_single_unit() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.jar");
        jar(&small, 3, 100);
        assert!(std::fs::metadata(&small).unwrap().len() < BUCKET_THRESHOLD);
        let (task, builder, _) = task(8);

        let jobs = task.plan(&small, &dir.path().join("archives"), &settings()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].bucket_count, 0);
        assert_eq!(jobs[0].bucket_id, 0);
        assert!(!jobs[0].is_partitioned());

        task.convert(&jobs).unwrap();
        assert_eq!(builder.requests.lock()[0], small);
    }

    #[test]
    fn test_large_jar_with_four_workers_uses_two_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let large = dir.path().join("large.jar");
        let expected = jar(&large, 17, 5000);
        assert!(std::fs::metadata(&large).unwrap().len() >= 85_000);
        let (task, _, merger) = task(4);

        let jobs = task.plan(&large, &dir.path().join("archives"), &settings()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.bucket_count == 2));

        let archives = task.convert(&jobs).unwrap();
        assert!(!archives.is_empty() && archives.len() <= 2);
        for archive in &archives {
            let id = if archive.ends_with("bucket-0.zip") { 0 } else { 1 };
            assert!(read_listing(archive).iter().all(|e| bucket_of(e, 2) == id));
        }

        let out = dir.path().join("dex");
        task.merge(&archives, &out, 21, false).unwrap();
        let merged = std::fs::read_to_string(out.join("classes.dex")).unwrap();
        let merged: BTreeSet<String> = merged.lines().map(str::to_string).collect();
        assert_eq!(merged, expected);
        assert_eq!(merger.merged.lock().len(), archives.len());
    }

    #[test]
    fn test_merge_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dex");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("classes2.dex"), b"stale").unwrap();
        let (task, _, _) = task(2);

        let dex = task.merge(&[], &out, 21, true).unwrap();
        assert!(dex.is_empty());
        assert!(!out.join("classes2.dex").exists());
    }

    #[test]
    fn test_missing_archive_fails_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _, merger) = task(2);

        let result = task.merge(&[dir.path().join("bucket-0.zip")], &dir.path().join("dex"), 21, true);
        assert!(matches!(result, Err(BuildError::MissingInput(_))));
        assert!(merger.merged.lock().is_empty());
    }

    #[test]
    fn test_failed_bucket_fails_the_batch() {
        struct FailingBuilder;
        impl DexArchiveBuilder for FailingBuilder {
            fn convert(&self, _: &DexArchiveRequest<'_>) -> Result<()> {
                Err(BuildError::tool("d8", "Type com.example.Dup is defined multiple times"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        class_dir(&classes, 20);
        let task = D8Task::new(Arc::new(FailingBuilder), Arc::new(ListingMerger::default()), 4).unwrap();

        let jobs = task.plan(&classes, &dir.path().join("archives"), &settings()).unwrap();
        assert!(matches!(task.convert(&jobs), Err(BuildError::Tool { .. })));
    }

    #[test]
    fn test_workers_see_the_callers_task() {
        /// Fails unless the conversion runs on behalf of a task
        struct TaskBoundBuilder;
        impl DexArchiveBuilder for TaskBoundBuilder {
            fn convert(&self, request: &DexArchiveRequest<'_>) -> Result<()> {
                if TaskContext::current().is_none() {
                    return Err(BuildError::Internal("no task context".into()));
                }
                std::fs::write(request.output, b"archive").map_err(|e| BuildError::io(request.output, e))
            }
        }

        let rt = tokio::runtime::Runtime::new().unwrap();
        let factory = andworx_core::TaskFactory::new(rt.handle().clone(), None);
        let _scope = factory.start();

        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        class_dir(&classes, 20);
        let task = Arc::new(
            D8Task::new(Arc::new(TaskBoundBuilder), Arc::new(ListingMerger::default()), 4).unwrap(),
        );
        let jobs = task.plan(&classes, &dir.path().join("archives"), &settings()).unwrap();

        let d8 = task.clone();
        let archives = factory
            .run(andworx_core::StandardBuildTask::new("dex", move || d8.convert(&jobs)))
            .unwrap();
        assert!(!archives.is_empty());

        let jobs = task.plan(&classes, &dir.path().join("again"), &settings()).unwrap();
        assert!(matches!(task.convert(&jobs), Err(BuildError::Internal(_))));
    }

    #[test]
    fn test_dex_files_in_load_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["classes10.dex", "classes2.dex", "classes.dex", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = dex_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["classes.dex", "classes2.dex", "classes10.dex"]);
    }
}
