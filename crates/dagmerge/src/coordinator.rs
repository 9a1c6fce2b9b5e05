//! Run orchestration: discovery, pool sizing, teardown.

use crate::archives::ArchiveWorkerPool;
use crate::codec::{Codec, JsonCodec};
use crate::error::MergeError;
use crate::extract::Extractor;
use crate::locks::LockRegistry;
use crate::merge::MergeEngine;
use crate::pool::WorkQueue;
use crate::progress::{Progress, ProgressCallback};
use crate::types::{MergeOptions, RunReport};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// State shared by every worker of one run.
pub struct RunContext<'a> {
    pub options: &'a MergeOptions,
    pub engine: &'a MergeEngine,
    pub extractor: &'a dyn Extractor,
    pub progress: &'a Progress,
    pub progress_cb: &'a ProgressCallback<'a>,
    pub cancel: &'a AtomicBool,
}

impl RunContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Runs merges with a shared lock registry and cancel flag.
///
/// Nothing here is process-global. One coordinator may run several merges at
/// once: each run gets its own counters, and writes to a shared result tree are
/// serialized through the common registry. Separate coordinators must not
/// write into the same result directory concurrently.
pub struct Coordinator {
    options: MergeOptions,
    codec: Arc<dyn Codec>,
    extractor: Arc<dyn Extractor>,
    locks: Arc<LockRegistry>,
    cancel: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(options: MergeOptions) -> Self {
        let extractor = options.extractor.extractor();
        Self {
            options,
            codec: Arc::new(JsonCodec::default()),
            extractor,
            locks: Arc::new(LockRegistry::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Share an externally owned cancel flag (e.g. one raised by a signal handler).
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Merge every archive in `archives_dir` into `result_dir`, up to
    /// `max_archive_workers` archives at a time.
    pub fn run(
        &self,
        archives_dir: &Path,
        result_dir: &Path,
        progress_cb: &ProgressCallback,
    ) -> Result<RunReport, MergeError> {
        info!("=== DAG Merge Started ===");
        self.execute(archives_dir, result_dir, progress_cb, false)
    }

    /// Same as [`Coordinator::run`] but one archive at a time.
    pub fn run_sequential(
        &self,
        archives_dir: &Path,
        result_dir: &Path,
        progress_cb: &ProgressCallback,
    ) -> Result<RunReport, MergeError> {
        info!("=== DAG Merge Started (Sequential Mode) ===");
        self.execute(archives_dir, result_dir, progress_cb, true)
    }

    /// Input archives in `archives_dir`, sorted by name.
    pub fn discover_archives(&self, archives_dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
        if !archives_dir.is_dir() {
            return Err(MergeError::NotFound(archives_dir.to_path_buf()));
        }

        let mut archives = Vec::new();
        for entry in fs::read_dir(archives_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| self.options.matches_archive(n)) {
                archives.push(entry.path());
            }
        }
        archives.sort();
        Ok(archives)
    }

    fn execute(
        &self,
        archives_dir: &Path,
        result_dir: &Path,
        progress_cb: &ProgressCallback,
        sequential: bool,
    ) -> Result<RunReport, MergeError> {
        let start_time = Instant::now();
        info!(archives_dir = %archives_dir.display(), result_dir = %result_dir.display(), "starting merge");

        fs::create_dir_all(result_dir)?;
        let archives = self.discover_archives(archives_dir)?;
        info!("Found {} archives to process", archives.len());

        let mut report = RunReport::default();
        if archives.is_empty() {
            info!("No archives found");
            report.duration = start_time.elapsed();
            return Ok(report);
        }

        let temp_base = archives_dir.join(&self.options.temp_dir_name);
        fs::create_dir_all(&temp_base)?;
        let progress = Progress::new();
        let lease = self.locks.begin_run();

        let engine = MergeEngine::new(
            result_dir,
            Arc::clone(&self.codec),
            Arc::clone(&self.locks),
            self.options.on_corrupt_destination,
        );
        let ctx = RunContext {
            options: &self.options,
            engine: &engine,
            extractor: self.extractor.as_ref(),
            progress: &progress,
            progress_cb,
            cancel: &self.cancel,
        };

        let workers = if sequential {
            1
        } else {
            self.options.archive_workers(archives.len())
        };
        info!("Using {} threads for archive processing", workers);

        let pool = ArchiveWorkerPool::new(&ctx, &temp_base, workers);
        report.archives = pool.run(WorkQueue::new(archives));

        // Scratch directories are already gone; a non-empty base belongs to another run
        match fs::remove_dir(&temp_base) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                let in_use = fs::read_dir(&temp_base).is_ok_and(|mut d| d.next().is_some());
                if in_use {
                    debug!(path = %temp_base.display(), "temp directory still in use");
                } else {
                    warn!(path = %temp_base.display(), error = %e, "failed to remove temp directory");
                }
            }
        }
        match lease.end() {
            Ok(released) => info!(destinations = released, "released destination locks"),
            Err(e) => error!(error = %e, "destination locks still held at teardown"),
        }

        let snapshot = progress.snapshot();
        report.processed = snapshot.processed;
        report.total = snapshot.total;
        report.cancelled = self.cancel.load(Ordering::Relaxed);
        report.duration = start_time.elapsed();

        info!("=== DAG Merge Completed ===");
        info!(
            processed = report.processed,
            total = report.total,
            failed_archives = report.failed_archives(),
            failed_files = report.failed_files(),
            cancelled = report.cancelled,
            "Total processed files: {}",
            report.processed
        );
        Ok(report)
    }
}
