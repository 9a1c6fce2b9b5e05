//! Archive-level pool: extract, enumerate, merge, clean up.

use crate::coordinator::RunContext;
use crate::error::MergeError;
use crate::files::FileWorkerPool;
use crate::pool::{drain, WorkQueue};
use crate::types::{ArchiveReport, ArchiveStatus};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Workers that each take one archive at a time from a shared queue.
pub struct ArchiveWorkerPool<'a> {
    ctx: &'a RunContext<'a>,
    temp_base: &'a Path,
    workers: usize,
}

impl<'a> ArchiveWorkerPool<'a> {
    pub fn new(ctx: &'a RunContext<'a>, temp_base: &'a Path, workers: usize) -> Self {
        Self {
            ctx,
            temp_base,
            workers: workers.max(1),
        }
    }

    pub fn run(&self, queue: WorkQueue<PathBuf>) -> Vec<ArchiveReport> {
        drain(&queue, self.workers, self.ctx.cancel, |archive| {
            self.process(archive)
        })
    }

    /// Extract one archive into its own scratch directory and merge its files.
    ///
    /// The scratch directory is removed on every exit path.
    pub fn process(&self, archive: PathBuf) -> ArchiveReport {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(archive = %name, "Processing archive");

        let report = |status: ArchiveStatus| ArchiveReport {
            archive: archive.clone(),
            status,
            files: Vec::new(),
        };

        if self.ctx.is_cancelled() {
            return report(ArchiveStatus::Cancelled);
        }

        let scratch = match tempfile::Builder::new()
            .prefix(&format!("{}_", base_name(&name)))
            .tempdir_in(self.temp_base)
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(archive = %name, error = %e, "failed to create scratch directory");
                return report(ArchiveStatus::ExtractionFailed(e.to_string()));
            }
        };

        match self
            .ctx
            .extractor
            .extract(&archive, scratch.path(), self.ctx.cancel)
        {
            Ok(()) => {}
            Err(MergeError::Cancelled) => return report(ArchiveStatus::Cancelled),
            Err(e) => {
                warn!(archive = %name, error = %e, "Failed to extract archive");
                return report(ArchiveStatus::ExtractionFailed(e.to_string()));
            }
        }

        let files = list_files(scratch.path());
        let snapshot = self.ctx.progress.add_total(files.len() as u64);
        (self.ctx.progress_cb)(snapshot);

        let pool = FileWorkerPool::new(self.ctx, scratch.path(), files.len(), self.workers);
        info!(
            archive = %name,
            files = files.len(),
            workers = pool.workers(),
            "Found {} files in {}",
            files.len(),
            name
        );

        let expected = files.len();
        let results = pool.run(WorkQueue::new(files));
        let status = if results.len() < expected {
            ArchiveStatus::Cancelled
        } else {
            ArchiveStatus::Merged
        };

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "failed to remove scratch directory");
        }
        info!(archive = %name, "Finished processing archive");

        ArchiveReport {
            archive,
            status,
            files: results,
        }
    }
}

/// Archive name up to its first dot, e.g. `dag-001` for `dag-001.tar.gz`.
fn base_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Every regular file below `root`.
fn list_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}
