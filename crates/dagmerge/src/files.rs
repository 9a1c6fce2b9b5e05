//! Per-archive pool merging extracted files.

use crate::coordinator::RunContext;
use crate::path::resolve;
use crate::pool::{drain, WorkQueue};
use crate::types::{FileReport, FileStatus};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Workers merging the files of one extracted archive.
pub struct FileWorkerPool<'a> {
    ctx: &'a RunContext<'a>,
    source_root: &'a Path,
    workers: usize,
}

impl<'a> FileWorkerPool<'a> {
    /// Size the pool for `files` files while `archive_workers` archives run concurrently.
    pub fn new(
        ctx: &'a RunContext<'a>,
        source_root: &'a Path,
        files: usize,
        archive_workers: usize,
    ) -> Self {
        Self {
            ctx,
            source_root,
            workers: ctx.options.file_workers(files, archive_workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Merge every queued file. Stops early only on cancellation.
    pub fn run(&self, queue: WorkQueue<PathBuf>) -> Vec<FileReport> {
        drain(&queue, self.workers, self.ctx.cancel, |path| self.process(path))
    }

    fn process(&self, path: PathBuf) -> FileReport {
        let shown = path
            .strip_prefix(self.source_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());

        let Some(canonical) = resolve(&path, self.source_root, &self.ctx.options.marker) else {
            return FileReport {
                path: shown,
                status: FileStatus::Skipped,
            };
        };

        let status = match self.ctx.engine.merge_file(&canonical, &path) {
            Ok(outcome) => {
                let snapshot = self.ctx.progress.record_processed();
                (self.ctx.progress_cb)(snapshot);
                FileStatus::Merged { canonical, outcome }
            }
            Err(e) => {
                warn!(file = %shown.display(), error = %e, "failed to merge fragment");
                FileStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        FileReport { path: shown, status }
    }
}
