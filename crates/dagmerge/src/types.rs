//! Type definitions for merge runs.

use crate::path::{CanonicalPath, DEFAULT_MARKER};
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Options for a merge run.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Archive file names must start with this prefix
    pub archive_prefix: String,

    /// Archive file names must end with this suffix
    pub archive_suffix: String,

    /// Path segment that roots the section namespace inside archives
    pub marker: String,

    /// Upper bound on archives processed concurrently (default: 4)
    pub max_archive_workers: usize,

    /// Upper bound on file workers per archive (default: 8)
    pub max_file_workers: usize,

    /// One file worker is added per this many files in an archive (default: 50)
    pub files_per_worker: usize,

    /// Global cap on concurrent file merges across all archives
    pub worker_budget: Option<usize>,

    /// What to do when an existing destination cannot be decoded
    pub on_corrupt_destination: CorruptPolicy,

    /// How archives are unpacked
    pub extractor: ExtractorKind,

    /// Name of the scratch directory created inside the archives directory
    pub temp_dir_name: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            archive_prefix: "dag-".to_string(),
            archive_suffix: ".tar.gz".to_string(),
            marker: DEFAULT_MARKER.to_string(),
            max_archive_workers: 4,
            max_file_workers: 8,
            files_per_worker: 50,
            worker_budget: None,
            on_corrupt_destination: CorruptPolicy::Replace,
            extractor: ExtractorKind::Command,
            temp_dir_name: "tmp_merge".to_string(),
        }
    }
}

impl MergeOptions {
    /// Whether `file_name` names an input archive.
    pub fn matches_archive(&self, file_name: &str) -> bool {
        file_name.len() >= self.archive_prefix.len() + self.archive_suffix.len()
            && file_name.starts_with(&self.archive_prefix)
            && file_name.ends_with(&self.archive_suffix)
    }

    /// Number of archive workers for `archives` queued archives.
    pub fn archive_workers(&self, archives: usize) -> usize {
        let workers = self.max_archive_workers.max(1).min(archives);
        match self.worker_budget {
            Some(budget) => workers.min(budget.max(1)),
            None => workers,
        }
    }

    /// Number of file workers for an archive holding `files` files while
    /// `archive_workers` archives run side by side.
    pub fn file_workers(&self, files: usize, archive_workers: usize) -> usize {
        let wanted = (files / self.files_per_worker.max(1)).max(1);
        let cap = match self.worker_budget {
            Some(budget) => self
                .max_file_workers
                .min(budget / archive_workers.max(1))
                .max(1),
            None => self.max_file_workers.max(1),
        };
        wanted.min(cap)
    }
}

/// Policy for an existing destination that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Overwrite it with the incoming fragment (previous contents are lost)
    Replace,

    /// Move it aside as `<name>.XXXXXX.corrupt`, then write the incoming fragment
    Quarantine,

    /// Leave it in place and fail the merge of this fragment
    Preserve,
}

/// How archives are unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Spawn `tar -xzf`
    Command,

    /// Unpack in-process with path validation
    Native,
}

/// Outcome of one successful merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Transactions in the destination after the merge
    pub transactions: usize,

    /// Transactions the fragment contributed that were not there before
    pub added: usize,

    /// Whether an unreadable destination was discarded
    pub replaced_corrupt: bool,
}

/// What happened to one extracted file.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    /// Merged into its destination
    Merged {
        /// Destination, relative to the result directory
        #[serde(serialize_with = "display")]
        canonical: CanonicalPath,
        /// Counts from the merge
        outcome: MergeOutcome,
    },

    /// Not part of the section namespace
    Skipped,

    /// Decode or write failed
    Failed {
        /// Error message
        reason: String,
    },
}

/// Result for one file found in an extracted archive.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Path relative to the archive's scratch directory
    pub path: PathBuf,

    /// What happened to it
    #[serde(flatten)]
    pub status: FileStatus,
}

/// What happened to one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Extracted and every file was attempted
    Merged,

    /// The archive could not be unpacked
    ExtractionFailed(String),

    /// The run was cancelled before this archive finished
    Cancelled,
}

/// Result for one input archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    /// Archive path as discovered
    pub archive: PathBuf,

    /// Archive-level outcome
    pub status: ArchiveStatus,

    /// One entry per file attempted; empty if extraction failed
    pub files: Vec<FileReport>,
}

impl ArchiveReport {
    /// Files merged into a destination.
    pub fn merged(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Merged { .. }))
    }

    /// Files outside the section namespace.
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped))
    }

    /// Files whose decode or write failed.
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Per-archive results, in the order archives finished
    pub archives: Vec<ArchiveReport>,

    /// Files merged successfully
    pub processed: u64,

    /// Files discovered in extracted archives
    pub total: u64,

    /// Whether the run was cancelled
    pub cancelled: bool,

    /// Duration of the run (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunReport {
    /// Archives that could not be unpacked.
    pub fn failed_archives(&self) -> usize {
        self.archives
            .iter()
            .filter(|a| matches!(a.status, ArchiveStatus::ExtractionFailed(_)))
            .count()
    }

    /// Files that failed across every archive.
    pub fn failed_files(&self) -> usize {
        self.archives.iter().map(ArchiveReport::failed).sum()
    }
}

fn display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: Serializer,
{
    serializer.collect_str(value)
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }
}
