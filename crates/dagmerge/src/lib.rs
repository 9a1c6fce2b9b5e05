//! # dagmerge
//!
//! Merges DAG section fragments scattered across a batch of `dag-*.tar.gz`
//! archives into one canonical file per section.
//!
//! Each archive is unpacked into its own scratch directory. Every file below a
//! `dag/` segment is a fragment of the section at that path; fragments are
//! unioned by transaction hash into `<result_dir>/dag/...`. Archives are handled
//! by a small pool of workers, and the files of each archive by a nested pool.
//! Writes to one destination are serialized through a per-path lock and land
//! atomically via temp file and rename.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dagmerge::{merge_archives, MergeOptions, ProgressSnapshot};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = MergeOptions::default();
//! let cancel_flag = Arc::new(AtomicBool::new(false));
//! let progress_cb = |snap: ProgressSnapshot| {
//!     println!("{}/{} files", snap.processed, snap.total);
//! };
//!
//! let report = merge_archives(
//!     Path::new("archives"),
//!     Path::new("merged"),
//!     &options,
//!     &progress_cb,
//!     cancel_flag,
//! )?;
//!
//! println!("Merged {} of {} files", report.processed, report.total);
//! # Ok(())
//! # }
//! ```

pub mod archives;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod files;
pub mod locks;
pub mod merge;
pub mod path;
pub mod pool;
pub mod progress;
pub mod safety;
pub mod section;
pub mod types;

// Re-export main types
pub use codec::{Codec, JsonCodec};
pub use coordinator::Coordinator;
pub use error::{CodecError, MergeError, SecurityError};
pub use extract::{CommandExtractor, Extractor, NativeExtractor};
pub use locks::{LockHandle, LockRegistry, RunLease};
pub use merge::MergeEngine;
pub use path::{resolve, CanonicalPath};
pub use progress::{Progress, ProgressCallback, ProgressSnapshot};
pub use section::{Section, Transaction};
pub use types::{
    ArchiveReport, ArchiveStatus, CorruptPolicy, ExtractorKind, FileReport, FileStatus,
    MergeOptions, MergeOutcome, RunReport,
};

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Merge every archive in `archives_dir` into `result_dir` using parallel archive workers.
///
/// # Arguments
///
/// * `archives_dir` - Directory holding the input archives
/// * `result_dir` - Root of the merged section tree (created if missing)
/// * `options` - Pool sizes, archive pattern, corruption policy, extractor
/// * `progress_cb` - Called whenever the processed/total counters move
/// * `cancel_flag` - Raise to stop the run after in-flight merges finish
///
/// # Errors
///
/// Only run-level failures are returned: a missing `archives_dir` or an
/// unwritable `result_dir`. Failures of individual archives and files are
/// recorded in the returned [`RunReport`].
pub fn merge_archives(
    archives_dir: &Path,
    result_dir: &Path,
    options: &MergeOptions,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<RunReport, MergeError> {
    Coordinator::new(options.clone())
        .with_cancel_flag(cancel_flag)
        .run(archives_dir, result_dir, progress_cb)
}

/// Like [`merge_archives`], but archives are processed one at a time.
///
/// Produces the same result tree with lower peak memory and disk use.
pub fn merge_archives_sequential(
    archives_dir: &Path,
    result_dir: &Path,
    options: &MergeOptions,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> Result<RunReport, MergeError> {
    Coordinator::new(options.clone())
        .with_cancel_flag(cancel_flag)
        .run_sequential(archives_dir, result_dir, progress_cb)
}
