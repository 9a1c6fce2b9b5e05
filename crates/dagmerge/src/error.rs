//! Error types for merge operations.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for merge operations.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Input directory or archive not found at the specified path.
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// The archive could not be unpacked.
    #[error("Failed to extract {archive}: {reason}")]
    Extraction {
        /// Archive that failed
        archive: PathBuf,
        /// Exit status or underlying error
        reason: String,
    },

    /// A source fragment could not be decoded.
    #[error("Failed to decode {path}: {source}")]
    Decode {
        /// Fragment that failed to decode
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// The existing destination could not be decoded and the policy forbids replacing it.
    #[error("Unreadable destination {path}: {source}")]
    CorruptDestination {
        /// Destination file
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// The merged section could not be persisted.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Destination file
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Per-path locks were still held when the registry was released.
    #[error("{0} destination lock(s) still held at release")]
    LocksHeld(usize),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled.
    #[error("Cancelled")]
    Cancelled,
}

/// Errors produced while encoding or decoding a section.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes are not a valid section document.
    #[error("invalid section: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entry paths rejected during native extraction. The entry is skipped, not the archive.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Path traversal attempt detected (e.g., "../../../etc/passwd").
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Absolute path not allowed in archive entries.
    #[error("Absolute path not allowed: {0}")]
    AbsolutePath(String),
}
