//! Run-wide progress counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// How often (in processed files) a progress line is logged.
pub const LOG_EVERY: u64 = 100;

/// Callback invoked with a fresh snapshot whenever the counters move.
pub type ProgressCallback<'a> = dyn Fn(ProgressSnapshot) + Send + Sync + 'a;

/// Point-in-time view of [`Progress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Files merged successfully
    pub processed: u64,
    /// Files discovered across all extracted archives
    pub total: u64,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.processed as f64 / self.total as f64
        }
    }
}

/// Monotonic `processed` / `total` counters shared by all workers.
#[derive(Debug, Default)]
pub struct Progress {
    processed: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }

    /// Add one archive's file count to `total`.
    pub fn add_total(&self, files: u64) -> ProgressSnapshot {
        let total = self.total.fetch_add(files, Ordering::Relaxed) + files;
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            total,
        }
    }

    /// Count one successfully merged file, logging every [`LOG_EVERY`] files.
    pub fn record_processed(&self) -> ProgressSnapshot {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = ProgressSnapshot {
            processed,
            total: self.total.load(Ordering::Relaxed),
        };
        if processed % LOG_EVERY == 0 {
            info!(
                processed,
                total = snapshot.total,
                "Progress: {}/{} files ({:.1}%)",
                processed,
                snapshot.total,
                snapshot.percent()
            );
        }
        snapshot
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counts_across_threads() {
        let progress = Progress::new();
        progress.add_total(400);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        progress.record_processed();
                    }
                });
            }
        });

        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                processed: 400,
                total: 400
            }
        );
    }

    #[test]
    fn test_reset() {
        let progress = Progress::new();
        progress.add_total(3);
        progress.record_processed();
        progress.reset();
        assert_eq!(progress.snapshot(), ProgressSnapshot::default());
    }

    #[test]
    fn test_percent() {
        let snap = ProgressSnapshot {
            processed: 1,
            total: 4,
        };
        assert_eq!(snap.percent(), 25.0);
        assert_eq!(ProgressSnapshot::default().percent(), 0.0);
    }
}
