//! Per-destination lock registry.

use crate::error::MergeError;
use crate::path::CanonicalPath;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Exclusive lock for one destination.
pub type LockHandle = Arc<Mutex<()>>;

/// Hands out one lock per canonical path for the lifetime of a run.
///
/// Entries are created on first use and never removed while any run is active,
/// so a handle can never be dropped from the map while another worker still
/// waits on it. The registry mutex only guards lookup-or-insert.
///
/// Several runs may share one registry (and so serialize writes to a shared
/// result tree); the map is cleared when the last of them ends.
#[derive(Debug, Default)]
pub struct LockRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    locks: HashMap<CanonicalPath, LockHandle>,
    active_runs: usize,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `path`, created if absent.
    pub fn acquire(&self, path: &CanonicalPath) -> LockHandle {
        let mut inner = self.inner.lock();
        inner
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of destinations seen so far.
    pub fn len(&self) -> usize {
        self.inner.lock().locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of runs currently holding a [`RunLease`].
    pub fn active_runs(&self) -> usize {
        self.inner.lock().active_runs
    }

    /// Register a run. Entries survive until every lease has ended.
    pub fn begin_run(&self) -> RunLease<'_> {
        self.inner.lock().active_runs += 1;
        RunLease {
            registry: self,
            ended: false,
        }
    }

    /// Drop every entry at the end of a run.
    ///
    /// Holding a destination lock at this point is a bug in the caller: the
    /// registry is left untouched and [`MergeError::LocksHeld`] is returned.
    pub fn release_all(&self) -> Result<usize, MergeError> {
        Self::clear(&mut self.inner.lock())
    }

    fn end_run(&self) -> Result<usize, MergeError> {
        let mut inner = self.inner.lock();
        inner.active_runs = inner.active_runs.saturating_sub(1);
        if inner.active_runs > 0 {
            return Ok(0);
        }
        Self::clear(&mut inner)
    }

    fn clear(inner: &mut Inner) -> Result<usize, MergeError> {
        let held = inner.locks.values().filter(|lock| lock.is_locked()).count();
        if held > 0 {
            debug_assert!(false, "release_all called with {held} destination lock(s) held");
            return Err(MergeError::LocksHeld(held));
        }
        let released = inner.locks.len();
        inner.locks.clear();
        Ok(released)
    }
}

/// One run's claim on a [`LockRegistry`].
///
/// Ending the last lease releases every entry. A lease dropped without
/// [`RunLease::end`] (e.g. while unwinding) still ends the run.
#[derive(Debug)]
pub struct RunLease<'a> {
    registry: &'a LockRegistry,
    ended: bool,
}

impl RunLease<'_> {
    /// End the run, returning how many entries were released (0 while other runs remain).
    pub fn end(mut self) -> Result<usize, MergeError> {
        self.ended = true;
        self.registry.end_run()
    }
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.registry.end_run();
        }
    }
}
