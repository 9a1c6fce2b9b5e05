//! Fixed-size worker pools draining a pre-filled queue.

use crossbeam_channel::{unbounded, Receiver};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// A queue filled once up front and drained to empty.
///
/// Every item is handed to exactly one worker. The sending half is dropped on
/// construction, so nothing can be added mid-run.
pub struct WorkQueue<T> {
    rx: Receiver<T>,
}

impl<T> WorkQueue<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let (tx, rx) = unbounded();
        for item in items {
            // Receiver is alive for the whole loop
            let _ = tx.send(item);
        }
        Self { rx }
    }

    /// Take the next item, or `None` once the queue is empty.
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Run `workers` threads that pop from `queue` until it is empty or `cancel` is raised.
///
/// Returns the results of every processed item; their order across workers is
/// unspecified. A panicking worker is re-raised on the calling thread after the
/// others have finished.
pub fn drain<T, R, F>(queue: &WorkQueue<T>, workers: usize, cancel: &AtomicBool, work: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let work = &work;
    thread::scope(|s| {
        let handles: Vec<_> = (0..workers.max(1))
            .map(|_| {
                s.spawn(move || {
                    let mut done = Vec::new();
                    while !cancel.load(Ordering::Relaxed) {
                        match queue.pop() {
                            Some(item) => done.push(work(item)),
                            None => break,
                        }
                    }
                    done
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(done) => results.extend(done),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        results
    })
}
