//! Progress-callback trait for run-level generation events.
//!
//! Pass an [`Arc<dyn GenerationProgressCallback>`] to
//! [`crate::orchestrator::Orchestrator::with_progress`] to be told when the
//! crawl advances, when worker processes start and finish, and when the merge
//! is done. Worker processes run out-of-process, so per-job events are not
//! forwarded; each worker reports its counters through `worker_report.json`
//! instead.
//!
//! # Example
//!
//! ```rust
//! use docsynth::GenerationProgressCallback;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for CountingCallback {
//!     fn on_worker_finished(&self, index: usize, success: bool) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("worker {index} done (ok = {success})");
//!     }
//! }
//!
//! let cb: Arc<dyn GenerationProgressCallback> =
//!     Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//! cb.on_worker_finished(0, true);
//! ```

use std::sync::Arc;

/// Called by the orchestrator as a run advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_worker_finished` may be called from several
/// tasks at once.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called each time the crawler accepts a new URL.
    ///
    /// # Arguments
    /// * `found` — URLs known so far, start page included
    /// * `limit` — the crawl stops when `found` reaches this
    fn on_crawl_progress(&self, found: usize, limit: usize) {
        let _ = (found, limit);
    }

    /// Called once all worker processes have been launched.
    ///
    /// # Arguments
    /// * `workers`    — number of worker processes
    /// * `total_urls` — URLs distributed across them
    fn on_workers_started(&self, workers: usize, total_urls: usize) {
        let _ = (workers, total_urls);
    }

    /// Called when a worker process exits.
    ///
    /// # Arguments
    /// * `index`   — worker index
    /// * `success` — whether the process exited with status 0
    fn on_worker_finished(&self, index: usize, success: bool) {
        let _ = (index, success);
    }

    /// Called after the staging directories have been merged.
    ///
    /// # Arguments
    /// * `merged`  — pairs written to the final dataset
    /// * `invalid` — pairs discarded by validation
    fn on_merge_complete(&self, merged: usize, invalid: usize) {
        let _ = (merged, invalid);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

/// Callback that records every event, for asserting what a run reported.
#[cfg(test)]
pub(crate) mod recording {
    use super::GenerationProgressCallback;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Event {
        Crawl { found: usize, limit: usize },
        WorkersStarted { workers: usize, total_urls: usize },
        WorkerFinished { index: usize, success: bool },
        MergeComplete { merged: usize, invalid: usize },
    }

    #[derive(Debug, Default)]
    pub struct RecordingCallback {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingCallback {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl GenerationProgressCallback for RecordingCallback {
        fn on_crawl_progress(&self, found: usize, limit: usize) {
            self.push(Event::Crawl { found, limit });
        }

        fn on_workers_started(&self, workers: usize, total_urls: usize) {
            self.push(Event::WorkersStarted { workers, total_urls });
        }

        fn on_worker_finished(&self, index: usize, success: bool) {
            self.push(Event::WorkerFinished { index, success });
        }

        fn on_merge_complete(&self, merged: usize, invalid: usize) {
            self.push(Event::MergeComplete { merged, invalid });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_crawl_progress(1, 10);
        cb.on_workers_started(2, 10);
        cb.on_worker_finished(0, false);
        cb.on_merge_complete(9, 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_workers_started(1, 1);
    }
}
