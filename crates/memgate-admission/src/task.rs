//! Query lifecycle handle used for asynchronous cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// The part of a query's lifecycle visible to admission control.
pub trait QueryTask: Send + Sync {
    fn task_id(&self) -> &str;
    fn is_cancelled(&self) -> bool;
    /// Mark the query cancelled. Returns true only for the call that performed
    /// the transition; later calls are no-ops and keep the first reason.
    fn cancel(&self, reason: &str) -> bool;
}

/// Reference [`QueryTask`]: an atomic flag plus the first cancel reason.
#[derive(Debug)]
pub struct CancellableTask {
    id: String,
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl CancellableTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancelled: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl QueryTask for CancellableTask {
    fn task_id(&self) -> &str {
        &self.id
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self, reason: &str) -> bool {
        let mut slot = self.reason.lock();
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(reason.to_owned());
        self.cancelled.store(true, Ordering::Release);
        true
    }
}
