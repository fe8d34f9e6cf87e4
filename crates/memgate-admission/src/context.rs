//! Per-thread allocation context.
//!
//! Every admission check and allocation call takes the caller's context
//! explicitly. A context names the tracker that is charged, the query it
//! belongs to (if any), and two per-thread policy bits: whether this thread may
//! still wait for reclamation, and whether checking is currently bypassed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::task::QueryTask;
use crate::tracker::MemTracker;

const NO_TASK_ID: &str = "<none>";

pub struct ThreadContext {
    tracker: Arc<dyn MemTracker>,
    task: Option<Arc<dyn QueryTask>>,
    wait_gc: AtomicBool,
    skip_memory_check: AtomicU32,
}

impl ThreadContext {
    /// Context for a thread executing part of `task`. It may wait for
    /// reclamation on a hard-limit violation.
    pub fn attach_query(tracker: Arc<dyn MemTracker>, task: Arc<dyn QueryTask>) -> Self {
        Self {
            tracker,
            task: Some(task),
            wait_gc: AtomicBool::new(true),
            skip_memory_check: AtomicU32::new(0),
        }
    }

    /// Context for a thread not serving any query (background work, loads
    /// without a cancellable owner). It never waits.
    pub fn detached(tracker: Arc<dyn MemTracker>) -> Self {
        Self {
            tracker,
            task: None,
            wait_gc: AtomicBool::new(false),
            skip_memory_check: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &dyn MemTracker {
        self.tracker.as_ref()
    }

    #[must_use]
    pub fn task(&self) -> Option<&dyn QueryTask> {
        self.task.as_deref()
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        self.task().map_or(NO_TASK_ID, |task| task.task_id())
    }

    #[must_use]
    pub fn is_attach_query(&self) -> bool {
        self.task.is_some()
    }

    /// Returns true if a hard-limit violation on this thread may wait.
    #[must_use]
    pub fn is_wait_eligible(&self) -> bool {
        self.is_attach_query() && self.wait_gc.load(Ordering::Acquire)
    }

    /// Make later hard-limit violations on this thread escalate without waiting.
    pub fn disable_further_waiting(&self) {
        self.wait_gc.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_query_cancelled(&self) -> bool {
        self.task().is_some_and(|task| task.is_cancelled())
    }

    /// Cancel the owning query. Returns true if this call performed the
    /// cancellation; false if already cancelled or not attached to a query.
    pub fn cancel_query(&self, reason: &str) -> bool {
        self.task().is_some_and(|task| task.cancel(reason))
    }

    /// Bypass admission checks until the returned guard drops. Nests.
    pub fn skip_memory_check(&self) -> SkipMemoryCheckGuard<'_> {
        self.skip_memory_check.fetch_add(1, Ordering::AcqRel);
        SkipMemoryCheckGuard { ctx: self }
    }

    #[must_use]
    pub fn is_memory_check_skipped(&self) -> bool {
        self.skip_memory_check.load(Ordering::Acquire) != 0
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("tracker", &self.tracker.label())
            .field("task", &self.task_id())
            .field("wait_gc", &self.wait_gc.load(Ordering::Relaxed))
            .field(
                "skip_memory_check",
                &self.skip_memory_check.load(Ordering::Relaxed),
            )
            .finish()
    }
}

/// Scope guard returned by [`ThreadContext::skip_memory_check`].
#[must_use = "memory checks resume as soon as the guard is dropped"]
pub struct SkipMemoryCheckGuard<'a> {
    ctx: &'a ThreadContext,
}

impl Drop for SkipMemoryCheckGuard<'_> {
    fn drop(&mut self) {
        self.ctx.skip_memory_check.fetch_sub(1, Ordering::AcqRel);
    }
}
