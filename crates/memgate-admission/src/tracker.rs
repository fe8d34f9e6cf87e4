//! Per-query (or per-thread) consumption tracking.
//!
//! The admission controller sees a tracker only through [`MemTracker`]:
//! a soft-limit check plus consume/release. How trackers nest, or how a
//! query's limit is chosen, stays with the embedder.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::arbitrator::to_i64;

/// A soft-limit check that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "memory tracker <{label}> exceeded soft limit: limit {limit} B, consumption {consumption} B, requested {requested} B"
)]
pub struct SoftLimitExceeded {
    pub label: String,
    pub limit: i64,
    pub consumption: i64,
    pub requested: u64,
}

/// Consumption counter for a query or thread.
pub trait MemTracker: Send + Sync {
    fn label(&self) -> &str;
    /// Check whether charging `size` more bytes stays within the soft limit.
    fn check_soft_limit(&self, size: u64) -> Result<(), SoftLimitExceeded>;
    fn consume(&self, size: u64);
    fn release(&self, size: u64);
    fn current_consumption(&self) -> i64;
    fn peak_consumption(&self) -> i64;

    /// Register a live range with an address-sanitizer integration.
    fn add_address_sanitizer_region(&self, _addr: usize, _size: usize) {}
    /// Unregister a range previously passed to `add_address_sanitizer_region`.
    fn remove_address_sanitizer_region(&self, _addr: usize, _size: usize) {}
}

/// Atomic tracker with an optional soft limit.
///
/// A negative limit means unlimited.
#[derive(Debug)]
pub struct QueryMemTracker {
    label: String,
    limit: AtomicI64,
    consumption: AtomicI64,
    peak: AtomicI64,
    sanitizer_regions: Mutex<BTreeMap<usize, usize>>,
}

impl QueryMemTracker {
    pub fn new(label: impl Into<String>, limit: i64) -> Self {
        Self {
            label: label.into(),
            limit: AtomicI64::new(limit),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            sanitizer_regions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn unlimited(label: impl Into<String>) -> Self {
        Self::new(label, -1)
    }

    #[must_use]
    pub fn limit(&self) -> i64 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: i64) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    #[must_use]
    pub fn has_limit(&self) -> bool {
        self.limit() >= 0
    }

    /// Ranges currently registered through the sanitizer hooks.
    #[must_use]
    pub fn sanitizer_regions(&self) -> Vec<(usize, usize)> {
        self.sanitizer_regions
            .lock()
            .iter()
            .map(|(&addr, &size)| (addr, size))
            .collect()
    }
}

impl MemTracker for QueryMemTracker {
    fn label(&self) -> &str {
        &self.label
    }

    fn check_soft_limit(&self, size: u64) -> Result<(), SoftLimitExceeded> {
        let limit = self.limit();
        if limit < 0 {
            return Ok(());
        }
        let consumption = self.current_consumption();
        if consumption.saturating_add(to_i64(size)) > limit {
            return Err(SoftLimitExceeded {
                label: self.label.clone(),
                limit,
                consumption,
                requested: size,
            });
        }
        Ok(())
    }

    fn consume(&self, size: u64) {
        let delta = to_i64(size);
        let now = self
            .consumption
            .fetch_add(delta, Ordering::AcqRel)
            .saturating_add(delta);
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    fn release(&self, size: u64) {
        self.consumption.fetch_sub(to_i64(size), Ordering::AcqRel);
    }

    fn current_consumption(&self) -> i64 {
        self.consumption.load(Ordering::Acquire)
    }

    fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    fn add_address_sanitizer_region(&self, addr: usize, size: usize) {
        self.sanitizer_regions.lock().insert(addr, size);
    }

    fn remove_address_sanitizer_region(&self, addr: usize, _size: usize) {
        self.sanitizer_regions.lock().remove(&addr);
    }
}
