//! Process-wide memory arbitration.
//!
//! The arbitrator owns the process consumption counter and the hard limit it
//! is checked against. Admission only asks whether a request would cross the
//! limit; deciding the limit itself is the embedder's business.

use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide consumption counter consulted by admission control.
pub trait ProcessArbitrator: Send + Sync {
    /// Returns true if charging `size` more bytes would exceed the hard limit.
    fn is_exceed_hard_limit(&self, size: u64) -> bool;
    /// Account bytes that became available while a thread was waiting.
    fn record_interval_growth(&self, size: u64);
    /// Human-readable summary of process usage for failure diagnostics.
    fn process_limit_exceeded_diagnostic(&self) -> String;
    fn consume(&self, size: u64);
    fn release(&self, size: u64);
    fn consumption(&self) -> i64;
    fn peak_consumption(&self) -> i64;
}

pub(crate) fn to_i64(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Lock-free arbitrator backed by atomic counters.
#[derive(Debug)]
pub struct GlobalMemoryArbitrator {
    hard_limit: AtomicI64,
    consumption: AtomicI64,
    peak: AtomicI64,
    interval_growth: AtomicI64,
}

impl GlobalMemoryArbitrator {
    #[must_use]
    pub const fn new(hard_limit: i64) -> Self {
        Self {
            hard_limit: AtomicI64::new(hard_limit),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            interval_growth: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(i64::MAX)
    }

    #[must_use]
    pub fn hard_limit(&self) -> i64 {
        self.hard_limit.load(Ordering::Relaxed)
    }

    /// Change the hard limit, e.g. after the embedder resizes the process budget.
    pub fn set_hard_limit(&self, limit: i64) {
        self.hard_limit.store(limit, Ordering::Relaxed);
    }

    #[must_use]
    pub fn interval_growth(&self) -> i64 {
        self.interval_growth.load(Ordering::Relaxed)
    }

    /// Read and reset the interval growth counter.
    pub fn take_interval_growth(&self) -> i64 {
        self.interval_growth.swap(0, Ordering::AcqRel)
    }
}

impl Default for GlobalMemoryArbitrator {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl ProcessArbitrator for GlobalMemoryArbitrator {
    fn is_exceed_hard_limit(&self, size: u64) -> bool {
        let current = self.consumption.load(Ordering::Acquire);
        current.saturating_add(to_i64(size)) > self.hard_limit()
    }

    fn record_interval_growth(&self, size: u64) {
        self.interval_growth
            .fetch_add(to_i64(size), Ordering::Relaxed);
    }

    fn process_limit_exceeded_diagnostic(&self) -> String {
        format!(
            "process memory used {} B, peak {} B, hard limit {} B, interval growth {} B",
            self.consumption(),
            self.peak_consumption(),
            self.hard_limit(),
            self.interval_growth(),
        )
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

    fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Acquire)
    }

    fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn hard_limit_is_inclusive() {
        let arb = GlobalMemoryArbitrator::new(1000);
        arb.consume(900);
        assert!(!arb.is_exceed_hard_limit(100));
        assert!(arb.is_exceed_hard_limit(101));
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let arb = GlobalMemoryArbitrator::new(1000);
        arb.consume(600);
        arb.release(500);
        arb.consume(100);
        assert_eq!(arb.consumption(), 200);
        assert_eq!(arb.peak_consumption(), 600);
    }

    #[test]
    fn unlimited_never_exceeds() {
        let arb = GlobalMemoryArbitrator::unlimited();
        arb.consume(u64::MAX);
        assert!(!arb.is_exceed_hard_limit(u64::MAX));
    }

    #[test]
    fn interval_growth_accumulates_and_resets() {
        let arb = GlobalMemoryArbitrator::default();
        arb.record_interval_growth(64);
        arb.record_interval_growth(36);
        assert_eq!(arb.take_interval_growth(), 100);
        assert_eq!(arb.interval_growth(), 0);
    }

    #[test]
    fn diagnostic_mentions_limit_and_peak() {
        let arb = GlobalMemoryArbitrator::new(1000);
        arb.consume(950);
        let text = arb.process_limit_exceeded_diagnostic();
        assert!(text.contains("used 950 B"), "{text}");
        assert!(text.contains("peak 950 B"), "{text}");
        assert!(text.contains("hard limit 1000 B"), "{text}");
    }

    #[test]
    fn concurrent_consume_release_balances() {
        let arb = Arc::new(GlobalMemoryArbitrator::unlimited());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let arb = Arc::clone(&arb);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        arb.consume(16);
                        arb.release(16);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(arb.consumption(), 0);
        assert!(arb.peak_consumption() >= 16);
        assert!(arb.peak_consumption() <= 8 * 16);
    }
}
