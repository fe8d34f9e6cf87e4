//! Admission controller.
//!
//! Runs once per allocation (and once per realloc growth, sized on the delta)
//! before any memory is charged or obtained. The sequence short-circuits:
//!
//! 1. bypass when the context has memory checking disabled;
//! 2. fault injection;
//! 3. process hard limit, optionally waiting for reclamation in 100 ms steps;
//! 4. query soft limit, which never waits.
//!
//! A violation is escalated according to [`FailureMode`]. Admission is not
//! fair: any thread whose check passes proceeds, including one that began
//! waiting after another thread that is still blocked.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::arbitrator::ProcessArbitrator;
use crate::config::{AllocatorConfig, FailureMode};
use crate::context::ThreadContext;
use crate::error::AllocError;
use crate::fault::FaultInjector;
use crate::log::{AdmissionEvent, AdmissionLog, LogLevel, RecordDraft, RecordOutcome};

/// Polling step of the hard-limit wait loop.
pub const WAIT_POLL_INTERVAL_MS: u64 = 100;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(WAIT_POLL_INTERVAL_MS);

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Charge and allocate.
    Proceed,
    /// The owning query is being torn down; do not allocate.
    Cancelled,
    /// Unwind to the caller with this error.
    Fail(AllocError),
}

impl Decision {
    #[must_use]
    pub const fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }
}

/// How a hard-limit wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The limit cleared; the request was recorded as interval growth.
    Reclaimed { waited_ms: u64 },
    /// Another actor cancelled the query while this thread waited.
    Cancelled { waited_ms: u64 },
    /// The ceiling was reached with the limit still exceeded.
    TimedOut { waited_ms: u64 },
}

impl WaitOutcome {
    #[must_use]
    pub const fn waited_ms(self) -> u64 {
        match self {
            Self::Reclaimed { waited_ms }
            | Self::Cancelled { waited_ms }
            | Self::TimedOut { waited_ms } => waited_ms,
        }
    }
}

/// Call-scoped wait bookkeeping.
#[derive(Debug, Clone, Copy)]
struct WaitState {
    elapsed_ms: u64,
    max_ms: u64,
}

/// Admission counters.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    pub checks: AtomicU64,
    pub bypassed: AtomicU64,
    pub injected_faults: AtomicU64,
    pub hard_limit_hits: AtomicU64,
    pub waits_started: AtomicU64,
    pub waits_reclaimed: AtomicU64,
    pub waits_timed_out: AtomicU64,
    pub soft_limit_hits: AtomicU64,
    pub failures: AtomicU64,
    pub cancellations: AtomicU64,
    pub overshoots: AtomicU64,
    pub backend_failures: AtomicU64,
    pub total_wait_ms: AtomicU64,
}

/// Plain copy of [`AdmissionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStatsSnapshot {
    pub checks: u64,
    pub bypassed: u64,
    pub injected_faults: u64,
    pub hard_limit_hits: u64,
    pub waits_started: u64,
    pub waits_reclaimed: u64,
    pub waits_timed_out: u64,
    pub soft_limit_hits: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub overshoots: u64,
    pub backend_failures: u64,
    pub total_wait_ms: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl AdmissionStats {
    #[must_use]
    pub fn snapshot(&self) -> AdmissionStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        AdmissionStatsSnapshot {
            checks: load(&self.checks),
            bypassed: load(&self.bypassed),
            injected_faults: load(&self.injected_faults),
            hard_limit_hits: load(&self.hard_limit_hits),
            waits_started: load(&self.waits_started),
            waits_reclaimed: load(&self.waits_reclaimed),
            waits_timed_out: load(&self.waits_timed_out),
            soft_limit_hits: load(&self.soft_limit_hits),
            failures: load(&self.failures),
            cancellations: load(&self.cancellations),
            overshoots: load(&self.overshoots),
            backend_failures: load(&self.backend_failures),
            total_wait_ms: load(&self.total_wait_ms),
        }
    }
}

/// Gatekeeper consulted before every physical allocation.
pub struct AdmissionController {
    config: AllocatorConfig,
    arbitrator: Arc<dyn ProcessArbitrator>,
    faults: FaultInjector,
    stats: AdmissionStats,
    log: AdmissionLog,
}

impl AdmissionController {
    pub fn new(config: AllocatorConfig, arbitrator: Arc<dyn ProcessArbitrator>) -> Self {
        Self {
            faults: FaultInjector::new(config.fault_probability),
            log: AdmissionLog::new(config.admission_log_capacity),
            stats: AdmissionStats::default(),
            config,
            arbitrator,
        }
    }

    /// Replace the fault injector, e.g. with a seeded one.
    #[must_use]
    pub fn with_fault_injector(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[must_use]
    pub fn arbitrator(&self) -> &dyn ProcessArbitrator {
        self.arbitrator.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> &AdmissionStats {
        &self.stats
    }

    #[must_use]
    pub fn log(&self) -> &AdmissionLog {
        &self.log
    }

    /// Decide whether `size` more bytes may be charged to `ctx`.
    pub fn check(&self, ctx: &ThreadContext, size: u64) -> Decision {
        bump(&self.stats.checks);
        if ctx.is_memory_check_skipped() {
            bump(&self.stats.bypassed);
            return Decision::Proceed;
        }
        match self.sys_memory_check(ctx, size) {
            Decision::Proceed => self.tracker_check(ctx, size),
            other => other,
        }
    }

    fn sys_memory_check(&self, ctx: &ThreadContext, size: u64) -> Decision {
        if self.faults.should_fail() {
            bump(&self.stats.injected_faults);
            let message = self.with_stack_trace(
                format!(
                    "[MemAllocInjectFault] Query {} alloc memory failed due to fault injection.",
                    ctx.task_id()
                ),
                size,
            );
            if ctx.is_query_cancelled() {
                return self.already_cancelled(ctx, size, message);
            }
            return self.escalate(ctx, size, AdmissionEvent::FaultInjected, message, 0);
        }

        if !self.arbitrator.is_exceed_hard_limit(size) {
            return Decision::Proceed;
        }
        bump(&self.stats.hard_limit_hits);
        let message = self.hard_limit_message(ctx, size);

        if ctx.is_query_cancelled() {
            return self.already_cancelled(ctx, size, message);
        }

        if !ctx.is_wait_eligible() || !self.config.waiting_enabled() {
            return self.escalate(ctx, size, AdmissionEvent::HardLimitExceeded, message, 0);
        }

        bump(&self.stats.waits_started);
        self.record(
            ctx,
            LogLevel::Info,
            AdmissionEvent::WaitStarted,
            size,
            RecordOutcome::Pending,
            0,
            format!(
                "Query:{} waiting for enough memory in thread {:?}, maximum {}ms, {message}",
                ctx.task_id(),
                thread::current().id(),
                self.config.wait_gc_max_ms,
            ),
        );

        let outcome = self.wait_for_reclamation(ctx, size);
        let waited_ms = outcome.waited_ms();
        self.stats
            .total_wait_ms
            .fetch_add(waited_ms, Ordering::Relaxed);
        match outcome {
            WaitOutcome::Reclaimed { .. } => {
                bump(&self.stats.waits_reclaimed);
                self.record(
                    ctx,
                    LogLevel::Info,
                    AdmissionEvent::WaitReclaimed,
                    size,
                    RecordOutcome::Proceed,
                    waited_ms,
                    format!(
                        "Query:{} got enough memory after waiting {waited_ms}ms",
                        ctx.task_id()
                    ),
                );
                Decision::Proceed
            }
            WaitOutcome::Cancelled { .. } => {
                bump(&self.stats.cancellations);
                self.record(
                    ctx,
                    LogLevel::Info,
                    AdmissionEvent::WaitCancelled,
                    size,
                    RecordOutcome::Cancelled,
                    waited_ms,
                    format!(
                        "Query:{} cancelled while waiting for memory {waited_ms}ms, {message}",
                        ctx.task_id()
                    ),
                );
                Decision::Cancelled
            }
            WaitOutcome::TimedOut { .. } => {
                bump(&self.stats.waits_timed_out);
                // The full ceiling is waited at most once per context.
                ctx.disable_further_waiting();
                let message = format!(
                    "after waiting for memory {waited_ms}ms, {message}. {}",
                    self.arbitrator.process_limit_exceeded_diagnostic()
                );
                self.escalate(ctx, size, AdmissionEvent::WaitTimedOut, message, waited_ms)
            }
        }
    }

    fn tracker_check(&self, ctx: &ThreadContext, size: u64) -> Decision {
        let Err(exceeded) = ctx.tracker().check_soft_limit(size) else {
            return Decision::Proceed;
        };
        bump(&self.stats.soft_limit_hits);
        let message =
            self.with_stack_trace(format!("Allocator mem tracker check failed, {exceeded}"), size);

        if ctx.is_attach_query() {
            ctx.disable_further_waiting();
            if ctx.is_query_cancelled() {
                return self.already_cancelled(ctx, size, message);
            }
        }
        self.escalate(ctx, size, AdmissionEvent::SoftLimitExceeded, message, 0)
    }

    /// Poll the hard limit every 100 ms until it clears, the query is
    /// cancelled, or the configured ceiling is reached.
    ///
    /// The reported wait is always a multiple of [`WAIT_POLL_INTERVAL_MS`]
    /// and never exceeds the ceiling by more than one interval.
    pub fn wait_for_reclamation(&self, ctx: &ThreadContext, size: u64) -> WaitOutcome {
        let mut state = WaitState {
            elapsed_ms: 0,
            max_ms: self.config.wait_gc_max_ms,
        };
        while state.elapsed_ms < state.max_ms {
            thread::sleep(WAIT_POLL_INTERVAL);
            state.elapsed_ms += WAIT_POLL_INTERVAL_MS;
            if !self.arbitrator.is_exceed_hard_limit(size) {
                self.arbitrator.record_interval_growth(size);
                return WaitOutcome::Reclaimed {
                    waited_ms: state.elapsed_ms,
                };
            }
            if ctx.is_query_cancelled() {
                return WaitOutcome::Cancelled {
                    waited_ms: state.elapsed_ms,
                };
            }
        }
        WaitOutcome::TimedOut {
            waited_ms: state.elapsed_ms,
        }
    }

    fn escalate(
        &self,
        ctx: &ThreadContext,
        size: u64,
        event: AdmissionEvent,
        message: String,
        waited_ms: u64,
    ) -> Decision {
        match self.config.failure_mode {
            FailureMode::Unwind => {
                bump(&self.stats.failures);
                self.record(
                    ctx,
                    LogLevel::Warn,
                    event,
                    size,
                    RecordOutcome::Fail,
                    waited_ms,
                    format!("Query:{} throw exception, {message}", ctx.task_id()),
                );
                Decision::Fail(AllocError::mem_alloc_failed(message))
            }
            FailureMode::Cancel if ctx.is_attach_query() => {
                if ctx.cancel_query(&message) {
                    bump(&self.stats.cancellations);
                    self.record(
                        ctx,
                        LogLevel::Warn,
                        event,
                        size,
                        RecordOutcome::Cancelled,
                        waited_ms,
                        format!("Query:{} canceled asyn, {message}", ctx.task_id()),
                    );
                    Decision::Cancelled
                } else {
                    self.already_cancelled(ctx, size, message)
                }
            }
            FailureMode::Cancel | FailureMode::LogOnly => {
                bump(&self.stats.overshoots);
                self.record(
                    ctx,
                    LogLevel::Warn,
                    event,
                    size,
                    RecordOutcome::Overshoot,
                    waited_ms,
                    format!("memory check failed, no throw exception, {message}"),
                );
                Decision::Proceed
            }
        }
    }

    /// A query that is already being torn down gets `Cancelled` without a
    /// wait or a full-verbosity record.
    fn already_cancelled(&self, ctx: &ThreadContext, size: u64, message: String) -> Decision {
        bump(&self.stats.cancellations);
        self.record(
            ctx,
            LogLevel::Debug,
            AdmissionEvent::AlreadyCancelled,
            size,
            RecordOutcome::Cancelled,
            0,
            message,
        );
        Decision::Cancelled
    }

    /// Record a backend that could not supply memory after admission passed.
    pub fn report_backend_failure(&self, ctx: &ThreadContext, size: u64, err: &AllocError) {
        bump(&self.stats.backend_failures);
        self.record(
            ctx,
            LogLevel::Error,
            AdmissionEvent::BackendFailure,
            size,
            RecordOutcome::Fail,
            0,
            format!(
                "{err}, {}",
                self.arbitrator.process_limit_exceeded_diagnostic()
            ),
        );
    }

    fn hard_limit_message(&self, ctx: &ThreadContext, size: u64) -> String {
        let tracker = ctx.tracker();
        self.with_stack_trace(
            format!(
                "Allocator sys memory check failed: Cannot alloc:{size}, consuming tracker:<{}>, peak used {}, current used {}, {}.",
                tracker.label(),
                tracker.peak_consumption(),
                tracker.current_consumption(),
                self.arbitrator.process_limit_exceeded_diagnostic(),
            ),
            size,
        )
    }

    fn with_stack_trace(&self, mut message: String, size: u64) -> String {
        if self.config.wants_stack_trace(size) {
            message.push_str("\nAlloc Stacktrace:\n");
            message.push_str(&Backtrace::force_capture().to_string());
        }
        message
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &ThreadContext,
        level: LogLevel,
        event: AdmissionEvent,
        size: u64,
        outcome: RecordOutcome,
        waited_ms: u64,
        details: String,
    ) {
        self.log.push(RecordDraft {
            level,
            event,
            tracker: ctx.tracker().label(),
            task_id: ctx.task_id(),
            size,
            outcome,
            waited_ms,
            details,
        });
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .field("faults", &self.faults)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrator::GlobalMemoryArbitrator;
    use crate::task::{CancellableTask, QueryTask};
    use crate::tracker::{MemTracker, QueryMemTracker};

    fn controller(config: AllocatorConfig, hard_limit: i64) -> (AdmissionController, Arc<GlobalMemoryArbitrator>) {
        let arb = Arc::new(GlobalMemoryArbitrator::new(hard_limit));
        (AdmissionController::new(config, arb.clone()), arb)
    }

    fn query_ctx(limit: i64) -> (ThreadContext, Arc<QueryMemTracker>, Arc<CancellableTask>) {
        let tracker = Arc::new(QueryMemTracker::new("query-q", limit));
        let task = Arc::new(CancellableTask::new("q"));
        let ctx = ThreadContext::attach_query(tracker.clone(), task.clone());
        (ctx, tracker, task)
    }

    #[test]
    fn within_limits_proceeds_without_records() {
        let (ctl, _arb) = controller(AllocatorConfig::default(), 1000);
        let (ctx, _tracker, _task) = query_ctx(500);
        assert_eq!(ctl.check(&ctx, 400), Decision::Proceed);
        assert!(ctl.log().is_empty());
        assert_eq!(ctl.stats().snapshot().checks, 1);
    }

    #[test]
    fn bypass_skips_every_check() {
        let config = AllocatorConfig::default().with_fault_probability(1.0);
        let (ctl, arb) = controller(config, 10);
        arb.consume(10);
        let (ctx, _tracker, _task) = query_ctx(0);
        let _guard = ctx.skip_memory_check();
        assert_eq!(ctl.check(&ctx, 1 << 20), Decision::Proceed);
        let stats = ctl.stats().snapshot();
        assert_eq!(stats.bypassed, 1);
        assert_eq!(stats.injected_faults, 0);
    }

    #[test]
    fn injected_fault_fails_like_a_real_one() {
        let config = AllocatorConfig::default().with_fault_probability(1.0);
        let (ctl, _arb) = controller(config, i64::MAX);
        let (ctx, _tracker, _task) = query_ctx(-1);
        let Decision::Fail(err) = ctl.check(&ctx, 8) else {
            panic!("fault injection at p=1 must fail");
        };
        assert!(err.is_mem_alloc_failed());
        assert!(err.to_string().contains("MemAllocInjectFault"));
        assert_eq!(ctl.log().events(AdmissionEvent::FaultInjected).len(), 1);
    }

    #[test]
    fn injected_fault_cancels_in_cancel_mode() {
        let config = AllocatorConfig::default()
            .with_fault_probability(1.0)
            .with_failure_mode(FailureMode::Cancel);
        let (ctl, _arb) = controller(config, i64::MAX);
        let (ctx, _tracker, task) = query_ctx(-1);
        assert_eq!(ctl.check(&ctx, 8), Decision::Cancelled);
        assert!(task.is_cancelled());
    }

    #[test]
    fn injected_fault_on_cancelled_query_is_cancelled_not_failed() {
        let config = AllocatorConfig::default().with_fault_probability(1.0);
        let (ctl, _arb) = controller(config, i64::MAX);
        let (ctx, _tracker, task) = query_ctx(-1);
        task.cancel("torn down");

        assert_eq!(ctl.check(&ctx, 8), Decision::Cancelled);
        let stats = ctl.stats().snapshot();
        assert_eq!(stats.injected_faults, 1);
        assert_eq!(stats.failures, 0);
        assert!(ctl.log().events(AdmissionEvent::FaultInjected).is_empty());
        let records = ctl.log().events(AdmissionEvent::AlreadyCancelled);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Debug);
        assert_eq!(task.cancel_reason().as_deref(), Some("torn down"));
    }

    #[test]
    fn hard_limit_without_wait_eligibility_fails_immediately() {
        let (ctl, arb) = controller(AllocatorConfig::default(), 1000);
        arb.consume(950);
        let (ctx, _tracker, _task) = query_ctx(-1);
        ctx.disable_further_waiting();

        let Decision::Fail(err) = ctl.check(&ctx, 200) else {
            panic!("expected synchronous failure");
        };
        let text = err.to_string();
        assert!(text.contains("Cannot alloc:200"), "{text}");
        assert!(text.contains("peak 950 B"), "{text}");
        assert_eq!(ctl.stats().snapshot().waits_started, 0);
    }

    #[test]
    fn detached_context_in_cancel_mode_degrades_to_overshoot() {
        let config = AllocatorConfig::default().with_failure_mode(FailureMode::Cancel);
        let (ctl, arb) = controller(config, 100);
        arb.consume(100);
        let ctx = ThreadContext::detached(Arc::new(QueryMemTracker::unlimited("bg")));
        assert_eq!(ctl.check(&ctx, 1), Decision::Proceed);
        assert_eq!(ctl.stats().snapshot().overshoots, 1);
        let records = ctl.log().events(AdmissionEvent::HardLimitExceeded);
        assert_eq!(records[0].outcome, RecordOutcome::Overshoot);
    }

    #[test]
    fn log_only_mode_lets_violations_through() {
        let config = AllocatorConfig::default().with_failure_mode(FailureMode::LogOnly);
        let (ctl, _arb) = controller(config, i64::MAX);
        let (ctx, tracker, task) = query_ctx(10);
        tracker.consume(10);
        assert_eq!(ctl.check(&ctx, 5), Decision::Proceed);
        assert!(!task.is_cancelled());
        assert_eq!(ctl.stats().snapshot().overshoots, 1);
    }

    #[test]
    fn wait_times_out_and_disables_further_waiting() {
        let config = AllocatorConfig::default().with_wait_gc_max_ms(200);
        let (ctl, arb) = controller(config, 100);
        arb.consume(100);
        let (ctx, _tracker, _task) = query_ctx(-1);

        let decision = ctl.check(&ctx, 1);
        assert!(decision.is_fail());
        assert!(!ctx.is_wait_eligible());
        let stats = ctl.stats().snapshot();
        assert_eq!(stats.waits_started, 1);
        assert_eq!(stats.waits_timed_out, 1);
        assert_eq!(stats.total_wait_ms, 200);

        // Second violation in the same context fails fast.
        assert!(ctl.check(&ctx, 1).is_fail());
        assert_eq!(ctl.stats().snapshot().waits_started, 1);
    }

    #[test]
    fn wait_bound_is_ceiling_plus_one_interval() {
        let config = AllocatorConfig::default().with_wait_gc_max_ms(250);
        let (ctl, arb) = controller(config, 0);
        arb.consume(1);
        let (ctx, _tracker, _task) = query_ctx(-1);
        let outcome = ctl.wait_for_reclamation(&ctx, 1);
        assert_eq!(outcome, WaitOutcome::TimedOut { waited_ms: 300 });
        assert_eq!(outcome.waited_ms() % WAIT_POLL_INTERVAL_MS, 0);
        assert!(outcome.waited_ms() <= 250 + WAIT_POLL_INTERVAL_MS);
    }

    #[test]
    fn disabled_gc_escalates_without_waiting() {
        let config = AllocatorConfig::default().with_memory_gc_disabled(true);
        let (ctl, arb) = controller(config, 10);
        arb.consume(10);
        let (ctx, _tracker, _task) = query_ctx(-1);
        assert!(ctl.check(&ctx, 1).is_fail());
        assert_eq!(ctl.stats().snapshot().waits_started, 0);
    }

    #[test]
    fn cancelled_query_short_circuits_hard_limit() {
        let config = AllocatorConfig::default().with_wait_gc_max_ms(10_000);
        let (ctl, arb) = controller(config, 10);
        arb.consume(10);
        let (ctx, _tracker, task) = query_ctx(-1);
        task.cancel("torn down elsewhere");

        assert_eq!(ctl.check(&ctx, 1), Decision::Cancelled);
        let stats = ctl.stats().snapshot();
        assert_eq!(stats.waits_started, 0);
        assert_eq!(stats.failures, 0);
        let records = ctl.log().events(AdmissionEvent::AlreadyCancelled);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Debug);
    }

    #[test]
    fn soft_limit_cancels_query_in_cancel_mode() {
        let config = AllocatorConfig::default().with_failure_mode(FailureMode::Cancel);
        let (ctl, _arb) = controller(config, i64::MAX);
        let (ctx, tracker, task) = query_ctx(100);
        tracker.consume(80);

        assert_eq!(ctl.check(&ctx, 30), Decision::Cancelled);
        assert!(task.is_cancelled());
        assert!(!ctx.is_wait_eligible());
        let reason = task.cancel_reason().expect("reason recorded");
        assert!(reason.contains("mem tracker check failed"), "{reason}");

        // Repeated violations stay quiet and do not re-cancel.
        assert_eq!(ctl.check(&ctx, 30), Decision::Cancelled);
        assert_eq!(ctl.log().events(AdmissionEvent::SoftLimitExceeded).len(), 1);
        assert_eq!(ctl.log().events(AdmissionEvent::AlreadyCancelled).len(), 1);
    }

    #[test]
    fn soft_limit_fails_detached_context_in_unwind_mode() {
        let (ctl, _arb) = controller(AllocatorConfig::default(), i64::MAX);
        let tracker = Arc::new(QueryMemTracker::new("load", 10));
        let ctx = ThreadContext::detached(tracker.clone());
        tracker.consume(10);
        let Decision::Fail(err) = ctl.check(&ctx, 1) else {
            panic!("expected failure");
        };
        assert!(err.to_string().contains("<load>"));
    }

    #[test]
    fn large_requests_carry_stack_trace() {
        let config = AllocatorConfig::default().with_stacktrace_threshold(64);
        let (ctl, arb) = controller(config, 0);
        arb.consume(1);
        let ctx = ThreadContext::detached(Arc::new(QueryMemTracker::unlimited("bg")));
        let Decision::Fail(small) = ctl.check(&ctx, 64) else {
            panic!("expected failure");
        };
        let Decision::Fail(large) = ctl.check(&ctx, 65) else {
            panic!("expected failure");
        };
        assert!(!small.to_string().contains("Alloc Stacktrace"));
        assert!(large.to_string().contains("Alloc Stacktrace"));
    }
}
