use memgate_admission::{
    AdmissionController, AdmissionEvent, AllocatorConfig, CancellableTask, Decision,
    FailureMode, GlobalMemoryArbitrator, MemTracker, ProcessArbitrator, QueryMemTracker,
    QueryTask, RecordOutcome, ThreadContext, WAIT_POLL_INTERVAL_MS,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn setup(
    config: AllocatorConfig,
    hard_limit: i64,
) -> (Arc<AdmissionController>, Arc<GlobalMemoryArbitrator>) {
    let arb = Arc::new(GlobalMemoryArbitrator::new(hard_limit));
    let ctl = Arc::new(AdmissionController::new(config, arb.clone()));
    (ctl, arb)
}

fn attached(id: &str) -> (ThreadContext, Arc<CancellableTask>) {
    let task = Arc::new(CancellableTask::new(id));
    let ctx = ThreadContext::attach_query(
        Arc::new(QueryMemTracker::unlimited(format!("query-{id}"))),
        task.clone(),
    );
    (ctx, task)
}

#[test]
fn waiter_proceeds_once_another_thread_releases() {
    let config = AllocatorConfig::default().with_wait_gc_max_ms(5_000);
    let (ctl, arb) = setup(config, 1_000);
    arb.consume(1_000);
    let (ctx, _task) = attached("reclaim");

    let releaser = {
        let arb = Arc::clone(&arb);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            arb.release(600);
        })
    };

    let started = Instant::now();
    let decision = ctl.check(&ctx, 500);
    releaser.join().expect("releaser panicked");

    assert_eq!(decision, Decision::Proceed);
    assert!(started.elapsed() < Duration::from_millis(5_000));
    assert_eq!(arb.interval_growth(), 500);
    let records = ctl.log().events(AdmissionEvent::WaitReclaimed);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].waited_ms % WAIT_POLL_INTERVAL_MS, 0);
    assert!(records[0].waited_ms >= 300);
    // Waiting stays available after a successful wait.
    assert!(ctx.is_wait_eligible());
}

#[test]
fn cancel_from_elsewhere_ends_the_wait() {
    let config = AllocatorConfig::default().with_wait_gc_max_ms(10_000);
    let (ctl, arb) = setup(config, 100);
    arb.consume(100);
    let (ctx, task) = attached("torn-down");

    let canceller = {
        let task = Arc::clone(&task);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            task.cancel("user abort");
        })
    };

    let started = Instant::now();
    let decision = ctl.check(&ctx, 10);
    canceller.join().expect("canceller panicked");

    assert_eq!(decision, Decision::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(task.cancel_reason().as_deref(), Some("user abort"));
    let records = ctl.log().events(AdmissionEvent::WaitCancelled);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, RecordOutcome::Cancelled);
}

#[test]
fn timeout_in_cancel_mode_cancels_with_diagnostic() {
    let config = AllocatorConfig::default()
        .with_wait_gc_max_ms(100)
        .with_failure_mode(FailureMode::Cancel);
    let (ctl, arb) = setup(config, 100);
    arb.consume(100);
    let (ctx, task) = attached("slow");

    assert_eq!(ctl.check(&ctx, 1), Decision::Cancelled);
    let reason = task.cancel_reason().expect("cancel reason");
    assert!(reason.contains("after waiting for memory 100ms"), "{reason}");
    assert!(reason.contains("hard limit 100 B"), "{reason}");
    assert!(!ctx.is_wait_eligible());
}

#[test]
fn concurrent_waiters_are_each_bounded() {
    const WAITERS: usize = 4;
    let config = AllocatorConfig::default().with_wait_gc_max_ms(200);
    let (ctl, arb) = setup(config, 10);
    arb.consume(10);
    let failures = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|i| {
            let ctl = Arc::clone(&ctl);
            let failures = Arc::clone(&failures);
            thread::spawn(move || {
                let (ctx, _task) = attached(&format!("w{i}"));
                let started = Instant::now();
                if ctl.check(&ctx, 1).is_fail() {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
                started.elapsed()
            })
        })
        .collect();

    for handle in handles {
        let elapsed = handle.join().expect("waiter panicked");
        assert!(elapsed < Duration::from_secs(3), "waited {elapsed:?}");
    }
    assert_eq!(failures.load(Ordering::Relaxed), WAITERS);
    let stats = ctl.stats().snapshot();
    assert_eq!(stats.waits_timed_out, WAITERS as u64);
    assert_eq!(stats.total_wait_ms, 200 * WAITERS as u64);
}

#[test]
fn soft_limit_never_waits() {
    let config = AllocatorConfig::default()
        .with_wait_gc_max_ms(10_000)
        .with_failure_mode(FailureMode::Cancel);
    let (ctl, _arb) = setup(config, i64::MAX);
    let tracker = Arc::new(QueryMemTracker::new("query-q", 100));
    let task = Arc::new(CancellableTask::new("q"));
    let ctx = ThreadContext::attach_query(tracker.clone(), task.clone());
    tracker.consume(80);

    let started = Instant::now();
    assert_eq!(ctl.check(&ctx, 30), Decision::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(WAIT_POLL_INTERVAL_MS));
    assert!(task.is_cancelled());
    assert_eq!(ctl.stats().snapshot().waits_started, 0);
}

#[test]
fn escalation_records_export_as_jsonl() {
    let (ctl, arb) = setup(AllocatorConfig::default(), 0);
    arb.consume(1);
    let ctx = ThreadContext::detached(Arc::new(QueryMemTracker::unlimited("bg")));
    assert!(ctl.check(&ctx, 8).is_fail());
    assert_eq!(arb.consumption(), 1);

    let mut out = Vec::new();
    ctl.log().write_jsonl(&mut out).expect("write jsonl");
    let text = String::from_utf8(out).expect("utf8");
    let line: serde_json::Value =
        serde_json::from_str(text.lines().next().expect("one line")).expect("json");
    assert_eq!(line["event"], "hard_limit_exceeded");
    assert_eq!(line["outcome"], "fail");
    assert_eq!(line["task_id"], "<none>");
    assert_eq!(line["size"], 8);
}
