//! Memory-pressure drill.
//!
//! Spawns one thread per simulated query. Each query repeatedly asks the
//! allocator to admit a fixed-size request, charges the admitted bytes, and
//! periodically releases half of what it holds, until it finishes, is
//! cancelled, or fails. The report captures per-query outcomes, admission
//! counters, and the structured admission records.

use std::sync::Arc;
use std::thread;

use memgate_admission::{
    AdmissionController, AdmissionRecord, AdmissionStatsSnapshot, AllocatorConfig,
    CancellableTask, ConfigError, Decision, FaultInjector, GlobalMemoryArbitrator, MemTracker,
    ProcessArbitrator, QueryMemTracker, QueryTask, ThreadContext,
};
use memgate_alloc::{AllocPolicy, DefaultAllocator, SystemBackend};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrillError {
    #[error("invalid drill: {0}")]
    InvalidSpec(String),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("query worker {query} panicked")]
    WorkerPanicked { query: String },
}

/// Shape of the simulated workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillSpec {
    pub queries: usize,
    /// Process hard limit in bytes.
    pub hard_limit: i64,
    /// Per-query soft limit in bytes; negative means unlimited.
    pub soft_limit: i64,
    pub request_bytes: u64,
    pub requests_per_query: usize,
    /// Release half the held bytes after every N admitted requests; 0 never.
    pub release_every: usize,
    /// Seed for deterministic fault injection.
    pub seed: u64,
}

impl Default for DrillSpec {
    fn default() -> Self {
        Self {
            queries: 4,
            hard_limit: 64 << 20,
            soft_limit: -1,
            request_bytes: 1 << 20,
            requests_per_query: 32,
            release_every: 4,
            seed: 0x5EED,
        }
    }
}

impl DrillSpec {
    pub fn validate(&self) -> Result<(), DrillError> {
        if self.queries == 0 {
            return Err(DrillError::InvalidSpec("queries must be positive".into()));
        }
        if self.request_bytes == 0 {
            return Err(DrillError::InvalidSpec(
                "request_bytes must be positive".into(),
            ));
        }
        if self.hard_limit < 0 {
            return Err(DrillError::InvalidSpec(format!(
                "hard_limit {} is negative",
                self.hard_limit
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub task_id: String,
    pub status: QueryStatus,
    pub admitted_requests: usize,
    pub peak_bytes: i64,
    pub error: Option<String>,
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillReport {
    pub spec: DrillSpec,
    pub config: AllocatorConfig,
    pub queries: Vec<QueryOutcome>,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub peak_process_bytes: i64,
    pub final_process_bytes: i64,
    pub stats: AdmissionStatsSnapshot,
    pub records: Vec<AdmissionRecord>,
}

struct QueryRun {
    ctx: ThreadContext,
    tracker: Arc<QueryMemTracker>,
    task: Arc<CancellableTask>,
}

fn run_query(alloc: &DefaultAllocator, spec: &DrillSpec, run: &QueryRun) -> QueryOutcome {
    let mut held: u64 = 0;
    let mut admitted = 0;
    let mut status = QueryStatus::Completed;
    let mut error = None;

    for _ in 0..spec.requests_per_query {
        match alloc.memory_check(&run.ctx, spec.request_bytes) {
            Decision::Proceed => {
                alloc.consume_memory(&run.ctx, spec.request_bytes);
                held += spec.request_bytes;
                admitted += 1;
                if spec.release_every > 0 && admitted % spec.release_every == 0 {
                    let half = held / 2;
                    alloc.release_memory(&run.ctx, half);
                    held -= half;
                }
            }
            Decision::Cancelled => {
                status = QueryStatus::Cancelled;
                break;
            }
            Decision::Fail(err) => {
                status = QueryStatus::Failed;
                error = Some(err.to_string());
                break;
            }
        }
        // A query cancelled by another actor stops at its next boundary.
        if run.ctx.is_query_cancelled() {
            status = QueryStatus::Cancelled;
            break;
        }
    }
    alloc.release_memory(&run.ctx, held);

    QueryOutcome {
        task_id: run.task.task_id().to_owned(),
        status,
        admitted_requests: admitted,
        peak_bytes: run.tracker.peak_consumption(),
        error,
        cancel_reason: run.task.cancel_reason(),
    }
}

/// Run the drill to completion and collect a report.
pub fn run_drill(spec: DrillSpec, config: AllocatorConfig) -> Result<DrillReport, DrillError> {
    spec.validate()?;
    config.validate()?;

    let arb = Arc::new(GlobalMemoryArbitrator::new(spec.hard_limit));
    let admission = AdmissionController::new(config, arb.clone())
        .with_fault_injector(FaultInjector::seeded(config.fault_probability, spec.seed));
    let alloc = Arc::new(DefaultAllocator::new(
        SystemBackend,
        AllocPolicy::from_config(&config),
        Arc::new(admission),
    ));
    tracing::info!(
        target: "memgate::drill",
        queries = spec.queries,
        hard_limit = spec.hard_limit,
        soft_limit = spec.soft_limit,
        request_bytes = spec.request_bytes,
        failure_mode = config.failure_mode.as_str(),
        "starting drill"
    );

    let handles: Vec<_> = (0..spec.queries)
        .map(|i| {
            let id = format!("drill-q{i}");
            let tracker = Arc::new(QueryMemTracker::new(format!("query-{id}"), spec.soft_limit));
            let task = Arc::new(CancellableTask::new(id.clone()));
            let run = QueryRun {
                ctx: ThreadContext::attach_query(tracker.clone(), task.clone()),
                tracker,
                task,
            };
            let alloc = Arc::clone(&alloc);
            let handle = thread::Builder::new()
                .name(id.clone())
                .spawn(move || run_query(&alloc, &spec, &run));
            (id, handle)
        })
        .collect();

    let mut queries = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        let outcome = handle?
            .join()
            .map_err(|_| DrillError::WorkerPanicked { query: id })?;
        queries.push(outcome);
    }

    let count = |status: QueryStatus| queries.iter().filter(|q| q.status == status).count();
    let report = DrillReport {
        spec,
        config,
        completed: count(QueryStatus::Completed),
        cancelled: count(QueryStatus::Cancelled),
        failed: count(QueryStatus::Failed),
        peak_process_bytes: arb.peak_consumption(),
        final_process_bytes: arb.consumption(),
        stats: alloc.admission().stats().snapshot(),
        records: alloc.admission().log().snapshot(),
        queries,
    };
    tracing::info!(
        target: "memgate::drill",
        completed = report.completed,
        cancelled = report.cancelled,
        failed = report.failed,
        peak_process_bytes = report.peak_process_bytes,
        "drill finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_validation_rejects_empty_workloads() {
        let spec = DrillSpec {
            queries: 0,
            ..DrillSpec::default()
        };
        assert!(matches!(spec.validate(), Err(DrillError::InvalidSpec(_))));
        let spec = DrillSpec {
            request_bytes: 0,
            ..DrillSpec::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn invalid_config_is_reported() {
        let config = AllocatorConfig::default().with_fault_probability(2.0);
        let err = run_drill(DrillSpec::default(), config).expect_err("bad probability");
        assert!(matches!(err, DrillError::Config(ConfigError::ProbabilityOutOfRange(_))));
    }
}
