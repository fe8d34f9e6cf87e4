//! # memgate-admission
//!
//! Memory admission control for a vectorized query engine.
//!
//! Before any bytes are charged or obtained, the allocator asks the
//! [`AdmissionController`] whether the request may proceed. The controller
//! consults:
//! - **Fault injection** (`fault`): probabilistic failures for chaos testing
//! - **Process arbitrator** (`arbitrator`): the process-wide hard limit
//! - **Memory tracker** (`tracker`): the per-query soft limit
//! - **Thread context** (`context`): wait eligibility, cancellation, bypass
//!
//! Violations wait for reclamation (hard limit only), cancel the owning
//! query, fail the call, or are logged and let through, depending on the
//! configured [`FailureMode`]. Every escalation produces a structured
//! [`AdmissionRecord`] (`log`).

#![deny(unsafe_code)]

pub mod arbitrator;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod fault;
pub mod log;
pub mod task;
pub mod tracker;

pub use arbitrator::{GlobalMemoryArbitrator, ProcessArbitrator};
pub use config::{AllocatorConfig, FailureMode, global_config, install_global_config};
pub use context::{SkipMemoryCheckGuard, ThreadContext};
pub use controller::{
    AdmissionController, AdmissionStats, AdmissionStatsSnapshot, Decision, WAIT_POLL_INTERVAL_MS,
    WaitOutcome,
};
pub use error::{AllocError, ConfigError};
pub use fault::FaultInjector;
pub use log::{AdmissionEvent, AdmissionLog, AdmissionRecord, LogLevel, RecordOutcome};
pub use task::{CancellableTask, QueryTask};
pub use tracker::{MemTracker, QueryMemTracker, SoftLimitExceeded};
