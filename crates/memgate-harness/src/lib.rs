//! Tooling around memgate admission control.
//!
//! - Pressure drills: concurrent simulated queries against one process budget,
//!   reported as JSON together with the structured admission records
//! - Logging setup for the `memgate` binary

#![forbid(unsafe_code)]

pub mod drill;
pub mod logging;

pub use drill::{DrillError, DrillReport, DrillSpec, QueryOutcome, QueryStatus, run_drill};
pub use logging::{LogFormat, init_logging};
