//! Structured admission log.
//!
//! Every escalation produces an [`AdmissionRecord`]. Records are emitted
//! through `tracing` and retained in a bounded ring so tests and the harness
//! can inspect or export them as JSON lines.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity level for admission records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What the admission path observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionEvent {
    FaultInjected,
    HardLimitExceeded,
    WaitStarted,
    WaitReclaimed,
    WaitCancelled,
    WaitTimedOut,
    SoftLimitExceeded,
    AlreadyCancelled,
    BackendFailure,
}

impl AdmissionEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FaultInjected => "fault_injected",
            Self::HardLimitExceeded => "hard_limit_exceeded",
            Self::WaitStarted => "wait_started",
            Self::WaitReclaimed => "wait_reclaimed",
            Self::WaitCancelled => "wait_cancelled",
            Self::WaitTimedOut => "wait_timed_out",
            Self::SoftLimitExceeded => "soft_limit_exceeded",
            Self::AlreadyCancelled => "already_cancelled",
            Self::BackendFailure => "backend_failure",
        }
    }
}

/// Outcome label attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Informational; no decision yet.
    Pending,
    Proceed,
    Cancelled,
    Fail,
    /// Log-only mode let a violating allocation through.
    Overshoot,
}

/// One structured admission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    /// Monotonic decision id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    pub level: LogLevel,
    pub event: AdmissionEvent,
    /// Label of the tracker charged by the request.
    pub tracker: String,
    pub task_id: String,
    /// Requested bytes.
    pub size: u64,
    pub outcome: RecordOutcome,
    /// Time spent in the wait loop, in milliseconds.
    pub waited_ms: u64,
    /// Full diagnostic text.
    pub details: String,
}

/// Fields for a record about to be pushed.
#[derive(Debug, Clone)]
pub struct RecordDraft<'a> {
    pub level: LogLevel,
    pub event: AdmissionEvent,
    pub tracker: &'a str,
    pub task_id: &'a str,
    pub size: u64,
    pub outcome: RecordOutcome,
    pub waited_ms: u64,
    pub details: String,
}

/// Bounded ring of admission records.
pub struct AdmissionLog {
    capacity: usize,
    next_decision_id: AtomicU64,
    records: Mutex<VecDeque<AdmissionRecord>>,
}

impl AdmissionLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_decision_id: AtomicU64::new(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Emit a record through `tracing` and retain it. Returns its decision id.
    pub fn push(&self, draft: RecordDraft<'_>) -> u64 {
        let decision_id = self.next_decision_id.fetch_add(1, Ordering::Relaxed);
        emit(decision_id, &draft);
        if self.capacity == 0 {
            return decision_id;
        }

        let record = AdmissionRecord {
            decision_id,
            trace_id: format!("memgate::admission::{}::{:016x}", draft.event.as_str(), decision_id),
            level: draft.level,
            event: draft.event,
            tracker: draft.tracker.to_owned(),
            task_id: draft.task_id.to_owned(),
            size: draft.size,
            outcome: draft.outcome,
            waited_ms: draft.waited_ms,
            details: draft.details,
        };
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        decision_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AdmissionRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Remove and return the retained records, oldest first.
    pub fn drain(&self) -> Vec<AdmissionRecord> {
        self.records.lock().drain(..).collect()
    }

    /// Records matching `event`, oldest first.
    #[must_use]
    pub fn events(&self, event: AdmissionEvent) -> Vec<AdmissionRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.event == event)
            .cloned()
            .collect()
    }

    /// Write the retained records as JSON lines.
    pub fn write_jsonl<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for record in self.snapshot() {
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AdmissionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

fn emit(decision_id: u64, draft: &RecordDraft<'_>) {
    let event = draft.event.as_str();
    match draft.level {
        LogLevel::Debug => tracing::debug!(
            target: "memgate::admission",
            decision_id,
            event,
            tracker = draft.tracker,
            task_id = draft.task_id,
            size = draft.size,
            outcome = ?draft.outcome,
            waited_ms = draft.waited_ms,
            "{}",
            draft.details
        ),
        LogLevel::Info => tracing::info!(
            target: "memgate::admission",
            decision_id,
            event,
            tracker = draft.tracker,
            task_id = draft.task_id,
            size = draft.size,
            outcome = ?draft.outcome,
            waited_ms = draft.waited_ms,
            "{}",
            draft.details
        ),
        LogLevel::Warn => tracing::warn!(
            target: "memgate::admission",
            decision_id,
            event,
            tracker = draft.tracker,
            task_id = draft.task_id,
            size = draft.size,
            outcome = ?draft.outcome,
            waited_ms = draft.waited_ms,
            "{}",
            draft.details
        ),
        LogLevel::Error => tracing::error!(
            target: "memgate::admission",
            decision_id,
            event,
            tracker = draft.tracker,
            task_id = draft.task_id,
            size = draft.size,
            outcome = ?draft.outcome,
            waited_ms = draft.waited_ms,
            "{}",
            draft.details
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(event: AdmissionEvent, size: u64) -> RecordDraft<'static> {
        RecordDraft {
            level: LogLevel::Info,
            event,
            tracker: "query-q",
            task_id: "q",
            size,
            outcome: RecordOutcome::Pending,
            waited_ms: 0,
            details: format!("request {size}"),
        }
    }

    #[test]
    fn decision_ids_are_monotonic() {
        let log = AdmissionLog::new(8);
        let a = log.push(draft(AdmissionEvent::HardLimitExceeded, 1));
        let b = log.push(draft(AdmissionEvent::SoftLimitExceeded, 2));
        assert!(b > a);
        let records = log.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, a);
        assert!(records[0].trace_id.contains("hard_limit_exceeded"));
    }

    #[test]
    fn ring_drops_oldest() {
        let log = AdmissionLog::new(3);
        for size in 0..5 {
            log.push(draft(AdmissionEvent::WaitStarted, size));
        }
        let sizes: Vec<u64> = log.snapshot().iter().map(|r| r.size).collect();
        assert_eq!(sizes, vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let log = AdmissionLog::new(0);
        let id = log.push(draft(AdmissionEvent::FaultInjected, 9));
        assert_eq!(id, 1);
        assert!(log.is_empty());
    }

    #[test]
    fn drain_empties_ring() {
        let log = AdmissionLog::new(4);
        log.push(draft(AdmissionEvent::WaitReclaimed, 1));
        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn jsonl_lines_parse_back() {
        let log = AdmissionLog::new(4);
        log.push(draft(AdmissionEvent::WaitTimedOut, 200));
        log.push(draft(AdmissionEvent::AlreadyCancelled, 300));

        let mut out = Vec::new();
        log.write_jsonl(&mut out).expect("write to vec");
        let text = String::from_utf8(out).expect("utf8");
        let parsed: Vec<AdmissionRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid json line"))
            .collect();
        assert_eq!(parsed, log.snapshot());
        assert!(text.contains("\"event\":\"wait_timed_out\""));
        assert!(text.contains("\"level\":\"info\""));
    }
}
