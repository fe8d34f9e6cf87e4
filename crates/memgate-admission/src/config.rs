//! Allocator admission configuration.
//!
//! The process-wide configuration is read from `MEMGATE_*` environment
//! variables the first time it is requested:
//! - `MEMGATE_FAULT_PROBABILITY`: probability in `[0, 1]` that an admission
//!   check synthesizes an allocation failure. `0` (default) disables injection.
//! - `MEMGATE_WAIT_GC_MAX_MS`: ceiling for the hard-limit wait loop.
//! - `MEMGATE_DISABLE_MEMORY_GC`: never wait for reclamation, escalate at once.
//! - `MEMGATE_FAILURE_MODE`: `unwind` (default), `cancel`, or `log`.
//! - `MEMGATE_STACKTRACE_BYTES`: allocations larger than this carry a stack
//!   trace in their diagnostic. `0` disables capture.
//! - `MEMGATE_MMAP_THRESHOLD`: size at which mmap-enabled allocators switch
//!   to anonymous mappings.
//! - `MEMGATE_ADMISSION_LOG_CAPACITY`: number of structured admission records
//!   retained in memory.
//!
//! Configuration is never mutated by the admission path. Callers that need a
//! different configuration construct an [`AllocatorConfig`] explicitly and
//! hand it to the controller.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default ceiling for the hard-limit wait loop.
pub const DEFAULT_WAIT_GC_MAX_MS: u64 = 1_000;

/// Default mmap switch-over size (64 MiB).
pub const DEFAULT_MMAP_THRESHOLD: usize = 64 * 1024 * 1024;

/// Default number of admission records retained.
pub const DEFAULT_ADMISSION_LOG_CAPACITY: usize = 256;

/// How an admission failure reaches the caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The failing call returns `MemAllocFailed` to its caller, which is
    /// expected to unwind to the top of the query and fail it.
    #[default]
    Unwind,
    /// The owning query is marked cancelled and the call returns without
    /// allocating. Threads observe the cancellation at their next check.
    Cancel,
    /// Log the violation and let the allocation proceed.
    ///
    /// Limits are not enforced in this mode: a process configured this way can
    /// overshoot its hard limit without bound.
    LogOnly,
}

impl FailureMode {
    /// Parse from string (case-insensitive). Unknown values map to `Unwind`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "unwind" | "throw" | "catch" | "sync" | "fail" => Self::Unwind,
            "cancel" | "async" | "cancel_async" | "cancel-async" => Self::Cancel,
            "log" | "log_only" | "log-only" | "logonly" | "none" | "off" => Self::LogOnly,
            _ => Self::Unwind,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unwind => "unwind",
            Self::Cancel => "cancel",
            Self::LogOnly => "log_only",
        }
    }

    /// Returns true if violations are enforced (failed or cancelled).
    #[must_use]
    pub const fn enforces_limits(self) -> bool {
        !matches!(self, Self::LogOnly)
    }
}

/// Process-wide allocator admission settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub fault_probability: f64,
    pub wait_gc_max_ms: u64,
    pub disable_memory_gc: bool,
    pub failure_mode: FailureMode,
    pub stacktrace_threshold_bytes: u64,
    pub mmap_threshold_bytes: usize,
    pub admission_log_capacity: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            fault_probability: 0.0,
            wait_gc_max_ms: DEFAULT_WAIT_GC_MAX_MS,
            disable_memory_gc: false,
            failure_mode: FailureMode::Unwind,
            stacktrace_threshold_bytes: 0,
            mmap_threshold_bytes: DEFAULT_MMAP_THRESHOLD,
            admission_log_capacity: DEFAULT_ADMISSION_LOG_CAPACITY,
        }
    }
}

const ENV_FAULT_PROBABILITY: &str = "MEMGATE_FAULT_PROBABILITY";
const ENV_WAIT_GC_MAX_MS: &str = "MEMGATE_WAIT_GC_MAX_MS";
const ENV_DISABLE_MEMORY_GC: &str = "MEMGATE_DISABLE_MEMORY_GC";
const ENV_FAILURE_MODE: &str = "MEMGATE_FAILURE_MODE";
const ENV_STACKTRACE_BYTES: &str = "MEMGATE_STACKTRACE_BYTES";
const ENV_MMAP_THRESHOLD: &str = "MEMGATE_MMAP_THRESHOLD";
const ENV_LOG_CAPACITY: &str = "MEMGATE_ADMISSION_LOG_CAPACITY";

fn parse_bool_loose(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_owned(),
    })
}

impl AllocatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_FAULT_PROBABILITY) {
            config.fault_probability = parse_number(ENV_FAULT_PROBABILITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_WAIT_GC_MAX_MS) {
            config.wait_gc_max_ms = parse_number(ENV_WAIT_GC_MAX_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DISABLE_MEMORY_GC) {
            config.disable_memory_gc =
                parse_bool_loose(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_DISABLE_MEMORY_GC,
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup(ENV_FAILURE_MODE) {
            config.failure_mode = FailureMode::from_str_loose(&raw);
        }
        if let Some(raw) = lookup(ENV_STACKTRACE_BYTES) {
            config.stacktrace_threshold_bytes = parse_number(ENV_STACKTRACE_BYTES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MMAP_THRESHOLD) {
            config.mmap_threshold_bytes = parse_number(ENV_MMAP_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_CAPACITY) {
            config.admission_log_capacity = parse_number(ENV_LOG_CAPACITY, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(ConfigError::ProbabilityOutOfRange(self.fault_probability));
        }
        Ok(())
    }

    /// Returns true if a hard-limit violation may wait for reclamation.
    #[must_use]
    pub const fn waiting_enabled(&self) -> bool {
        !self.disable_memory_gc && self.wait_gc_max_ms > 0
    }

    /// Returns true if a stack trace should be attached for `size`.
    #[must_use]
    pub const fn wants_stack_trace(&self, size: u64) -> bool {
        self.stacktrace_threshold_bytes > 0 && size > self.stacktrace_threshold_bytes
    }

    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_wait_gc_max_ms(mut self, ms: u64) -> Self {
        self.wait_gc_max_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_memory_gc_disabled(mut self, disabled: bool) -> Self {
        self.disable_memory_gc = disabled;
        self
    }

    #[must_use]
    pub const fn with_fault_probability(mut self, probability: f64) -> Self {
        self.fault_probability = probability;
        self
    }

    #[must_use]
    pub const fn with_stacktrace_threshold(mut self, bytes: u64) -> Self {
        self.stacktrace_threshold_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_mmap_threshold(mut self, bytes: usize) -> Self {
        self.mmap_threshold_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_admission_log_capacity(mut self, capacity: usize) -> Self {
        self.admission_log_capacity = capacity;
        self
    }
}

static GLOBAL_CONFIG: OnceLock<AllocatorConfig> = OnceLock::new();

/// Install the process-wide configuration. Fails if one was already resolved.
pub fn install_global_config(config: AllocatorConfig) -> Result<(), ConfigError> {
    config.validate()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInstalled)
}

/// Get the process-wide configuration (reads env vars on first call, caches
/// thereafter). An unparsable environment falls back to defaults.
pub fn global_config() -> &'static AllocatorConfig {
    GLOBAL_CONFIG.get_or_init(|| match AllocatorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "invalid MEMGATE_* environment, using defaults");
            AllocatorConfig::default()
        }
    })
}
