//! Error types.

use thiserror::Error;

/// Failure of an allocation request.
///
/// `MemAllocFailed` is the single failure kind produced by admission control,
/// by fault injection, and by a backend that cannot obtain memory. The other
/// variants are caller contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("[MEM_ALLOC_FAILED] {message}")]
    MemAllocFailed { message: String },
    #[error("alignment {alignment} is not a power of two")]
    InvalidAlignment { alignment: usize },
    #[error("alignment {alignment} exceeds page size {page_size} for a mapped allocation")]
    MmapAlignment { alignment: usize, page_size: usize },
    #[error("address {addr:#x} is not tracked by the size ledger")]
    UntrackedAddress { addr: usize },
}

impl AllocError {
    pub fn mem_alloc_failed(message: impl Into<String>) -> Self {
        Self::MemAllocFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_mem_alloc_failed(&self) -> bool {
        matches!(self, Self::MemAllocFailed { .. })
    }

    /// Diagnostic text for `MemAllocFailed`, `None` for contract violations.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::MemAllocFailed { message } => Some(message),
            _ => None,
        }
    }
}

/// Invalid allocator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("fault probability {0} is outside [0, 1]")]
    ProbabilityOutOfRange(f64),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("process-wide allocator config was already installed")]
    AlreadyInstalled,
}
