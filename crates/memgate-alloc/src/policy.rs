//! Allocation policy flags fixed at allocator construction.

use std::ptr::{self, NonNull};

use memgate_admission::config::DEFAULT_MMAP_THRESHOLD;
use memgate_admission::{AllocError, AllocatorConfig};

/// Behavior switches shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocPolicy {
    /// Zero-fill fresh memory and grown tails.
    pub clear_memory: bool,
    /// Pre-fault mapped pages (Linux `MAP_POPULATE`).
    pub mmap_populate: bool,
    /// Route large requests to anonymous mappings.
    pub use_mmap: bool,
    /// Requests at or above this size are mapped when `use_mmap` is set.
    pub mmap_threshold: usize,
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self {
            clear_memory: false,
            mmap_populate: false,
            use_mmap: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }
}

impl AllocPolicy {
    /// Default policy with the configured mapping threshold.
    #[must_use]
    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self {
            mmap_threshold: config.mmap_threshold_bytes,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_clear_memory(mut self, clear: bool) -> Self {
        self.clear_memory = clear;
        self
    }

    #[must_use]
    pub const fn with_mmap_populate(mut self, populate: bool) -> Self {
        self.mmap_populate = populate;
        self
    }

    #[must_use]
    pub const fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    #[must_use]
    pub const fn with_mmap_threshold(mut self, threshold: usize) -> Self {
        self.mmap_threshold = threshold;
        self
    }

    /// Returns true if a request of `size` bytes goes to a mapping.
    #[must_use]
    pub const fn maps(&self, size: usize) -> bool {
        self.use_mmap && size >= self.mmap_threshold
    }
}

/// Reject alignments that are not a power of two.
pub fn validate_alignment(alignment: usize) -> Result<(), AllocError> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(AllocError::InvalidAlignment { alignment })
    }
}

/// Non-null placeholder returned for zero-sized requests: the alignment value
/// used as an address. Never dereferenced and never passed to a backend.
#[must_use]
pub fn zero_size_sentinel(alignment: usize) -> NonNull<u8> {
    NonNull::new(ptr::without_provenance_mut(alignment.max(1))).unwrap_or(NonNull::dangling())
}

/// Returns true if `ptr` is the zero-size placeholder for `alignment`.
#[must_use]
pub fn is_zero_size_sentinel(ptr: NonNull<u8>, alignment: usize) -> bool {
    ptr.as_ptr().addr() == alignment.max(1)
}
