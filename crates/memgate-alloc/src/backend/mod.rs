//! Physical allocation strategies.
//!
//! A backend only obtains and returns memory. Admission and accounting live in
//! [`crate::Allocator`], which never passes a zero size to a backend.

pub mod external;
pub mod mmap;
pub mod recording;
pub mod system;

use std::ptr::NonNull;

use memgate_admission::AllocError;

use crate::policy::AllocPolicy;

pub use external::{EXTERNAL_MIN_ALIGNMENT, ExternalLibraryBackend};
pub use recording::{RecordingBackend, SizeLedger};
pub use system::SystemBackend;

/// Source of raw memory for an [`crate::Allocator`].
pub trait MemoryBackend: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Obtain `size > 0` bytes aligned to `alignment` (a power of two).
    fn allocate(
        &self,
        policy: &AllocPolicy,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError>;

    /// Return memory obtained from this backend.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this backend for exactly `size` bytes
    /// and `alignment` under the same `policy`, and must not be used afterwards.
    unsafe fn deallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> Result<(), AllocError>;

    /// Resize memory obtained from this backend, preserving the common prefix.
    /// On failure the original block is untouched.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryBackend::deallocate`] for `ptr`/`old_size`.
    /// On success the old pointer is invalid.
    unsafe fn reallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError>;
}
