//! Backend for columnar buffers handed to an embedded external library.
//!
//! Same contract as [`SystemBackend`], with every block aligned to at least
//! 64 bytes as columnar buffer consumers expect.

use std::ptr::NonNull;

use memgate_admission::AllocError;

use super::{MemoryBackend, SystemBackend};
use crate::policy::AllocPolicy;

/// Minimum alignment of external-library buffers.
pub const EXTERNAL_MIN_ALIGNMENT: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalLibraryBackend {
    inner: SystemBackend,
}

const fn raise(alignment: usize) -> usize {
    if alignment < EXTERNAL_MIN_ALIGNMENT {
        EXTERNAL_MIN_ALIGNMENT
    } else {
        alignment
    }
}

impl MemoryBackend for ExternalLibraryBackend {
    fn name(&self) -> &'static str {
        "external"
    }

    fn allocate(
        &self,
        policy: &AllocPolicy,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        self.inner.allocate(policy, size, raise(alignment))
    }

    unsafe fn deallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> Result<(), AllocError> {
        // SAFETY: forwarded; allocation used the same raised alignment.
        unsafe { self.inner.deallocate(policy, ptr, size, raise(alignment)) }
    }

    unsafe fn reallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded; allocation used the same raised alignment.
        unsafe {
            self.inner
                .reallocate(policy, ptr, old_size, new_size, raise(alignment))
        }
    }
}
