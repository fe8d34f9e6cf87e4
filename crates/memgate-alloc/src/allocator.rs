//! Admission-gated allocator.
//!
//! Every physical allocation, and every realloc growth, first passes the
//! [`AdmissionController`]. Accounting is charged before the backend is asked
//! for memory and rolled back if the backend fails. Only the requested size is
//! charged; alignment padding is never accounted.

use std::ptr::NonNull;
use std::sync::Arc;

use memgate_admission::{
    AdmissionController, AllocError, AllocatorConfig, Decision, ProcessArbitrator, ThreadContext,
};

use crate::backend::{ExternalLibraryBackend, MemoryBackend, RecordingBackend, SystemBackend};
use crate::policy::{AllocPolicy, is_zero_size_sentinel, validate_alignment, zero_size_sentinel};

pub type DefaultAllocator = Allocator<SystemBackend>;
pub type ExternalLibraryAllocator = Allocator<ExternalLibraryBackend>;
pub type RecordingAllocator = Allocator<RecordingBackend>;

fn bytes(size: usize) -> u64 {
    u64::try_from(size).unwrap_or(u64::MAX)
}

pub struct Allocator<B: MemoryBackend = SystemBackend> {
    backend: B,
    policy: AllocPolicy,
    admission: Arc<AdmissionController>,
}

impl<B: MemoryBackend> Allocator<B> {
    pub fn new(backend: B, policy: AllocPolicy, admission: Arc<AdmissionController>) -> Self {
        Self {
            backend,
            policy,
            admission,
        }
    }

    /// Build a private controller from `config` and the default policy.
    pub fn with_config(
        backend: B,
        config: AllocatorConfig,
        arbitrator: Arc<dyn ProcessArbitrator>,
    ) -> Self {
        let policy = AllocPolicy::from_config(&config);
        Self::new(
            backend,
            policy,
            Arc::new(AdmissionController::new(config, arbitrator)),
        )
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn policy(&self) -> &AllocPolicy {
        &self.policy
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// `Ok(None)` means the owning query is being cancelled and nothing was
    /// allocated or charged. A zero `size` returns a non-null sentinel without
    /// consulting admission.
    pub fn alloc(
        &self,
        ctx: &ThreadContext,
        size: usize,
        alignment: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        validate_alignment(alignment)?;
        if size == 0 {
            return Ok(Some(zero_size_sentinel(alignment)));
        }
        if !self.admit(ctx, bytes(size))? {
            return Ok(None);
        }

        self.consume_memory(ctx, bytes(size));
        match self.backend.allocate(&self.policy, size, alignment) {
            Ok(ptr) => {
                self.add_address_sanitizer_region(ctx, ptr, size);
                Ok(Some(ptr))
            }
            Err(err) => {
                self.release_memory(ctx, bytes(size));
                self.admission.report_backend_failure(ctx, bytes(size), &err);
                Err(err)
            }
        }
    }

    /// Release a block and its accounting.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with exactly `size` and `alignment`
    /// and must not be used afterwards.
    pub unsafe fn free(
        &self,
        ctx: &ThreadContext,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> Result<(), AllocError> {
        validate_alignment(alignment)?;
        if size == 0 || is_zero_size_sentinel(ptr, alignment) {
            return Ok(());
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.backend.deallocate(&self.policy, ptr, size, alignment)? };
        self.remove_address_sanitizer_region(ctx, ptr, size);
        self.release_memory(ctx, bytes(size));
        Ok(())
    }

    /// Resize a block, preserving the common prefix.
    ///
    /// Growth is admitted on the delta only; shrinking always proceeds and
    /// releases the difference. `Ok(None)` means growth was refused because
    /// the query is being cancelled; `ptr` stays valid and unchanged.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with exactly `old_size` and
    /// `alignment`. On `Ok(Some(_))` the old pointer is invalid.
    pub unsafe fn realloc(
        &self,
        ctx: &ThreadContext,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        validate_alignment(alignment)?;
        if old_size == 0 {
            return self.alloc(ctx, new_size, alignment);
        }
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.free(ctx, ptr, old_size, alignment)? };
            return Ok(Some(zero_size_sentinel(alignment)));
        }
        if old_size == new_size {
            return Ok(Some(ptr));
        }

        if new_size > old_size {
            let delta = bytes(new_size - old_size);
            if !self.admit(ctx, delta)? {
                return Ok(None);
            }
            self.consume_memory(ctx, delta);
            // SAFETY: forwarded caller contract.
            let moved = unsafe {
                self.backend
                    .reallocate(&self.policy, ptr, old_size, new_size, alignment)
            };
            return match moved {
                Ok(moved) => {
                    self.move_address_sanitizer_region(ctx, ptr, old_size, moved, new_size);
                    Ok(Some(moved))
                }
                Err(err) => {
                    self.release_memory(ctx, delta);
                    self.admission.report_backend_failure(ctx, delta, &err);
                    Err(err)
                }
            };
        }

        // SAFETY: forwarded caller contract.
        let moved = unsafe {
            self.backend
                .reallocate(&self.policy, ptr, old_size, new_size, alignment)?
        };
        self.release_memory(ctx, bytes(old_size - new_size));
        self.move_address_sanitizer_region(ctx, ptr, old_size, moved, new_size);
        Ok(Some(moved))
    }

    /// Run admission for `size` bytes without allocating.
    pub fn memory_check(&self, ctx: &ThreadContext, size: u64) -> Decision {
        self.admission.check(ctx, size)
    }

    /// Charge `size` bytes to the context's tracker and the process counter.
    pub fn consume_memory(&self, ctx: &ThreadContext, size: u64) {
        ctx.tracker().consume(size);
        self.admission.arbitrator().consume(size);
    }

    /// Undo [`Allocator::consume_memory`].
    pub fn release_memory(&self, ctx: &ThreadContext, size: u64) {
        ctx.tracker().release(size);
        self.admission.arbitrator().release(size);
    }

    /// Forward a live range to the tracker's sanitizer hook (debug builds only).
    pub fn add_address_sanitizer_region(&self, ctx: &ThreadContext, ptr: NonNull<u8>, size: usize) {
        if cfg!(debug_assertions) {
            ctx.tracker()
                .add_address_sanitizer_region(ptr.as_ptr().addr(), size);
        }
    }

    /// Counterpart of [`Allocator::add_address_sanitizer_region`].
    pub fn remove_address_sanitizer_region(
        &self,
        ctx: &ThreadContext,
        ptr: NonNull<u8>,
        size: usize,
    ) {
        if cfg!(debug_assertions) {
            ctx.tracker()
                .remove_address_sanitizer_region(ptr.as_ptr().addr(), size);
        }
    }

    fn move_address_sanitizer_region(
        &self,
        ctx: &ThreadContext,
        old: NonNull<u8>,
        old_size: usize,
        new: NonNull<u8>,
        new_size: usize,
    ) {
        self.remove_address_sanitizer_region(ctx, old, old_size);
        self.add_address_sanitizer_region(ctx, new, new_size);
    }

    /// `Ok(true)` to proceed, `Ok(false)` when cancelled.
    fn admit(&self, ctx: &ThreadContext, size: u64) -> Result<bool, AllocError> {
        match self.admission.check(ctx, size) {
            Decision::Proceed => Ok(true),
            Decision::Cancelled => Ok(false),
            Decision::Fail(err) => Err(err),
        }
    }
}

impl<B: MemoryBackend> std::fmt::Debug for Allocator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("admission", &self.admission)
            .finish()
    }
}
