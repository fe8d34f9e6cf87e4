//! Library-style memory pool over an admission-gated allocator.
//!
//! Embedded columnar libraries allocate through a pool object they own. This
//! adapter binds an allocator to one thread context so those allocations are
//! admitted and accounted like any other. A library cannot observe
//! cancellation, so a cancelled request surfaces as `MemAllocFailed`.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use memgate_admission::{AllocError, ThreadContext};

use crate::allocator::Allocator;
use crate::backend::{ExternalLibraryBackend, MemoryBackend};

pub struct ExternalPool<B: MemoryBackend = ExternalLibraryBackend> {
    allocator: Arc<Allocator<B>>,
    ctx: Arc<ThreadContext>,
    alignment: usize,
    bytes_allocated: AtomicI64,
    max_memory: AtomicI64,
}

fn signed(size: usize) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

impl<B: MemoryBackend> ExternalPool<B> {
    pub fn new(allocator: Arc<Allocator<B>>, ctx: Arc<ThreadContext>, alignment: usize) -> Self {
        Self {
            allocator,
            ctx,
            alignment,
            bytes_allocated: AtomicI64::new(0),
            max_memory: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn context(&self) -> &ThreadContext {
        &self.ctx
    }

    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = self
            .allocator
            .alloc(&self.ctx, size, self.alignment)?
            .ok_or_else(|| self.cancelled(size))?;
        self.grow(size);
        Ok(ptr)
    }

    /// # Safety
    ///
    /// `ptr` must come from this pool with exactly `old_size` bytes. On
    /// success the old pointer is invalid.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        let moved = unsafe {
            self.allocator
                .realloc(&self.ctx, ptr, old_size, new_size, self.alignment)?
        }
        .ok_or_else(|| self.cancelled(new_size.saturating_sub(old_size)))?;
        if new_size >= old_size {
            self.grow(new_size - old_size);
        } else {
            self.bytes_allocated
                .fetch_sub(signed(old_size - new_size), Ordering::AcqRel);
        }
        Ok(moved)
    }

    /// # Safety
    ///
    /// `ptr` must come from this pool with exactly `size` bytes and must not be
    /// used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.allocator.free(&self.ctx, ptr, size, self.alignment)? };
        self.bytes_allocated.fetch_sub(signed(size), Ordering::AcqRel);
        Ok(())
    }

    /// Bytes currently allocated through this pool.
    #[must_use]
    pub fn bytes_allocated(&self) -> i64 {
        self.bytes_allocated.load(Ordering::Acquire)
    }

    /// High-water mark of [`ExternalPool::bytes_allocated`].
    #[must_use]
    pub fn max_memory(&self) -> i64 {
        self.max_memory.load(Ordering::Relaxed)
    }

    fn grow(&self, size: usize) {
        let delta = signed(size);
        let now = self
            .bytes_allocated
            .fetch_add(delta, Ordering::AcqRel)
            .saturating_add(delta);
        self.max_memory.fetch_max(now, Ordering::Relaxed);
    }

    fn cancelled(&self, size: usize) -> AllocError {
        AllocError::mem_alloc_failed(format!(
            "external pool allocation of {size} bytes refused: query {} is cancelled",
            self.ctx.task_id()
        ))
    }
}

impl<B: MemoryBackend> std::fmt::Debug for ExternalPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalPool")
            .field("ctx", &self.ctx)
            .field("alignment", &self.alignment)
            .field("bytes_allocated", &self.bytes_allocated())
            .field("max_memory", &self.max_memory())
            .finish()
    }
}
