//! Audit backend that records the size of every live block.
//!
//! The ledger is one map under one mutex. That is fine for instrumented
//! builds; production backends keep no per-block bookkeeping.

use std::collections::HashMap;
use std::ptr::NonNull;

use memgate_admission::AllocError;
use parking_lot::Mutex;

use super::{MemoryBackend, SystemBackend};
use crate::policy::AllocPolicy;

#[derive(Debug, Default)]
struct LedgerState {
    sizes: HashMap<usize, usize>,
    live_bytes: usize,
}

/// Address to size map for live blocks.
#[derive(Debug, Default)]
pub struct SizeLedger {
    state: Mutex<LedgerState>,
}

impl SizeLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live block. Returns the size previously recorded at
    /// `addr`, which indicates a bookkeeping bug in the caller.
    pub fn record(&self, addr: usize, size: usize) -> Option<usize> {
        let mut state = self.state.lock();
        let previous = state.sizes.insert(addr, size);
        if let Some(old) = previous {
            state.live_bytes -= old;
        }
        state.live_bytes += size;
        previous
    }

    /// Forget a block. `None` if the address was never recorded.
    pub fn remove(&self, addr: usize) -> Option<usize> {
        let mut state = self.state.lock();
        let size = state.sizes.remove(&addr)?;
        state.live_bytes -= size;
        Some(size)
    }

    #[must_use]
    pub fn recorded_size(&self, addr: usize) -> Option<usize> {
        self.state.lock().sizes.get(&addr).copied()
    }

    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().sizes.len()
    }

    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.state.lock().live_bytes
    }
}

/// Wraps another backend and records every block in a [`SizeLedger`].
///
/// Releasing or resizing an address the ledger does not know fails with
/// [`AllocError::UntrackedAddress`] and leaves the memory alone.
#[derive(Debug, Default)]
pub struct RecordingBackend<B = SystemBackend> {
    inner: B,
    ledger: SizeLedger,
}

impl<B: MemoryBackend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            ledger: SizeLedger::new(),
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &SizeLedger {
        &self.ledger
    }

    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.ledger.live_bytes()
    }

    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.ledger.live_allocations()
    }

    #[must_use]
    pub fn recorded_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.ledger.recorded_size(ptr.as_ptr().addr())
    }

    /// Remove the entry for `ptr` before the inner backend releases it, so
    /// the address cannot be handed out again while it is still recorded.
    fn take_known(&self, ptr: NonNull<u8>, claimed: usize) -> Result<usize, AllocError> {
        let addr = ptr.as_ptr().addr();
        let recorded = self
            .ledger
            .remove(addr)
            .ok_or(AllocError::UntrackedAddress { addr })?;
        if recorded != claimed {
            tracing::warn!(
                target: "memgate::ledger",
                addr,
                recorded,
                claimed,
                "size mismatch for recorded block; using recorded size"
            );
        }
        Ok(recorded)
    }
}

impl<B: MemoryBackend> MemoryBackend for RecordingBackend<B> {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn allocate(
        &self,
        policy: &AllocPolicy,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.inner.allocate(policy, size, alignment)?;
        if let Some(stale) = self.ledger.record(ptr.as_ptr().addr(), size) {
            tracing::error!(
                target: "memgate::ledger",
                addr = ptr.as_ptr().addr(),
                stale,
                size,
                "fresh block overlaps a recorded one"
            );
        }
        Ok(ptr)
    }

    unsafe fn deallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> Result<(), AllocError> {
        let size = self.take_known(ptr, size)?;
        // SAFETY: the ledger proves this backend handed out ptr for `size`.
        let released = unsafe { self.inner.deallocate(policy, ptr, size, alignment) };
        if released.is_err() {
            self.ledger.record(ptr.as_ptr().addr(), size);
        }
        released
    }

    unsafe fn reallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let old_size = self.take_known(ptr, old_size)?;
        // SAFETY: the ledger proves this backend handed out ptr for old_size.
        let moved = unsafe {
            self.inner
                .reallocate(policy, ptr, old_size, new_size, alignment)
        };
        match moved {
            Ok(moved) => {
                self.ledger.record(moved.as_ptr().addr(), new_size);
                Ok(moved)
            }
            Err(err) => {
                // The old block is untouched on failure.
                self.ledger.record(ptr.as_ptr().addr(), old_size);
                Err(err)
            }
        }
    }
}
