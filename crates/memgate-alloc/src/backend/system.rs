//! Default backend: the global heap for ordinary sizes, anonymous mappings for
//! large ones.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use memgate_admission::AllocError;

use super::MemoryBackend;
use super::mmap;
use crate::policy::AllocPolicy;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

fn layout(size: usize, alignment: usize) -> Result<Layout, AllocError> {
    Layout::from_size_align(size, alignment).map_err(|_| {
        AllocError::mem_alloc_failed(format!(
            "invalid heap layout: size {size}, alignment {alignment}"
        ))
    })
}

fn maps(policy: &AllocPolicy, size: usize) -> bool {
    mmap::MAPPING_SUPPORTED && policy.maps(size)
}

impl SystemBackend {
    fn heap_allocate(
        policy: &AllocPolicy,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let layout = layout(size, alignment)?;
        // SAFETY: layout has a non-zero size; the allocator never forwards zero.
        let raw = unsafe {
            if policy.clear_memory {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        NonNull::new(raw).ok_or_else(|| {
            AllocError::mem_alloc_failed(format!(
                "heap allocation of {size} bytes (alignment {alignment}) failed"
            ))
        })
    }

    /// # Safety
    ///
    /// `ptr` must be a live heap block of `old_size` bytes at `alignment`.
    unsafe fn heap_reallocate(
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let old_layout = layout(old_size, alignment)?;
        layout(new_size, alignment)?;
        // SAFETY: caller guarantees ptr/old_layout; new_size is non-zero and
        // forms a valid layout with the same alignment.
        let raw = unsafe { alloc::realloc(ptr.as_ptr(), old_layout, new_size) };
        let grown = NonNull::new(raw).ok_or_else(|| {
            AllocError::mem_alloc_failed(format!(
                "heap reallocation from {old_size} to {new_size} bytes failed"
            ))
        })?;
        if policy.clear_memory && new_size > old_size {
            // SAFETY: the block is new_size bytes; the tail starts at old_size.
            unsafe { grown.as_ptr().add(old_size).write_bytes(0, new_size - old_size) };
        }
        Ok(grown)
    }
}

impl MemoryBackend for SystemBackend {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate(
        &self,
        policy: &AllocPolicy,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if maps(policy, size) {
            mmap::map(size, alignment, policy.mmap_populate)
        } else {
            Self::heap_allocate(policy, size, alignment)
        }
    }

    unsafe fn deallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> Result<(), AllocError> {
        if maps(policy, size) {
            // SAFETY: sizes at or above the threshold were mapped by `allocate`.
            return unsafe { mmap::unmap(ptr, size) };
        }
        let layout = layout(size, alignment)?;
        // SAFETY: caller guarantees ptr was heap-allocated with this layout.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    unsafe fn reallocate(
        &self,
        policy: &AllocPolicy,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        match (maps(policy, old_size), maps(policy, new_size)) {
            // SAFETY (both arms): caller guarantees ptr is live for old_size.
            (true, true) => unsafe {
                mmap::remap(ptr, old_size, new_size, alignment, policy.mmap_populate)
            },
            (false, false) => unsafe {
                Self::heap_reallocate(policy, ptr, old_size, new_size, alignment)
            },
            _ => {
                let fresh = self.allocate(policy, new_size, alignment)?;
                // SAFETY: fresh and ptr are distinct live blocks at least
                // min(old_size, new_size) long; ptr is released afterwards.
                unsafe {
                    ptr::copy_nonoverlapping(
                        ptr.as_ptr(),
                        fresh.as_ptr(),
                        old_size.min(new_size),
                    );
                    self.deallocate(policy, ptr, old_size, alignment)?;
                }
                Ok(fresh)
            }
        }
    }
}
