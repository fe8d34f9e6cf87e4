//! Anonymous private mappings for large requests.
//!
//! Mapped memory is zero-filled by the kernel, so `clear_memory` costs nothing
//! on this path. Alignment is limited to the page size. With populate set, the
//! tail of a grown mapping is pre-faulted as well.

use std::ptr::NonNull;

use memgate_admission::AllocError;

#[cfg(unix)]
mod imp {
    use std::io;
    use std::ptr::{self, NonNull};
    use std::sync::OnceLock;

    use memgate_admission::AllocError;

    const FALLBACK_PAGE_SIZE: usize = 4096;

    pub const SUPPORTED: bool = true;

    pub fn page_size() -> usize {
        static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
        *PAGE_SIZE.get_or_init(|| {
            // SAFETY: sysconf has no memory-safety preconditions.
            let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            usize::try_from(raw)
                .ok()
                .filter(|size| size.is_power_of_two())
                .unwrap_or(FALLBACK_PAGE_SIZE)
        })
    }

    #[cfg(target_os = "linux")]
    const POPULATE_FLAG: libc::c_int = libc::MAP_POPULATE;
    #[cfg(not(target_os = "linux"))]
    const POPULATE_FLAG: libc::c_int = 0;

    fn map_flags(populate: bool) -> libc::c_int {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if populate { flags | POPULATE_FLAG } else { flags }
    }

    fn os_failure(op: &str, size: usize) -> AllocError {
        AllocError::mem_alloc_failed(format!(
            "{op} of {size} bytes failed: {}",
            io::Error::last_os_error()
        ))
    }

    pub fn map(size: usize, populate: bool) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: an anonymous mapping with a null hint touches no existing memory.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                map_flags(populate),
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(os_failure("mmap", size));
        }
        NonNull::new(raw.cast::<u8>()).ok_or_else(|| os_failure("mmap", size))
    }

    /// # Safety
    ///
    /// `ptr` must come from [`map`] (or [`remap`]) with exactly `size` bytes and
    /// must not be used afterwards.
    pub unsafe fn unmap(ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        // SAFETY: caller guarantees the range is a live mapping of `size` bytes.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
        if rc == 0 {
            Ok(())
        } else {
            Err(os_failure("munmap", size))
        }
    }

    /// # Safety
    ///
    /// Same contract as [`unmap`] for `ptr`/`old_size`.
    #[cfg(target_os = "linux")]
    pub unsafe fn remap(
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        populate: bool,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: caller guarantees the old range is a live mapping; MAYMOVE
        // lets the kernel relocate it and invalidates the old address.
        let raw = unsafe {
            libc::mremap(
                ptr.as_ptr().cast(),
                old_size,
                new_size,
                libc::MREMAP_MAYMOVE,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(os_failure("mremap", new_size));
        }
        let moved = NonNull::new(raw.cast::<u8>()).ok_or_else(|| os_failure("mremap", new_size))?;
        if populate && new_size > old_size {
            // SAFETY: [old_size, new_size) lies inside the mapping just returned.
            unsafe { prefault(moved, old_size, new_size) };
        }
        Ok(moved)
    }

    /// Write-fault every page of `[from, to)`. mremap has no populate flag,
    /// so grown tails are touched instead.
    ///
    /// # Safety
    ///
    /// The range must lie inside a live, writable, zero-filled mapping owned
    /// by the caller.
    #[cfg(target_os = "linux")]
    unsafe fn prefault(base: NonNull<u8>, from: usize, to: usize) {
        let page = page_size();
        let mut offset = from;
        while offset < to {
            // SAFETY: offset < to, inside the caller's mapping. The byte is a
            // fresh kernel zero, so writing zero leaves contents unchanged.
            unsafe { ptr::write_volatile(base.as_ptr().add(offset), 0) };
            offset = (offset / page + 1) * page;
        }
    }

    /// # Safety
    ///
    /// Same contract as [`unmap`] for `ptr`/`old_size`.
    #[cfg(not(target_os = "linux"))]
    pub unsafe fn remap(
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        populate: bool,
    ) -> Result<NonNull<u8>, AllocError> {
        let fresh = map(new_size, populate)?;
        // SAFETY: both ranges are live, distinct mappings at least
        // `min(old_size, new_size)` bytes long.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
            unmap(ptr, old_size)?;
        }
        Ok(fresh)
    }
}

#[cfg(not(unix))]
mod imp {
    use std::ptr::NonNull;

    use memgate_admission::AllocError;

    pub const SUPPORTED: bool = false;

    pub fn page_size() -> usize {
        4096
    }

    fn unsupported() -> AllocError {
        AllocError::mem_alloc_failed("anonymous mappings are not supported on this platform")
    }

    pub fn map(_size: usize, _populate: bool) -> Result<NonNull<u8>, AllocError> {
        Err(unsupported())
    }

    pub unsafe fn unmap(_ptr: NonNull<u8>, _size: usize) -> Result<(), AllocError> {
        Err(unsupported())
    }

    pub unsafe fn remap(
        _ptr: NonNull<u8>,
        _old_size: usize,
        _new_size: usize,
        _populate: bool,
    ) -> Result<NonNull<u8>, AllocError> {
        Err(unsupported())
    }
}

/// Whether this platform can serve mapped allocations.
pub const MAPPING_SUPPORTED: bool = imp::SUPPORTED;

/// System page size, resolved once.
#[must_use]
pub fn page_size() -> usize {
    imp::page_size()
}

/// Map `size` zeroed bytes aligned to `alignment` (at most one page).
pub fn map(size: usize, alignment: usize, populate: bool) -> Result<NonNull<u8>, AllocError> {
    check_alignment(alignment)?;
    imp::map(size, populate)
}

/// Release a mapping.
///
/// # Safety
///
/// `ptr` must have been returned by [`map`] or [`remap`] for exactly `size`
/// bytes and must not be used afterwards.
pub unsafe fn unmap(ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
    // SAFETY: forwarded caller contract.
    unsafe { imp::unmap(ptr, size) }
}

/// Resize a mapping, possibly moving it. New bytes read as zero.
///
/// # Safety
///
/// Same contract as [`unmap`]; on success the old address is invalid.
pub unsafe fn remap(
    ptr: NonNull<u8>,
    old_size: usize,
    new_size: usize,
    alignment: usize,
    populate: bool,
) -> Result<NonNull<u8>, AllocError> {
    check_alignment(alignment)?;
    // SAFETY: forwarded caller contract.
    unsafe { imp::remap(ptr, old_size, new_size, populate) }
}

fn check_alignment(alignment: usize) -> Result<(), AllocError> {
    let page_size = page_size();
    if alignment > page_size {
        return Err(AllocError::MmapAlignment {
            alignment,
            page_size,
        });
    }
    Ok(())
}
