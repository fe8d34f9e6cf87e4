//! # memgate-alloc
//!
//! Allocator that runs admission control before touching memory.
//!
//! - **Policy** (`policy`): clear/populate/mmap switches fixed at construction
//! - **Backends** (`backend`): system heap + mappings, external-library
//!   alignment, and a recording backend with a size ledger
//! - **Allocator** (`allocator`): admission, accounting, and the backend call
//! - **Pool** (`pool`): library-style pool bound to one thread context

pub mod allocator;
pub mod backend;
pub mod policy;
pub mod pool;

pub use allocator::{Allocator, DefaultAllocator, ExternalLibraryAllocator, RecordingAllocator};
pub use backend::{
    EXTERNAL_MIN_ALIGNMENT, ExternalLibraryBackend, MemoryBackend, RecordingBackend, SizeLedger,
    SystemBackend,
};
pub use policy::{AllocPolicy, zero_size_sentinel};
pub use pool::ExternalPool;
