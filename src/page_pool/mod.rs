//! Page pool
//!
//! The page pool is the only component that talks to the system allocator.
//! Size classes take single pages from it; the large-object path takes
//! multi-page blocks. Every block handed out is aligned to the page size,
//! which is what lets a size class find a slot's page by rounding the slot
//! address down.
//!
//! ```text
//! SizeClassAllocator ──get_page/return_page──┐
//!                                            ├─→ PagePool ─→ system allocator
//! AggregateAllocator ──get_pages/return_pages┘      └─→ cache of returned pages
//! ```

pub mod counting;
pub mod system;

pub use counting::CountingPagePool;
pub use system::SystemPagePool;

use serde::Serialize;
use std::ptr::NonNull;

/// Supplier of page-aligned memory
///
/// Implementations must be thread-safe: every arena of every tag shares
/// one pool.
pub trait PagePool: Send + Sync {
    /// Size (and alignment) of a single page in bytes
    fn page_size(&self) -> usize;

    /// Get one page, or `None` if the pool is exhausted
    ///
    /// Contents are unspecified.
    fn get_page(&self) -> Option<NonNull<u8>>;

    /// Get a zero-filled, page-aligned block of at least `size` bytes
    fn get_pages(&self, size: usize) -> Option<NonNull<u8>>;

    /// Give a page back
    ///
    /// # Safety
    /// `page` must come from [`get_page`](Self::get_page) on this pool and
    /// must not be used afterwards.
    unsafe fn return_page(&self, page: NonNull<u8>);

    /// Give a multi-page block back
    ///
    /// # Safety
    /// `block` must come from [`get_pages`](Self::get_pages) on this pool
    /// called with the same `size`, and must not be used afterwards.
    unsafe fn return_pages(&self, block: NonNull<u8>, size: usize);

    /// Counters snapshot
    fn stats(&self) -> PagePoolStats;
}

/// Page pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PagePoolStats {
    pub page_size: usize,
    /// Single pages handed out
    pub pages_out: u64,
    /// Single pages given back
    pub pages_returned: u64,
    /// Returned pages held for reuse
    pub cached_pages: usize,
    /// Multi-page blocks handed out
    pub large_blocks_out: u64,
    /// Multi-page blocks given back
    pub large_blocks_returned: u64,
    /// Bytes currently obtained from the system allocator
    pub mapped_bytes: usize,
}

impl PagePoolStats {
    /// Single pages currently in use by callers
    pub fn pages_in_use(&self) -> u64 {
        self.pages_out - self.pages_returned
    }
}
