//! Aggregate allocator
//!
//! One arena per [`AllocationTag`]. Each arena holds a full bank of size
//! classes and a large-object path that goes straight to the page pool:
//!
//! ```text
//! allocate(size)
//!   ├─ size <= LARGE_SIZE → SIZE_CLASSES[size_to_index(align_up(size, 8))]
//!   └─ size >  LARGE_SIZE → PagePool::get_pages(size)
//! ```
//!
//! Nothing is recorded per allocation, so `deallocate` must be given the
//! size that was passed to `allocate`. That size picks the same size class
//! (or the large path) again.

use crate::align::{align_up, ALLOC_ALIGNMENT, MAX_SLOT_ALIGNMENT};
use crate::metrics::{LARGE_ALLOCATIONS, LARGE_BYTES};
use crate::page_pool::{PagePool, SystemPagePool};
use crate::slab::allocator::UNTAGGED;
use crate::slab::{size_to_index, SizeClassAllocator, SizeClassStats, LARGE_SIZE, SIZE_CLASSES};
use crate::tag::AllocationTag;
use serde::Serialize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

lazy_static::lazy_static! {
    /// Per-tag arenas, created on first use and never torn down
    static ref ARENAS: [OnceLock<AggregateAllocator>; AllocationTag::COUNT] = Default::default();
}

/// Allocate `size` zero-filled bytes from the arena of `tag`
pub fn allocate(tag: AllocationTag, size: usize) -> Option<NonNull<u8>> {
    AggregateAllocator::instance(tag).allocate(size)
}

/// Return memory to the arena of `tag`
///
/// # Safety
/// See [`AggregateAllocator::deallocate`].
pub unsafe fn deallocate(tag: AllocationTag, ptr: NonNull<u8>, size: usize) {
    AggregateAllocator::instance(tag).deallocate(ptr, size)
}

/// Bank of size classes plus a large-object path
pub struct AggregateAllocator {
    allocators: Box<[SizeClassAllocator]>,
    pool: Arc<dyn PagePool>,
    label: &'static str,
    large_blocks: AtomicU64,
    large_bytes: AtomicU64,
}

impl AggregateAllocator {
    /// Process-wide arena for `tag`, backed by the global page pool
    pub fn instance(tag: AllocationTag) -> &'static AggregateAllocator {
        ARENAS[tag.index()].get_or_init(|| {
            info!(tag = %tag, classes = SIZE_CLASSES.len(), "Creating arena");
            AggregateAllocator::with_label(SystemPagePool::global(), tag.name())
        })
    }

    /// Standalone arena over `pool`
    pub fn new(pool: Arc<dyn PagePool>) -> Self {
        Self::with_label(pool, UNTAGGED)
    }

    /// Standalone arena whose metrics are reported under `label`
    pub fn with_label(pool: Arc<dyn PagePool>, label: &'static str) -> Self {
        let allocators = SIZE_CLASSES
            .iter()
            .map(|&size| SizeClassAllocator::with_label(size as u16, Arc::clone(&pool), label))
            .collect();

        Self {
            allocators,
            pool,
            label,
            large_blocks: AtomicU64::new(0),
            large_bytes: AtomicU64::new(0),
        }
    }

    /// Size class serving `size`, or `None` for the large path
    #[inline]
    pub fn class_index(size: usize) -> Option<usize> {
        (size <= LARGE_SIZE).then(|| size_to_index(align_up(size, ALLOC_ALIGNMENT)))
    }

    /// Allocate `size` zero-filled bytes aligned to at least 8
    ///
    /// Returns `None` when the page pool is exhausted.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        match Self::class_index(size) {
            Some(index) => self.allocators[index].allocate(),
            None => self.allocate_large(size),
        }
    }

    /// Return memory obtained from [`allocate`](Self::allocate)
    ///
    /// # Safety
    /// `ptr` must come from `allocate(size)` on this arena with exactly this
    /// `size`, and must not be used or freed again.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        match Self::class_index(size) {
            Some(index) => self.allocators[index].deallocate(ptr),
            None => self.deallocate_large(ptr, size),
        }
    }

    /// Slot-class request size that satisfies `align`, if one exists
    ///
    /// A request rounded up to a multiple of 16 maps to a class whose stride
    /// is a multiple of 16, and slot regions start 16-aligned.
    fn aligned_slot_size(size: usize, align: usize) -> Option<usize> {
        if align <= ALLOC_ALIGNMENT {
            return Some(size);
        }
        if align > MAX_SLOT_ALIGNMENT {
            return None;
        }
        let rounded = align_up(size.max(1), align);
        (rounded <= LARGE_SIZE).then_some(rounded)
    }

    /// Allocate with an explicit alignment
    ///
    /// Alignments up to 16 are served from size classes. Larger alignments
    /// take a page-aligned block of their own; alignments above the page
    /// size cannot be served.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if let Some(slot_size) = Self::aligned_slot_size(size, align) {
            self.allocate(slot_size)
        } else if align <= self.pool.page_size() {
            self.allocate_large(size)
        } else {
            None
        }
    }

    /// Return memory obtained from [`allocate_aligned`](Self::allocate_aligned)
    ///
    /// # Safety
    /// Same contract as [`deallocate`](Self::deallocate), with the same
    /// `size` and `align` as the allocation.
    pub unsafe fn deallocate_aligned(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        match Self::aligned_slot_size(size, align) {
            Some(slot_size) => self.deallocate(ptr, slot_size),
            None => self.deallocate_large(ptr, size),
        }
    }

    fn allocate_large(&self, size: usize) -> Option<NonNull<u8>> {
        let block = self.pool.get_pages(size)?;

        self.large_blocks.fetch_add(1, Ordering::Relaxed);
        self.large_bytes.fetch_add(size as u64, Ordering::Relaxed);
        LARGE_ALLOCATIONS.with_label_values(&[self.label]).inc();
        LARGE_BYTES.with_label_values(&[self.label]).add(size as i64);
        debug!(size, tag = self.label, "Large allocation");
        Some(block)
    }

    unsafe fn deallocate_large(&self, ptr: NonNull<u8>, size: usize) {
        self.pool.return_pages(ptr, size);

        self.large_blocks.fetch_sub(1, Ordering::Relaxed);
        self.large_bytes.fetch_sub(size as u64, Ordering::Relaxed);
        LARGE_BYTES.with_label_values(&[self.label]).sub(size as i64);
    }

    /// Size class `index` of this arena
    pub fn size_class(&self, index: usize) -> &SizeClassAllocator {
        &self.allocators[index]
    }

    /// Metric label (the tag name for process-wide arenas)
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Page pool backing this arena
    pub fn pool(&self) -> &Arc<dyn PagePool> {
        &self.pool
    }

    /// Get statistics about the arena
    pub fn stats(&self) -> AggregateStats {
        let classes: Vec<SizeClassStats> = self.allocators.iter().map(|a| a.stats()).collect();
        let live_pages = classes.iter().map(|c| c.live_pages as u64).sum();

        AggregateStats {
            label: self.label.to_string(),
            classes,
            live_pages,
            large_blocks: self.large_blocks.load(Ordering::Relaxed),
            large_bytes: self.large_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for one arena
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStats {
    pub label: String,
    pub classes: Vec<SizeClassStats>,
    /// Slot pages mapped across all classes
    pub live_pages: u64,
    /// Outstanding large-object blocks
    pub large_blocks: u64,
    /// Bytes requested by outstanding large-object blocks
    pub large_bytes: u64,
}

impl AggregateStats {
    /// Classes that currently map at least one page
    pub fn active_classes(&self) -> impl Iterator<Item = &SizeClassStats> {
        self.classes.iter().filter(|c| c.live_pages > 0)
    }
}
