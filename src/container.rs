//! Container allocator adapter
//!
//! [`ContainerAllocator<T, G>`] is a zero-sized handle that routes every
//! request to the arena of tag `G`. It implements the `allocator-api2`
//! [`Allocator`] trait, so it plugs into `allocator_api2::vec::Vec` and
//! friends:
//!
//! ```
//! use pagealloc::{tags, TaggedVec};
//!
//! let mut stack: TaggedVec<u64, tags::GcWorkStack> = TaggedVec::new_in(Default::default());
//! stack.push(42);
//! assert_eq!(stack.pop(), Some(42));
//! ```

use crate::aggregate::AggregateAllocator;
use crate::tag::{AllocationTag, Tag};
use allocator_api2::alloc::{AllocError, Allocator, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

/// `Vec` whose buffer lives in the arena of tag `G`
pub type TaggedVec<T, G> = allocator_api2::vec::Vec<T, ContainerAllocator<T, G>>;

/// Stateless allocator handle for elements of type `T` in the arena of `G`
pub struct ContainerAllocator<T, G: Tag> {
    _marker: PhantomData<fn() -> (T, G)>,
}

impl<T, G: Tag> ContainerAllocator<T, G> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Same arena, different element type
    pub const fn rebind<U>(self) -> ContainerAllocator<U, G> {
        ContainerAllocator::new()
    }

    /// Tag this adapter forwards to
    pub const fn tag(&self) -> AllocationTag {
        G::TAG
    }

    fn arena(&self) -> &'static AggregateAllocator {
        AggregateAllocator::instance(G::TAG)
    }

    /// Allocate zero-filled storage for `n` elements
    ///
    /// Returns `None` when `n * size_of::<T>()` overflows or the arena is
    /// out of pages. Zero-sized requests get a dangling, aligned pointer.
    /// Element types aligned above 16 bytes take a whole page-aligned block
    /// per allocation.
    pub fn allocate(&self, n: usize) -> Option<NonNull<T>> {
        let size = size_of::<T>().checked_mul(n)?;
        if size == 0 {
            return Some(NonNull::dangling());
        }
        self.arena()
            .allocate_aligned(size, align_of::<T>())
            .map(NonNull::cast)
    }

    /// Release storage for `n` elements
    ///
    /// # Safety
    /// `p` must come from [`allocate`](Self::allocate) on an adapter with the
    /// same tag and element type, called with the same `n`.
    pub unsafe fn deallocate(&self, p: NonNull<T>, n: usize) {
        let size = size_of::<T>() * n;
        if size == 0 {
            return;
        }
        self.arena()
            .deallocate_aligned(p.cast(), size, align_of::<T>())
    }

    /// Largest `n` that [`allocate`](Self::allocate) can express
    pub const fn max_size(&self) -> usize {
        match size_of::<T>() {
            0 => usize::MAX,
            size => isize::MAX as usize / size,
        }
    }

    /// Move `value` into uninitialized storage at `p`
    ///
    /// # Safety
    /// `p` must be valid for writes and aligned for `T`.
    pub unsafe fn construct(&self, p: NonNull<T>, value: T) {
        p.as_ptr().write(value)
    }

    /// Drop the value at `p` in place, leaving the storage allocated
    ///
    /// # Safety
    /// `p` must point to an initialized `T` that is not used afterwards.
    pub unsafe fn destroy(&self, p: NonNull<T>) {
        ptr::drop_in_place(p.as_ptr())
    }
}

impl<T, G: Tag> Clone for ContainerAllocator<T, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, G: Tag> Copy for ContainerAllocator<T, G> {}

impl<T, G: Tag> Default for ContainerAllocator<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: Tag> fmt::Debug for ContainerAllocator<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerAllocator")
            .field("tag", &G::TAG)
            .field("element", &std::any::type_name::<T>())
            .finish()
    }
}

/// Adapters with the same tag share one arena, whatever their element type
impl<T, U, G: Tag> PartialEq<ContainerAllocator<U, G>> for ContainerAllocator<T, G> {
    fn eq(&self, _other: &ContainerAllocator<U, G>) -> bool {
        true
    }
}

impl<T, G: Tag> Eq for ContainerAllocator<T, G> {}

// SAFETY: blocks come from the process-wide arena of `G`, which outlives
// every handle, and any copy of the handle frees into that same arena
unsafe impl<T, G: Tag> Allocator for ContainerAllocator<T, G> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(dangling(layout.align()), 0));
        }
        let block = self
            .arena()
            .allocate_aligned(layout.size(), layout.align())
            .ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(block, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        self.arena()
            .deallocate_aligned(ptr, layout.size(), layout.align())
    }
}

/// Non-null pointer aligned to `align`, never dereferenced
fn dangling(align: usize) -> NonNull<u8> {
    // SAFETY: layout alignments are non-zero powers of two
    unsafe { NonNull::new_unchecked(align as *mut u8) }
}
