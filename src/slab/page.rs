//! Slot pages
//!
//! A slot page is one page from the pool with a small header at offset 0
//! and equal-sized slots after it:
//!
//! ```text
//! ┌────────────┬────────┬────────┬─────┬────────┬──────┐
//! │ PageHeader │ slot 0 │ slot 1 │ ... │ slot N │ tail │
//! └────────────┴────────┴────────┴─────┴────────┴──────┘
//! ^ page-aligned          free slots hold the index of the next free slot
//! ```
//!
//! Because pages are page-aligned, the page that owns a slot is found by
//! rounding the slot address down to the page size.

use super::slot::{Slot, NIL};
use crate::align::{align_down, align_up, MAX_SLOT_ALIGNMENT};
use std::mem::size_of;
use std::ptr::NonNull;
use tracing::trace;

/// Page bookkeeping, stored at the start of the page
#[repr(C)]
#[derive(Debug)]
struct PageHeader {
    prev: Option<SlotPage>,
    next: Option<SlotPage>,
    /// First free slot index, or [`NIL`]
    free_head: u16,
    total: u16,
    free: u16,
    /// Distance between consecutive slots
    stride: u16,
}

/// Offset of slot 0 from the page start
pub const HEADER_SIZE: usize = align_up(size_of::<PageHeader>(), MAX_SLOT_ALIGNMENT);

/// Number of `stride`-byte slots a `page_size` page holds
///
/// `None` when not even one slot fits.
pub const fn slot_capacity(page_size: usize, stride: usize) -> Option<u16> {
    if stride == 0 || page_size <= HEADER_SIZE {
        return None;
    }
    let count = (page_size - HEADER_SIZE) / stride;
    if count == 0 {
        return None;
    }
    // Indices 0..count stay below NIL
    Some(if count > NIL as usize { NIL } else { count as u16 })
}

/// Handle to an initialized slot page
///
/// Handles are plain pointers. The owning size class only uses them while
/// holding its lock, which is what makes the mutation below sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPage {
    base: NonNull<PageHeader>,
}

// SAFETY: a page belongs to exactly one size class and is only accessed
// under that class's mutex
unsafe impl Send for SlotPage {}

impl SlotPage {
    /// Format a raw page: write the header and thread every slot onto the
    /// free list in address order.
    ///
    /// Aborts when the page cannot hold a single slot.
    ///
    /// # Safety
    /// `raw` must point to `page_size` writable bytes, aligned to
    /// `page_size`, owned by the caller.
    pub unsafe fn init(raw: NonNull<u8>, page_size: usize, stride: u16) -> SlotPage {
        let total = match slot_capacity(page_size, stride as usize) {
            Some(total) => total,
            None => fatal!(
                stride,
                page_size,
                "use the wrong allocator! slot size does not fit a page"
            ),
        };

        let first = raw.as_ptr().add(HEADER_SIZE);
        for index in 0..total {
            let next = if index + 1 < total { index + 1 } else { NIL };
            first
                .add(index as usize * stride as usize)
                .cast::<Slot>()
                .write(Slot::new(next));
        }

        let base = raw.cast::<PageHeader>();
        base.as_ptr().write(PageHeader {
            prev: None,
            next: None,
            free_head: 0,
            total,
            free: total,
            stride,
        });

        trace!(
            page = ?raw,
            total,
            stride,
            header = HEADER_SIZE,
            "Initialized slot page"
        );
        SlotPage { base }
    }

    /// Page that owns `slot`
    ///
    /// # Safety
    /// `slot` must lie inside an initialized page of `page_size` bytes.
    pub unsafe fn from_slot(slot: NonNull<u8>, page_size: usize) -> SlotPage {
        let addr = slot.as_ptr() as usize;
        let offset = addr - align_down(addr, page_size);
        let base = slot.as_ptr().sub(offset).cast::<PageHeader>();
        SlotPage {
            base: NonNull::new_unchecked(base),
        }
    }

    #[inline]
    fn header(&self) -> &PageHeader {
        // SAFETY: handles only exist for initialized pages
        unsafe { self.base.as_ref() }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn header_mut(&self) -> &mut PageHeader {
        // SAFETY: handles only exist for initialized pages, and the owning
        // size class serializes every access
        unsafe { &mut *self.base.as_ptr() }
    }

    #[inline]
    fn slot_at(&self, index: u16) -> NonNull<u8> {
        let offset = HEADER_SIZE + index as usize * self.header().stride as usize;
        // SAFETY: index < total keeps the slot inside the page
        unsafe { NonNull::new_unchecked(self.base.cast::<u8>().as_ptr().add(offset)) }
    }

    #[inline]
    fn index_of(&self, slot: NonNull<u8>) -> u16 {
        let offset = slot.as_ptr() as usize - self.address() - HEADER_SIZE;
        (offset / self.header().stride as usize) as u16
    }

    /// Pop a free slot, or `None` if the page is full
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        let index = self.header().free_head;
        if index == NIL {
            return None;
        }

        let slot = self.slot_at(index);
        // SAFETY: `slot` is a free slot of this page, so it holds a `Slot`
        let next = unsafe { slot.cast::<Slot>().as_ptr().read() }.next;

        let header = self.header_mut();
        header.free_head = next;
        header.free -= 1;
        Some(slot)
    }

    /// Push `slot` back onto the free list
    ///
    /// # Safety
    /// `slot` must have been returned by [`allocate`](Self::allocate) on this
    /// page and not freed since.
    pub unsafe fn deallocate(&self, slot: NonNull<u8>) {
        let index = self.index_of(slot);
        slot.cast::<Slot>()
            .as_ptr()
            .write(Slot::new(self.header().free_head));

        let header = self.header_mut();
        header.free_head = index;
        header.free += 1;
    }

    /// At least one slot is free
    #[inline]
    pub fn available(&self) -> bool {
        self.header().free != 0
    }

    /// Every slot is free
    #[inline]
    pub fn empty(&self) -> bool {
        let header = self.header();
        header.free == header.total
    }

    pub fn total(&self) -> u16 {
        self.header().total
    }

    pub fn free(&self) -> u16 {
        self.header().free
    }

    pub fn stride(&self) -> u16 {
        self.header().stride
    }

    /// Start address of the page
    pub fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Raw page pointer, for returning the page to its pool
    pub fn as_raw(&self) -> NonNull<u8> {
        self.base.cast()
    }

    /// `slot` sits on a slot boundary inside this page's slot region
    pub fn owns(&self, slot: NonNull<u8>) -> bool {
        let addr = slot.as_ptr() as usize;
        let start = self.address() + HEADER_SIZE;
        let stride = self.stride() as usize;
        addr >= start && (addr - start) % stride == 0 && (addr - start) / stride < self.total() as usize
    }

    pub(super) fn prev(&self) -> Option<SlotPage> {
        self.header().prev
    }

    pub(super) fn next(&self) -> Option<SlotPage> {
        self.header().next
    }

    pub(super) fn set_prev(&self, prev: Option<SlotPage>) {
        self.header_mut().prev = prev;
    }

    pub(super) fn set_next(&self, next: Option<SlotPage>) {
        self.header_mut().next = next;
    }
}
