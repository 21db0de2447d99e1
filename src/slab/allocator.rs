//! Size-class allocator
//!
//! Serves one slot size from a list of non-full pages. A page moves
//! between three states:
//!
//! ```text
//! new page ──allocate──→ Partial (listed) ──last slot taken──→ Full (unlisted)
//!                           ↑  │                                   │
//!                           │  └──last slot freed──→ destroyed     │
//!                           └────────────one slot freed────────────┘
//! ```
//!
//! Empty pages go straight back to the pool; nothing is retained.

use super::page::{slot_capacity, SlotPage};
use crate::align::{align_down, align_up, ALLOC_ALIGNMENT};
use crate::metrics::LIVE_PAGES;
use crate::page_pool::PagePool;
use parking_lot::Mutex;
use serde::Serialize;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metric label for allocators not owned by a tagged arena
pub const UNTAGGED: &str = "untagged";

/// State guarded by the size-class mutex
#[derive(Debug, Default)]
struct ClassState {
    /// Head of the non-full page list
    non_full: Option<SlotPage>,
    /// Pages currently mapped, listed or not
    total_pages: u32,
}

impl ClassState {
    /// Push `page` onto the head of the non-full list
    fn list_page(&mut self, page: SlotPage) {
        if let Some(head) = self.non_full {
            head.set_prev(Some(page));
        }
        page.set_prev(None);
        page.set_next(self.non_full);
        self.non_full = Some(page);
    }

    /// Splice `page` out of the non-full list
    fn unlist_page(&mut self, page: SlotPage) {
        let prev = page.prev();
        let next = page.next();

        if self.non_full == Some(page) {
            self.non_full = next;
            if let Some(next) = next {
                next.set_prev(None);
            }
        } else {
            if let Some(prev) = prev {
                prev.set_next(next);
            }
            if let Some(next) = next {
                next.set_prev(prev);
            }
        }

        page.set_prev(None);
        page.set_next(None);
    }

    fn listed(&self) -> ListedPages {
        ListedPages {
            cursor: self.non_full,
        }
    }
}

/// Iterator over the non-full list
struct ListedPages {
    cursor: Option<SlotPage>,
}

impl Iterator for ListedPages {
    type Item = SlotPage;

    fn next(&mut self) -> Option<SlotPage> {
        let page = self.cursor?;
        self.cursor = page.next();
        Some(page)
    }
}

/// Allocator for one slot size
///
/// One mutex covers the page list and every page reachable through it.
pub struct SizeClassAllocator {
    state: Mutex<ClassState>,
    slot_size: u16,
    stride: u16,
    slots_per_page: u16,
    page_size: usize,
    pool: Arc<dyn PagePool>,
    label: &'static str,
}

impl SizeClassAllocator {
    /// Create an allocator for `slot_size`-byte slots
    ///
    /// Aborts if a page from `pool` cannot hold one slot.
    pub fn new(slot_size: u16, pool: Arc<dyn PagePool>) -> Self {
        Self::with_label(slot_size, pool, UNTAGGED)
    }

    /// Create an allocator whose page gauge is reported under `label`
    pub fn with_label(slot_size: u16, pool: Arc<dyn PagePool>, label: &'static str) -> Self {
        let stride = align_up(slot_size as usize, ALLOC_ALIGNMENT);
        let page_size = pool.page_size();
        let slots_per_page = match slot_capacity(page_size, stride) {
            Some(count) => count,
            None => fatal!(
                slot_size,
                page_size,
                "use the wrong allocator! slot size does not fit a page"
            ),
        };

        Self {
            state: Mutex::new(ClassState::default()),
            slot_size,
            stride: stride as u16,
            slots_per_page,
            page_size,
            pool,
            label,
        }
    }

    /// Requested slot size
    pub fn slot_size(&self) -> u16 {
        self.slot_size
    }

    /// Slot size rounded to the slot alignment
    pub fn stride(&self) -> u16 {
        self.stride
    }

    /// Slots in every page of this class
    pub fn slots_per_page(&self) -> u16 {
        self.slots_per_page
    }

    /// Allocate one zero-filled slot
    ///
    /// Returns `None` only when the pool cannot supply a new page.
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        let slot = {
            let mut state = self.state.lock();

            let page = match state.non_full {
                Some(page) => page,
                None => {
                    let page = self.create_page()?;
                    state.list_page(page);
                    state.total_pages += 1;
                    LIVE_PAGES.with_label_values(&[self.label]).inc();
                    debug!(
                        total_pages = state.total_pages,
                        slot_size = self.slot_size,
                        tag = self.label,
                        "Mapped slot page"
                    );
                    page
                }
            };

            let slot = match page.allocate() {
                Some(slot) => slot,
                None => fatal!(
                    page = page.address(),
                    slot_size = self.slot_size,
                    "full page found on the non-full list"
                ),
            };

            if !page.available() {
                state.unlist_page(page);
            }
            slot
        };

        // SAFETY: the slot is ours and spans `stride` bytes of its page
        unsafe { ptr::write_bytes(slot.as_ptr(), 0, self.stride as usize) };
        Some(slot)
    }

    /// Return a slot
    ///
    /// # Safety
    /// `slot` must come from [`allocate`](Self::allocate) on this allocator
    /// and must not have been freed since. Freeing a foreign pointer, a slot
    /// of another size, or the same slot twice corrupts the page; debug
    /// builds catch the first two.
    pub unsafe fn deallocate(&self, slot: NonNull<u8>) {
        let page = SlotPage::from_slot(slot, self.page_size);

        let mut state = self.state.lock();
        debug_assert_eq!(
            page.stride(),
            self.stride,
            "slot {:?} belongs to a {}-byte class, freed through the {}-byte class",
            slot,
            page.stride(),
            self.stride
        );
        debug_assert!(page.owns(slot), "{:?} is not a slot boundary", slot);

        if !page.available() {
            state.list_page(page);
        }

        page.deallocate(slot);

        if page.empty() {
            state.unlist_page(page);
            self.destroy_page(page);
            state.total_pages -= 1;
            LIVE_PAGES.with_label_values(&[self.label]).dec();
            debug!(
                total_pages = state.total_pages,
                slot_size = self.slot_size,
                tag = self.label,
                "Unmapped slot page"
            );
        }
    }

    /// Address of the page holding `slot`
    pub fn page_address(&self, slot: NonNull<u8>) -> usize {
        align_down(slot.as_ptr() as usize, self.page_size)
    }

    /// Snapshot of every page on the non-full list, head first
    pub fn listed_pages(&self) -> Vec<PageSnapshot> {
        let state = self.state.lock();
        state
            .listed()
            .map(|page| PageSnapshot {
                address: page.address(),
                total: page.total(),
                free: page.free(),
            })
            .collect()
    }

    /// Pages currently mapped by this class
    pub fn live_pages(&self) -> u32 {
        self.state.lock().total_pages
    }

    /// Get statistics about this size class
    pub fn stats(&self) -> SizeClassStats {
        let state = self.state.lock();
        let (listed_pages, listed_free_slots) = state
            .listed()
            .fold((0u32, 0u64), |(pages, free), page| {
                (pages + 1, free + page.free() as u64)
            });

        SizeClassStats {
            slot_size: self.slot_size,
            stride: self.stride,
            slots_per_page: self.slots_per_page,
            live_pages: state.total_pages,
            listed_pages,
            listed_free_slots,
        }
    }

    fn create_page(&self) -> Option<SlotPage> {
        let raw = self.pool.get_page()?;
        // SAFETY: the pool hands out page-aligned, page-sized blocks we now own
        Some(unsafe { SlotPage::init(raw, self.page_size, self.stride) })
    }

    fn destroy_page(&self, page: SlotPage) {
        if !page.empty() {
            fatal!(
                page = page.address(),
                total = page.total(),
                free = page.free(),
                "destroy page in use"
            );
        }
        debug!(
            page = page.address(),
            total = page.total(),
            free = page.free(),
            "Destroy page"
        );
        // SAFETY: the page came from this pool and is off every list
        unsafe { self.pool.return_page(page.as_raw()) };
    }
}

impl Drop for SizeClassAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        while let Some(page) = state.non_full {
            state.unlist_page(page);
            if !page.empty() {
                // Callers may still hold slots here; the page stays mapped
                warn!(
                    page = page.address(),
                    live = page.total() - page.free(),
                    slot_size = self.slot_size,
                    "Leaking page with live slots"
                );
                continue;
            }
            // SAFETY: no slot of the page is live and nothing else can reach it
            unsafe { self.pool.return_page(page.as_raw()) };
            state.total_pages -= 1;
            LIVE_PAGES.with_label_values(&[self.label]).dec();
        }
    }
}

/// Point-in-time view of one listed page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageSnapshot {
    pub address: usize,
    pub total: u16,
    pub free: u16,
}

/// Statistics for one size class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeClassStats {
    pub slot_size: u16,
    pub stride: u16,
    pub slots_per_page: u16,
    /// Mapped pages, listed or full
    pub live_pages: u32,
    /// Pages with spare slots
    pub listed_pages: u32,
    /// Free slots across listed pages
    pub listed_free_slots: u64,
}

impl SizeClassStats {
    /// Slots handed out and not yet returned
    pub fn live_slots(&self) -> u64 {
        self.live_pages as u64 * self.slots_per_page as u64 - self.listed_free_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_pool::CountingPagePool;
    use crate::slab::page::HEADER_SIZE;

    fn counting() -> Arc<CountingPagePool> {
        Arc::new(CountingPagePool::new())
    }

    #[test]
    fn test_capacity_for_64_byte_slots() {
        let pool = counting();
        let allocator = SizeClassAllocator::new(64, pool.clone());
        assert_eq!(allocator.slots_per_page() as usize, (4096 - HEADER_SIZE) / 64);
    }

    #[test]
    fn test_stride_rounds_slot_size() {
        let allocator = SizeClassAllocator::new(60, counting());
        assert_eq!(allocator.slot_size(), 60);
        assert_eq!(allocator.stride(), 64);
    }

    #[test]
    fn test_total_plus_one_allocations_map_two_pages() {
        let pool = counting();
        let allocator = SizeClassAllocator::new(64, pool.clone());
        let total = allocator.slots_per_page() as usize;

        let slots: Vec<_> = (0..=total).map(|_| allocator.allocate().unwrap()).collect();
        assert_eq!(pool.pages_obtained(), 2);
        assert_eq!(allocator.live_pages(), 2);

        // First page is full and unlisted, second holds one slot
        let listed = allocator.listed_pages();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].free as usize, total - 1);

        for slot in slots {
            unsafe { allocator.deallocate(slot) };
        }
        assert_eq!(pool.pages_returned(), 2);
        assert_eq!(allocator.live_pages(), 0);
    }

    #[test]
    fn test_reused_slot_is_zeroed() {
        let allocator = SizeClassAllocator::new(48, counting());

        // Keep the page alive so the freed slot is handed out again
        let keep = allocator.allocate().unwrap();
        let slot = allocator.allocate().unwrap();
        unsafe {
            ptr::write_bytes(slot.as_ptr(), 0xAB, 48);
            allocator.deallocate(slot);
        }

        let again = allocator.allocate().unwrap();
        assert_eq!(again, slot);
        let bytes = unsafe { std::slice::from_raw_parts(again.as_ptr(), 48) };
        assert!(bytes.iter().all(|&b| b == 0));

        unsafe {
            allocator.deallocate(keep);
            allocator.deallocate(again);
        }
    }

    #[test]
    fn test_full_page_relisted_on_free() {
        let pool = counting();
        let allocator = SizeClassAllocator::new(1024, pool.clone());
        let total = allocator.slots_per_page() as usize;

        let slots: Vec<_> = (0..total).map(|_| allocator.allocate().unwrap()).collect();
        assert!(allocator.listed_pages().is_empty());
        assert_eq!(allocator.live_pages(), 1);

        unsafe { allocator.deallocate(slots[0]) };
        let listed = allocator.listed_pages();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].address, allocator.page_address(slots[0]));
        assert_eq!(listed[0].free, 1);

        for &slot in &slots[1..] {
            unsafe { allocator.deallocate(slot) };
        }
        assert!(allocator.listed_pages().is_empty());
        assert_eq!(pool.pages_returned(), 1);
        assert!(!pool.is_live(allocator.page_address(slots[0])));
    }

    #[test]
    fn test_unlist_middle_page() {
        let pool = counting();
        let allocator = SizeClassAllocator::new(2048, pool.clone());
        assert_eq!(allocator.slots_per_page(), 1);

        // One slot per page: every page is full right away
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        let c = allocator.allocate().unwrap();
        assert_eq!(pool.pages_obtained(), 3);
        assert!(allocator.listed_pages().is_empty());

        unsafe { allocator.deallocate(b) };
        assert_eq!(pool.pages_returned(), 1);
        assert_eq!(allocator.live_pages(), 2);

        unsafe {
            allocator.deallocate(a);
            allocator.deallocate(c);
        }
        assert_eq!(pool.pages_returned(), 3);
        assert_eq!(pool.double_returns(), 0);
    }

    #[test]
    fn test_list_splice_keeps_order() {
        let pool = counting();
        let allocator = SizeClassAllocator::new(1024, pool.clone());
        let per_page = allocator.slots_per_page() as usize;

        // Three full pages
        let slots: Vec<_> = (0..per_page * 3).map(|_| allocator.allocate().unwrap()).collect();
        let pages: Vec<_> = slots.chunks(per_page).map(|c| allocator.page_address(c[0])).collect();

        // Relist them in order 0, 1, 2: list is now 2, 1, 0
        for chunk in slots.chunks(per_page) {
            unsafe { allocator.deallocate(chunk[0]) };
        }
        let listed: Vec<_> = allocator.listed_pages().iter().map(|p| p.address).collect();
        assert_eq!(listed, vec![pages[2], pages[1], pages[0]]);

        // Empty the middle page
        for &slot in &slots[per_page + 1..per_page * 2] {
            unsafe { allocator.deallocate(slot) };
        }
        let listed: Vec<_> = allocator.listed_pages().iter().map(|p| p.address).collect();
        assert_eq!(listed, vec![pages[2], pages[0]]);

        let stats = allocator.stats();
        assert_eq!(stats.live_pages, 2);
        assert_eq!(stats.listed_pages, 2);
        assert_eq!(stats.live_slots(), 2 * (per_page as u64 - 1));
    }

    #[test]
    fn test_pool_exhaustion_returns_none() {
        let pool = counting();
        let allocator = SizeClassAllocator::new(16, pool.clone());

        pool.set_exhausted(true);
        assert!(allocator.allocate().is_none());
        assert_eq!(allocator.live_pages(), 0);

        pool.set_exhausted(false);
        let slot = allocator.allocate().unwrap();
        unsafe { allocator.deallocate(slot) };
    }

    #[test]
    fn test_drop_leaks_pages_with_live_slots() {
        let pool = counting();
        let live = {
            let allocator = SizeClassAllocator::new(64, pool.clone());
            let live = allocator.allocate().unwrap();
            unsafe { live.as_ptr().write(0x5A) };
            live
        };
        assert_eq!(pool.pages_obtained(), 1);
        assert_eq!(pool.pages_returned(), 0);
        assert!(pool.is_live(live.as_ptr() as usize & !(4096 - 1)));

        // A new allocator over the same pool never hands out the live slot
        let next = SizeClassAllocator::new(64, pool.clone());
        let fresh = next.allocate().unwrap();
        assert_ne!(fresh, live);
        assert_eq!(unsafe { live.as_ptr().read() }, 0x5A);
        unsafe { next.deallocate(fresh) };
    }

    #[test]
    fn test_drop_leaks_page_over_caching_pool() {
        let pool: Arc<dyn PagePool> = Arc::new(
            crate::page_pool::SystemPagePool::new(crate::config::PagePoolConfig {
                max_cached_pages: 4,
                ..Default::default()
            })
            .unwrap(),
        );
        let live = {
            let allocator = SizeClassAllocator::new(64, Arc::clone(&pool));
            let live = allocator.allocate().unwrap();
            unsafe { live.as_ptr().write(0x5A) };
            live
        };
        assert_eq!(pool.stats().cached_pages, 0);

        let next = SizeClassAllocator::new(64, Arc::clone(&pool));
        let fresh = next.allocate().unwrap();
        assert_ne!(fresh, live);
        assert_eq!(unsafe { live.as_ptr().read() }, 0x5A);
        unsafe { next.deallocate(fresh) };
    }
}
