//! Page pool wrapper that records every page movement
//!
//! Used to check page lifecycle behavior exactly: how many pages a size class
//! mapped, whether a page came back, and whether anything came back twice.

use super::{PagePool, PagePoolStats, SystemPagePool};
use crate::config::PagePoolConfig;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

#[derive(Debug, Default)]
struct Ledger {
    live_pages: HashSet<usize>,
    live_blocks: HashSet<usize>,
    pages_obtained: usize,
    pages_returned: usize,
    blocks_obtained: usize,
    blocks_returned: usize,
    double_returns: usize,
}

/// Recording wrapper around another pool
pub struct CountingPagePool<P: PagePool = SystemPagePool> {
    inner: P,
    exhausted: AtomicBool,
    ledger: Mutex<Ledger>,
}

impl CountingPagePool<SystemPagePool> {
    /// Counting pool over a fresh, non-caching system pool with 4 KiB pages
    pub fn new() -> Self {
        Self::with_page_size(crate::config::DEFAULT_PAGE_SIZE)
            .unwrap_or_else(|e| fatal!(error = %e, "default page pool config rejected"))
    }

    /// Counting pool over a fresh, non-caching system pool
    pub fn with_page_size(page_size: usize) -> Result<Self> {
        let inner = SystemPagePool::new(PagePoolConfig {
            page_size,
            max_cached_pages: 0,
            max_mapped_bytes: 0,
        })?;
        Ok(Self::wrap(inner))
    }
}

impl Default for CountingPagePool<SystemPagePool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PagePool> CountingPagePool<P> {
    pub fn wrap(inner: P) -> Self {
        Self {
            inner,
            exhausted: AtomicBool::new(false),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Make every subsequent request fail (or succeed again)
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::Release);
    }

    pub fn pages_obtained(&self) -> usize {
        self.ledger.lock().pages_obtained
    }

    pub fn pages_returned(&self) -> usize {
        self.ledger.lock().pages_returned
    }

    /// Pages handed out and not yet returned
    pub fn live_pages(&self) -> usize {
        self.ledger.lock().live_pages.len()
    }

    /// Whether the page at `address` is currently handed out
    pub fn is_live(&self, address: usize) -> bool {
        self.ledger.lock().live_pages.contains(&address)
    }

    pub fn blocks_obtained(&self) -> usize {
        self.ledger.lock().blocks_obtained
    }

    pub fn blocks_returned(&self) -> usize {
        self.ledger.lock().blocks_returned
    }

    /// Returns of pages or blocks that were not handed out at the time
    pub fn double_returns(&self) -> usize {
        self.ledger.lock().double_returns
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }
}

impl<P: PagePool> PagePool for CountingPagePool<P> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn get_page(&self) -> Option<NonNull<u8>> {
        if self.is_exhausted() {
            return None;
        }
        let page = self.inner.get_page()?;

        let mut ledger = self.ledger.lock();
        ledger.pages_obtained += 1;
        ledger.live_pages.insert(page.as_ptr() as usize);
        Some(page)
    }

    fn get_pages(&self, size: usize) -> Option<NonNull<u8>> {
        if self.is_exhausted() {
            return None;
        }
        let block = self.inner.get_pages(size)?;

        let mut ledger = self.ledger.lock();
        ledger.blocks_obtained += 1;
        ledger.live_blocks.insert(block.as_ptr() as usize);
        Some(block)
    }

    unsafe fn return_page(&self, page: NonNull<u8>) {
        {
            let mut ledger = self.ledger.lock();
            if !ledger.live_pages.remove(&(page.as_ptr() as usize)) {
                ledger.double_returns += 1;
                warn!(page = ?page, "Page returned while not handed out");
                return;
            }
            ledger.pages_returned += 1;
        }
        // SAFETY: forwarded caller contract
        unsafe { self.inner.return_page(page) };
    }

    unsafe fn return_pages(&self, block: NonNull<u8>, size: usize) {
        {
            let mut ledger = self.ledger.lock();
            if !ledger.live_blocks.remove(&(block.as_ptr() as usize)) {
                ledger.double_returns += 1;
                warn!(block = ?block, size, "Block returned while not handed out");
                return;
            }
            ledger.blocks_returned += 1;
        }
        // SAFETY: forwarded caller contract
        unsafe { self.inner.return_pages(block, size) };
    }

    fn stats(&self) -> PagePoolStats {
        self.inner.stats()
    }
}
