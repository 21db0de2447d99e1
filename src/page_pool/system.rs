//! Page pool backed by the global system allocator

use super::{PagePool, PagePoolStats};
use crate::config::PagePoolConfig;
use crate::error::Result;
use crate::metrics::POOL_MAPPED_BYTES;
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static::lazy_static! {
    static ref GLOBAL_POOL: Arc<SystemPagePool> = Arc::new(SystemPagePool::from_env());
}

/// A returned page parked in the cache
struct CachedPage(NonNull<u8>);

// SAFETY: cached pages are owned by the pool and only touched under its lock
unsafe impl Send for CachedPage {}

/// Thread-safe pool of page-aligned blocks
///
/// Returned single pages are kept (LIFO) up to `max_cached_pages` so that a
/// size class oscillating around a page boundary does not hit the system
/// allocator every time.
pub struct SystemPagePool {
    config: PagePoolConfig,
    page_layout: Layout,
    cache: Mutex<Vec<CachedPage>>,
    mapped_bytes: AtomicUsize,
    pages_out: AtomicU64,
    pages_returned: AtomicU64,
    large_blocks_out: AtomicU64,
    large_blocks_returned: AtomicU64,
}

impl SystemPagePool {
    /// Create a pool from a validated configuration
    pub fn new(config: PagePoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Process-wide pool shared by every tagged arena
    ///
    /// Configured from the environment on first use.
    pub fn global() -> Arc<SystemPagePool> {
        Arc::clone(&GLOBAL_POOL)
    }

    fn from_env() -> Self {
        let config = PagePoolConfig::from_env();
        match config.validate() {
            Ok(()) => Self::build(config),
            Err(e) => {
                warn!(error = %e, "Invalid page pool configuration, using defaults");
                Self::build(PagePoolConfig::default())
            }
        }
    }

    fn build(config: PagePoolConfig) -> Self {
        let page_layout = Layout::from_size_align(config.page_size, config.page_size)
            .unwrap_or_else(|e| fatal!(error = %e, page_size = config.page_size, "bad page layout"));

        info!(
            page_size = config.page_size,
            max_cached_pages = config.max_cached_pages,
            max_mapped_bytes = config.max_mapped_bytes,
            "Page pool initialized"
        );

        Self {
            cache: Mutex::new(Vec::with_capacity(config.max_cached_pages)),
            config,
            page_layout,
            mapped_bytes: AtomicUsize::new(0),
            pages_out: AtomicU64::new(0),
            pages_returned: AtomicU64::new(0),
            large_blocks_out: AtomicU64::new(0),
            large_blocks_returned: AtomicU64::new(0),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &PagePoolConfig {
        &self.config
    }

    /// Account for `bytes` more mapped memory, honoring the ceiling
    fn reserve(&self, bytes: usize) -> bool {
        let limit = self.config.max_mapped_bytes;
        let reserved = self
            .mapped_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |mapped| {
                let next = mapped.checked_add(bytes)?;
                (limit == 0 || next <= limit).then_some(next)
            })
            .is_ok();

        if reserved {
            POOL_MAPPED_BYTES.add(bytes as i64);
        } else {
            warn!(
                requested = bytes,
                mapped = self.mapped_bytes.load(Ordering::Relaxed),
                limit,
                "Page pool exhausted"
            );
        }
        reserved
    }

    fn release(&self, bytes: usize) {
        self.mapped_bytes.fetch_sub(bytes, Ordering::AcqRel);
        POOL_MAPPED_BYTES.sub(bytes as i64);
    }

    /// Layout of a block holding `size` bytes, rounded to whole pages
    fn block_layout(&self, size: usize) -> Option<Layout> {
        let page_size = self.config.page_size;
        let bytes = size.max(1).checked_add(page_size - 1)? & !(page_size - 1);
        Layout::from_size_align(bytes, page_size).ok()
    }
}

impl PagePool for SystemPagePool {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn get_page(&self) -> Option<NonNull<u8>> {
        if let Some(CachedPage(page)) = self.cache.lock().pop() {
            self.pages_out.fetch_add(1, Ordering::Relaxed);
            return Some(page);
        }

        if !self.reserve(self.page_layout.size()) {
            return None;
        }

        // SAFETY: the page layout has a non-zero size
        match NonNull::new(unsafe { alloc::alloc(self.page_layout) }) {
            Some(page) => {
                self.pages_out.fetch_add(1, Ordering::Relaxed);
                Some(page)
            }
            None => {
                self.release(self.page_layout.size());
                warn!(page_size = self.config.page_size, "System allocator refused a page");
                None
            }
        }
    }

    fn get_pages(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = self.block_layout(size)?;
        if !self.reserve(layout.size()) {
            return None;
        }

        // SAFETY: block layouts always cover at least one page
        match NonNull::new(unsafe { alloc::alloc_zeroed(layout) }) {
            Some(block) => {
                self.large_blocks_out.fetch_add(1, Ordering::Relaxed);
                debug!(size, mapped = layout.size(), "Mapped large block");
                Some(block)
            }
            None => {
                self.release(layout.size());
                warn!(size, "System allocator refused a large block");
                None
            }
        }
    }

    unsafe fn return_page(&self, page: NonNull<u8>) {
        self.pages_returned.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.cache.lock();
        if cache.len() < self.config.max_cached_pages {
            cache.push(CachedPage(page));
            return;
        }
        drop(cache);

        // SAFETY: the caller hands back a page obtained with `page_layout`
        unsafe { alloc::dealloc(page.as_ptr(), self.page_layout) };
        self.release(self.page_layout.size());
    }

    unsafe fn return_pages(&self, block: NonNull<u8>, size: usize) {
        let layout = self
            .block_layout(size)
            .unwrap_or_else(|| fatal!(size, "returned block has an impossible size"));

        // SAFETY: the caller hands back a block obtained with the same size
        unsafe { alloc::dealloc(block.as_ptr(), layout) };
        self.release(layout.size());
        self.large_blocks_returned.fetch_add(1, Ordering::Relaxed);
        debug!(size, unmapped = layout.size(), "Unmapped large block");
    }

    fn stats(&self) -> PagePoolStats {
        PagePoolStats {
            page_size: self.config.page_size,
            pages_out: self.pages_out.load(Ordering::Relaxed),
            pages_returned: self.pages_returned.load(Ordering::Relaxed),
            cached_pages: self.cache.lock().len(),
            large_blocks_out: self.large_blocks_out.load(Ordering::Relaxed),
            large_blocks_returned: self.large_blocks_returned.load(Ordering::Relaxed),
            mapped_bytes: self.mapped_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SystemPagePool {
    fn drop(&mut self) {
        let cached = std::mem::take(self.cache.get_mut());
        for CachedPage(page) in cached {
            // SAFETY: cached pages were allocated with `page_layout`
            unsafe { alloc::dealloc(page.as_ptr(), self.page_layout) };
            self.release(self.page_layout.size());
        }
    }
}
