//! Page pool configuration
//!
//! Values come from, in order of preference, an explicit TOML file, the
//! `PAGEALLOC_*` environment variables, or the built-in defaults.

use crate::error::{Error, Result};
use crate::slab::page::HEADER_SIZE;
use crate::slab::size_class::LARGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default page size (bytes)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page that still holds one slot of the largest size class
pub const MIN_PAGE_SIZE: usize = 4096;

/// Largest page whose slot indices fit the 16-bit page counters
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Page pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagePoolConfig {
    /// Size and alignment of every page handed to a size class
    pub page_size: usize,
    /// Returned single pages kept for reuse instead of being unmapped
    pub max_cached_pages: usize,
    /// Ceiling on bytes mapped by the pool (0 = unlimited)
    pub max_mapped_bytes: usize,
}

impl Default for PagePoolConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_cached_pages: 64,
            max_mapped_bytes: 0,
        }
    }
}

impl PagePoolConfig {
    /// Configuration from `PAGEALLOC_*` environment variables
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let page_size = std::env::var("PAGEALLOC_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.page_size);

        let max_cached_pages = std::env::var("PAGEALLOC_MAX_CACHED_PAGES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_cached_pages);

        let max_mapped_bytes = std::env::var("PAGEALLOC_MAX_MAPPED_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_mapped_bytes);

        Self {
            page_size,
            max_cached_pages,
            max_mapped_bytes,
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check that every size class fits at least one slot per page
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "page_size {} is not a power of two",
                self.page_size
            )));
        }

        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page_size {} outside [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        debug_assert!(self.page_size - HEADER_SIZE >= LARGE_SIZE);

        if self.max_mapped_bytes != 0 && self.max_mapped_bytes < self.page_size {
            return Err(Error::Config(format!(
                "max_mapped_bytes {} is smaller than one page",
                self.max_mapped_bytes
            )));
        }

        Ok(())
    }
}
