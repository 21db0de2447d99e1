// pagealloc - page-backed slot allocator for runtime bookkeeping
// Backs mutator lists, GC work stacks, task queues and similar containers

#![warn(rust_2018_idioms)]

/// Log an invariant violation and abort the process.
///
/// Used where continuing would corrupt the allocator's own memory.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::tracing::error!($($arg)+);
        ::std::process::abort()
    }};
}

pub mod aggregate;
pub mod align;
pub mod config;
pub mod container;
pub mod metrics;
pub mod page_pool;
pub mod slab;
pub mod tag;

// Re-exports for convenience
pub use aggregate::{allocate, deallocate, AggregateAllocator, AggregateStats};
pub use config::PagePoolConfig;
pub use container::{ContainerAllocator, TaggedVec};
pub use page_pool::{CountingPagePool, PagePool, PagePoolStats, SystemPagePool};
pub use slab::{SizeClassAllocator, SizeClassStats, SlotPage};
pub use tag::{tags, AllocationTag, Tag};

/// pagealloc error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Configuration error: {0}")]
        Config(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Parse error: {0}")]
        Parse(#[from] toml::de::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = error::Error::Config("page_size must be a power of two".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: page_size must be a power of two"
        );
    }
}
