//! Slab layer: slot pages and size classes
//!
//! # Architecture
//!
//! ```text
//! SizeClassAllocator(64B)   non_full → [page C] ⇄ [page A]     full: page B
//! SizeClassAllocator(128B)  non_full → [page D]
//! SizeClassAllocator(256B)  non_full → ∅
//!
//! page A: [header | slot | slot | slot | ... ]
//!                    └─free─→ 3 ─→ 7 ─→ NIL
//! ```
//!
//! Each size class owns its pages exclusively. A page is on its class's
//! non-full list exactly while it has a free slot and a live slot; full
//! pages are unlisted and found again through slot addresses.

pub mod allocator;
pub mod page;
pub mod size_class;
pub mod slot;

pub use allocator::{PageSnapshot, SizeClassAllocator, SizeClassStats};
pub use page::{SlotPage, HEADER_SIZE};
pub use size_class::{size_to_index, LARGE_SIZE, MAX_ALLOCATORS, SIZE_CLASSES};
pub use slot::NIL;
