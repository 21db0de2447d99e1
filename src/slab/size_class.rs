//! Size-class table
//!
//! 53 slot sizes, each a multiple of the slot alignment:
//!
//! ```text
//! index  0..=31   8 ..=  256  step   8
//! index 32..=39 288 ..=  512  step  32
//! index 40..=47 576 ..= 1024  step  64
//! index 48..=52 1280..= 2304  step 256
//! ```
//!
//! Requests above [`LARGE_SIZE`] never reach a size class.

/// Number of size classes in every arena
pub const MAX_ALLOCATORS: usize = 53;

/// Largest request served from slot pages
pub const LARGE_SIZE: usize = index_to_size(MAX_ALLOCATORS - 1);

/// Slot size of every class, by index
pub static SIZE_CLASSES: [usize; MAX_ALLOCATORS] = build_table();

/// Slot size of class `index`
pub const fn index_to_size(index: usize) -> usize {
    if index < 32 {
        (index + 1) * 8
    } else if index < 40 {
        256 + (index - 31) * 32
    } else if index < 48 {
        512 + (index - 39) * 64
    } else {
        1024 + (index - 47) * 256
    }
}

/// Smallest class whose slots hold `size` bytes
///
/// `size` must be at most [`LARGE_SIZE`]; zero maps to the first class.
pub const fn size_to_index(size: usize) -> usize {
    debug_assert!(size <= LARGE_SIZE);
    if size <= 8 {
        0
    } else if size <= 256 {
        (size + 7) / 8 - 1
    } else if size <= 512 {
        32 + (size - 257) / 32
    } else if size <= 1024 {
        40 + (size - 513) / 64
    } else {
        48 + (size - 1025) / 256
    }
}

const fn build_table() -> [usize; MAX_ALLOCATORS] {
    let mut table = [0; MAX_ALLOCATORS];
    let mut i = 0;
    while i < MAX_ALLOCATORS {
        table[i] = index_to_size(i);
        i += 1;
    }
    table
}
