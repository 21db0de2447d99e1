//! Alignment helpers and allocation constants

/// log2 of the slot alignment
pub const LOG_ALLOC_ALIGNMENT: u32 = 3;

/// Every slot stride and every small request is rounded to this many bytes
pub const ALLOC_ALIGNMENT: usize = 1 << LOG_ALLOC_ALIGNMENT;

/// Largest alignment a slot can carry
///
/// Slot regions start at a multiple of this, so a class whose stride is a
/// multiple of it hands out slots aligned to it.
pub const MAX_SLOT_ALIGNMENT: usize = 2 * ALLOC_ALIGNMENT;

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Saturates to the largest aligned value instead of wrapping.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => v & !(align - 1),
        None => usize::MAX & !(align - 1),
    }
}

/// Round `value` down to a multiple of `align` (a power of two).
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}
