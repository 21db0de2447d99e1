//! Free-slot node

/// Index meaning "no slot"
pub const NIL: u16 = u16::MAX;

/// Metadata stored in the first bytes of a free slot
///
/// Links are slot indices within the page, not addresses, so a free slot
/// carries two bytes of bookkeeping and an occupied slot carries none.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    /// Index of the next free slot in the same page, or [`NIL`]
    pub next: u16,
}

impl Slot {
    pub const fn new(next: u16) -> Self {
        Self { next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::ALLOC_ALIGNMENT;

    #[test]
    fn test_slot_fits_smallest_stride() {
        assert!(std::mem::size_of::<Slot>() <= ALLOC_ALIGNMENT);
        assert!(std::mem::align_of::<Slot>() <= ALLOC_ALIGNMENT);
    }
}
