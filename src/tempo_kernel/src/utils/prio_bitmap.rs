//! Provides `PrioBitmap`, a bit array with a constant-time "find the highest
//! set bit" operation, sized for one bit per thread priority level.

/// The number of bits in [`PrioBitmap`].
pub(crate) const PRIO_BITMAP_LEN: usize = u64::BITS as usize;

/// A bit array structure supporting constant-time bit scan operations.
///
/// All methods panic when the given bit position is out of range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PrioBitmap {
    bits: u64,
}

impl PrioBitmap {
    pub(crate) const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Get the bit at the specified position.
    #[cfg(test)]
    pub(crate) fn get(&self, i: usize) -> bool {
        assert!(i < PRIO_BITMAP_LEN);
        (self.bits & (1 << i)) != 0
    }

    /// Clear the bit at the specified position.
    pub(crate) fn clear(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits &= !(1 << i);
    }

    /// Set the bit at the specified position.
    pub(crate) fn set(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits |= 1 << i;
    }

    /// Get the position of the most significant set bit.
    pub(crate) fn find_highest_set(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some(PRIO_BITMAP_LEN - 1 - self.bits.leading_zeros() as usize)
        }
    }
}
