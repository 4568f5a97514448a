//! Wrap-tolerant sequence comparison.
//!
//! `a` is newer than `b` when it is ahead by at most half the counter range, or
//! behind by more than half (the counter wrapped). Equal values are never newer.

/// Fixed-width unsigned counters that wrap
pub trait SequenceNumber: Copy + Ord {
    /// Half of the counter's range, `MAX / 2`
    const HALF_RANGE: Self;

    fn wrapping_diff(self, other: Self) -> Self;
}

macro_rules! impl_sequence_number {
    ($($ty:ty),*) => {
        $(
            impl SequenceNumber for $ty {
                const HALF_RANGE: Self = <$ty>::MAX / 2;

                #[inline]
                fn wrapping_diff(self, other: Self) -> Self {
                    self.wrapping_sub(other)
                }
            }
        )*
    };
}

impl_sequence_number!(u8, u16, u32, u64);

/// Whether `a` is strictly newer than `b` under the half-range rule
#[inline]
pub fn sequence_greater_than<T: SequenceNumber>(a: T, b: T) -> bool {
    (a > b && a.wrapping_diff(b) <= T::HALF_RANGE) || (a < b && b.wrapping_diff(a) > T::HALF_RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_cases() {
        assert!(sequence_greater_than(5u16, 65_530));
        assert!(!sequence_greater_than(65_530u16, 5));
        assert!(sequence_greater_than(10u16, 5));
        assert!(!sequence_greater_than(5u16, 10));
    }

    #[test]
    fn test_equal_is_not_newer() {
        assert!(!sequence_greater_than(0u16, 0));
        assert!(!sequence_greater_than(u16::MAX, u16::MAX));
    }

    #[test]
    fn test_half_range_boundary() {
        let half = u16::MAX / 2;
        assert!(sequence_greater_than(half, 0));
        assert!(!sequence_greater_than(half + 1, 0));
        assert!(sequence_greater_than(0, half + 1));
    }

    #[test]
    fn test_other_widths() {
        assert!(sequence_greater_than(1u8, 250));
        assert!(sequence_greater_than(3u32, u32::MAX));
        assert!(!sequence_greater_than(u64::MAX, 3));
    }
}
