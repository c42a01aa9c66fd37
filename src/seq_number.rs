use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

/// A position in the 32-bit sequence space. All arithmetic is modulo 2^32, and ordering is only
///  meaningful for numbers that are less than 2^31 apart, which always holds inside a window.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct SeqNum(u32);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    /// strictly before `other` with wrap-around semantics
    pub fn is_before(&self, other: SeqNum) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    pub fn is_at_or_before(&self, other: SeqNum) -> bool {
        !other.is_before(*self)
    }

    pub fn is_after(&self, other: SeqNum) -> bool {
        other.is_before(*self)
    }
}

impl Add<u32> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u32) -> Self::Output {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNum {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

/// distance from `rhs` forward to `self`
impl Sub<SeqNum> for SeqNum {
    type Output = u32;

    fn sub(self, rhs: SeqNum) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::equal(5, 5, false, true)]
    #[case::simple(4, 5, true, true)]
    #[case::simple_reverse(5, 4, false, false)]
    #[case::wrap(u32::MAX, 0, true, true)]
    #[case::wrap_reverse(0, u32::MAX, false, false)]
    #[case::wrap_far(u32::MAX - 10, 20, true, true)]
    #[case::half_space(0, 0x7fff_ffff, true, true)]
    fn test_ordering(#[case] a: u32, #[case] b: u32, #[case] expected_before: bool, #[case] expected_at_or_before: bool) {
        let a = SeqNum::from_raw(a);
        let b = SeqNum::from_raw(b);
        assert_eq!(a.is_before(b), expected_before);
        assert_eq!(a.is_at_or_before(b), expected_at_or_before);
        assert_eq!(b.is_after(a), expected_before);
    }

    #[rstest]
    #[case::simple(3, 4, 7)]
    #[case::wrap(u32::MAX, 1, 0)]
    #[case::wrap_more(u32::MAX - 1, 5, 3)]
    fn test_add_sub(#[case] start: u32, #[case] delta: u32, #[case] expected: u32) {
        let start = SeqNum::from_raw(start);
        let end = start + delta;
        assert_eq!(end, SeqNum::from_raw(expected));
        assert_eq!(end - start, delta);

        let mut s = start;
        s += delta;
        assert_eq!(s, end);
    }
}
