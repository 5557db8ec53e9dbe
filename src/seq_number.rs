// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Sequence numbers live in a 32-bit space that wraps around, so all arithmetic
// on them is performed modulo 2^32 (RFC 793, Section 3.3). Excluding equality,
// comparisons between sequence numbers are non-transitive: for distinct a, b,
// c one can have a < b < c < a. To keep that subtlety from leaking into code
// that assumes integers behave, sequence numbers get their own type with only
// the operations that are actually meaningful for them.

use std::{
    cmp::Ordering,
    convert::From,
    fmt,
};

// Stored as an unsigned 32-bit integer. Cloning, copying, and equality behave
// as for u32; everything else is restricted to what we define below.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SeqNumber {
    value: u32,
}

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(item: SeqNumber) -> u32 {
        item.value
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(item: u32) -> Self {
        SeqNumber { value: item }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl std::ops::Add for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: SeqNumber) -> SeqNumber {
        (self.value.wrapping_add(other.value)).into()
    }
}

impl std::ops::Sub for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, other: SeqNumber) -> SeqNumber {
        (self.value.wrapping_sub(other.value)).into()
    }
}

// We implement PartialOrd to get the "<", "<=", ">", and ">=" operators, but
// sequence numbers are not actually a partially ordered set because of the
// wraparound. The individual comparison operators below use the signed
// distance between the two values, which is the standard wraparound-safe
// test. partial_cmp itself would hand callers a totally ordered view that
// does not exist, so it panics rather than quietly mislead.
impl std::cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, _other: &Self) -> Option<Ordering> {
        panic!("sequence numbers cannot be totally ordered; use the comparison operators");
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) < 0
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) <= 0
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) > 0
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) >= 0
    }
}

// Note that we specifically don't implement Ord: there is no max or min
// sequence number, and three or more of them cannot be sorted uniquely.

#[cfg(test)]
mod tests {
    use super::SeqNumber;
    use ::anyhow::Result;

    // Basic comparisons between sequence numbers of various values.
    #[test]
    fn comparison() -> Result<()> {
        let s0: SeqNumber = SeqNumber::from(0);
        let s1: SeqNumber = SeqNumber::from(1);
        let s2: SeqNumber = SeqNumber::from(0x2000_0000);
        let s3: SeqNumber = SeqNumber::from(0x7fff_ffff);
        let s4: SeqNumber = SeqNumber::from(0x8000_0000);
        let s5: SeqNumber = SeqNumber::from(0x8000_0001);
        let s6: SeqNumber = SeqNumber::from(0xffff_ffff);

        crate::ensure_eq!(s0, s0);
        crate::ensure_neq!(s0, s1);
        crate::ensure_neq!(s0, s6);

        crate::ensure_eq!(!(s0 < s0), true);
        crate::ensure_eq!(!(s0 > s0), true);

        crate::ensure_eq!(s0 < s1, true);
        crate::ensure_eq!(s0 < s2, true);
        crate::ensure_eq!(s0 < s3, true);
        crate::ensure_eq!(s0 < s4, true);
        crate::ensure_eq!(s0 > s5, true);
        crate::ensure_eq!(s0 > s6, true);

        Ok(())
    }

    // Comparison and addition handle wrap around properly.
    #[test]
    fn wrap_around() -> Result<()> {
        let zero: SeqNumber = SeqNumber::from(0);
        let one: SeqNumber = SeqNumber::from(1);
        let big: SeqNumber = SeqNumber::from(0xffff_ffff);
        let half: SeqNumber = SeqNumber::from(0x8000_0000);

        crate::ensure_neq!(zero, big);
        crate::ensure_eq!(big + one, zero);
        crate::ensure_eq!(zero - one, big);

        // A sample of points across the space, including both sides of the
        // wrap, keeps their expected relative order.
        for number in [0u32, 1, 77, 0x3fff_fff0, 0x7fff_ffff, 0xffff_fff0, 0xffff_ffff] {
            let current: SeqNumber = SeqNumber::from(number);
            let next: SeqNumber = current + one;
            crate::ensure_eq!(current < next, true);
            crate::ensure_eq!(current < current + half, true);
            crate::ensure_eq!(current > next + half, true);
        }

        Ok(())
    }
}
