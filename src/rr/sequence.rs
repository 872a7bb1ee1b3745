use std::{cmp::Ordering, ops::Add};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialNumber(u32);

impl SerialNumber {
    pub const ZERO: SerialNumber = SerialNumber(0);

    pub fn get(&self) -> u32 {
        self.0
    }

    /// The next serial in zone-commit order.
    ///
    /// Serial zero is reserved as "unset", so the increment past `u32::MAX`
    /// lands on one rather than zero.
    pub fn next(self) -> SerialNumber {
        if self.0 == u32::MAX {
            SerialNumber(1)
        } else {
            SerialNumber(self.0 + 1)
        }
    }

    /// The serial to commit when a mutation supplies its own SOA serial.
    ///
    /// Takes whichever of `self.next()` and `supplied` is larger in RFC 1982
    /// order, so a supplied serial can skip ahead but never move backwards.
    pub fn advance_to(self, supplied: SerialNumber) -> SerialNumber {
        let bumped = self.next();
        if supplied > bumped { supplied } else { bumped }
    }
}

impl From<u32> for SerialNumber {
    fn from(value: u32) -> Self {
        SerialNumber(value)
    }
}

/// Serial Number Addition, see RFC 1982, section 3.1
///
/// The result is a wrapping add.
impl Add for SerialNumber {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

/// Serial Number Comparison, see RFC 1982, section 3.2
impl PartialOrd for SerialNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        const SERIAL_BITS_HALF: u32 = 1 << (u32::BITS - 1);

        let i1 = self.0;
        let i2 = other.0;

        if i1 == i2 {
            Some(Ordering::Equal)
        } else if (i1 < i2 && (i2 - i1) < SERIAL_BITS_HALF)
            || (i1 > i2 && (i1 - i2) > SERIAL_BITS_HALF)
        {
            Some(Ordering::Less)
        } else if (i1 < i2 && (i2 - i1) > SERIAL_BITS_HALF)
            || (i1 > i2 && (i1 - i2) < SERIAL_BITS_HALF)
        {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}
