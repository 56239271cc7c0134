//! Monetary amounts.
//!
//! An [`Amount`] is a signed count of indivisible units (1e-8 of the
//! canonical coin). Arithmetic is checked: overflow or a result outside the
//! valid range for an output surfaces as `None` rather than wrapping or
//! panicking, since a silently-wrapped amount is a consensus bug waiting to
//! happen.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Maximum money: 21 million coins, each 1e8 units.
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// A signed amount of indivisible currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Constructs an amount from a raw unit count.
    pub const fn from_units(units: i64) -> Self {
        Amount(units)
    }

    pub const fn as_units(self) -> i64 {
        self.0
    }

    /// Returns `true` if this amount is a valid transaction output value:
    /// non-negative and not exceeding [`MAX_MONEY`].
    pub fn is_valid_output_value(self) -> bool {
        self.0 >= 0 && self.0 <= MAX_MONEY
    }

    /// Checked addition; `None` on overflow.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction; `None` on overflow.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Checked multiplication by a scalar; `None` on overflow.
    pub fn checked_mul(self, scalar: i64) -> Option<Amount> {
        self.0.checked_mul(scalar).map(Amount)
    }
}

impl Add for Amount {
    type Output = Option<Amount>;
    fn add(self, rhs: Amount) -> Option<Amount> {
        self.checked_add(rhs)
    }
}

impl Sub for Amount {
    type Output = Option<Amount>;
    fn sub(self, rhs: Amount) -> Option<Amount> {
        self.checked_sub(rhs)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:08}", abs / 100_000_000, abs % 100_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_output_range() {
        assert!(Amount::from_units(0).is_valid_output_value());
        assert!(Amount::from_units(MAX_MONEY).is_valid_output_value());
        assert!(!Amount::from_units(MAX_MONEY + 1).is_valid_output_value());
        assert!(!Amount::from_units(-1).is_valid_output_value());
    }

    #[test]
    fn checked_add_overflows() {
        assert_eq!(Amount::from_units(i64::MAX).checked_add(Amount::from_units(1)), None);
    }

    #[test]
    fn display_formats_whole_and_fractional_part() {
        assert_eq!(Amount::from_units(100_000_000).to_string(), "1.00000000");
        assert_eq!(Amount::from_units(1).to_string(), "0.00000001");
    }
}
