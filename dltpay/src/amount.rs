//! Fixed-precision money amounts.
//!
//! [`Money`] wraps a [`Decimal`] rounded to two decimal places, the precision
//! every checkout, tip and split share is expressed in. Parsing accepts
//! human-entered strings with currency symbols and thousand separators.
//!
//! # Example
//!
//! ```rust
//! use dltpay::amount::Money;
//!
//! let total = Money::parse("£12.50").unwrap();
//! let shares = total.split_even(3).unwrap();
//! assert_eq!(shares.iter().map(ToString::to_string).collect::<Vec<_>>(), ["4.17", "4.17", "4.16"]);
//! ```

use std::fmt;
use std::ops::Sub;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Decimal places carried by every [`Money`] value.
pub const MONEY_SCALE: u32 = 2;

/// Anything that isn't a digit, a dot or a minus sign.
static NON_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));

/// Errors produced while parsing or dividing an amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The input could not be read as a number.
    #[error("Invalid number format")]
    InvalidFormat,
    /// Negative amounts are never valid.
    #[error("Negative value is not allowed")]
    Negative,
    /// The amount must be strictly positive for this operation.
    #[error("Amount must be greater than zero")]
    NotPositive,
    /// The amount is above [`Money::MAX`].
    #[error("Amount exceeds the maximum of {}", Money::MAX)]
    TooLarge,
    /// A split would produce a share of zero or less.
    #[error("Cannot split {amount} into {parts} shares")]
    Indivisible {
        /// The amount being divided.
        amount: Money,
        /// Requested number of shares.
        parts: u16,
    },
}

/// A non-negative monetary amount with two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(Decimal);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest accepted amount, 1,000,000,000.00.
    pub const MAX: Self = Self(Decimal::from_parts(0x4876_E800, 0x17, 0, false, MONEY_SCALE));

    /// Rounds a decimal to money precision (half away from zero).
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Negative`] for values below zero and
    /// [`AmountError::TooLarge`] above [`Money::MAX`].
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative);
        }
        let rounded = round(value);
        if rounded > Self::MAX.0 {
            return Err(AmountError::TooLarge);
        }
        Ok(Self(rounded))
    }

    /// Builds an amount from minor units (pence, cents).
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::TooLarge`] above [`Money::MAX`].
    pub fn from_minor(units: u64) -> Result<Self, AmountError> {
        let units = i64::try_from(units).map_err(|_| AmountError::TooLarge)?;
        Self::from_decimal(Decimal::new(units, MONEY_SCALE))
    }

    /// A whole number of major units (pounds, dollars).
    #[must_use]
    pub const fn from_whole(units: u16) -> Self {
        Self(Decimal::from_parts(units as u32 * 100, 0, 0, false, MONEY_SCALE))
    }

    fn minor_units(self) -> i128 {
        round(self.0).mantissa()
    }

    /// Parses a human-entered amount such as `"£1,250.00"` or `" 3.5 "`.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] if the cleaned string is not a number or is negative.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let cleaned = NON_NUMERIC.replace_all(input, "");
        let parsed = Decimal::from_str(&cleaned).map_err(|_| AmountError::InvalidFormat)?;
        Self::from_decimal(parsed)
    }

    /// The underlying decimal value.
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Whether the amount is strictly greater than zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns `Ok(self)` when positive, for amount-floor checks.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::NotPositive`] for zero.
    pub fn require_positive(self) -> Result<Self, AmountError> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(AmountError::NotPositive)
        }
    }

    /// Addition that fails above [`Money::MAX`].
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::TooLarge`].
    pub fn checked_add(self, other: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(other.0)
            .filter(|sum| *sum <= Self::MAX.0)
            .map(Self)
            .ok_or(AmountError::TooLarge)
    }

    /// Sums `amounts`, failing above [`Money::MAX`].
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::TooLarge`].
    pub fn checked_sum<I>(amounts: I) -> Result<Self, AmountError>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }

    /// Subtraction that fails instead of going negative.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        let diff = self.0 - other.0;
        (!diff.is_sign_negative() || diff.is_zero()).then_some(Self(diff))
    }

    /// Divides the amount into `parts` shares that differ by at most one
    /// minor unit.
    ///
    /// Every share gets `floor(self / parts)`; the leftover minor units go one
    /// each to the leading shares, so the shares sum exactly to `self`.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Indivisible`] if `parts` is zero or the amount
    /// has fewer minor units than `parts`.
    pub fn split_even(self, parts: u16) -> Result<Vec<Self>, AmountError> {
        let units = self.minor_units();
        let count = i128::from(parts);
        if count == 0 || units < count {
            return Err(AmountError::Indivisible {
                amount: self,
                parts,
            });
        }
        let (base, extra) = (units / count, units % count);
        Ok((0..count)
            .map(|i| {
                let share = if i < extra { base + 1 } else { base };
                Self(Decimal::from_i128_with_scale(share, MONEY_SCALE))
            })
            .collect())
    }

    /// Lossy conversion for JSON number fields.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }
}

fn round(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<f64> for Money {
    type Error = AmountError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(AmountError::InvalidFormat)?;
        Self::from_decimal(decimal)
    }
}

impl Sub for Money {
    type Output = Self;

    /// Saturates at zero.
    fn sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or(Self::ZERO)
    }
}

/// Serialized as a JSON number, which is what the payment API expects.
impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

/// Accepts either a JSON number or a numeric string.
impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self::try_from(n).map_err(serde::de::Error::custom),
            Raw::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        Money::parse(s).unwrap()
    }

    #[test]
    fn test_parse_strips_symbols_and_separators() {
        assert_eq!(money("£1,250.5").to_string(), "1250.50");
        assert_eq!(money(" 3 ").to_string(), "3.00");
        assert_eq!(money("0.005").to_string(), "0.01");
    }

    #[test]
    fn test_parse_rejects_garbage_and_negatives() {
        assert_eq!(Money::parse("abc"), Err(AmountError::InvalidFormat));
        assert_eq!(Money::parse("-4"), Err(AmountError::Negative));
    }

    #[test]
    fn test_split_leftover_pennies_go_to_leading_shares() {
        let shares = money("12.50").split_even(3).unwrap();
        assert_eq!(shares, vec![money("4.17"), money("4.17"), money("4.16")]);
        assert_eq!(Money::checked_sum(shares).unwrap(), money("12.50"));
    }

    #[test]
    fn test_split_shares_differ_by_at_most_a_penny() {
        let shares = money("1.49").split_even(100).unwrap();
        assert_eq!(shares.iter().filter(|s| **s == money("0.02")).count(), 49);
        assert_eq!(shares.iter().filter(|s| **s == money("0.01")).count(), 51);
        assert_eq!(shares.iter().max(), Some(&money("0.02")));

        let shares = money("0.10").split_even(6).unwrap();
        assert_eq!(shares.iter().map(ToString::to_string).collect::<Vec<_>>(), [
            "0.02", "0.02", "0.02", "0.02", "0.01", "0.01"
        ]);
    }

    #[test]
    fn test_split_exact_division() {
        let shares = money("10.00").split_even(4).unwrap();
        assert!(shares.iter().all(|s| *s == money("2.50")));
    }

    #[test]
    fn test_split_sums_for_awkward_amounts() {
        for (total, parts) in [("0.10", 3), ("99.99", 7), ("1.00", 100), ("250.01", 9)] {
            let total = money(total);
            let shares = total.split_even(parts).unwrap();
            assert_eq!(shares.len(), usize::from(parts));
            assert_eq!(Money::checked_sum(shares.iter().copied()).unwrap(), total);
            assert!(shares.iter().all(Money::is_positive));
        }
    }

    #[test]
    fn test_split_needs_a_penny_per_share() {
        assert!(money("0.03").split_even(3).is_ok());
        assert!(matches!(
            money("0.02").split_even(3),
            Err(AmountError::Indivisible { parts: 3, .. })
        ));
        assert!(matches!(
            money("5").split_even(0),
            Err(AmountError::Indivisible { parts: 0, .. })
        ));
    }

    #[test]
    fn test_amounts_are_bounded() {
        assert_eq!(Money::MAX.to_string(), "1000000000.00");
        assert_eq!(Money::parse("1000000000.01"), Err(AmountError::TooLarge));
        assert_eq!(Money::from_minor(u64::MAX), Err(AmountError::TooLarge));
        assert_eq!(Money::from_minor(250), Ok(money("2.50")));
        assert_eq!(Money::from_whole(25), money("25.00"));

        assert_eq!(Money::MAX.checked_add(money("0.01")), Err(AmountError::TooLarge));
        assert_eq!(money("1.25").checked_add(money("2.50")), Ok(money("3.75")));
        assert_eq!(
            Money::checked_sum([Money::MAX, money("0.01")]),
            Err(AmountError::TooLarge)
        );
    }

    #[test]
    fn test_require_positive() {
        assert_eq!(Money::ZERO.require_positive(), Err(AmountError::NotPositive));
        assert!(money("0.01").require_positive().is_ok());
    }

    #[test]
    fn test_serde_accepts_numbers_and_strings() {
        let a: Money = serde_json::from_str("4.17").unwrap();
        let b: Money = serde_json::from_str("\"4.17\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "4.17");
    }
}
