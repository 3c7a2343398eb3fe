//! # Amounts
//!
//! Money is counted in cents, in a `u64`, and nothing else. Floats never
//! touch a balance. The decimal point only exists when an amount is rendered
//! for the wire (`NNN.NN`) or typed in by a human.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{CENTS_PER_UNIT, MAX_TOKEN_VALUE_CENTS, MIN_TOKEN_VALUE_CENTS, VALUE_DECIMALS};

/// Why a string could not be read as an amount.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("malformed amount {0:?}: expected digits with at most two decimals")]
    Malformed(String),

    #[error("amount {0:?} does not fit in the canonical NNN.NN form")]
    NotCanonical(String),

    #[error("amount overflow")]
    Overflow,
}

/// A non-negative amount of money in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// The smallest value a token may carry (0.01).
    pub const MIN_TOKEN: Amount = Amount(MIN_TOKEN_VALUE_CENTS);

    /// The largest value a token may carry (999.99).
    pub const MAX_TOKEN: Amount = Amount(MAX_TOKEN_VALUE_CENTS);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether a single token may carry this amount.
    pub fn is_token_value(self) -> bool {
        (MIN_TOKEN_VALUE_CENTS..=MAX_TOKEN_VALUE_CENTS).contains(&self.0)
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    /// Add up amounts, failing on overflow instead of wrapping.
    pub fn checked_sum<I>(amounts: I) -> Option<Amount>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }

    /// Render in the wire form: at least three integer digits, exactly two
    /// decimals. `2.5` becomes `002.50`.
    pub fn to_canonical(self) -> String {
        format!("{:03}.{:02}", self.0 / CENTS_PER_UNIT, self.0 % CENTS_PER_UNIT)
    }

    /// Parse the wire form.
    ///
    /// Three integer digits and two decimals (`002.50`). Larger sums may use
    /// more integer digits, but never with a redundant leading zero, so every
    /// amount has exactly one canonical spelling.
    pub fn parse_canonical(s: &str) -> Result<Amount, AmountError> {
        let (int_part, frac_part) = s
            .split_once('.')
            .ok_or_else(|| AmountError::NotCanonical(s.to_string()))?;

        let digits_only = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if !digits_only(int_part)
            || !digits_only(frac_part)
            || int_part.len() < 3
            || frac_part.len() != VALUE_DECIMALS as usize
            || (int_part.len() > 3 && int_part.starts_with('0'))
        {
            return Err(AmountError::NotCanonical(s.to_string()));
        }

        Self::from_parts(int_part, frac_part, s)
    }

    /// Parse whatever a human types: `2`, `2.5`, `0.25`, `002.50`.
    ///
    /// More than two decimals is an error rather than a silent rounding.
    pub fn parse_lenient(s: &str) -> Result<Amount, AmountError> {
        let s = s.trim();
        if s.is_empty() || s == "." {
            return Err(AmountError::Malformed(s.to_string()));
        }
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        let int_part = if int_part.is_empty() { "0" } else { int_part };

        let digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if !digits(int_part)
            || !digits(frac_part)
            || frac_part.len() > VALUE_DECIMALS as usize
        {
            return Err(AmountError::Malformed(s.to_string()));
        }

        let mut padded = frac_part.to_string();
        while padded.len() < VALUE_DECIMALS as usize {
            padded.push('0');
        }
        Self::from_parts(int_part, &padded, s)
    }

    fn from_parts(int_part: &str, frac_part: &str, original: &str) -> Result<Amount, AmountError> {
        let units: u64 = int_part
            .parse()
            .map_err(|_| AmountError::Malformed(original.to_string()))?;
        let cents: u64 = frac_part
            .parse()
            .map_err(|_| AmountError::Malformed(original.to_string()))?;
        units
            .checked_mul(CENTS_PER_UNIT)
            .and_then(|c| c.checked_add(cents))
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / CENTS_PER_UNIT, self.0 % CENTS_PER_UNIT)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse_lenient(s)
    }
}

impl Sum for Amount {
    /// Saturating sum. Use [`Amount::checked_sum`] where overflow matters.
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        Amount(iter.fold(0u64, |acc, a| acc.saturating_add(a.0)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse_canonical(&s).map_err(serde::de::Error::custom)
    }
}
