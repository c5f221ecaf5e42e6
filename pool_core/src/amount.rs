//! Uniform non-negative fixed-point amount used throughout the pool engine.
//!
//! Internally a raw `u64` scaled by [`Amount::SCALE`] (1e8, i.e. 8 decimal
//! places). All arithmetic is checked; overflow/underflow surface as
//! [`crate::PoolError`] rather than panicking or wrapping.

use std::cmp::Ordering;
use std::fmt;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "candid", derive(candid::CandidType))]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    /// Eight decimal places, matching e8s-denominated ledgers.
    pub const SCALE: u64 = 100_000_000;
    pub const ZERO: Amount = Amount(0);
    pub const MAX: Amount = Amount(u64::MAX);

    /// Virtual share/asset offsets (1e-4 each) that defeat the
    /// first-depositor share-price inflation attack.
    pub const VIRTUAL_SHARES: Amount = Amount(Self::SCALE / 10_000);
    pub const VIRTUAL_ASSETS: Amount = Amount(Self::SCALE / 10_000);

    /// Dust below which a yield delta is left to accumulate rather than
    /// being distributed (1e-6).
    pub const MIN_DISTRIBUTION_THRESHOLD: Amount = Amount(Self::SCALE / 1_000_000);

    pub const fn from_raw(raw: u64) -> Self {
        Amount(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whole-unit constructor, e.g. `Amount::from_units(100)` == 100.0.
    pub fn from_units(units: u64) -> Self {
        Amount(units.saturating_mul(Self::SCALE))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn min(self, other: Amount) -> Amount {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Amount) -> Amount {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }

    /// `self * numerator / denominator`, computed with a `u128`
    /// intermediate so the multiply never overflows before the divide.
    /// Returns `None` if `denominator` is zero or the final result
    /// doesn't fit back into `u64`.
    pub fn mul_div(self, numerator: Amount, denominator: Amount) -> Option<Amount> {
        if denominator.0 == 0 {
            return None;
        }
        let product = (self.0 as u128).checked_mul(numerator.0 as u128)?;
        let result = product / denominator.0 as u128;
        u64::try_from(result).ok().map(Amount)
    }

    /// `self * scalar_numerator / scalar_denominator` for plain integer
    /// ratios (used by the TWAB accumulator, which scales by seconds and
    /// divides by `TWAB_SCALE`, not by another `Amount`).
    pub fn mul_div_u64(self, numerator: u64, denominator: u64) -> Option<Amount> {
        if denominator == 0 {
            return None;
        }
        let product = (self.0 as u128).checked_mul(numerator as u128)?;
        let result = product / denominator as u128;
        u64::try_from(result).ok().map(Amount)
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / Self::SCALE,
            self.0 % Self::SCALE
        )
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 80% of `Amount::MAX`: the TVL ceiling that keeps virtual-offset and
/// share-price arithmetic comfortably inside `u64`/`u128` bounds.
pub fn safe_max_tvl() -> Amount {
    Amount::from_raw((Amount::MAX.0 / 5) * 4)
}
