//! Fixed-point quantities.
//!
//! ## Overview
//!
//! Every balance, price and order size is a [`Quantity`]: an exact base-10
//! fixed-point number backed by `rust_decimal::Decimal`. Prices are quantities of
//! the quote instrument; order sizes are quantities of the base instrument.
//!
//! ## Why not `u64` scaled integers?
//!
//! A BUY reserves `price × quantity` of the quote instrument. With a shared scale
//! the product needs twice the decimal places, and any rounding there would leak
//! value between accounts. `Quantity` arithmetic is exact or fails: every
//! reservation and settlement conserves value to the last digit.
//!
//! ## Examples
//!
//! ```
//! use exchange_core::types::Quantity;
//!
//! let price = Quantity::parse("100.5").unwrap();
//! let size = Quantity::parse("0.2").unwrap();
//! assert_eq!(price.checked_mul(size), Some(Quantity::parse("20.1").unwrap()));
//! assert_eq!(Quantity::parse("20.100").unwrap().to_string(), "20.1");
//! ```

use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Exact fixed-point amount of some instrument.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    #[inline]
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Parse a decimal string.
    ///
    /// Returns `None` for anything `Decimal` cannot represent.
    pub fn parse(s: &str) -> Option<Self> {
        Decimal::from_str(s.trim()).ok().map(Self)
    }

    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Strictly greater than zero.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Truncate toward zero to `scale` decimal places.
    pub fn truncate(self, scale: u32) -> Self {
        Self(self.0.round_dp_with_strategy(scale, RoundingStrategy::ToZero))
    }

    /// Number of decimal places in the current representation.
    #[inline]
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Exact sum, `None` if the result is not representable.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let (a, b, scale) = aligned(self.0, rhs.0)?;
        from_parts(a.checked_add(b)?, scale).map(Self)
    }

    /// Exact difference, `None` if the result is not representable.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let (a, b, scale) = aligned(self.0, rhs.0)?;
        from_parts(a.checked_sub(b)?, scale).map(Self)
    }

    /// Exact product, `None` on overflow.
    ///
    /// `Decimal::checked_mul` silently rounds once the mantissa or scale runs
    /// out; a rounded notional would create or destroy value, so this works on
    /// the raw mantissas and refuses instead.
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let a = self.0.normalize();
        let b = rhs.0.normalize();
        let mantissa = a.mantissa().checked_mul(b.mantissa())?;
        from_parts(mantissa, a.scale() + b.scale()).map(Self)
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }
}

/// Bring both values to a common scale as raw mantissas.
fn aligned(a: Decimal, b: Decimal) -> Option<(i128, i128, u32)> {
    let scale = a.scale().max(b.scale());
    let ma = a.mantissa().checked_mul(10i128.checked_pow(scale - a.scale())?)?;
    let mb = b.mantissa().checked_mul(10i128.checked_pow(scale - b.scale())?)?;
    Some((ma, mb, scale))
}

/// Build a `Decimal` from an exact mantissa/scale pair, dropping only trailing
/// zeros. `None` when the value does not fit without rounding.
fn from_parts(mut mantissa: i128, mut scale: u32) -> Option<Decimal> {
    let too_wide = |m: i128, s: u32| s > MAX_DECIMAL_SCALE || m.unsigned_abs() > MAX_MANTISSA;
    while scale > 0 && mantissa % 10 == 0 && too_wide(mantissa, scale) {
        mantissa /= 10;
        scale -= 1;
    }
    if too_wide(mantissa, scale) {
        return None;
    }
    Decimal::try_from_i128_with_scale(mantissa, scale).ok()
}

const MAX_DECIMAL_SCALE: u32 = 28;

/// 2^96 - 1, the largest `Decimal` mantissa.
const MAX_MANTISSA: u128 = (1u128 << 96) - 1;

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Saturates at `Decimal::MAX`; only used for reporting totals.
impl Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| Quantity(acc.0.saturating_add(q.0)))
    }
}
