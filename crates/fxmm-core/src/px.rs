//! Precision-safe numeric types for quoting.
//!
//! Uses `rust_decimal` for exact decimal arithmetic, avoiding
//! floating-point rounding errors in price and position math.
//! A price that cannot be computed is represented as `Option<Price>`
//! at the call sites, never as a sentinel value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

use crate::error::CoreError;

/// Direction for price-step rounding.
///
/// Bids are rounded down and asks up so that rounding always moves the
/// price away from the opposite side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDir {
    Down,
    Up,
}

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round to a whole number of price steps in the given direction.
    #[inline]
    pub fn round_to_step(&self, step: Decimal, dir: RoundDir) -> Self {
        if step.is_zero() {
            return *self;
        }
        let steps = self.0 / step;
        let rounded = match dir {
            RoundDir::Down => steps.floor(),
            RoundDir::Up => steps.ceil(),
        };
        Self(rounded * step)
    }

    /// Number of whole price steps separating `self` from `other`
    /// (positive when `self > other`), rounded to nearest.
    #[inline]
    pub fn steps_from(&self, other: Price, step: Decimal) -> i64 {
        if step.is_zero() {
            return 0;
        }
        ((self.0 - other.0) / step)
            .round()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = CoreError;

    /// Parses a strictly positive price.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let px = Self(s.parse::<Decimal>()?);
        if !px.is_positive() {
            return Err(CoreError::InvalidPrice(s.to_string()));
        }
        Ok(px)
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Signed quantity with exact decimal precision.
///
/// Positions and flying deltas are signed: positive = long the base
/// asset, negative = short. Order quantities are the absolute value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qty(pub Decimal);

impl Qty {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Round the magnitude down to a whole number of lots, preserving
    /// sign. May round to zero.
    #[inline]
    pub fn round_down_to_lot(&self, lot: Qty) -> Self {
        if lot.0.is_zero() {
            return *self;
        }
        let lots = (self.0.abs() / lot.0).floor();
        let mag = lots * lot.0;
        if self.0.is_sign_negative() {
            Self(-mag)
        } else {
            Self(mag)
        }
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Qty {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse::<Decimal>()?))
    }
}

impl From<Decimal> for Qty {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Qty {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Mul<Decimal> for Qty {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_step_down() {
        let px = Price::new(dec!(1.09987));
        let rounded = px.round_to_step(dec!(0.0001), RoundDir::Down);
        assert_eq!(rounded.inner(), dec!(1.0998));
    }

    #[test]
    fn test_round_to_step_up() {
        let px = Price::new(dec!(1.10013));
        let rounded = px.round_to_step(dec!(0.0001), RoundDir::Up);
        assert_eq!(rounded.inner(), dec!(1.1002));
    }

    #[test]
    fn test_round_exact_is_identity() {
        let px = Price::new(dec!(1.1000));
        assert_eq!(px.round_to_step(dec!(0.0001), RoundDir::Down), px);
        assert_eq!(px.round_to_step(dec!(0.0001), RoundDir::Up), px);
    }

    #[test]
    fn test_steps_from() {
        let a = Price::new(dec!(1.1003));
        let b = Price::new(dec!(1.1000));
        assert_eq!(a.steps_from(b, dec!(0.0001)), 3);
        assert_eq!(b.steps_from(a, dec!(0.0001)), -3);
    }

    #[test]
    fn test_price_parsing() {
        assert_eq!("1.0999".parse::<Price>().unwrap(), Price::new(dec!(1.0999)));
        assert!(matches!(
            "-1.1".parse::<Price>(),
            Err(CoreError::InvalidPrice(_))
        ));
        assert!(matches!(
            "0".parse::<Price>(),
            Err(CoreError::InvalidPrice(_))
        ));
        assert!(matches!(
            "garbage".parse::<Price>(),
            Err(CoreError::DecimalParse(_))
        ));
    }

    #[test]
    fn test_qty_parsing_keeps_sign() {
        assert_eq!(
            "-2500000".parse::<Qty>().unwrap(),
            Qty::new(dec!(-2_500_000))
        );
        assert!(matches!(
            "".parse::<Qty>(),
            Err(CoreError::DecimalParse(_))
        ));
    }

    #[test]
    fn test_qty_round_down_to_lot() {
        let q = Qty::new(dec!(1750));
        assert_eq!(q.round_down_to_lot(Qty::new(dec!(1000))).inner(), dec!(1000));

        let dust = Qty::new(dec!(900));
        assert!(dust.round_down_to_lot(Qty::new(dec!(1000))).is_zero());

        let short = Qty::new(dec!(-2500));
        assert_eq!(
            short.round_down_to_lot(Qty::new(dec!(1000))).inner(),
            dec!(-2000)
        );
    }
}
