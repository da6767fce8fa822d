//! Scale-preserving decimal numbers.
//!
//! Liquid numbers compare by numeric value but render with the scale they
//! were written with: `1.0` and `1` are equal, yet render as `"1.0"` and
//! `"1"`. `rust_decimal` carries the scale through arithmetic, so the
//! wrapper stays thin.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::options::Culture;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Number(Decimal);

impl Number {
    pub const ZERO: Number = Number(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Number(value)
    }

    pub fn from_i64(value: i64) -> Self {
        Number(Decimal::from(value))
    }

    /// Coerces a float to its shortest decimal representation, giving it a
    /// natural scale (`1.5f64` becomes `1.5`, `1.0f64` becomes `1`).
    pub fn from_f64(value: f64) -> Self {
        Decimal::from_f64(value).map(Number).unwrap_or(Number::ZERO)
    }

    pub fn parse(text: &str) -> Option<Self> {
        Decimal::from_str(text.trim()).ok().map(Number)
    }

    pub fn decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True when the value carries no fractional part, regardless of scale.
    pub fn is_integer(&self) -> bool {
        self.0.fract().is_zero()
    }

    /// True when the number was written without a decimal point. Filters use
    /// this to decide between integer and decimal division.
    pub fn has_integer_scale(&self) -> bool {
        self.0.scale() == 0
    }

    pub fn to_i64(&self) -> i64 {
        self.0.trunc().to_i64().unwrap_or(0)
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn abs(&self) -> Number {
        Number(self.0.abs())
    }

    pub fn neg(&self) -> Number {
        Number(-self.0)
    }

    pub fn floor(&self) -> Number {
        Number(self.0.floor())
    }

    pub fn ceil(&self) -> Number {
        Number(self.0.ceil())
    }

    pub fn round_dp(&self, digits: u32) -> Number {
        Number(self.0.round_dp(digits))
    }

    pub fn checked_add(&self, rhs: Number) -> Option<Number> {
        self.0.checked_add(rhs.0).map(Number)
    }

    pub fn checked_sub(&self, rhs: Number) -> Option<Number> {
        self.0.checked_sub(rhs.0).map(Number)
    }

    pub fn checked_mul(&self, rhs: Number) -> Option<Number> {
        self.0.checked_mul(rhs.0).map(Number)
    }

    pub fn checked_div(&self, rhs: Number) -> Option<Number> {
        self.0.checked_div(rhs.0).map(Number)
    }

    pub fn checked_rem(&self, rhs: Number) -> Option<Number> {
        self.0.checked_rem(rhs.0).map(Number)
    }

    /// Renders the number with the culture's decimal separator, preserving
    /// the stored scale.
    pub fn format(&self, culture: &Culture) -> String {
        let text = self.0.to_string();
        if culture.decimal_separator == '.' {
            text
        } else {
            text.replace('.', &culture.decimal_separator.to_string())
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::from_i64(value)
    }
}

impl From<Decimal> for Number {
    fn from(value: Decimal) -> Self {
        Number(value)
    }
}
