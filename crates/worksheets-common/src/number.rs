//! Fixed-scale decimal numbers.
//!
//! A `Number` is a signed 64-bit mantissa plus a decimal scale; the scale is
//! part of the static type (`number[2]` holds cents). Arithmetic is exact:
//!   - `+`/`-` widen both operands to the larger scale,
//!   - `*` adds the scales,
//!   - `/` demands an explicit rounding mode and produces the common
//!     (widened) operand scale.
//!
//! Scale can only grow. Narrowing is a type error, never a silent round.

use std::cmp::Ordering;
use std::fmt::{self, Display};

use crate::{WorksheetError, WorksheetErrorKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Rounding mode attached to a division.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundingMode {
    /// Away from zero.
    Up,
    /// Toward zero.
    Down,
    /// Half-to-even (banker's rounding).
    HalfEven,
}

impl Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoundingMode::Up => "up",
            RoundingMode::Down => "down",
            RoundingMode::HalfEven => "half",
        })
    }
}

/// An exact decimal: `mantissa * 10^-scale`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Number {
    pub mantissa: i64,
    pub scale: u8,
}

fn pow10(exp: u32) -> Result<i64, WorksheetError> {
    10i64.checked_pow(exp).ok_or_else(overflow)
}

fn overflow() -> WorksheetError {
    WorksheetError::new(WorksheetErrorKind::Eval).with_message("number overflow")
}

impl Number {
    pub const fn new(mantissa: i64, scale: u8) -> Self {
        Number { mantissa, scale }
    }

    pub const fn from_int(value: i64) -> Self {
        Number {
            mantissa: value,
            scale: 0,
        }
    }

    pub const fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Parse a decimal literal (`42`, `-1.11`). The scale is the number of
    /// fractional digits written.
    pub fn parse(text: &str) -> Result<Self, WorksheetError> {
        let malformed =
            || WorksheetError::new(WorksheetErrorKind::Parse).with_message(format!("malformed number literal '{text}'"));

        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, f),
            None => (text, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(malformed());
        }
        if frac_part.contains(['.', '-', '+']) {
            return Err(malformed());
        }
        if frac_part.len() > u8::MAX as usize {
            return Err(malformed());
        }

        let digits: String = format!("{int_part}{frac_part}");
        let mantissa: i64 = digits.parse().map_err(|_| malformed())?;
        Ok(Number {
            mantissa,
            scale: frac_part.len() as u8,
        })
    }

    /// Widen to `scale`. Narrowing is a type mismatch; values are never
    /// silently rounded.
    pub fn rescale(&self, scale: u8) -> Result<Number, WorksheetError> {
        if scale < self.scale {
            return Err(WorksheetError::new(WorksheetErrorKind::TypeMismatch).with_message(format!(
                "number[{}] is not assignable to number[{}]",
                self.scale, scale
            )));
        }
        let factor = pow10((scale - self.scale) as u32)?;
        let mantissa = self.mantissa.checked_mul(factor).ok_or_else(overflow)?;
        Ok(Number { mantissa, scale })
    }

    fn widen_pair(a: &Number, b: &Number) -> Result<(i64, i64, u8), WorksheetError> {
        let scale = a.scale.max(b.scale);
        Ok((a.rescale(scale)?.mantissa, b.rescale(scale)?.mantissa, scale))
    }

    pub fn plus(&self, other: &Number) -> Result<Number, WorksheetError> {
        let (a, b, scale) = Number::widen_pair(self, other)?;
        let mantissa = a.checked_add(b).ok_or_else(overflow)?;
        Ok(Number { mantissa, scale })
    }

    pub fn minus(&self, other: &Number) -> Result<Number, WorksheetError> {
        let (a, b, scale) = Number::widen_pair(self, other)?;
        let mantissa = a.checked_sub(b).ok_or_else(overflow)?;
        Ok(Number { mantissa, scale })
    }

    pub fn times(&self, other: &Number) -> Result<Number, WorksheetError> {
        let mantissa = self
            .mantissa
            .checked_mul(other.mantissa)
            .ok_or_else(overflow)?;
        let scale = self
            .scale
            .checked_add(other.scale)
            .ok_or_else(overflow)?;
        Ok(Number { mantissa, scale })
    }

    /// Exact division under `mode`, at the widened operand scale.
    pub fn div(&self, other: &Number, mode: RoundingMode) -> Result<Number, WorksheetError> {
        if other.mantissa == 0 {
            return Err(WorksheetError::new(WorksheetErrorKind::Eval).with_message("division by zero"));
        }
        let scale = self.scale.max(other.scale);
        // a/b at scale s: round(a.m * 10^(s - a.s + b.s) / b.m)
        let exp = (scale - self.scale) as u32 + other.scale as u32;
        let numerator = self.mantissa.checked_mul(pow10(exp)?).ok_or_else(overflow)?;
        Ok(Number {
            mantissa: div_round(numerator, other.mantissa, mode),
            scale,
        })
    }

    /// Total order; operands are compared at their common scale.
    pub fn compare(&self, other: &Number) -> Ordering {
        // Widening can only overflow for extreme scale gaps; fall back to a
        // wider intermediate instead of failing the comparison.
        let scale = self.scale.max(other.scale) as u32;
        let a = self.mantissa as i128 * 10i128.pow(scale - self.scale as u32);
        let b = other.mantissa as i128 * 10i128.pow(scale - other.scale as u32);
        a.cmp(&b)
    }
}

fn div_round(numerator: i64, denominator: i64, mode: RoundingMode) -> i64 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder == 0 {
        return quotient;
    }
    let negative = (numerator < 0) != (denominator < 0);
    let away = if negative { quotient - 1 } else { quotient + 1 };
    match mode {
        RoundingMode::Down => quotient,
        RoundingMode::Up => away,
        RoundingMode::HalfEven => {
            let twice = remainder.unsigned_abs() * 2;
            let den = denominator.unsigned_abs();
            match twice.cmp(&den) {
                Ordering::Less => quotient,
                Ordering::Greater => away,
                Ordering::Equal => {
                    if quotient % 2 == 0 {
                        quotient
                    } else {
                        away
                    }
                }
            }
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = format!(
            "{:0width$}",
            self.mantissa.unsigned_abs(),
            width = self.scale as usize + 1
        );
        let split = digits.len() - self.scale as usize;
        write!(f, "{sign}{}.{}", &digits[..split], &digits[split..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(text: &str) -> Number {
        Number::parse(text).unwrap()
    }

    #[test]
    fn parse_and_display_round_trip() {
        for text in ["0", "1", "-1", "1.11", "-0.05", "12.300"] {
            assert_eq!(n(text).to_string(), text);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        for text in ["", ".", "1.2.3", "1.-2", "abc"] {
            assert!(Number::parse(text).is_err(), "{text}");
        }
    }

    #[test]
    fn rescale_widens_only() {
        assert_eq!(n("1.1").rescale(3).unwrap(), Number::new(1100, 3));
        assert!(n("1.11").rescale(1).is_err());
    }

    #[test]
    fn addition_widens_to_max_scale() {
        let sum = n("1.11").plus(&n("2.2")).unwrap();
        assert_eq!(sum, Number::new(331, 2));
    }

    #[test]
    fn multiplication_adds_scales() {
        let product = n("1.5").times(&n("0.20")).unwrap();
        assert_eq!(product, Number::new(3000, 3));
    }

    #[test]
    fn division_rounds_per_mode() {
        let a = n("1.00");
        let b = n("3");
        assert_eq!(a.div(&b, RoundingMode::Down).unwrap(), Number::new(33, 2));
        assert_eq!(a.div(&b, RoundingMode::Up).unwrap(), Number::new(34, 2));
        assert_eq!(n("2.00").div(&b, RoundingMode::Down).unwrap(), Number::new(66, 2));
    }

    #[test]
    fn division_half_even_breaks_ties_to_even() {
        let two = n("2");
        // 1/2 = 0.5 at scale 0 -> to even 0
        assert_eq!(n("1").div(&two, RoundingMode::HalfEven).unwrap(), Number::new(0, 0));
        // 3/2 = 1.5 at scale 0 -> to even 2
        assert_eq!(n("3").div(&two, RoundingMode::HalfEven).unwrap(), Number::new(2, 0));
        // 5/2 = 2.5 at scale 0 -> to even 2
        assert_eq!(n("5").div(&two, RoundingMode::HalfEven).unwrap(), Number::new(2, 0));
        // 0.5/2 = 0.25 at scale 1 -> to even 0.2
        assert_eq!(n("0.5").div(&two, RoundingMode::HalfEven).unwrap(), Number::new(2, 1));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(n("1").div(&n("0"), RoundingMode::Down).is_err());
    }

    #[test]
    fn negative_division_rounds_away_and_toward_zero() {
        let a = n("-1.00");
        let b = n("3");
        assert_eq!(a.div(&b, RoundingMode::Down).unwrap(), Number::new(-33, 2));
        assert_eq!(a.div(&b, RoundingMode::Up).unwrap(), Number::new(-34, 2));
    }

    #[test]
    fn compare_is_scale_independent() {
        assert_eq!(n("1.10").compare(&n("1.1")), Ordering::Equal);
        assert_eq!(n("1.2").compare(&n("1.11")), Ordering::Greater);
        assert_eq!(n("-3").compare(&n("0.0")), Ordering::Less);
    }
}
