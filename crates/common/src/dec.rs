//! Signed fixed-point decimal at 1e18 scale
//!
//! `Dec` is the one numeric type every monetary decision path uses. It stores
//! a signed rational as an `i128` of 1e18ths and widens to `BigInt` for
//! products, quotients and square roots, so `Dec * Dec` cannot overflow an
//! intermediate. All conversions to integer token units are explicit
//! (truncate / round / ceil); there is no implicit coercion and no floating
//! point anywhere.

use num::bigint::BigInt;
use num::integer::Roots;
use num::ToPrimitive;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Integer token amount (smallest-denomination units).
pub type Amount = i128;

/// Number of fractional digits carried by [`Dec`].
pub const DEC_DIGITS: u32 = 18;

/// Scale factor: 10^18.
pub const SCALE: i128 = 1_000_000_000_000_000_000;

/// Arithmetic failure in fixed-point math.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("numeric overflow")]
    Overflow,
    #[error("square root of negative value")]
    NegativeSqrt,
    #[error("negative value cannot convert to unsigned")]
    NegativeToUnsigned,
    #[error("invalid decimal literal")]
    InvalidLiteral,
}

/// Signed fixed-point rational with 18 fractional digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dec(i128);

impl Dec {
    pub const ZERO: Dec = Dec(0);
    pub const ONE: Dec = Dec(SCALE);

    /// Build from a raw 1e18-scaled integer.
    pub const fn from_raw(raw: i128) -> Self {
        Dec(raw)
    }

    /// Build from an integer number of whole units.
    pub fn from_int(n: i128) -> Result<Self, MathError> {
        n.checked_mul(SCALE).map(Dec).ok_or(MathError::Overflow)
    }

    /// Build a ratio `num / den` of whole units.
    pub fn from_ratio(num: i128, den: i128) -> Result<Self, MathError> {
        Dec::from_int(num)?.quo(Dec::from_int(den)?)
    }

    /// Raw 1e18-scaled value.
    pub const fn raw(self) -> i128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Dec) -> Result<Dec, MathError> {
        self.0.checked_add(rhs.0).map(Dec).ok_or(MathError::Overflow)
    }

    pub fn checked_sub(self, rhs: Dec) -> Result<Dec, MathError> {
        self.0.checked_sub(rhs.0).map(Dec).ok_or(MathError::Overflow)
    }

    pub fn neg(self) -> Result<Dec, MathError> {
        self.0.checked_neg().map(Dec).ok_or(MathError::Overflow)
    }

    pub fn abs(self) -> Result<Dec, MathError> {
        if self.0 >= 0 {
            Ok(self)
        } else {
            self.neg()
        }
    }

    /// Multiply, rounding the dropped digits half away from zero.
    pub fn mul(self, rhs: Dec) -> Result<Dec, MathError> {
        let wide = BigInt::from(self.0) * BigInt::from(rhs.0);
        big_to_dec(round_div_big(wide, BigInt::from(SCALE)))
    }

    /// Multiply by an integer token amount.
    pub fn mul_int(self, n: Amount) -> Result<Dec, MathError> {
        let wide = BigInt::from(self.0) * BigInt::from(n);
        big_to_dec(wide)
    }

    /// Truncating division (toward zero).
    pub fn quo(self, rhs: Dec) -> Result<Dec, MathError> {
        if rhs.0 == 0 {
            return Err(MathError::DivisionByZero);
        }
        let wide = BigInt::from(self.0) * BigInt::from(SCALE);
        big_to_dec(wide / BigInt::from(rhs.0))
    }

    /// Division rounding the magnitude up (away from zero) on any remainder.
    pub fn quo_ceil(self, rhs: Dec) -> Result<Dec, MathError> {
        if rhs.0 == 0 {
            return Err(MathError::DivisionByZero);
        }
        let num = BigInt::from(self.0) * BigInt::from(SCALE);
        let den = BigInt::from(rhs.0);
        let q = &num / &den;
        let r = &num % &den;
        let bump = if r == BigInt::from(0) {
            BigInt::from(0)
        } else if (num >= BigInt::from(0)) == (den >= BigInt::from(0)) {
            BigInt::from(1)
        } else {
            BigInt::from(-1)
        };
        big_to_dec(q + bump)
    }

    /// Square root with last-digit truncation. Negative input is an error.
    pub fn sqrt(self) -> Result<Dec, MathError> {
        if self.0 < 0 {
            return Err(MathError::NegativeSqrt);
        }
        // sqrt(raw * SCALE) keeps the result at 1e18 scale.
        let wide = BigInt::from(self.0) * BigInt::from(SCALE);
        big_to_dec(wide.sqrt())
    }

    /// Integer part, truncated toward zero.
    pub fn to_int_truncate(self) -> Amount {
        self.0 / SCALE
    }

    /// Nearest integer, ties away from zero.
    pub fn to_int_round(self) -> Amount {
        let q = self.0 / SCALE;
        let r = self.0 % SCALE;
        if r.abs() * 2 >= SCALE {
            q + r.signum()
        } else {
            q
        }
    }

    /// Smallest integer not below `self` (toward +inf).
    pub fn to_int_ceil(self) -> Amount {
        let q = self.0 / SCALE;
        if self.0 % SCALE > 0 {
            q + 1
        } else {
            q
        }
    }

    /// Truncated conversion to an unsigned amount; negative input is an error.
    pub fn to_uint_truncate(self) -> Result<u128, MathError> {
        if self.0 < 0 {
            return Err(MathError::NegativeToUnsigned);
        }
        Ok((self.0 / SCALE) as u128)
    }

    pub fn min(self, rhs: Dec) -> Dec {
        if self.0 <= rhs.0 {
            self
        } else {
            rhs
        }
    }

    pub fn max(self, rhs: Dec) -> Dec {
        if self.0 >= rhs.0 {
            self
        } else {
            rhs
        }
    }

    pub fn cmp_dec(self, rhs: Dec) -> Ordering {
        self.0.cmp(&rhs.0)
    }
}

/// Divide `num / den` rounding half away from zero.
fn round_div_big(num: BigInt, den: BigInt) -> BigInt {
    let two = BigInt::from(2);
    let q = &num / &den;
    let r = &num % &den;
    if (&r * &two).magnitude() >= den.magnitude() {
        let sign = if (num >= BigInt::from(0)) == (den >= BigInt::from(0)) {
            1
        } else {
            -1
        };
        q + BigInt::from(sign)
    } else {
        q
    }
}

fn big_to_dec(big: BigInt) -> Result<Dec, MathError> {
    big.to_i128().map(Dec).ok_or(MathError::Overflow)
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let mag = self.0.unsigned_abs();
        let whole = mag / SCALE as u128;
        let frac = mag % SCALE as u128;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let mut frac_str = format!("{:018}", frac);
            while frac_str.ends_with('0') {
                frac_str.pop();
            }
            write!(f, "{}{}.{}", sign, whole, frac_str)
        }
    }
}

impl FromStr for Dec {
    type Err = MathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (neg, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return Err(MathError::InvalidLiteral);
        }
        let (whole_str, frac_str) = match body.split_once('.') {
            Some((w, fr)) => (w, fr),
            None => (body, ""),
        };
        if frac_str.len() > DEC_DIGITS as usize {
            return Err(MathError::InvalidLiteral);
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
            || whole_str.is_empty()
        {
            return Err(MathError::InvalidLiteral);
        }
        let whole: i128 = whole_str.parse().map_err(|_| MathError::InvalidLiteral)?;
        let mut frac: i128 = 0;
        if !frac_str.is_empty() {
            frac = frac_str.parse().map_err(|_| MathError::InvalidLiteral)?;
            frac *= 10_i128.pow(DEC_DIGITS - frac_str.len() as u32);
        }
        let raw = whole
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or(MathError::Overflow)?;
        Ok(Dec(if neg { -raw } else { raw }))
    }
}
