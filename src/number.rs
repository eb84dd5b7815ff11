//! Exact decimal arithmetic for rill
//!
//! A number is an arbitrary-precision rational plus the count of fractional
//! digits to display. Precision is never truncated by arithmetic: a binary
//! operation's result keeps the larger precision of its operands, so
//! `1.2200 - 4.7` formats as `-3.4800`.

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

/// Digit cap when formatting without an explicit precision. Rationals can
/// have infinite decimal expansions; twenty digits matches the display
/// contract for full-precision division results.
const MAX_FORMAT_DIGITS: usize = 20;

/// An exact rational value with an explicit display precision.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Number {
    value: BigRational,
    precision: usize,
}

impl Number {
    /// Create a number from a well-formatted decimal string. Malformed
    /// input yields zero; the lexer only ever produces valid lexemes.
    pub fn new(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(Self::zero)
    }

    /// Parse a decimal string like `-3.1400`. The precision is the number
    /// of digits after the decimal point, trailing zeros included.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return None;
        }

        let combined = format!("{}{}", int_part, frac_part);
        let mut numer = BigInt::parse_bytes(combined.as_bytes(), 10)?;
        if negative {
            numer = -numer;
        }

        Some(Self {
            value: BigRational::new(numer, pow10(frac_part.len())),
            precision: frac_part.len(),
        })
    }

    pub fn zero() -> Self {
        Self {
            value: BigRational::zero(),
            precision: 0,
        }
    }

    pub fn from_usize(n: usize) -> Self {
        Self {
            value: BigRational::from_integer(BigInt::from(n)),
            precision: 0,
        }
    }

    /// Number of fractional digits reproduced when formatting.
    pub fn precision(&self) -> usize {
        self.precision
    }

    /// True if the value equals zero at any precision.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn add(&self, other: &Number) -> Number {
        Number {
            value: &self.value + &other.value,
            precision: self.precision.max(other.precision),
        }
    }

    pub fn sub(&self, other: &Number) -> Number {
        Number {
            value: &self.value - &other.value,
            precision: self.precision.max(other.precision),
        }
    }

    pub fn mul(&self, other: &Number) -> Number {
        Number {
            value: &self.value * &other.value,
            precision: self.precision.max(other.precision),
        }
    }

    /// Exact division. Returns `None` when the divisor is zero; the caller
    /// maps this to a division-by-zero error and must leave its destination
    /// untouched.
    pub fn div(&self, other: &Number) -> Option<Number> {
        if other.is_zero() {
            return None;
        }
        Some(Number {
            value: &self.value / &other.value,
            precision: self.precision.max(other.precision),
        })
    }

    /// Truncated remainder, `a - trunc(a/b) * b`. `None` when `b` is zero.
    pub fn rem(&self, other: &Number) -> Option<Number> {
        if other.is_zero() {
            return None;
        }
        let quotient = (&self.value / &other.value).to_integer();
        Some(Number {
            value: &self.value - BigRational::from_integer(quotient) * &other.value,
            precision: self.precision.max(other.precision),
        })
    }

    /// Truncate toward zero. Used for index coercion.
    pub fn to_i64(&self) -> i64 {
        let int = self.value.to_integer();
        int.to_i64().unwrap_or(if int.is_negative() { i64::MIN } else { i64::MAX })
    }

    /// Format with exactly `digits` fractional digits, rounding the last
    /// digit half away from zero.
    pub fn float_string(&self, digits: usize) -> String {
        let negative = self.value.is_negative();
        let abs = self.value.abs();
        let scale = pow10(digits);
        let scaled = abs.numer() * &scale;
        let mut quotient = &scaled / abs.denom();
        let remainder = &scaled % abs.denom();
        if remainder * BigInt::from(2) >= *abs.denom() {
            quotient += BigInt::one();
        }

        let sign = if negative && !quotient.is_zero() { "-" } else { "" };
        if digits == 0 {
            return format!("{}{}", sign, quotient);
        }
        let int_part = &quotient / &scale;
        let frac_part = &quotient % &scale;
        format!("{}{}.{:0>width$}", sign, int_part, frac_part.to_string(), width = digits)
    }

    /// Format to the requested precision, or to full precision (up to
    /// [`MAX_FORMAT_DIGITS`], trailing zeros trimmed) when `None`.
    pub fn format(&self, precision: Option<usize>) -> String {
        match precision {
            Some(digits) => self.float_string(digits),
            None => {
                let mut s = self.float_string(MAX_FORMAT_DIGITS);
                if s.contains('.') {
                    s = s.trim_end_matches('0').trim_end_matches('.').to_string();
                }
                s
            }
        }
    }
}

fn pow10(n: usize) -> BigInt {
    let mut value = BigInt::one();
    for _ in 0..n {
        value = value * BigInt::from(10);
    }
    value
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.float_string(self.precision))
    }
}

impl fmt::Debug for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// Equality and ordering compare the exact value only; 0.5 and 0.50 are the
// same number at different precisions.
impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.value.cmp(&other.value))
    }
}

impl From<Number> for String {
    fn from(n: Number) -> String {
        n.to_string()
    }
}

impl TryFrom<String> for Number {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Number::parse(&s).ok_or_else(|| format!("malformed number '{}'", s))
    }
}
