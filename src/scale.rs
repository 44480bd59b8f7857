//! Rational scale factors applied between raw register integers and
//! engineering values.

use std::fmt;
use std::str::FromStr;

use crate::error::{RegMapError, RegMapResult};

/// Exact rational scale `num / den`, kept reduced with `den > 0`.
///
/// Decoding multiplies the raw integer by the scale, encoding divides by it
/// and rounds to the nearest raw integer.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::Scale;
///
/// let tenth: Scale = "0.1".parse().unwrap();
/// assert_eq!(tenth, Scale::new(1, 10).unwrap());
/// assert_eq!(tenth.apply(215), 21.5);
/// assert_eq!(tenth.unapply(21.5).unwrap(), 215);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale {
    num: i64,
    den: i64,
}

impl Scale {
    /// Identity scale.
    pub const ONE: Scale = Scale { num: 1, den: 1 };

    /// Create a scale; zero numerator or denominator is rejected.
    pub fn new(num: i64, den: i64) -> RegMapResult<Self> {
        if num == 0 || den == 0 {
            return Err(RegMapError::schema(format!(
                "scale {}/{} must have a non-zero numerator and denominator",
                num, den
            )));
        }
        let sign: i128 = if den < 0 { -1 } else { 1 };
        let divisor = i128::from(gcd(num.unsigned_abs(), den.unsigned_abs()));
        let reduce = |part: i64| i64::try_from(sign * i128::from(part) / divisor);
        match (reduce(num), reduce(den)) {
            (Ok(num), Ok(den)) => Ok(Self { num, den }),
            _ => Err(RegMapError::schema(format!(
                "scale {}/{} is not representable",
                num, den
            ))),
        }
    }

    /// Scale of `1 / den`, e.g. `Scale::per(10)` for tenths.
    pub fn per(den: i64) -> RegMapResult<Self> {
        Self::new(1, den)
    }

    #[inline]
    pub fn numerator(&self) -> i64 {
        self.num
    }

    #[inline]
    pub fn denominator(&self) -> i64 {
        self.den
    }

    #[inline]
    pub fn is_one(&self) -> bool {
        self.num == 1 && self.den == 1
    }

    /// Raw integer to engineering value.
    #[inline]
    pub fn apply(&self, raw: i64) -> f64 {
        let product = i128::from(raw) * i128::from(self.num);
        product as f64 / self.den as f64
    }

    /// Engineering value to the nearest raw integer.
    ///
    /// Fails on non-finite input or when the result leaves the 64-bit range.
    pub fn unapply(&self, value: f64) -> RegMapResult<i64> {
        if !value.is_finite() {
            return Err(RegMapError::encoding(format!(
                "value {} is not a finite number",
                value
            )));
        }
        let raw = (value * self.den as f64 / self.num as f64).round();
        // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
        if raw < i64::MIN as f64 || raw >= i64::MAX as f64 {
            return Err(RegMapError::encoding(format!(
                "value {} overflows after scaling by {}",
                value, self
            )));
        }
        Ok(raw as i64)
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl FromStr for Scale {
    type Err = RegMapError;

    /// Accepts `"1/10"`, `"0.1"`, `"-2.5"` or `"10"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || RegMapError::schema(format!("invalid scale '{}'", s));

        if let Some((num, den)) = s.split_once('/') {
            let num: i64 = num.trim().parse().map_err(|_| invalid())?;
            let den: i64 = den.trim().parse().map_err(|_| invalid())?;
            return Self::new(num, den);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) || frac.len() > 18 {
            return Err(invalid());
        }

        let mut num: i64 = 0;
        for c in whole.chars().chain(frac.chars()) {
            num = num
                .checked_mul(10)
                .and_then(|n| n.checked_add(i64::from(c as u8 - b'0')))
                .ok_or_else(invalid)?;
        }
        let den = 10i64.pow(frac.len() as u32);
        Self::new(if negative { -num } else { num }, den)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}
