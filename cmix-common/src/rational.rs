//! Exact rational timestamps
//!
//! Every presentation timestamp (PTS) and duration in CMIX is a `Rational`
//! number of seconds. Byte counts convert to durations exactly
//! (`bytes / bytes_per_second`), so the playback clock never accumulates
//! floating-point drift over long sessions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Denominator used when an exact result no longer fits in `i64` (1 ns).
const FALLBACK_DEN: i128 = 1_000_000_000;

/// Reduced fraction `num / den` with `den > 0`.
///
/// Always kept in lowest terms, so the derived `PartialEq`/`Hash` compare
/// values rather than representations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RationalRepr")]
pub struct Rational {
    num: i64,
    den: i64,
}

/// Accepted JSON/TOML forms: `{ "num": 1, "den": 30 }` or a whole number of seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum RationalRepr {
    Fraction { num: i64, den: i64 },
    Seconds(i64),
}

impl TryFrom<RationalRepr> for Rational {
    type Error = String;

    fn try_from(repr: RationalRepr) -> Result<Self, Self::Error> {
        match repr {
            RationalRepr::Fraction { num, den } => Rational::checked_new(num, den)
                .ok_or_else(|| format!("rational {}/{} has a zero denominator", num, den)),
            RationalRepr::Seconds(secs) => Ok(Rational::from_integer(secs)),
        }
    }
}

impl Rational {
    pub const ZERO: Self = Self { num: 0, den: 1 };
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// Create a reduced rational.
    ///
    /// # Panics
    /// Panics if `den == 0`. Use [`Rational::checked_new`] for untrusted input.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Rational denominator must be non-zero");
        Self::from_i128(num as i128, den as i128)
    }

    /// Create a reduced rational, returning `None` for a zero denominator.
    pub fn checked_new(num: i64, den: i64) -> Option<Self> {
        if den == 0 {
            None
        } else {
            Some(Self::from_i128(num as i128, den as i128))
        }
    }

    pub const fn from_integer(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self::new(millis, 1000)
    }

    pub fn num(self) -> i64 {
        self.num
    }

    pub fn den(self) -> i64 {
        self.den
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    pub fn is_negative(self) -> bool {
        self.num < 0
    }

    /// Lossy conversion for display and logging only.
    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// `floor(self * factor)`, saturating at the `i64` range.
    ///
    /// Used to turn a duration into a byte count (`factor` = bytes per second).
    pub fn floor_mul(self, factor: i64) -> i64 {
        let product = (self.num as i128) * (factor as i128);
        clamp_i64(product.div_euclid(self.den as i128))
    }

    fn from_i128(num: i128, den: i128) -> Self {
        let (mut num, mut den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num, den);
        if g > 1 {
            num /= g;
            den /= g;
        }

        if let (Ok(n), Ok(d)) = (i64::try_from(num), i64::try_from(den)) {
            return Self { num: n, den: d };
        }

        // Too large to store exactly: round toward negative infinity at 1 ns.
        let whole = num.div_euclid(den);
        let rem = num.rem_euclid(den);
        let frac = if den <= i128::MAX / FALLBACK_DEN {
            rem * FALLBACK_DEN / den
        } else {
            rem / (den / FALLBACK_DEN)
        };
        let scaled = whole.saturating_mul(FALLBACK_DEN).saturating_add(frac);
        let n = clamp_i64(scaled) as i128;
        let g = gcd(n, FALLBACK_DEN);
        Self {
            num: (n / g) as i64,
            den: (FALLBACK_DEN / g) as i64,
        }
    }
}

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross-multiplication preserves order
        let lhs = (self.num as i128) * (other.den as i128);
        let rhs = (other.num as i128) * (self.den as i128);
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Rational {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        if self.den == rhs.den {
            return Self::from_i128(self.num as i128 + rhs.num as i128, self.den as i128);
        }
        let num = (self.num as i128 * rhs.den as i128)
            .saturating_add(rhs.num as i128 * self.den as i128);
        Self::from_i128(num, self.den as i128 * rhs.den as i128)
    }
}

impl Sub for Rational {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Neg for Rational {
    type Output = Self;
    fn neg(self) -> Self {
        Self::from_i128(-(self.num as i128), self.den as i128)
    }
}

impl AddAssign for Rational {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Rational {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl From<i64> for Rational {
    fn from(value: i64) -> Self {
        Self::from_integer(value)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}
