//! Extended-precision time coordinate.
//!
//! Substep end times accumulate thousands of additions across a
//! superstep; plain `f64` loses the low-order bits that the
//! chunk/substep overlap arithmetic depends on. `DFloat` keeps an
//! unevaluated (hi, lo) pair with `hi = fl(hi + lo)`, doubling the
//! effective mantissa width for additions and subtractions.

use std::cmp::Ordering;
use std::ops::{Add, Neg, Sub};

/// Normalized double-double value.
///
/// `hi` carries the leading digits, `lo` the rounding residual, with
/// `|lo| <= ulp(hi) / 2`. Ordering compares `hi` first, then `lo`,
/// which is the correct total order for normalized pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DFloat {
    hi: f64,
    lo: f64,
}

/// Error-free sum of two doubles (Knuth two-sum).
#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let v = s - a;
    let e = (a - (s - v)) + (b - v);
    (s, e)
}

impl DFloat {
    /// The zero time coordinate.
    pub const ZERO: Self = Self { hi: 0.0, lo: 0.0 };

    /// Builds a value from an already-normalized (hi, lo) pair, e.g. the
    /// dual time coordinate reported by a batch propagator.
    #[inline]
    pub fn from_parts(hi: f64, lo: f64) -> Self {
        Self { hi, lo }
    }

    /// Leading component.
    #[inline]
    pub fn hi(self) -> f64 {
        self.hi
    }

    /// Residual component.
    #[inline]
    pub fn lo(self) -> f64 {
        self.lo
    }

    /// Nearest-`f64` approximation. For a normalized pair this is `hi`.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.hi
    }

    /// True when both components are finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.hi.is_finite() && self.lo.is_finite()
    }
}

impl From<f64> for DFloat {
    #[inline]
    fn from(val: f64) -> Self {
        Self { hi: val, lo: 0.0 }
    }
}

impl Add for DFloat {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let (s, e) = two_sum(self.hi, rhs.hi);
        let t = self.lo + rhs.lo + e;
        let (hi, lo) = two_sum(s, t);
        Self { hi, lo }
    }
}

impl Neg for DFloat {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self {
            hi: -self.hi,
            lo: -self.lo,
        }
    }
}

impl Sub for DFloat {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Add<f64> for DFloat {
    type Output = Self;

    #[inline]
    fn add(self, rhs: f64) -> Self {
        self + Self::from(rhs)
    }
}

impl PartialOrd for DFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.hi.partial_cmp(&other.hi) {
            Some(Ordering::Equal) => self.lo.partial_cmp(&other.lo),
            ord => ord,
        }
    }
}
