//! Interval arithmetic for Taylor polynomial range bounding.
//!
//! Evaluating a substep's Taylor coefficients over a whole time
//! sub-interval (instead of a single instant) yields conservative
//! bounds on the trajectory: the polynomial's range over the interval
//! is contained in the result.

use std::ops::{Add, Mul};

/// A closed interval of possible values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Ival {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

impl Ival {
    /// Creates a new interval.
    #[inline]
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Creates a point interval `[v, v]`.
    #[inline]
    pub fn point(v: f64) -> Self {
        Self { lower: v, upper: v }
    }

    /// Lower bound narrowed to `f32` with outward rounding.
    #[inline]
    pub fn lower_f32(self) -> f32 {
        (self.lower as f32).next_down()
    }

    /// Upper bound narrowed to `f32` with outward rounding.
    #[inline]
    pub fn upper_f32(self) -> f32 {
        (self.upper as f32).next_up()
    }

    /// Range of the Taylor polynomial with coefficients `tcs` over the
    /// interval `h` (substep-local time), via Horner's scheme in
    /// interval arithmetic.
    pub fn horner(tcs: &[f64], h: Ival) -> Ival {
        let order = tcs.len() - 1;
        let mut acc = Ival::point(tcs[order]);
        for k in (0..order).rev() {
            acc = Ival::point(tcs[k]) + acc * h;
        }
        acc
    }
}

impl Add for Ival {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            lower: self.lower + rhs.lower,
            upper: self.upper + rhs.upper,
        }
    }
}

impl Mul for Ival {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let t1 = self.lower * rhs.lower;
        let t2 = self.lower * rhs.upper;
        let t3 = self.upper * rhs.lower;
        let t4 = self.upper * rhs.upper;

        Self {
            lower: t1.min(t2).min(t3.min(t4)),
            upper: t1.max(t2).max(t3.max(t4)),
        }
    }
}
