//! Numeric abstraction shared by the floating and fixed-point feature paths.
//!
//! The MFCC extractor is generic over [`Scalar`], instantiated once with
//! `f32` and once with [`Fixed`]. Fixed-point rail hits are not reported
//! through globals: callers thread an [`ArithStatus`] through each frame and
//! `observe` the values they produce.

pub mod fft;
pub mod fixed;

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

pub use fft::{Cplx, RadixFft, RealFft, RustFft};
pub use fixed::Fixed;

/// Arithmetic used by the generic DSP code.
pub trait Scalar:
    Copy
    + Debug
    + Default
    + PartialOrd
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    const ZERO: Self;
    const ONE: Self;

    /// Real-input FFT used by this numeric path.
    type Fft: RealFft<Self>;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;

    fn from_f32(v: f32) -> Self {
        Self::from_f64(f64::from(v))
    }

    fn to_f32(self) -> f32 {
        self.to_f64() as f32
    }

    fn from_i32(v: i32) -> Self {
        Self::from_f64(f64::from(v))
    }

    fn ln(self) -> Self;
    fn sqrt(self) -> Self;

    fn abs(self) -> Self {
        if self < Self::ZERO {
            -self
        } else {
            self
        }
    }

    fn max_of(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }

    fn min_of(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    /// True when the value sits on a representation rail.
    fn is_saturated(self) -> bool;
}

impl Scalar for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    type Fft = RustFft;

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f32(v: f32) -> Self {
        v
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn ln(self) -> Self {
        f32::ln(self)
    }

    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }

    fn abs(self) -> Self {
        f32::abs(self)
    }

    fn is_saturated(self) -> bool {
        !self.is_finite()
    }
}

/// Sticky saturation record for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArithStatus {
    pub saturated: bool,
    pub saturation_count: u32,
}

impl ArithStatus {
    /// Record a rail hit if `value` is saturated and hand the value back.
    pub fn observe<S: Scalar>(&mut self, value: S) -> S {
        if value.is_saturated() {
            self.saturated = true;
            self.saturation_count = self.saturation_count.saturating_add(1);
        }
        value
    }

    pub fn observe_all<S: Scalar>(&mut self, values: &[S]) {
        for &v in values {
            self.observe(v);
        }
    }

    pub fn merge(&mut self, other: ArithStatus) {
        self.saturated |= other.saturated;
        self.saturation_count = self.saturation_count.saturating_add(other.saturation_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_sticky() {
        let mut status = ArithStatus::default();
        status.observe(1.0f32);
        assert!(!status.saturated);
        status.observe(Fixed::MAX);
        status.observe(Fixed::from_f64(2.0));
        assert!(status.saturated);
        assert_eq!(status.saturation_count, 1);
    }

    #[test]
    fn float_nan_counts_as_saturated() {
        let mut status = ArithStatus::default();
        status.observe_all(&[0.0f32, f32::NAN, f32::INFINITY]);
        assert_eq!(status.saturation_count, 2);
    }

    #[test]
    fn generic_helpers_agree() {
        fn clamp_floor<S: Scalar>(v: S, floor: S) -> S {
            v.max_of(floor)
        }
        assert_eq!(clamp_floor(0.5f32, 1.0), 1.0);
        assert_eq!(clamp_floor(Fixed::from_f64(3.0), Fixed::ONE).to_f64(), 3.0);
    }
}
