//! Saturating Q47.16 fixed-point value.
//!
//! The raw representation is an `i64` with 16 fractional bits. Products and
//! quotients go through an `i128` intermediate and clamp to the `i64` rails,
//! so a rail value is the observable trace of an overflow.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use super::fft::RadixFft;
use super::Scalar;

pub const FRAC_BITS: u32 = 16;
const ONE_RAW: i64 = 1 << FRAC_BITS;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i64);

impl Fixed {
    pub const MAX: Fixed = Fixed(i64::MAX);
    pub const MIN: Fixed = Fixed(i64::MIN);
    /// Smallest positive step.
    pub const EPSILON: Fixed = Fixed(1);

    pub const fn from_raw(raw: i64) -> Self {
        Fixed(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    fn clamp_wide(v: i128) -> Self {
        Fixed(v.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Integer square root of the raw value scaled back to Q16.
    fn isqrt(self) -> Self {
        if self.0 <= 0 {
            return Fixed(0);
        }
        let n = (self.0 as u128) << FRAC_BITS;
        let mut x = (n as f64).sqrt() as u128;
        // Newton correction after the float seed.
        while x * x > n {
            x -= 1;
        }
        while (x + 1) * (x + 1) <= n {
            x += 1;
        }
        Fixed(x as i64)
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({})", self.to_f64())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.saturating_sub(rhs.0))
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed::clamp_wide((self.0 as i128 * rhs.0 as i128) >> FRAC_BITS)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        if rhs.0 == 0 {
            return match self.0.signum() {
                1 => Fixed::MAX,
                -1 => Fixed::MIN,
                _ => Fixed(0),
            };
        }
        Fixed::clamp_wide(((self.0 as i128) << FRAC_BITS) / rhs.0 as i128)
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(self.0.saturating_neg())
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Fixed) {
        *self = *self + rhs;
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Fixed) {
        *self = *self - rhs;
    }
}

impl MulAssign for Fixed {
    fn mul_assign(&mut self, rhs: Fixed) {
        *self = *self * rhs;
    }
}

impl Scalar for Fixed {
    const ZERO: Self = Fixed(0);
    const ONE: Self = Fixed(ONE_RAW);

    type Fft = RadixFft<Fixed>;

    fn from_f64(v: f64) -> Self {
        let scaled = (v * ONE_RAW as f64).round();
        if scaled.is_nan() {
            Fixed(0)
        } else if scaled >= i64::MAX as f64 {
            Fixed::MAX
        } else if scaled <= i64::MIN as f64 {
            Fixed::MIN
        } else {
            Fixed(scaled as i64)
        }
    }

    fn to_f64(self) -> f64 {
        self.0 as f64 / ONE_RAW as f64
    }

    fn from_i32(v: i32) -> Self {
        Fixed((v as i64) << FRAC_BITS)
    }

    /// Natural log; non-positive input maps to the lower rail.
    fn ln(self) -> Self {
        if self.0 <= 0 {
            return Fixed::MIN;
        }
        Fixed::from_f64(self.to_f64().ln())
    }

    fn sqrt(self) -> Self {
        self.isqrt()
    }

    fn is_saturated(self) -> bool {
        self.0 == i64::MAX || self.0 == i64::MIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fx(v: f64) -> Fixed {
        Fixed::from_f64(v)
    }

    #[test]
    fn basic_arithmetic() {
        assert_abs_diff_eq!((fx(1.5) + fx(2.25)).to_f64(), 3.75);
        assert_abs_diff_eq!((fx(1.5) - fx(2.25)).to_f64(), -0.75);
        assert_abs_diff_eq!((fx(1.5) * fx(-2.0)).to_f64(), -3.0);
        assert_abs_diff_eq!((fx(7.0) / fx(2.0)).to_f64(), 3.5);
        assert_abs_diff_eq!((-fx(0.5)).to_f64(), -0.5);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let big = fx(1.0e14);
        let product = big * big;
        assert_eq!(product, Fixed::MAX);
        assert!(product.is_saturated());
        assert_eq!(Fixed::MAX + Fixed::ONE, Fixed::MAX);
        assert_eq!(Fixed::MIN - Fixed::ONE, Fixed::MIN);
        assert_eq!(-Fixed::MIN, Fixed::MAX);
    }

    #[test]
    fn division_by_zero_hits_rail() {
        assert_eq!(fx(3.0) / Fixed::ZERO, Fixed::MAX);
        assert_eq!(fx(-3.0) / Fixed::ZERO, Fixed::MIN);
        assert_eq!(Fixed::ZERO / Fixed::ZERO, Fixed::ZERO);
    }

    #[test]
    fn sqrt_matches_float() {
        for v in [0.25, 2.0, 100.0, 12345.678, 4.0e9] {
            assert_abs_diff_eq!(fx(v).sqrt().to_f64(), v.sqrt(), epsilon = 1e-4);
        }
        assert_eq!(fx(-1.0).sqrt(), Fixed::ZERO);
    }

    #[test]
    fn ln_matches_float() {
        assert_abs_diff_eq!(fx(std::f64::consts::E).ln().to_f64(), 1.0, epsilon = 1e-4);
        assert_eq!(Fixed::ZERO.ln(), Fixed::MIN);
    }

    #[test]
    fn integer_conversion_is_exact() {
        assert_eq!(Fixed::from_i32(-32768).to_f64(), -32768.0);
        assert_eq!(Fixed::from_i32(7).raw(), 7 << 16);
    }
}
