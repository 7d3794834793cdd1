//! Real-input forward FFTs producing `len/2 + 1` bins.
//!
//! - [`RustFft`] wraps `rustfft` for the floating path.
//! - [`RadixFft`] is a radix-2 transform written against [`Scalar`] so the
//!   fixed-point path can run it. It packs the real input into a half-length
//!   complex sequence, transforms that, then splits even and odd spectra
//!   with a phase table.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::Scalar;
use crate::error::{CepstraError, Result};

pub type Cplx<S> = Complex<S>;

pub trait RealFft<S>: Send {
    fn plan(len: usize) -> Result<Self>
    where
        Self: Sized;

    fn len(&self) -> usize;

    /// `input.len()` must equal `len()`; `output` receives `len()/2 + 1` bins.
    fn forward(&mut self, input: &[S], output: &mut [Cplx<S>]);
}

fn check_len(len: usize) -> Result<()> {
    if len < 4 || !len.is_power_of_two() {
        return Err(CepstraError::invalid("FFT_SIZE", len));
    }
    Ok(())
}

pub struct RustFft {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RealFft<f32> for RustFft {
    fn plan(len: usize) -> Result<Self> {
        check_len(len)?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Ok(Self {
            fft,
            buffer: vec![Complex::default(); len],
            scratch,
        })
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn forward(&mut self, input: &[f32], output: &mut [Cplx<f32>]) {
        for (slot, &x) in self.buffer.iter_mut().zip(input) {
            *slot = Complex::new(x, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        let bins = self.buffer.len() / 2 + 1;
        output[..bins].copy_from_slice(&self.buffer[..bins]);
    }
}

pub struct RadixFft<S: Scalar> {
    len: usize,
    /// `e^{-2πik/(len/2)}` for the half-length complex stages.
    twiddles: Vec<Cplx<S>>,
    /// `e^{-2πik/len}` for the even/odd split.
    phase: Vec<Cplx<S>>,
    bit_reverse: Vec<usize>,
    work: Vec<Cplx<S>>,
}

impl<S: Scalar> RadixFft<S> {
    fn unit(angle: f64) -> Cplx<S> {
        Complex::new(S::from_f64(angle.cos()), S::from_f64(angle.sin()))
    }

    fn mul(a: Cplx<S>, b: Cplx<S>) -> Cplx<S> {
        Complex::new(a.re * b.re - a.im * b.im, a.re * b.im + a.im * b.re)
    }

    fn transform_half(&mut self) {
        let half = self.len / 2;
        for i in 0..half {
            let j = self.bit_reverse[i];
            if j > i {
                self.work.swap(i, j);
            }
        }
        let mut size = 2;
        while size <= half {
            let step = half / size;
            let mid = size / 2;
            for start in (0..half).step_by(size) {
                for k in 0..mid {
                    let w = self.twiddles[k * step];
                    let a = self.work[start + k];
                    let b = Self::mul(self.work[start + k + mid], w);
                    self.work[start + k] = Complex::new(a.re + b.re, a.im + b.im);
                    self.work[start + k + mid] = Complex::new(a.re - b.re, a.im - b.im);
                }
            }
            size *= 2;
        }
    }
}

impl<S: Scalar> RealFft<S> for RadixFft<S> {
    fn plan(len: usize) -> Result<Self> {
        check_len(len)?;
        let half = len / 2;
        let bits = half.trailing_zeros();
        let tau = std::f64::consts::TAU;
        let twiddles = (0..half / 2)
            .map(|k| Self::unit(-tau * k as f64 / half as f64))
            .collect();
        let phase = (0..=half)
            .map(|k| Self::unit(-tau * k as f64 / len as f64))
            .collect();
        let bit_reverse = (0..half)
            .map(|i| {
                if bits == 0 {
                    0
                } else {
                    i.reverse_bits() >> (usize::BITS - bits)
                }
            })
            .collect();
        Ok(Self {
            len,
            twiddles,
            phase,
            bit_reverse,
            work: vec![Complex::new(S::ZERO, S::ZERO); half],
        })
    }

    fn len(&self) -> usize {
        self.len
    }

    fn forward(&mut self, input: &[S], output: &mut [Cplx<S>]) {
        let half = self.len / 2;
        for (m, slot) in self.work.iter_mut().enumerate() {
            *slot = Complex::new(input[2 * m], input[2 * m + 1]);
        }
        self.transform_half();

        let halve = S::from_f64(0.5);
        for (k, out) in output.iter_mut().enumerate().take(half + 1) {
            let zk = self.work[k % half];
            let zr = self.work[(half - k) % half];
            let zc = Complex::new(zr.re, -zr.im);
            let even = Complex::new((zk.re + zc.re) * halve, (zk.im + zc.im) * halve);
            // (zk - zc) / 2i
            let odd = Complex::new((zk.im - zc.im) * halve, -(zk.re - zc.re) * halve);
            let rotated = Self::mul(odd, self.phase[k]);
            *out = Complex::new(even.re + rotated.re, even.im + rotated.im);
        }
    }
}

/// Allocate an output buffer sized for `fft`.
pub fn spectrum_buffer<S: Scalar, F: RealFft<S>>(fft: &F) -> Vec<Cplx<S>> {
    vec![Complex::new(S::ZERO, S::ZERO); fft.len() / 2 + 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Fixed;
    use approx::assert_abs_diff_eq;

    fn test_signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32;
                100.0 * (0.3 * t).sin() + 40.0 * (1.7 * t).cos() + (i % 7) as f32
            })
            .collect()
    }

    fn naive_dft(x: &[f32]) -> Vec<(f64, f64)> {
        let n = x.len();
        (0..=n / 2)
            .map(|k| {
                let mut re = 0.0f64;
                let mut im = 0.0f64;
                for (i, &v) in x.iter().enumerate() {
                    let a = -std::f64::consts::TAU * (k * i) as f64 / n as f64;
                    re += f64::from(v) * a.cos();
                    im += f64::from(v) * a.sin();
                }
                (re, im)
            })
            .collect()
    }

    #[test]
    fn rustfft_matches_naive_dft() {
        let x = test_signal(64);
        let mut fft = RustFft::plan(64).unwrap();
        let mut out = spectrum_buffer(&fft);
        fft.forward(&x, &mut out);
        for (bin, (re, im)) in out.iter().zip(naive_dft(&x)) {
            assert_abs_diff_eq!(f64::from(bin.re), re, epsilon = 1e-2);
            assert_abs_diff_eq!(f64::from(bin.im), im, epsilon = 1e-2);
        }
    }

    #[test]
    fn radix_float_matches_rustfft() {
        let x = test_signal(256);
        let mut reference = RustFft::plan(256).unwrap();
        let mut radix = RadixFft::<f32>::plan(256).unwrap();
        let mut a = spectrum_buffer(&reference);
        let mut b = spectrum_buffer(&radix);
        reference.forward(&x, &mut a);
        radix.forward(&x, &mut b);
        for (p, q) in a.iter().zip(&b) {
            assert_abs_diff_eq!(p.re, q.re, epsilon = 0.05);
            assert_abs_diff_eq!(p.im, q.im, epsilon = 0.05);
        }
    }

    #[test]
    fn radix_fixed_tracks_float() {
        let x = test_signal(256);
        let xf: Vec<Fixed> = x.iter().map(|&v| Fixed::from_f32(v)).collect();
        let mut reference = RustFft::plan(256).unwrap();
        let mut radix = RadixFft::<Fixed>::plan(256).unwrap();
        let mut a = spectrum_buffer(&reference);
        let mut b = spectrum_buffer(&radix);
        reference.forward(&x, &mut a);
        radix.forward(&xf, &mut b);
        for (p, q) in a.iter().zip(&b) {
            assert_abs_diff_eq!(f64::from(p.re), q.re.to_f64(), epsilon = 0.5);
            assert_abs_diff_eq!(f64::from(p.im), q.im.to_f64(), epsilon = 0.5);
        }
    }

    #[test]
    fn non_power_of_two_is_rejected() {
        assert!(RustFft::plan(100).is_err());
        assert!(RadixFft::<Fixed>::plan(2).is_err());
    }
}
