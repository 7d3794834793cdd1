//! Spectral entropy of the extractor's power spectrum, an auxiliary input
//! for end-point detection.
//!
//! The spectrum is whitened against a per-bin noise estimate. Over the
//! first frames that estimate is the running maximum of quiet frames;
//! afterwards it follows frames whose log energy sits close to the noise
//! log energy, at a rate that depends on how close.

use std::ops::Range;

use crate::numeric::Scalar;

const INIT_FRAMES: u32 = 4;
const INIT_DISTANCE: f32 = 3.0;
const MIN_BIN_NOISE: f64 = 4.0;
const MIN_WHITE: f64 = 30.0;
const MIN_PROB: f64 = 1e-4;
const MIN_LOG_POWER: f32 = 10.0;

/// Entropy reported while the noise model is still learning.
pub const MFCC_MIN_ENTROPY: f32 = 1e-2;

pub(crate) fn entropy_band(sample_rate: u32, bins: usize) -> Range<usize> {
    let (low, high) = if sample_rate == 8000 { (8, 120) } else { (4, 240) };
    low.min(bins)..high.min(bins)
}

#[derive(Debug, Clone)]
pub(crate) struct EntropyTracker<S> {
    band: Range<usize>,
    noise: Vec<S>,
    white: Vec<S>,
    noise_energy: f32,
    noise_power: f32,
    log_bins: S,
    min_bin: S,
    min_white: S,
    min_prob: S,
}

impl<S: Scalar> EntropyTracker<S> {
    pub fn new(band: Range<usize>) -> Self {
        let width = band.len().max(2);
        Self {
            noise: vec![S::ZERO; band.len()],
            white: vec![S::ZERO; band.len()],
            band,
            noise_energy: 0.0,
            noise_power: 0.0,
            log_bins: S::from_f64((width as f64).ln()),
            min_bin: S::from_f64(MIN_BIN_NOISE),
            min_white: S::from_f64(MIN_WHITE),
            min_prob: S::from_f64(MIN_PROB),
        }
    }

    pub fn reset(&mut self) {
        self.noise.fill(S::ZERO);
        self.noise_energy = 0.0;
        self.noise_power = 0.0;
    }

    fn blend(&mut self, spectrum: &[S], rate: f32, energy: f32, power: f32) {
        self.noise_energy += rate * (energy - self.noise_energy);
        self.noise_power += rate * (power - self.noise_power);
        let r = S::from_f32(rate);
        for (n, &p) in self.noise.iter_mut().zip(spectrum) {
            *n += r * (p - *n);
            *n = n.max_of(self.min_bin);
        }
    }

    /// `frame` counts earlier outputs. `bounds` clamps the noise log energy.
    /// A frame flagged as speech by `vad` never adapts the noise model
    /// after the first frames.
    pub fn estimate(
        &mut self,
        power: &[S],
        energy: f32,
        log_power: f32,
        frame: u32,
        vad: bool,
        bounds: (f32, f32),
    ) -> f32 {
        let spectrum = &power[self.band.clone()];
        let mut updated = false;

        if frame < INIT_FRAMES {
            if frame == 0 {
                self.noise.fill(S::ZERO);
                self.noise_energy = energy;
                self.noise_power = log_power;
                updated = true;
            }
            let diff_energy = energy - self.noise_energy;
            let diff_power = log_power - self.noise_power;
            if diff_energy < INIT_DISTANCE || diff_power < INIT_DISTANCE {
                updated = true;
                self.noise_energy = self.noise_energy.max(energy);
                self.noise_power = self.noise_power.max(log_power);
                for (n, &p) in self.noise.iter_mut().zip(spectrum) {
                    *n = n.max_of(p);
                }
            }
        } else if !vad {
            let diff = energy - self.noise_energy;
            let rate = if diff < 0.0 {
                Some(0.02)
            } else if diff < 1.0 {
                Some(0.03)
            } else if diff < 2.0 {
                Some(0.02)
            } else {
                None
            };
            if let Some(rate) = rate {
                updated = true;
                self.blend(spectrum, rate, energy, log_power);
            }
        }
        self.noise_energy = self.noise_energy.clamp(bounds.0, bounds.1);
        self.noise_power = self.noise_power.max(MIN_LOG_POWER);

        if frame + 1 < INIT_FRAMES && updated {
            return MFCC_MIN_ENTROPY;
        }

        let mut total = S::ZERO;
        for ((w, &p), &n) in self.white.iter_mut().zip(spectrum).zip(&self.noise) {
            *w = (p / n.max_of(self.min_bin)).max_of(self.min_white);
            total += *w;
        }
        let h = self.white.iter().fold(S::ZERO, |acc, &w| {
            let prob = (w / total).max_of(self.min_prob);
            acc - prob * prob.ln()
        });
        let entropy = (S::ONE - h / self.log_bins).to_f32();
        entropy.max(MFCC_MIN_ENTROPY)
    }
}
