//! Speech detectors used for frame dropping, computed by stage 0 from its
//! Wiener gains, plus the suppressor's spectral entropy.
//!
//! Every detector compares one scalar per frame against an adaptive mean.
//! During the first frames the mean only learns; afterwards values close to
//! the mean pull it along and values far below it drag it down slowly.

use crate::classify::FrameClass;

/// Frames during which the adaptive means only learn.
pub const INIT_FRAMES: u32 = 10;

const SPEECH_RATIO: f32 = 1.65;
const MIN_MEL_MEAN: f32 = 0.07;
const MAX_MEL_MEAN: f32 = 0.15;
const SPEECH_MEL: f32 = 0.7;
const SPEECH_ENTROPY: f32 = 0.1;
const VOICED_ENTROPY: f32 = 0.2;

/// Entropy reported while learning and for flat spectra.
pub const MIN_ENTROPY: f32 = 1e-4;

#[derive(Debug, Clone, Default)]
pub struct FrameDropDetector {
    var_mean: f32,
    spec_mean: f32,
    acc_test: f32,
    mel_mean: f32,
    mel_prev: f32,
}

impl FrameDropDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variance of the first 64 linear Wiener gains against its mean.
    pub fn speech_by_variance(&mut self, gains: &[f32], frame: u32) -> bool {
        let head = &gains[..gains.len().min(64)];
        let n = head.len().max(1) as f32;
        let (sum, sum_sq) = head
            .iter()
            .fold((0.0f32, 0.0f32), |(s, q), &w| (s + w, q + w * w));
        let var = sum_sq / n - sum * sum / (n * n);

        if frame < INIT_FRAMES {
            self.var_mean = self.var_mean.max(var);
        }
        if var < self.var_mean * 1.5 && var > self.var_mean * 0.85 {
            self.var_mean = 0.8 * self.var_mean + 0.2 * var;
        }
        if var <= self.var_mean * 0.25 {
            self.var_mean = 0.97 * self.var_mean + 0.03 * var;
        }
        var > self.var_mean * SPEECH_RATIO
    }

    /// Sum of the mel gains, squared.
    pub fn speech_by_gain_sum(&mut self, mel_gains: &[f32], frame: u32) -> bool {
        let total = mel_gains.iter().sum::<f32>().max(2.0);
        let value = total * total - 3.0;

        if frame == 1 {
            self.spec_mean = value;
        }
        if frame < INIT_FRAMES {
            let n = frame.max(1) as f32;
            self.acc_test = 1.1 * (self.acc_test * (n - 1.0) + value) / n;
            let acceleration = value / self.acc_test;
            if acceleration <= 2.5 {
                self.spec_mean = self.spec_mean.max(value);
            }
        }
        if value < self.spec_mean * 1.5 && value > self.spec_mean * 0.75 {
            self.spec_mean = 0.8 * self.spec_mean + 0.2 * value;
        }
        if value <= self.spec_mean * 0.5 {
            self.spec_mean = 0.97 * self.spec_mean + 0.03 * value;
        }
        value > self.spec_mean * SPEECH_RATIO
    }

    /// Low-band mel gain ratio, backed up by the frame class and entropy.
    pub fn speech_by_low_band(
        &mut self,
        mel_gains: &[f32],
        frame: u32,
        class: FrameClass,
        entropy: f32,
    ) -> bool {
        let current = mel_gains[1..4].iter().sum::<f32>() / 3.0;
        let smooth = 0.75 * current + 0.25 * self.mel_prev;
        self.mel_prev = current;

        if frame < INIT_FRAMES {
            self.mel_mean = self.mel_mean.max(smooth);
        }
        if smooth < self.mel_mean * 1.5 && smooth > self.mel_mean * 0.75 {
            self.mel_mean = 0.95 * self.mel_mean + 0.05 * smooth;
        }
        if smooth <= self.mel_mean * 0.5 {
            self.mel_mean = 0.97 * self.mel_mean + 0.03 * smooth;
        }
        self.mel_mean = self.mel_mean.clamp(MIN_MEL_MEAN, MAX_MEL_MEAN);

        let acceleration = smooth / self.mel_mean;
        acceleration > 3.25
            || smooth >= SPEECH_MEL
            || class == FrameClass::Voiced
            || (acceleration > 2.0 && entropy > SPEECH_ENTROPY)
            || entropy >= VOICED_ENTROPY
    }
}

const ENTROPY_LOW_BIN: usize = 8;
const ENTROPY_HIGH_BIN: usize = 120;
const NOISE_FLOOR: f32 = 100.0;
const WHITE_FLOOR: f32 = 10.0;
const MIN_PROB: f32 = 1e-4;
const NOISE_RATE: f32 = 1.0 / 64.0;

/// Spectral entropy of the whitened pitch power spectrum, normalised so 1
/// means a single line and 0 means white.
#[derive(Debug, Clone)]
pub struct SpectralEntropy {
    noise: Vec<f32>,
    noise_log_energy: f32,
    white: Vec<f32>,
}

impl SpectralEntropy {
    pub fn new(bins: usize) -> Self {
        Self {
            noise: vec![0.0; bins.max(ENTROPY_HIGH_BIN)],
            noise_log_energy: 0.0,
            white: vec![0.0; ENTROPY_HIGH_BIN - ENTROPY_LOW_BIN],
        }
    }

    pub fn reset(&mut self) {
        self.noise.fill(0.0);
        self.noise_log_energy = 0.0;
    }

    pub fn noise_log_energy(&self) -> f32 {
        self.noise_log_energy
    }

    /// `speech_found` is this frame's gain-sum decision; noise learning is
    /// suspended while it holds.
    pub fn estimate(&mut self, power: &[f32], log_energy: f32, frame: u32, speech_found: bool) -> f32 {
        let band = ENTROPY_LOW_BIN..ENTROPY_HIGH_BIN.min(power.len());
        let diff = log_energy - self.noise_log_energy;

        if frame < INIT_FRAMES {
            for (n, &p) in self.noise[band.clone()].iter_mut().zip(&power[band]) {
                *n = n.max(p);
            }
            self.noise_log_energy = self.noise_log_energy.max(log_energy);
            return MIN_ENTROPY;
        }
        if !speech_found && diff < 1.0 {
            for (n, &p) in self.noise[band.clone()].iter_mut().zip(&power[band.clone()]) {
                *n += (p - *n) * NOISE_RATE;
                *n = n.max(NOISE_FLOOR);
            }
        }

        let mut total = 0.0f32;
        for ((w, &p), &n) in self.white.iter_mut().zip(&power[band.clone()]).zip(&self.noise[band]) {
            let ratio = if n > 0.0 { p / n } else { 0.0 };
            *w = ratio.max(WHITE_FLOOR);
            total += *w;
        }
        let h: f32 = self
            .white
            .iter()
            .map(|w| {
                let prob = (w / total).max(MIN_PROB);
                -prob * prob.ln()
            })
            .sum();
        let mut entropy = 1.0 - h / ((ENTROPY_HIGH_BIN - ENTROPY_LOW_BIN) as f32).ln();

        let diff = log_energy - self.noise_log_energy;
        let track = entropy < MIN_ENTROPY || !speech_found;
        if track && diff < 2.0 {
            self.noise_log_energy = 0.98 * self.noise_log_energy + 0.02 * log_energy;
        }
        if entropy < MIN_ENTROPY {
            entropy = MIN_ENTROPY;
        }
        entropy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn flat_gains_never_trigger_variance() {
        let mut fd = FrameDropDetector::new();
        for frame in 1..40 {
            assert!(!fd.speech_by_variance(&[0.3; 65], frame));
        }
    }

    #[test]
    fn variance_jump_is_speech() {
        let mut fd = FrameDropDetector::new();
        let noisy: Vec<f32> = (0..65).map(|i| if i % 2 == 0 { 0.3 } else { 0.35 }).collect();
        for frame in 1..30 {
            fd.speech_by_variance(&noisy, frame);
        }
        let speech: Vec<f32> = (0..65).map(|i| if i % 4 < 2 { 0.1 } else { 0.9 }).collect();
        assert!(fd.speech_by_variance(&speech, 30));
    }

    #[test]
    fn gain_sum_rise_is_speech() {
        let mut fd = FrameDropDetector::new();
        for frame in 1..30 {
            assert!(!fd.speech_by_gain_sum(&[0.1; 25], frame));
        }
        assert!(fd.speech_by_gain_sum(&[0.8; 25], 30));
    }

    #[test]
    fn voiced_class_forces_low_band_speech() {
        let mut fd = FrameDropDetector::new();
        let quiet = [0.1f32; 25];
        for frame in 1..30 {
            assert!(!fd.speech_by_low_band(&quiet, frame, FrameClass::NonSpeech, MIN_ENTROPY));
        }
        assert!(fd.speech_by_low_band(&quiet, 30, FrameClass::Voiced, MIN_ENTROPY));
        assert!(fd.speech_by_low_band(&quiet, 31, FrameClass::Unvoiced, VOICED_ENTROPY));
    }

    fn flat_power() -> Vec<f32> {
        vec![1000.0; 129]
    }

    #[test]
    fn entropy_learns_then_stays_low_on_noise() {
        let mut ent = SpectralEntropy::new(129);
        for frame in 1..INIT_FRAMES {
            assert_eq!(ent.estimate(&flat_power(), 10.0, frame, false), MIN_ENTROPY);
        }
        let h = ent.estimate(&flat_power(), 10.0, INIT_FRAMES, false);
        assert_abs_diff_eq!(h, MIN_ENTROPY, epsilon = 1e-3);
    }

    #[test]
    fn tonal_frame_has_high_entropy() {
        let mut ent = SpectralEntropy::new(129);
        for frame in 1..=INIT_FRAMES {
            ent.estimate(&flat_power(), 10.0, frame, false);
        }
        let mut tonal = flat_power();
        tonal[40] = 1.0e7;
        tonal[41] = 5.0e6;
        let h = ent.estimate(&tonal, 18.0, INIT_FRAMES + 1, true);
        assert!(h > 0.3, "entropy {h}");
    }
}
