//! Read-only tables derived once from an [`MfccConfig`].

use std::f64::consts::PI;

use crate::config::{MfccConfig, MfccType};
use crate::numeric::Scalar;

/// Taps of the sine kernel predicting the power of the next bins.
pub(crate) const SINE_WIDTH: usize = 6;

fn mel(freq: f64) -> f64 {
    1127.0 * (1.0 + freq / 700.0).ln()
}

/// Triangular mel filter bank in the lower-channel form: each bin inside
/// `low_bin..=high_bin` splits its value between `lower` and `lower + 1`.
#[derive(Debug, Clone)]
pub(crate) struct MelChannels<S> {
    pub low_bin: usize,
    pub high_bin: usize,
    /// `None` for bins below the first centre.
    pub lower: Vec<Option<usize>>,
    pub weight: Vec<S>,
    pub filters: usize,
}

impl<S: Scalar> MelChannels<S> {
    pub fn new(cfg: &MfccConfig) -> Self {
        let fft = cfg.fft_size as f64;
        let rate = f64::from(cfg.sample_rate);
        let half = cfg.fft_size / 2;
        let filters = cfg.num_filters;

        let low_bin = ((f64::from(cfg.lower_mel_freq) * fft / rate + 1.5).floor() as usize).max(1);
        let high_bin =
            ((f64::from(cfg.upper_mel_freq) * fft / rate - 0.5).floor() as usize).min(half - 1);

        let mel_low = mel(f64::from(cfg.lower_mel_freq));
        let mel_high = mel(f64::from(cfg.upper_mel_freq));
        let centres: Vec<f64> = (0..=filters)
            .map(|ch| (ch + 1) as f64 / (filters + 1) as f64 * (mel_high - mel_low) + mel_low)
            .collect();

        let mut lower = vec![None; half];
        let mut weight = vec![S::ZERO; half];
        let mut ch = 0;
        for bin in low_bin..=high_bin {
            let m = mel(bin as f64 * rate / fft);
            while ch < filters && centres[ch] < m {
                ch += 1;
            }
            let w = match ch.checked_sub(1) {
                Some(lo) => {
                    lower[bin] = Some(lo);
                    (centres[lo + 1] - m) / (centres[lo + 1] - centres[lo])
                }
                None => (centres[0] - m) / (centres[0] - mel_low),
            };
            weight[bin] = S::from_f64(w);
        }

        Self {
            low_bin,
            high_bin,
            lower,
            weight,
            filters,
        }
    }

    /// Spread `value` of `bin` over its two channels.
    pub fn accumulate(&self, bin: usize, value: S, out: &mut [S]) {
        let upper_share = self.weight[bin] * value;
        let lower = self.lower[bin];
        if let Some(ch) = lower {
            out[ch] += upper_share;
        }
        let next = lower.map_or(0, |ch| ch + 1);
        if next < self.filters {
            out[next] += value - upper_share;
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MfccTables<S> {
    pub hamming: Vec<S>,
    pub channels: MelChannels<S>,
    /// `num_cepstra` rows of `num_filters` cosines.
    pub dct: Vec<Vec<S>>,
    /// Empty when liftering is off.
    pub lifter: Vec<S>,
    pub sine: [S; SINE_WIDTH],
    pub preemphasis: S,
    pub weight_c0: S,
}

impl<S: Scalar> MfccTables<S> {
    pub fn new(cfg: &MfccConfig) -> Self {
        let n = cfg.frame_size;
        let hamming = (0..n)
            .map(|i| S::from_f64(0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()))
            .collect();

        let filters = cfg.num_filters as f64;
        let norm = if cfg.mfcc_type == MfccType::Etsi {
            1.0
        } else {
            (2.0 / filters).sqrt()
        };
        let dct = (0..cfg.num_cepstra)
            .map(|i| {
                (0..cfg.num_filters)
                    .map(|j| {
                        S::from_f64(norm * ((i + 1) as f64 * PI / filters * (j as f64 + 0.5)).cos())
                    })
                    .collect()
            })
            .collect();

        let order = cfg.lifter_order as f64;
        let lifter = if cfg.lifter_order > 0 {
            (0..cfg.num_cepstra)
                .map(|i| S::from_f64(1.0 + order / 2.0 * ((i + 1) as f64 * PI / order).sin()))
                .collect()
        } else {
            Vec::new()
        };

        let mut sine = [S::ZERO; SINE_WIDTH];
        for (i, tap) in sine.iter_mut().enumerate() {
            *tap = S::from_f64(((i + 1) as f64 * PI / (2 * SINE_WIDTH) as f64).sin());
        }

        Self {
            hamming,
            channels: MelChannels::new(cfg),
            dct,
            lifter,
            sine,
            preemphasis: S::from_f32(cfg.preemphasis),
            weight_c0: S::from_f32(cfg.weight_c0),
        }
    }
}
