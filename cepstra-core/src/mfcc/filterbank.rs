//! Power spectrum to log mel spectrum, one routine per [`MfccType`].
//!
//! - HTK weights the magnitude spectrum.
//! - ETSI weights the power spectrum.
//! - DPS weights the absolute power difference of adjacent bins.
//! - PDPS weights a differential spectrum in which a bin is only allowed
//!   to dominate a neighbour when it also exceeds the sine-kernel prediction
//!   made from the bins above it, which keeps isolated tonal peaks from
//!   leaking into their neighbours.

use super::params::{MelChannels, SINE_WIDTH};
use crate::config::MfccType;
use crate::numeric::Scalar;

const PDPS_WEIGHT: f64 = 1.15;
const PDPS_THRESHOLD: f64 = 1000.0;

/// Scratch for the PDPS prediction.
#[derive(Debug, Clone)]
pub(crate) struct MelFilterBank<S> {
    kind: MfccType,
    predicted: Vec<S>,
    weight: S,
    threshold: S,
    half: S,
}

impl<S: Scalar> MelFilterBank<S> {
    pub fn new(kind: MfccType, bins: usize) -> Self {
        Self {
            kind,
            predicted: vec![S::ZERO; bins],
            weight: S::from_f64(PDPS_WEIGHT),
            threshold: S::from_f64(PDPS_THRESHOLD),
            half: S::from_f64(0.5),
        }
    }

    /// `power` holds at least `fft_size / 2` bins. `out` receives the log
    /// mel spectrum; channels below 1 before the log are set to 0.
    pub fn apply(&mut self, power: &[S], channels: &MelChannels<S>, sine: &[S; SINE_WIDTH], out: &mut [S]) {
        out.fill(S::ZERO);
        match self.kind {
            MfccType::Htk => {
                for bin in channels.low_bin..=channels.high_bin {
                    channels.accumulate(bin, power[bin].sqrt(), out);
                }
            }
            MfccType::Etsi => {
                for bin in channels.low_bin..=channels.high_bin {
                    channels.accumulate(bin, power[bin], out);
                }
            }
            MfccType::Dps => {
                for bin in channels.low_bin..channels.high_bin {
                    channels.accumulate(bin, (power[bin] - power[bin + 1]).abs(), out);
                }
            }
            MfccType::Pdps => self.predictive_diff(power, channels, sine, out),
        }
        for v in out.iter_mut() {
            *v = if *v < S::ONE { S::ZERO } else { v.ln() };
        }
    }

    fn predictive_diff(
        &mut self,
        power: &[S],
        channels: &MelChannels<S>,
        sine: &[S; SINE_WIDTH],
        out: &mut [S],
    ) {
        let half = self.predicted.len();
        for k in 0..half {
            let end = half.min(k + SINE_WIDTH + 1);
            self.predicted[k] = power[(k + 1).min(end)..end]
                .iter()
                .zip(sine)
                .fold(S::ZERO, |acc, (&p, &w)| acc.max_of(p * w));
        }

        let low = channels.low_bin;
        let mut prev_right = self.right_diff(power, low);
        let mut prev_left = if low >= 2 {
            self.left_diff(power, low - 1)
        } else {
            S::ZERO
        };

        for k in low..=channels.high_bin {
            let right = if k + 2 < half {
                self.right_diff(power, k + 1)
            } else {
                S::ZERO
            };
            let left = if k > 0 {
                self.left_diff(power, k)
            } else {
                S::ZERO
            };
            let ek = (left + right + prev_left + prev_right) * self.half;
            if ek >= self.threshold {
                channels.accumulate(k, ek, out);
            }
            prev_left = left;
            prev_right = right;
        }
    }

    /// Difference between bin `k` and the bin above it.
    fn right_diff(&self, p: &[S], k: usize) -> S {
        let (here, above) = (p[k], p[k + 1]);
        if above > self.predicted[k + 1] && here < above {
            here - self.weight * above
        } else if above >= self.predicted[k] && here > above {
            self.weight * here - above
        } else {
            here - above
        }
    }

    /// Difference between bin `k` and the bin below it.
    fn left_diff(&self, p: &[S], k: usize) -> S {
        let (here, below) = (p[k], p[k - 1]);
        if below > self.predicted[k - 1] && below > here {
            here - self.weight * below
        } else if here < self.predicted[k - 1] && here >= below {
            self.weight * here - below
        } else {
            here - below
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MfccConfig;
    use crate::mfcc::params::MfccTables;

    fn run(kind: MfccType, power: &[f32]) -> Vec<f32> {
        let cfg = MfccConfig::narrowband(kind);
        let tables = MfccTables::<f32>::new(&cfg);
        let mut bank = MelFilterBank::new(kind, cfg.fft_size / 2);
        let mut out = vec![0.0; cfg.num_filters];
        bank.apply(power, &tables.channels, &tables.sine, &mut out);
        out
    }

    #[test]
    fn zero_power_floors_every_variant() {
        let power = vec![0.0f32; 129];
        for kind in [MfccType::Htk, MfccType::Etsi, MfccType::Dps, MfccType::Pdps] {
            assert!(run(kind, &power).iter().all(|&v| v == 0.0), "{kind:?}");
        }
    }

    #[test]
    fn flat_power_has_no_differential_energy() {
        let power = vec![1.0e6f32; 129];
        assert!(run(MfccType::Dps, &power).iter().all(|&v| v == 0.0));
        assert!(run(MfccType::Etsi, &power).iter().all(|&v| v > 0.0));
    }

    #[test]
    fn etsi_and_htk_share_channel_weights() {
        let power = vec![1.0e6f32; 129];
        let htk = run(MfccType::Htk, &power);
        let etsi = run(MfccType::Etsi, &power);
        for (h, e) in htk.iter().zip(&etsi) {
            let w = h - 1.0e3f32.ln();
            assert!((e - 1.0e6f32.ln() - w).abs() < 1e-3);
        }
    }

    #[test]
    fn tonal_peak_reaches_pdps_channels() {
        let mut power = vec![10.0f32; 129];
        power[40] = 1.0e8;
        let out = run(MfccType::Pdps, &power);
        assert!(out.iter().any(|&v| v > 10.0));
    }
}
