//! Gain factorization between the two Wiener stages.
//!
//! Stage 0 records the energy of its denoised spectrum. Stage 1 compares the
//! last three of those energies with its own noise estimate and blends its
//! mel gain curve toward 1.0 when the average SNR sits near the low-SNR
//! track, which keeps noise-only segments from turning into musical noise.

const LOW_SNR_BOOTSTRAP_FRAMES: u32 = 10;
const ALPHA_INIT: f32 = 0.8;
const ALPHA_MAX: f32 = 0.8;
const ALPHA_MIN: f32 = 0.1;
const ALPHA_RISE: f32 = 0.15;
const ALPHA_FALL: f32 = 0.3;
const SNR_MARGIN_DB: f32 = 3.5;
const TRACK_WINDOW_DB: f32 = 10.0;
const MIN_DENOISED_ENERGY: f32 = 100.0;

#[derive(Debug, Clone)]
pub struct GainFactorizer {
    denoised_energy: [f32; 3],
    low_snr_track: f32,
    alpha: f32,
}

impl GainFactorizer {
    pub fn new() -> Self {
        Self {
            denoised_energy: [0.0; 3],
            low_snr_track: 0.0,
            alpha: ALPHA_INIT,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn low_snr_track(&self) -> f32 {
        self.low_snr_track
    }

    /// Stage 0: push the summed denoised magnitude spectrum.
    pub fn record(&mut self, denoised: &[f32]) {
        self.denoised_energy.rotate_left(1);
        self.denoised_energy[2] = denoised.iter().sum();
    }

    /// Stage 1: adapt the blend from the stage-1 noise magnitude spectrum and
    /// apply it to the mel gains. `frame` is the stage-1 frame count.
    pub fn apply(&mut self, noise: &[f32], frame: u32, gains: &mut [f32]) {
        let noise_energy: f32 = noise.iter().sum();
        let [e0, e1, e2] = self.denoised_energy;
        let ratio = (e0 * e1 * e2) / (noise_energy * noise_energy * noise_energy);
        let aver_snr = if ratio > 1e-5 {
            20.0 * ratio.log10() / 3.0
        } else {
            -100.0 / 3.0
        };

        let bootstrapping = frame < LOW_SNR_BOOTSTRAP_FRAMES;
        if aver_snr - self.low_snr_track < TRACK_WINDOW_DB || bootstrapping {
            let lambda = if bootstrapping {
                1.0 - 1.0 / frame.max(1) as f32
            } else if aver_snr < self.low_snr_track {
                0.95
            } else {
                0.99
            };
            self.low_snr_track += (1.0 - lambda) * (aver_snr - self.low_snr_track);
        }

        if e2 > MIN_DENOISED_ENERGY {
            if aver_snr < self.low_snr_track + SNR_MARGIN_DB {
                self.alpha = (self.alpha + ALPHA_RISE).min(ALPHA_MAX);
            } else {
                self.alpha = (self.alpha - ALPHA_FALL).max(ALPHA_MIN);
            }
        }

        for g in gains.iter_mut() {
            *g = self.alpha * *g + (1.0 - self.alpha);
        }
    }
}

impl Default for GainFactorizer {
    fn default() -> Self {
        Self::new()
    }
}
