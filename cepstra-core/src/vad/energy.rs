//! Log-energy VAD with a long-term mean and hangover counter.
//!
//! ## Algorithm
//!
//! 1. Frame energy `E = 0.5 + 16 * log2((64 + Σx²) / 64)` over one shift.
//! 2. Track the long-term mean `M` with `λ = 1 - 1/n` for the first 10
//!    frames and 0.97 afterwards. Frames more than 20 above `M` leave it
//!    alone; frames above `M` pull it up only at rate 0.01. `M` never drops
//!    below 80.
//! 3. From the fifth frame, `E - M > 15` is speech. Leaving a run of more
//!    than 4 speech frames arms a 15-frame hangover.

use super::{VadDecision, VoiceActivityDetector};

const SNR_THRESHOLD_UPD_LTE: f32 = 20.0;
const SNR_THRESHOLD_VAD: f32 = 15.0;
const NB_FRAME_THRESHOLD_LTE: u32 = 10;
const MIN_FRAME: u32 = 10;
const LAMBDA_LTE_LOWER_E: f32 = 0.97;
const LAMBDA_LTE_HIGHER_E: f32 = 0.99;
const ENERGY_FLOOR: f32 = 80.0;
const MIN_SPEECH_FRAME_HANGOVER: u32 = 4;
const HANGOVER: u32 = 15;
const DECISION_START_FRAME: u32 = 4;

#[derive(Debug, Clone)]
pub struct EnergyVad {
    frames: u32,
    mean_energy: f32,
    speech_frames: u32,
    hangover: u32,
    last: VadDecision,
}

impl EnergyVad {
    pub fn new() -> Self {
        Self {
            frames: 0,
            mean_energy: 0.0,
            speech_frames: 0,
            hangover: 0,
            last: VadDecision::Silence,
        }
    }

    /// Energy measure of one shift, in 1/16 octave steps above 64.
    pub fn frame_energy(samples: &[f32]) -> f32 {
        let sum: f32 = 64.0 + samples.iter().map(|x| x * x).sum::<f32>();
        0.5 + (sum / 64.0).log2() * 16.0
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Length of the current run of speech frames.
    pub fn speech_frames(&self) -> u32 {
        self.speech_frames
    }

    pub fn mean_energy(&self) -> f32 {
        self.mean_energy
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, samples: &[f32]) -> VadDecision {
        self.frames = self.frames.saturating_add(1);
        let n = self.frames;
        let lambda = if n < NB_FRAME_THRESHOLD_LTE {
            1.0 - 1.0 / n as f32
        } else {
            LAMBDA_LTE_LOWER_E
        };

        let energy = Self::frame_energy(samples);
        let diff = energy - self.mean_energy;
        if diff < SNR_THRESHOLD_UPD_LTE || n < MIN_FRAME {
            let rate = if energy < self.mean_energy || n < MIN_FRAME {
                1.0 - lambda
            } else {
                1.0 - LAMBDA_LTE_HIGHER_E
            };
            self.mean_energy += rate * diff;
            self.mean_energy = self.mean_energy.max(ENERGY_FLOOR);
        }

        if n > DECISION_START_FRAME {
            self.last = if energy - self.mean_energy > SNR_THRESHOLD_VAD {
                self.speech_frames += 1;
                VadDecision::Speech
            } else {
                if self.speech_frames > MIN_SPEECH_FRAME_HANGOVER {
                    self.hangover = HANGOVER;
                }
                self.speech_frames = 0;
                if self.hangover > 0 {
                    self.hangover -= 1;
                    VadDecision::Hangover
                } else {
                    VadDecision::Silence
                }
            };
        }
        self.last
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn silent_frame() -> Vec<f32> {
        vec![0.0; 80]
    }

    fn loud_frame(amplitude: f32) -> Vec<f32> {
        (0..80)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    fn quiet_noise() -> Vec<f32> {
        loud_frame(20.0)
    }

    #[test]
    fn energy_of_silence_is_half_step() {
        assert_abs_diff_eq!(EnergyVad::frame_energy(&silent_frame()), 0.5);
        // 64 * 3 extra energy doubles twice: 2 octaves.
        let e = EnergyVad::frame_energy(&[8.0, 8.0, 8.0]);
        assert_abs_diff_eq!(e, 32.5, epsilon = 1e-4);
    }

    #[test]
    fn first_frames_never_speech() {
        let mut vad = EnergyVad::new();
        for _ in 0..4 {
            assert_eq!(vad.classify(&loud_frame(3000.0)), VadDecision::Silence);
        }
    }

    #[test]
    fn loud_frame_after_noise_is_speech() {
        let mut vad = EnergyVad::new();
        for _ in 0..20 {
            assert_eq!(vad.classify(&quiet_noise()), VadDecision::Silence);
        }
        assert_eq!(vad.classify(&loud_frame(3000.0)), VadDecision::Speech);
        assert_eq!(vad.speech_frames(), 1);
    }

    #[test]
    fn hangover_follows_long_speech_runs_only() {
        let mut vad = EnergyVad::new();
        for _ in 0..20 {
            vad.classify(&quiet_noise());
        }
        // A short burst does not arm the hangover.
        for _ in 0..3 {
            vad.classify(&loud_frame(3000.0));
        }
        assert_eq!(vad.classify(&quiet_noise()), VadDecision::Silence);

        for _ in 0..6 {
            assert!(vad.classify(&loud_frame(3000.0)).is_speech());
        }
        for _ in 0..HANGOVER {
            assert_eq!(vad.classify(&quiet_noise()), VadDecision::Hangover);
        }
        assert_eq!(vad.classify(&quiet_noise()), VadDecision::Silence);
    }

    #[test]
    fn mean_energy_respects_floor() {
        let mut vad = EnergyVad::new();
        for _ in 0..30 {
            vad.classify(&silent_frame());
        }
        assert_abs_diff_eq!(vad.mean_energy(), ENERGY_FLOOR);
    }

    #[test]
    fn reset_matches_fresh_detector() {
        let mut vad = EnergyVad::new();
        for _ in 0..12 {
            vad.classify(&loud_frame(500.0));
        }
        vad.reset();
        assert_eq!(vad.frames(), 0);
        assert_eq!(vad.mean_energy(), 0.0);
    }
}
