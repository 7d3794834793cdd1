//! Frame voicing classification.
//!
//! A pure decision over one 200-sample analysis frame:
//!
//! 1. VAD reports no speech → `NonSpeech`.
//! 2. No pitch period → `Unvoiced`.
//! 3. Upper-band energy at or below 0.18 % of the frame energy, at least
//!    `floor(0.4375 * 199)` sign changes, or a hangover frame → `Mixed`.
//! 4. Otherwise → `Voiced`.

use serde::{Deserialize, Serialize};

pub const CLASSIFY_FRAME_LEN: usize = 200;
const UB_ENERGY_FRACTION: f32 = 0.0018;
const ZCM_FRACTION: f32 = 0.4375;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameClass {
    #[default]
    NonSpeech = 0,
    Unvoiced = 1,
    Mixed = 2,
    Voiced = 3,
}

impl FrameClass {
    pub fn from_index(index: i32) -> Self {
        match index {
            i if i <= 0 => FrameClass::NonSpeech,
            1 => FrameClass::Unvoiced,
            2 => FrameClass::Mixed,
            _ => FrameClass::Voiced,
        }
    }

    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn is_speech(self) -> bool {
        self != FrameClass::NonSpeech
    }
}

/// Number of sign changes, counting zero as positive.
pub fn zero_crossings(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count()
}

/// Classify one frame. `speech` and `upper_band` hold at least
/// [`CLASSIFY_FRAME_LEN`] samples; extra samples are ignored.
pub fn classify_frame(
    vad: bool,
    hangover: bool,
    period: f32,
    energy: f32,
    speech: &[f32],
    upper_band: &[f32],
) -> FrameClass {
    if !vad {
        return FrameClass::NonSpeech;
    }
    if period <= 0.0 {
        return FrameClass::Unvoiced;
    }

    let n = CLASSIFY_FRAME_LEN.min(speech.len()).min(upper_band.len());
    let ub_energy: f32 = upper_band[..n].iter().map(|x| x * x).sum();
    let zcm = zero_crossings(&speech[..n]);
    let zcm_limit = (ZCM_FRACTION * (CLASSIFY_FRAME_LEN - 1) as f32) as usize;

    if ub_energy <= UB_ENERGY_FRACTION * energy || zcm >= zcm_limit || hangover {
        FrameClass::Mixed
    } else {
        FrameClass::Voiced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, amp: f32) -> Vec<f32> {
        (0..CLASSIFY_FRAME_LEN)
            .map(|i| amp * (std::f32::consts::TAU * freq * i as f32 / 8000.0).sin())
            .collect()
    }

    fn alternating(crossings: usize) -> Vec<f32> {
        // One sign change per step for the first `crossings` steps.
        let mut sign = 1.0f32;
        (0..CLASSIFY_FRAME_LEN)
            .map(|i| {
                if i > 0 && i <= crossings {
                    sign = -sign;
                }
                sign
            })
            .collect()
    }

    #[test]
    fn no_vad_is_non_speech() {
        let s = tone(200.0, 1000.0);
        assert_eq!(classify_frame(false, true, 40.0, 1.0, &s, &s), FrameClass::NonSpeech);
    }

    #[test]
    fn no_pitch_is_unvoiced() {
        let s = tone(200.0, 1000.0);
        assert_eq!(classify_frame(true, false, 0.0, 1.0, &s, &s), FrameClass::Unvoiced);
    }

    #[test]
    fn strong_upper_band_and_few_crossings_is_voiced() {
        let s = tone(200.0, 1000.0);
        let energy: f32 = s.iter().map(|x| x * x).sum();
        assert_eq!(classify_frame(true, false, 40.0, energy, &s, &s), FrameClass::Voiced);
    }

    #[test]
    fn hangover_forces_mixed() {
        let s = tone(200.0, 1000.0);
        let energy: f32 = s.iter().map(|x| x * x).sum();
        assert_eq!(classify_frame(true, true, 40.0, energy, &s, &s), FrameClass::Mixed);
    }

    #[test]
    fn upper_band_threshold_is_inclusive() {
        let speech = tone(200.0, 1000.0);
        let ub = vec![1.0f32; CLASSIFY_FRAME_LEN];
        // ub energy = 200, so the boundary energy is 200 / 0.0018.
        let at_boundary = 200.0 / UB_ENERGY_FRACTION;
        assert_eq!(
            classify_frame(true, false, 40.0, at_boundary * 1.001, &speech, &ub),
            FrameClass::Mixed
        );
        assert_eq!(
            classify_frame(true, false, 40.0, at_boundary * 0.99, &speech, &ub),
            FrameClass::Voiced
        );
    }

    #[test]
    fn zero_crossing_threshold_is_inclusive() {
        let ub = vec![1.0f32; CLASSIFY_FRAME_LEN];
        let at_limit = alternating(87);
        assert_eq!(zero_crossings(&at_limit), 87);
        assert_eq!(classify_frame(true, false, 40.0, 1.0, &at_limit, &ub), FrameClass::Mixed);

        let below = alternating(86);
        assert_eq!(classify_frame(true, false, 40.0, 1.0, &below, &ub), FrameClass::Voiced);
    }

    #[test]
    fn classification_is_deterministic() {
        let s = tone(350.0, 300.0);
        let first = classify_frame(true, false, 22.0, 5.0e6, &s, &s);
        for _ in 0..10 {
            assert_eq!(classify_frame(true, false, 22.0, 5.0e6, &s, &s), first);
        }
    }

    #[test]
    fn class_index_round_trip() {
        for class in [
            FrameClass::NonSpeech,
            FrameClass::Unvoiced,
            FrameClass::Mixed,
            FrameClass::Voiced,
        ] {
            assert_eq!(FrameClass::from_index(class.index()), class);
        }
    }
}
