use cepstra_core::noise::NS_FRAME_SHIFT;
use cepstra_core::{
    FrontEnd, FrontEndConfig, MfccConfig, MfccType, NoiseConfig, NoiseSuppressor, PitchConfig,
    WienerSuppressor,
};

const PAUSE: usize = 30;

/// A faint tone long enough for the detectors to settle, then a vowel.
fn vowel(frames: usize, f0: f32) -> Vec<f32> {
    (0..(PAUSE + frames) * NS_FRAME_SHIFT)
        .map(|n| {
            let t = n as f32 / 8000.0;
            if n < PAUSE * NS_FRAME_SHIFT {
                return 3.0 * (std::f32::consts::TAU * 1500.0 * t).sin();
            }
            (1..=12)
                .filter(|h| *h as f32 * f0 < 3600.0)
                .map(|h| 2500.0 / h as f32 * (std::f32::consts::TAU * f0 * h as f32 * t).sin())
                .sum()
        })
        .collect()
}

fn suppressor(pitch: PitchConfig) -> WienerSuppressor {
    let noise = NoiseConfig {
        use_dithering: false,
        pitch_classification: true,
    };
    WienerSuppressor::new(noise, pitch).unwrap()
}

fn exhausted_frames(pitch: PitchConfig, f0: f32) -> usize {
    let limit = pitch.budget_short + pitch.budget_single + pitch.budget_double;
    let mut ns = suppressor(pitch);
    let mut exhausted = 0;
    for shift in vowel(80, f0).chunks_exact(NS_FRAME_SHIFT) {
        ns.suppress(shift).unwrap();
        let estimator = ns.voicing().unwrap().estimator();
        assert!(estimator.last_iteration_count() <= limit);
        exhausted += usize::from(estimator.budget_exhausted());
    }
    exhausted
}

#[test]
fn iteration_count_never_exceeds_the_budgets() {
    let tight = PitchConfig {
        budget_short: 2,
        budget_single: 3,
        budget_double: 4,
    };
    assert!(exhausted_frames(tight, 110.0) > 0, "tight budgets were never exhausted");
}

#[test]
fn larger_budgets_are_exhausted_less_often() {
    let tight = PitchConfig {
        budget_short: 2,
        budget_single: 3,
        budget_double: 4,
    };
    let tight_hits = exhausted_frames(tight, 150.0);
    let default_hits = exhausted_frames(PitchConfig::default(), 150.0);
    assert!(default_hits <= tight_hits, "default {default_hits} tight {tight_hits}");
}

#[test]
fn starved_budgets_still_stream() {
    let config = FrontEndConfig {
        pitch: PitchConfig {
            budget_short: 1,
            budget_single: 1,
            budget_double: 1,
        },
        ..FrontEndConfig::new(MfccConfig::narrowband(MfccType::Etsi))
    };
    let mut fe = FrontEnd::<f32>::with_seed(config, 0).unwrap();
    let samples: Vec<i16> = vowel(60, 120.0).iter().map(|&x| x as i16).collect();
    let outputs = samples
        .chunks_exact(80)
        .filter_map(|frame| fe.process(frame).unwrap())
        .count();
    assert_eq!(outputs, PAUSE + 60 - 4);
}
