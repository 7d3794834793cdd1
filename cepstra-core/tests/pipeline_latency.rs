use std::thread;
use std::time::{Duration, Instant};

use cepstra_core::{FrontEnd, FrontEndConfig, FrontEndFrame, MfccConfig, MfccType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn noisy_speech(rate: u32, seconds: usize, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rate as usize * seconds)
        .map(|n| {
            let t = n as f32 / rate as f32;
            let voiced = (std::f32::consts::TAU * 140.0 * t).sin() * 4000.0;
            voiced as i16 + rng.gen_range(-300..300)
        })
        .collect()
}

fn run_channel(config: FrontEndConfig, samples: &[i16], seed: u64) -> Vec<FrontEndFrame> {
    let mut channel = FrontEnd::<f32>::with_seed(config, seed).expect("build channel");
    let shift = channel.frame_shift();
    samples
        .chunks_exact(shift)
        .filter_map(|frame| channel.process(frame).expect("process frame"))
        .collect()
}

#[test]
fn first_frame_arrives_after_four_suppressor_shifts() {
    for (mfcc, expected_call) in [
        (MfccConfig::narrowband(MfccType::Etsi), 5),
        (MfccConfig::broadband(MfccType::Etsi), 3),
    ] {
        let rate = mfcc.sample_rate;
        let mut channel = FrontEnd::<f32>::with_seed(FrontEndConfig::new(mfcc), 1).unwrap();
        let samples = noisy_speech(rate, 1, 2);
        let first = samples
            .chunks_exact(channel.frame_shift())
            .position(|frame| channel.process(frame).unwrap().is_some())
            .map(|p| p + 1);
        assert_eq!(first, Some(expected_call), "rate {rate}");
    }
}

#[test]
fn narrowband_channel_runs_faster_than_real_time() {
    let samples = noisy_speech(8000, 4, 3);
    let config = FrontEndConfig::new(MfccConfig::narrowband(MfccType::Pdps));

    let start = Instant::now();
    let frames = run_channel(config, &samples, 4);
    let elapsed = start.elapsed();

    assert_eq!(frames.len(), 400 - 4);
    assert!(
        elapsed < Duration::from_secs(4),
        "channel slower than real time: {:?} for 4 s of audio",
        elapsed
    );
}

#[test]
fn channels_on_separate_threads_match_a_single_thread() {
    let config = FrontEndConfig::new(MfccConfig::broadband(MfccType::Htk));
    let samples = noisy_speech(16000, 2, 5);
    let expected = run_channel(config.clone(), &samples, 9);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let config = config.clone();
            let samples = samples.clone();
            thread::spawn(move || run_channel(config, &samples, 9))
        })
        .collect();

    for handle in handles {
        let frames = handle.join().expect("channel thread panicked");
        assert_eq!(frames.len(), expected.len());
        for (a, b) in frames.iter().zip(&expected) {
            assert_eq!(a.samples, b.samples);
            assert_eq!(a.mfcc, b.mfcc);
        }
    }
}
