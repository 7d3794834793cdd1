//! MFCC feature extraction, generic over the numeric path.
//!
//! ## Algorithm
//!
//! Per input shift:
//!
//! 1. An all-zero shift is dithered with uniform integers in `[-16, 15]`.
//! 2. Pre-emphasis, carrying the last raw sample across calls.
//! 3. Block powers give the log frame power of the analysis window.
//! 4. The first `frame_size / frame_shift - 1` shifts only fill the window
//!    and return no output.
//! 5. Hamming window, zero pad to the FFT size, real FFT, power spectrum.
//! 6. Log mel spectrum (HTK, ETSI, DPS or PDPS), then the DCT to c1..cP.
//! 7. The energy slot gets the log frame power (TIME) or the log subband
//!    energy (FREQ), and is blended with the mean log mel energy when
//!    `weight_c0` is positive.
//! 8. Sinusoidal liftering, then the spectral entropy.
//!
//! ```text
//! [c1 .. cP | energy | entropy?]
//! ```

mod energy;
mod entropy;
mod filterbank;
mod params;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use entropy::MFCC_MIN_ENTROPY;

use crate::config::{EnergyType, MfccConfig};
use crate::error::{CepstraError, Result};
use crate::numeric::fft::spectrum_buffer;
use crate::numeric::{ArithStatus, Cplx, RealFft, Scalar};
use energy::{band_log_energy, energy_band, BlockPower, EnergyBounds};
use entropy::{entropy_band, EntropyTracker};
use filterbank::MelFilterBank;
use params::MfccTables;

const DITHER_LOW: i16 = -16;
const DITHER_HIGH: i16 = 16;

/// Outcome of one [`MfccExtractor::convert_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConvertStatus {
    Fail,
    NoOutput,
    Ok,
}

impl ConvertStatus {
    pub fn of<T>(result: &Result<Option<T>>) -> Self {
        match result {
            Err(_) => ConvertStatus::Fail,
            Ok(None) => ConvertStatus::NoOutput,
            Ok(Some(_)) => ConvertStatus::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfccFrame {
    /// Output frame index, counting from 0.
    pub index: u32,
    /// `[c1 .. cP, energy]`, plus the entropy when enabled.
    pub features: Vec<f32>,
    /// Energy term before the C0 blend.
    pub log_energy: f32,
    pub log_power: f32,
    pub entropy: f32,
    pub filter_bank: Vec<f32>,
    pub status: ArithStatus,
}

/// One channel's cepstral analysis state.
pub struct MfccExtractor<S: Scalar = f32> {
    config: MfccConfig,
    tables: MfccTables<S>,
    fft: S::Fft,
    bank: MelFilterBank<S>,
    dither: Option<StdRng>,
    dither_seed: Option<u64>,
    prior_sample: S,
    /// Pre-emphasized samples of the earlier shifts in the window.
    history: Vec<S>,
    shift: Vec<S>,
    blocks: BlockPower<S>,
    fft_in: Vec<S>,
    spectrum: Vec<Cplx<S>>,
    power: Vec<S>,
    mel: Vec<S>,
    cepstra: Vec<S>,
    bounds: EnergyBounds,
    entropy: EntropyTracker<S>,
    input_frames: u32,
    output_frames: u32,
}

impl<S: Scalar> MfccExtractor<S> {
    /// Dither seeded from OS entropy.
    pub fn new(config: MfccConfig) -> Result<Self> {
        Self::with_seed(config, rand::random())
    }

    /// Dither drawn from a seeded generator, for reproducible streams.
    pub fn with_seed(config: MfccConfig, seed: u64) -> Result<Self> {
        Self::build(config, Some(seed))
    }

    /// No dither: all-zero shifts stay zero.
    pub fn without_dither(config: MfccConfig) -> Result<Self> {
        Self::build(config, None)
    }

    fn build(config: MfccConfig, dither_seed: Option<u64>) -> Result<Self> {
        config.validate()?;
        let fft = <S::Fft as RealFft<S>>::plan(config.fft_size)?;
        let spectrum = spectrum_buffer(&fft);
        let bins = config.fft_size / 2 + 1;
        let tables = MfccTables::new(&config);
        debug!(
            mfcc_type = ?config.mfcc_type,
            low_bin = tables.channels.low_bin,
            high_bin = tables.channels.high_bin,
            "mfcc tables built"
        );
        Ok(Self {
            tables,
            fft,
            bank: MelFilterBank::new(config.mfcc_type, config.fft_size / 2),
            dither: dither_seed.map(StdRng::seed_from_u64),
            dither_seed,
            prior_sample: S::ZERO,
            history: vec![S::ZERO; config.frame_size - config.frame_shift],
            shift: vec![S::ZERO; config.frame_shift],
            blocks: BlockPower::new(config.frame_size, config.frame_shift),
            fft_in: vec![S::ZERO; config.fft_size],
            spectrum,
            power: vec![S::ZERO; bins],
            mel: vec![S::ZERO; config.num_filters],
            cepstra: vec![S::ZERO; config.num_cepstra + 1],
            bounds: EnergyBounds::new(),
            entropy: EntropyTracker::new(entropy_band(config.sample_rate, bins)),
            input_frames: 0,
            output_frames: 0,
            config,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    pub fn feature_dim(&self) -> usize {
        self.config.feature_dim()
    }

    /// Calls that return no output before the first frame.
    pub fn latency(&self) -> usize {
        self.config.frame_size / self.config.frame_shift - 1
    }

    /// Restore the initial state, dither generator included.
    pub fn reset(&mut self) {
        self.dither = self.dither_seed.map(StdRng::seed_from_u64);
        self.prior_sample = S::ZERO;
        self.history.fill(S::ZERO);
        self.blocks.reset();
        self.bounds = EnergyBounds::new();
        self.entropy.reset();
        self.input_frames = 0;
        self.output_frames = 0;
    }

    /// Feed one shift in capture order. `vad` marks frames judged as speech
    /// upstream; they never adapt the entropy noise model.
    pub fn convert_frame(&mut self, frame: &[i16], vad: bool) -> Result<Option<MfccFrame>> {
        if frame.len() != self.config.frame_shift {
            return Err(CepstraError::FrameLength {
                expected: self.config.frame_shift,
                actual: frame.len(),
            });
        }
        let mut status = ArithStatus::default();
        self.load_shift(frame);

        let warmup = self.latency() as u32;
        let log_power = status.observe(self.blocks.push(&self.shift, self.input_frames >= warmup));
        self.input_frames += 1;

        if self.input_frames <= warmup {
            let n = self.config.frame_shift;
            self.history.rotate_left(n);
            let start = self.history.len() - n;
            self.history[start..].copy_from_slice(&self.shift);
            return Ok(None);
        }

        self.analyse(&mut status);

        let log_energy = match self.config.energy_type {
            EnergyType::Time => log_power,
            EnergyType::Freq => {
                let band = energy_band(self.config.sample_rate, self.power.len());
                let e = status.observe(band_log_energy(&self.power, band));
                self.bounds.observe(e.to_f32(), self.input_frames);
                e
            }
        };

        let entropy = self.entropy.estimate(
            &self.power,
            log_energy.to_f32(),
            log_power.to_f32(),
            self.output_frames,
            vad,
            self.bounds.range(),
        ) + self.config.entropy_bias as f32;

        self.cepstrum(log_energy, &mut status);

        let mut features: Vec<f32> = self.cepstra.iter().map(|c| c.to_f32()).collect();
        if self.config.use_spec_entropy {
            features.push(entropy);
        }
        if status.saturated {
            warn!(
                frame = self.output_frames,
                count = status.saturation_count,
                "mfcc arithmetic saturated"
            );
        }

        let out = MfccFrame {
            index: self.output_frames,
            features,
            log_energy: log_energy.to_f32(),
            log_power: log_power.to_f32(),
            entropy,
            filter_bank: self.mel.iter().map(|m| m.to_f32()).collect(),
            status,
        };
        self.output_frames += 1;
        Ok(Some(out))
    }

    /// Dither, convert and pre-emphasize one shift into `self.shift`.
    fn load_shift(&mut self, frame: &[i16]) {
        let silent = frame.iter().all(|&x| x == 0);
        match (&mut self.dither, silent) {
            (Some(rng), true) => {
                for (slot, &x) in self.shift.iter_mut().zip(frame) {
                    let d: i16 = rng.gen_range(DITHER_LOW..DITHER_HIGH);
                    *slot = S::from_i32(i32::from(x.saturating_add(d)));
                }
            }
            _ => {
                for (slot, &x) in self.shift.iter_mut().zip(frame) {
                    *slot = S::from_i32(i32::from(x));
                }
            }
        }

        let alpha = self.tables.preemphasis;
        let last = self.shift[self.shift.len() - 1];
        for n in (1..self.shift.len()).rev() {
            let prev = self.shift[n - 1];
            self.shift[n] -= alpha * prev;
        }
        self.shift[0] -= alpha * self.prior_sample;
        self.prior_sample = last;
    }

    /// Window, transform and filter the current analysis window, then slide
    /// the history by one shift.
    fn analyse(&mut self, status: &mut ArithStatus) {
        let kept = self.history.len();
        let size = self.config.frame_size;
        self.fft_in.fill(S::ZERO);
        self.fft_in[..kept].copy_from_slice(&self.history);
        self.fft_in[kept..size].copy_from_slice(&self.shift);
        for (x, &w) in self.fft_in[..size].iter_mut().zip(&self.tables.hamming) {
            *x *= w;
        }

        let n = self.config.frame_shift;
        self.history.rotate_left(n);
        self.history[kept - n..].copy_from_slice(&self.shift);

        self.fft.forward(&self.fft_in, &mut self.spectrum);
        for (p, c) in self.power.iter_mut().zip(&self.spectrum) {
            *p = status.observe(c.re * c.re + c.im * c.im);
        }

        self.bank
            .apply(&self.power, &self.tables.channels, &self.tables.sine, &mut self.mel);
        status.observe_all(&self.mel);
    }

    /// DCT, energy slot and lifter into `self.cepstra`.
    fn cepstrum(&mut self, log_energy: S, status: &mut ArithStatus) {
        let order = self.config.num_cepstra;
        for (c, row) in self.cepstra[..order].iter_mut().zip(&self.tables.dct) {
            *c = row
                .iter()
                .zip(&self.mel)
                .fold(S::ZERO, |acc, (&w, &m)| acc + w * m);
        }

        let mut energy = log_energy;
        let w = self.tables.weight_c0;
        if w > S::ZERO {
            let sum = self.mel.iter().fold(S::ZERO, |acc, &m| acc + m);
            let mean = sum / S::from_i32(self.mel.len() as i32);
            energy = (S::ONE - w) * energy + w * mean;
        }
        self.cepstra[order] = energy;

        for (c, &l) in self.cepstra[..order].iter_mut().zip(&self.tables.lifter) {
            *c *= l;
        }
        status.observe_all(&self.cepstra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MfccType;
    use crate::numeric::Fixed;

    fn tone(freq: f32, amp: f32, start: usize, len: usize, rate: f32) -> Vec<i16> {
        (start..start + len)
            .map(|n| (amp * (std::f32::consts::TAU * freq * n as f32 / rate).sin()) as i16)
            .collect()
    }

    #[test]
    fn first_two_shifts_produce_nothing() {
        let mut ex = MfccExtractor::<f32>::with_seed(MfccConfig::narrowband(MfccType::Htk), 1).unwrap();
        assert_eq!(ex.latency(), 2);
        let frame = tone(300.0, 1000.0, 0, 80, 8000.0);
        assert_eq!(ConvertStatus::of(&ex.convert_frame(&frame, false)), ConvertStatus::NoOutput);
        assert_eq!(ConvertStatus::of(&ex.convert_frame(&frame, false)), ConvertStatus::NoOutput);
        assert_eq!(ConvertStatus::of(&ex.convert_frame(&frame, false)), ConvertStatus::Ok);
    }

    #[test]
    fn wrong_length_fails() {
        let mut ex = MfccExtractor::<f32>::without_dither(MfccConfig::narrowband(MfccType::Htk)).unwrap();
        let result = ex.convert_frame(&[0; 79], false);
        assert_eq!(ConvertStatus::of(&result), ConvertStatus::Fail);
        assert!(matches!(
            result,
            Err(CepstraError::FrameLength { expected: 80, actual: 79 })
        ));
    }

    #[test]
    fn silence_without_dither_sits_on_the_floor() {
        let mut cfg = MfccConfig::narrowband(MfccType::Htk);
        cfg.use_spec_entropy = true;
        let mut ex = MfccExtractor::<f32>::without_dither(cfg).unwrap();
        let mut frames = Vec::new();
        for _ in 0..10 {
            if let Some(f) = ex.convert_frame(&[0; 80], false).unwrap() {
                frames.push(f);
            }
        }
        assert_eq!(frames.len(), 8);
        for f in &frames {
            assert_eq!(f.log_energy, 0.0);
            assert_eq!(f.features.len(), 14);
            assert!(f.features.iter().all(|v| v.is_finite()));
            assert!(f.entropy <= MFCC_MIN_ENTROPY + 1e-6);
        }
    }

    #[test]
    fn dither_keeps_silence_finite() {
        let mut ex = MfccExtractor::<f32>::with_seed(MfccConfig::narrowband(MfccType::Etsi), 9).unwrap();
        for _ in 0..6 {
            if let Some(f) = ex.convert_frame(&[0; 80], false).unwrap() {
                assert!(f.log_power > 0.0);
                assert!(f.features.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn every_variant_tracks_a_tone() {
        for kind in [MfccType::Htk, MfccType::Etsi, MfccType::Dps, MfccType::Pdps] {
            let mut cfg = MfccConfig::narrowband(kind);
            cfg.energy_type = EnergyType::Freq;
            let mut ex = MfccExtractor::<f32>::with_seed(cfg, 3).unwrap();
            let mut last = None;
            for i in 0..12 {
                let frame = tone(440.0, 8000.0, i * 80, 80, 8000.0);
                last = ex.convert_frame(&frame, true).unwrap().or(last);
            }
            let f = last.unwrap();
            assert!(f.features.iter().all(|v| v.is_finite()), "{kind:?}");
            assert!(f.log_energy > 10.0, "{kind:?} energy {}", f.log_energy);
            assert!(f.filter_bank.iter().any(|&m| m > 0.0), "{kind:?}");
        }
    }

    #[test]
    fn broadband_uses_two_block_shifts() {
        let mut ex = MfccExtractor::<f32>::with_seed(MfccConfig::broadband(MfccType::Htk), 5).unwrap();
        let mut produced = 0;
        for i in 0..5 {
            let frame = tone(1000.0, 4000.0, i * 160, 160, 16000.0);
            if ex.convert_frame(&frame, false).unwrap().is_some() {
                produced += 1;
            }
        }
        assert_eq!(produced, 3);
    }

    #[test]
    fn fixed_path_matches_float() {
        let cfg = MfccConfig::narrowband(MfccType::Htk);
        let mut float = MfccExtractor::<f32>::without_dither(cfg.clone()).unwrap();
        let mut fixed = MfccExtractor::<Fixed>::without_dither(cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let mut compared = 0;
        for _ in 0..8 {
            let frame: Vec<i16> = (0..80).map(|_| rng.gen_range(-2000..2000)).collect();
            let a = float.convert_frame(&frame, false).unwrap();
            let b = fixed.convert_frame(&frame, false).unwrap();
            if let (Some(a), Some(b)) = (a, b) {
                assert!(!b.status.saturated);
                assert!((a.log_power - b.log_power).abs() < 1e-3);
                for (x, y) in a.features.iter().zip(&b.features) {
                    assert!((x - y).abs() < 0.05 * x.abs().max(1.0), "{x} vs {y}");
                }
                compared += 1;
            }
        }
        assert_eq!(compared, 6);
    }

    #[test]
    fn reset_replays_the_stream() {
        let cfg = MfccConfig::narrowband(MfccType::Pdps);
        let mut ex = MfccExtractor::<f32>::without_dither(cfg).unwrap();
        let frames: Vec<Vec<i16>> = (0..6).map(|i| tone(250.0, 5000.0, i * 80, 80, 8000.0)).collect();
        let first: Vec<_> = frames.iter().map(|f| ex.convert_frame(f, false).unwrap()).collect();
        ex.reset();
        let second: Vec<_> = frames.iter().map(|f| ex.convert_frame(f, false).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn reset_replays_the_dither() {
        let cfg = MfccConfig::narrowband(MfccType::Etsi);
        let mut ex = MfccExtractor::<f32>::with_seed(cfg, 11).unwrap();
        let silence = vec![0i16; 80];
        let first: Vec<_> = (0..6).map(|_| ex.convert_frame(&silence, false).unwrap()).collect();
        ex.reset();
        let second: Vec<_> = (0..6).map(|_| ex.convert_frame(&silence, false).unwrap()).collect();
        assert_eq!(first, second);

        let mut plain = MfccExtractor::<f32>::without_dither(MfccConfig::narrowband(MfccType::Etsi)).unwrap();
        let undithered: Vec<_> = (0..6).map(|_| plain.convert_frame(&silence, false).unwrap()).collect();
        assert_ne!(first, undithered);
    }
}
