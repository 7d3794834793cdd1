//! Spectral-peak pitch estimator.
//!
//! ## Algorithm
//!
//! 1. Interpolate the single-window DFT by two. This runs on every frame,
//!    silent or not, because the next frame builds its double-window DFT
//!    from it.
//! 2. Low-energy or non-speech frames are unvoiced; only the track state is
//!    updated.
//! 3. Search three pitch sub-ranges in order of cost, narrowed around the
//!    stable track when one exists:
//!
//! ```text
//!   short  200..420 Hz  single-window peaks           strict
//!   single 100..210 Hz  same peaks                    strict
//!   double  52..120 Hz  double-window peaks            relaxed over all six
//! ```
//!
//! 4. Per sub-range, spectral peaks vote through a harmonic utility function
//!    whose dominant maxima become candidates, each scored by its utility
//!    over all peaks and by time-domain correlation.
//! 5. The first confident match ends the search. Otherwise the final choice
//!    is made over all candidates with rules that favour the previous and
//!    the stable-track pitch.
//!
//! The utility construction is bounded by a per-stage budget of harmonic
//! shapes, so one frame never costs more than a fixed amount of work.

mod rom;
mod select;
mod spectrum;
mod utility;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use rom::PitchRom;

use crate::config::PitchConfig;
use crate::error::{CepstraError, Result};
use crate::numeric::Cplx;
use crate::pcorr::{LaggedSignal, PitchCorrelator};
use crate::preproc::DOWN_SAMPLE;
use select::{is_continuous, select_final, select_top, Candidate, TrackState};
use spectrum::{dirichlet_interpolate, double_window, prepare_peaks, InterpDft, PeakScratch};
use spectrum::{MAX_PEAKS_FINAL, MIN_PEAKS};
use utility::{dominant_maxima, utility_at, UtilityBuilder};

pub(crate) const DIRICHLET_SPAN: usize = 8;
pub(crate) const REF_BANDWIDTH: f32 = 4000.0;
pub(crate) const MIN_PITCH_FREQ: f32 = 52.0;
pub(crate) const UDIST1: f32 = 65.0 / 512.0;
pub(crate) const UDIST2: f32 = 100.0 / 512.0;
pub(crate) const USTEP: f32 = 0.5;

/// Log energy below which a frame is unvoiced without analysis.
pub const LOG_ENERGY_THRESHOLD: f32 = 13.6;
/// Pitch periods are reported in samples at this rate.
pub const REF_SAMPLE_RATE: f32 = 8000.0;
pub const MIN_STABLE_FRAMES: u32 = 6;
pub const MAX_TRACK_GAP_FRAMES: u32 = 2;

const MAX_PITCH_FREQ: f32 = 420.0;
const SHORT_RANGE: (f32, f32) = (200.0, MAX_PITCH_FREQ);
const SINGLE_RANGE: (f32, f32) = (100.0, 210.0);
const DOUBLE_RANGE: (f32, f32) = (MIN_PITCH_FREQ, 120.0);
const CANDS_PER_RANGE: usize = 2;
const TOTAL_CANDS: usize = 3 * CANDS_PER_RANGE;
const NO_RANGE: (f32, f32) = (-1.0, -1.0);

/// A frequency with its amplitude: a spectral peak or a utility break point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Point {
    pub freq: f32,
    pub amp: f32,
}

/// Per-frame inputs. The spectra cover `PitchRom::stft_bins()` bins of the
/// 256-point DFT of the analysis window.
#[derive(Debug, Clone, Copy)]
pub struct PitchInput<'a> {
    pub spec_average: f32,
    pub stft: &'a [Cplx<f32>],
    pub power_spectrum: &'a [f32],
    /// Low band decimated by 4, origin after the history samples.
    pub decimated: LaggedSignal<'a>,
    pub log_energy: f32,
    pub is_speech: bool,
    pub low_band_noise: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchEstimate {
    /// Period in samples at [`REF_SAMPLE_RATE`]; `0.0` when unvoiced.
    pub period: f32,
    pub freq: f32,
    pub amp: f32,
    pub corr: f32,
    /// A stable pitch track is currently held.
    pub stable: bool,
}

impl PitchEstimate {
    pub fn is_voiced(&self) -> bool {
        self.period > 0.0
    }
}

/// Per-channel estimator state. All scratch space is allocated up front.
pub struct PitchEstimator {
    rom: Arc<PitchRom>,
    budgets: PitchConfig,
    single: InterpDft,
    previous: InterpDft,
    double: InterpDft,
    scratch: PeakScratch,
    peaks: Vec<Point>,
    prelim: Vec<Point>,
    maxima: Vec<Point>,
    utility: UtilityBuilder,
    correlator: PitchCorrelator,
    cands: [Candidate; TOTAL_CANDS],
    prev_pitch: Candidate,
    stable_pitch: Candidate,
    stable_count: u32,
    dist_from_stable: u32,
    frame_no: u64,
    hp_cutoff: usize,
    iterations: u32,
    exhausted: bool,
}

impl PitchEstimator {
    pub fn new(rom: Arc<PitchRom>, budgets: PitchConfig) -> Self {
        let len = rom.interp_len();
        info!(
            sample_rate = rom.sample_rate(),
            short = budgets.budget_short,
            single = budgets.budget_single,
            double = budgets.budget_double,
            "pitch estimator created"
        );
        let correlator = PitchCorrelator::new(rom.sample_rate() as f32, DOWN_SAMPLE);
        Self {
            single: InterpDft::new(len),
            previous: InterpDft::new(len),
            double: InterpDft::new(len),
            scratch: PeakScratch::new(len),
            peaks: Vec::with_capacity(MAX_PEAKS_FINAL),
            prelim: Vec::with_capacity(MIN_PEAKS),
            maxima: Vec::with_capacity(utility::MAX_PRELIM_CANDS),
            utility: UtilityBuilder::new(),
            correlator,
            cands: [Candidate::UNVOICED; TOTAL_CANDS],
            prev_pitch: Candidate::UNVOICED,
            stable_pitch: Candidate::UNVOICED,
            stable_count: 0,
            dist_from_stable: MAX_TRACK_GAP_FRAMES + 1000,
            frame_no: 0,
            hp_cutoff: 0,
            iterations: 0,
            exhausted: false,
            rom,
            budgets,
        }
    }

    pub fn reset(&mut self) {
        self.single.clear();
        self.previous.clear();
        self.double.clear();
        self.correlator.reset();
        self.cands = [Candidate::UNVOICED; TOTAL_CANDS];
        self.prev_pitch = Candidate::UNVOICED;
        self.stable_pitch = Candidate::UNVOICED;
        self.stable_count = 0;
        self.dist_from_stable = MAX_TRACK_GAP_FRAMES + 1000;
        self.frame_no = 0;
        self.iterations = 0;
        self.exhausted = false;
    }

    pub fn rom(&self) -> &Arc<PitchRom> {
        &self.rom
    }

    /// Harmonic shapes generated over all sub-ranges of the last frame.
    pub fn last_iteration_count(&self) -> u32 {
        self.iterations
    }

    /// Whether any sub-range of the last frame hit its budget.
    pub fn budget_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn estimate(&mut self, input: &PitchInput<'_>) -> Result<PitchEstimate> {
        let bins = self.rom.stft_bins();
        for len in [input.stft.len(), input.power_spectrum.len()] {
            if len != bins {
                return Err(CepstraError::FrameLength {
                    expected: bins,
                    actual: len,
                });
            }
        }

        self.frame_no += 1;
        self.iterations = 0;
        self.exhausted = false;
        self.cands = [Candidate::UNVOICED; TOTAL_CANDS];

        let rom = Arc::clone(&self.rom);
        dirichlet_interpolate(&rom, input.stft, input.spec_average, &mut self.single);

        if !input.is_speech || input.log_energy < LOG_ENERGY_THRESHOLD {
            return Ok(self.finalize(Candidate::UNVOICED));
        }

        let (short, single, double) = self.search_ranges();
        self.hp_cutoff = if input.low_band_noise {
            rom.high_pass_cutoff()
        } else {
            0
        };

        let mut single_peaks_ready = false;
        if short.0 < short.1 {
            self.utility.start_stage(self.budgets.budget_short);
            prepare_peaks(
                &rom,
                self.single.bins(),
                Some(input.power_spectrum),
                self.hp_cutoff,
                &mut self.scratch,
                &mut self.peaks,
            );
            single_peaks_ready = true;
            self.find_candidates(&rom, short, input, 0);
            let track = self.track();
            let pitch = select_final(&mut self.cands[..CANDS_PER_RANGE], track, true);
            if pitch.is_voiced() {
                return Ok(self.finalize(pitch));
            }
        }

        if single.0 < single.1 {
            self.utility.start_stage(self.budgets.budget_single);
            if !single_peaks_ready {
                prepare_peaks(
                    &rom,
                    self.single.bins(),
                    Some(input.power_spectrum),
                    self.hp_cutoff,
                    &mut self.scratch,
                    &mut self.peaks,
                );
            }
            self.find_candidates(&rom, single, input, CANDS_PER_RANGE);
            let track = self.track();
            let pitch = select_final(&mut self.cands[..2 * CANDS_PER_RANGE], track, true);
            if pitch.is_voiced() {
                return Ok(self.finalize(pitch));
            }
        }

        if double.0 < double.1 {
            self.utility.start_stage(self.budgets.budget_double);
            double_window(&rom, &self.previous, &self.single, &mut self.double);
            prepare_peaks(&rom, self.double.bins(), None, self.hp_cutoff, &mut self.scratch, &mut self.peaks);
            self.find_candidates(&rom, double, input, 2 * CANDS_PER_RANGE);
        }

        let track = self.track();
        let pitch = select_final(&mut self.cands, track, false);
        Ok(self.finalize(pitch))
    }

    fn track(&self) -> TrackState {
        TrackState {
            prev_freq: self.prev_pitch.freq,
            stable_count: self.stable_count,
            stable_freq: self.stable_pitch.freq,
        }
    }

    fn search_ranges(&self) -> ((f32, f32), (f32, f32), (f32, f32)) {
        let stable = self.stable_pitch.freq;
        if stable == 0.0 {
            return (SHORT_RANGE, SINGLE_RANGE, DOUBLE_RANGE);
        }
        let start = (stable * 0.666).max(DOUBLE_RANGE.0);
        let end = (stable * 2.2).min(SHORT_RANGE.1);
        let double = if start < DOUBLE_RANGE.1 {
            (start, end.min(DOUBLE_RANGE.1))
        } else {
            NO_RANGE
        };
        let single = if start < SINGLE_RANGE.1 && end > SINGLE_RANGE.0 {
            (start.max(SINGLE_RANGE.0), end.min(SINGLE_RANGE.1))
        } else {
            NO_RANGE
        };
        let short = if end > SHORT_RANGE.0 {
            (start.max(SHORT_RANGE.0), end)
        } else {
            NO_RANGE
        };
        (short, single, double)
    }

    /// Fill `cands[slot..slot + CANDS_PER_RANGE]` from the prepared peaks.
    fn find_candidates(&mut self, rom: &PitchRom, range: (f32, f32), input: &PitchInput<'_>, slot: usize) {
        let out = &mut self.cands[slot..slot + CANDS_PER_RANGE];
        out.fill(Candidate::UNVOICED);
        if self.peaks.is_empty() {
            return;
        }

        self.prelim.clear();
        self.prelim
            .extend(self.peaks.iter().take(MIN_PEAKS).copied());
        let sum: f32 = self.prelim.iter().map(|p| p.amp).sum();
        if sum > 0.0 {
            for p in &mut self.prelim {
                p.amp /= sum;
            }
        }

        let points = self.utility.build(&self.prelim, range.0, range.1, rom.fractions());
        dominant_maxima(points, self.stable_pitch.freq, &mut self.maxima);
        self.iterations += self.utility.loop_count();
        if self.utility.exhausted() {
            self.exhausted = true;
            warn!(
                frame = self.frame_no,
                low = range.0,
                high = range.1,
                iterations = self.utility.loop_count(),
                "pitch search budget exhausted"
            );
        }
        if self.maxima.is_empty() {
            return;
        }

        let all_peaks = &self.peaks[..self.peaks.len().min(MAX_PEAKS_FINAL)];
        let total: f32 = all_peaks.iter().map(|p| p.amp).sum();
        let norm = if total > 0.0 { 1.0 / total } else { 0.0 };
        for m in &mut self.maxima {
            m.amp = norm * utility_at(all_peaks, m.freq);
        }
        self.maxima.sort_by(|a, b| a.freq.total_cmp(&b.freq));

        select_top(&self.maxima, self.stable_pitch.freq, out);
        for c in out.iter_mut().filter(|c| c.is_voiced()) {
            c.corr = self
                .correlator
                .correlate(&input.decimated, rom.window_size(), c.freq, self.frame_no);
        }
    }

    fn finalize(&mut self, pitch: Candidate) -> PitchEstimate {
        std::mem::swap(&mut self.single, &mut self.previous);

        let period = if pitch.is_voiced() {
            if is_continuous(self.prev_pitch.freq, pitch.freq) {
                self.stable_count += 1;
            } else {
                self.stable_count = 0;
            }
            REF_SAMPLE_RATE / pitch.freq
        } else {
            self.stable_count = 0;
            0.0
        };
        self.prev_pitch = pitch;

        if self.stable_count >= MIN_STABLE_FRAMES {
            self.dist_from_stable = 0;
            self.stable_pitch = pitch;
        } else if self.dist_from_stable <= MAX_TRACK_GAP_FRAMES {
            if is_continuous(self.stable_pitch.freq, pitch.freq) {
                self.dist_from_stable = 0;
                self.stable_pitch = pitch;
            } else {
                self.dist_from_stable += 1;
            }
        } else {
            self.stable_pitch.freq = 0.0;
            self.dist_from_stable = self.dist_from_stable.saturating_add(1);
        }

        PitchEstimate {
            period,
            freq: pitch.freq,
            amp: pitch.amp,
            corr: pitch.corr,
            stable: self.stable_pitch.is_voiced(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{RealFft, RustFft};
    use crate::preproc::{BandSplitter, FRAME_LENGTH, FRAME_SHIFT, HISTORY_LENGTH};

    /// Drives the estimator the way the voicing path does, from a raw
    /// 8 kHz stream.
    struct Harness {
        estimator: PitchEstimator,
        splitter: BandSplitter,
        fft: RustFft,
        window: Vec<f32>,
        first: bool,
    }

    impl Harness {
        fn new(budgets: PitchConfig) -> Self {
            let rom = PitchRom::shared(8000).unwrap();
            let window = (0..FRAME_LENGTH)
                .map(|i| {
                    0.5 - 0.5
                        * (std::f32::consts::TAU * (i as f32 + 0.5) / FRAME_LENGTH as f32).cos()
                })
                .collect();
            Self {
                estimator: PitchEstimator::new(rom, budgets),
                splitter: BandSplitter::new(8000).unwrap(),
                fft: RustFft::plan(256).unwrap(),
                window,
                first: true,
            }
        }

        fn frame(&mut self, frame: &[f32]) -> PitchEstimate {
            let mut buf = vec![0.0f32; 256];
            for ((b, x), w) in buf.iter_mut().zip(frame).zip(&self.window) {
                *b = x * w;
            }
            let mut stft = vec![Cplx::new(0.0f32, 0.0); 129];
            self.fft.forward(&buf, &mut stft);
            stft[0] = Cplx::new(0.0, 0.0);
            stft[128] = Cplx::new(stft[128].re, 0.0);
            let spec_average =
                (2.0 * stft[1..128].iter().map(|c| c.re).sum::<f32>() + stft[128].re) / 256.0;
            let power: Vec<f32> = stft.iter().map(|c| c.norm_sqr()).collect();

            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            let energy: f32 = frame.iter().map(|x| (x - mean) * (x - mean)).sum();
            let log_energy = if energy > 0.0 { energy.ln() } else { -50.0 };

            if self.first {
                let mut head = vec![0.0f32; FRAME_LENGTH];
                head[FRAME_SHIFT..].copy_from_slice(&frame[..FRAME_LENGTH - FRAME_SHIFT]);
                self.splitter.split(&head, true, false).unwrap();
                self.first = false;
            }
            self.splitter.split(frame, false, false).unwrap();

            let decimated = self.splitter.decimated().to_vec();
            let input = PitchInput {
                spec_average,
                stft: &stft,
                power_spectrum: &power,
                decimated: LaggedSignal::new(&decimated, HISTORY_LENGTH / DOWN_SAMPLE),
                log_energy,
                is_speech: true,
                low_band_noise: false,
            };
            self.estimator.estimate(&input).unwrap()
        }
    }

    /// Harmonic-rich periodic signal, 200-sample frames with an 80 hop.
    fn voiced_frames(f0: f32, count: usize) -> Vec<Vec<f32>> {
        let total = FRAME_LENGTH + FRAME_SHIFT * count;
        let signal: Vec<f32> = (0..total)
            .map(|n| {
                let t = n as f32 / 8000.0;
                (1..=8)
                    .filter(|h| *h as f32 * f0 < 3800.0)
                    .map(|h| 1000.0 / h as f32 * (std::f32::consts::TAU * f0 * h as f32 * t).sin())
                    .sum()
            })
            .collect();
        (0..count)
            .map(|k| signal[k * FRAME_SHIFT..k * FRAME_SHIFT + FRAME_LENGTH].to_vec())
            .collect()
    }

    #[test]
    fn rejects_short_spectra() {
        let mut est = PitchEstimator::new(PitchRom::shared(8000).unwrap(), PitchConfig::default());
        let stft = vec![Cplx::new(0.0f32, 0.0); 64];
        let power = vec![0.0f32; 129];
        let dec = vec![0.0f32; 80];
        let input = PitchInput {
            spec_average: 0.0,
            stft: &stft,
            power_spectrum: &power,
            decimated: LaggedSignal::new(&dec, 30),
            log_energy: 20.0,
            is_speech: true,
            low_band_noise: false,
        };
        assert!(matches!(
            est.estimate(&input),
            Err(CepstraError::FrameLength { expected: 129, actual: 64 })
        ));
    }

    #[test]
    fn silence_is_unvoiced() {
        let mut h = Harness::new(PitchConfig::default());
        for _ in 0..5 {
            let p = h.frame(&[0.0; FRAME_LENGTH]);
            assert_eq!(p.period, 0.0);
            assert!(!p.stable);
        }
    }

    #[test]
    fn tracks_a_periodic_signal() {
        for f0 in [110.0f32, 160.0, 250.0] {
            let mut h = Harness::new(PitchConfig::default());
            let mut last = PitchEstimate::default();
            for frame in voiced_frames(f0, 12) {
                last = h.frame(&frame);
            }
            assert!(last.is_voiced(), "f0={f0}");
            let expected = REF_SAMPLE_RATE / f0;
            assert!(
                (last.period - expected).abs() < 0.05 * expected,
                "f0={f0} period={} expected={expected}",
                last.period
            );
            assert!(last.stable, "f0={f0}");
        }
    }

    #[test]
    fn tracks_the_ends_of_the_pitch_range() {
        for f0 in [52.0f32, 420.0] {
            let mut h = Harness::new(PitchConfig::default());
            let mut last = PitchEstimate::default();
            for frame in voiced_frames(f0, 20) {
                last = h.frame(&frame);
            }
            let expected = REF_SAMPLE_RATE / f0;
            assert!(
                (last.period - expected).abs() < 0.03 * expected,
                "f0={f0} period={} expected={expected}",
                last.period
            );
            assert!(last.amp > 0.9 && last.corr > 0.9, "f0={f0} {last:?}");
        }
    }

    #[test]
    fn stable_track_forms_and_expires() {
        let mut est = PitchEstimator::new(PitchRom::shared(8000).unwrap(), PitchConfig::default());
        let voiced = Candidate { freq: 150.0, amp: 1.0, corr: 1.0 };
        for i in 0..=MIN_STABLE_FRAMES {
            let p = est.finalize(voiced);
            assert_eq!(p.stable, i >= MIN_STABLE_FRAMES, "frame {i}");
        }

        // Two unvoiced frames keep the track alive.
        est.finalize(Candidate::UNVOICED);
        est.finalize(Candidate::UNVOICED);
        assert!(est.finalize(voiced).stable);

        // Three do not.
        for _ in 0..3 {
            est.finalize(Candidate::UNVOICED);
        }
        assert!(!est.finalize(voiced).stable);
    }

    #[test]
    fn reset_clears_track() {
        let mut h = Harness::new(PitchConfig::default());
        for frame in voiced_frames(160.0, 12) {
            h.frame(&frame);
        }
        h.estimator.reset();
        assert_eq!(h.estimator.track().stable_freq, 0.0);
        assert_eq!(h.estimator.track().prev_freq, 0.0);
    }
}
