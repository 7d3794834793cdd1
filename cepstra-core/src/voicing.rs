//! Voicing analysis on the suppressor's stage-0 analysis window.
//!
//! ## Algorithm
//!
//! 1. Notch the DC bin of the windowed 256-point spectrum and derive the
//!    spectrum average, the power spectrum and its pre-emphasised copy.
//! 2. Compute the DC-removed window energy and its log.
//! 3. Run the channel-SNR VAD on a 23-channel mel bank of the power
//!    spectrum, then update the low-band noise criterion.
//! 4. Band-split the window (the very first call primes the filters with a
//!    zero-led head), estimate the pitch on the decimated low band and
//!    classify the frame.

use tracing::info;

use crate::classify::{classify_frame, FrameClass};
use crate::config::PitchConfig;
use crate::error::{CepstraError, Result};
use crate::noise::melfb::MelBank;
use crate::numeric::Cplx;
use crate::pcorr::LaggedSignal;
use crate::pitch::{PitchEstimate, PitchEstimator, PitchInput, PitchRom};
use crate::preproc::{BandSplitter, DOWN_SAMPLE, FRAME_LENGTH, FRAME_SHIFT, HISTORY_LENGTH};
use crate::vad::afe::NUM_CHANNELS;
use crate::vad::{AfeVad, VadDecision, VoiceActivityDetector};

/// The analysis runs on the 8 kHz core.
pub const VOICING_SAMPLE_RATE: u32 = 8000;
const FFT_LENGTH: usize = 256;
const BINS: usize = FFT_LENGTH / 2 + 1;
const VAD_START_FREQ: f32 = 64.0;

/// Energy below this is treated as silence and its log clamped.
pub const ENERGY_FLOOR: f32 = 1.9287e-24;
pub const LOG_ENERGY_FLOOR: f32 = -50.0;

const LBN_UPPER_FREQ: f32 = 380.0;
const LBN_HIST_WEIGHT: f32 = 0.99;
const LBN_MAX_THR: f32 = 1.9;
const LBN_LOW_ENERGY: f32 = 500.0;

/// Tracks whether the background noise is dominated by energy below
/// 380 Hz. Only non-speech frames move the criterion.
#[derive(Debug, Clone)]
pub struct LowBandNoiseDetector {
    crit: f32,
    break_bin: usize,
}

impl LowBandNoiseDetector {
    pub fn new(sample_rate: u32, fft_len: usize) -> Self {
        Self {
            crit: LBN_MAX_THR,
            break_bin: (LBN_UPPER_FREQ * fft_len as f32 / sample_rate as f32) as usize,
        }
    }

    pub fn criterion(&self) -> f32 {
        self.crit
    }

    pub fn reset(&mut self) {
        self.crit = LBN_MAX_THR;
    }

    /// `power` holds `fft_len/2 + 1` pre-emphasised power bins.
    pub fn update(&mut self, power: &[f32], vad: bool, energy: f32) -> bool {
        if vad {
            return self.crit > LBN_MAX_THR;
        }
        let points = power.len().saturating_sub(1).max(1);
        let ratio = if energy / (points as f32) < LBN_LOW_ENERGY {
            0.0
        } else {
            let split = (self.break_bin + 1).clamp(1, power.len());
            let peak = |bins: &[f32]| bins.iter().fold(0.0f32, |m, &p| m.max(p));
            let low = peak(&power[1..split]);
            let high = peak(&power[split..]);
            if high == 0.0 {
                10.0
            } else {
                low / high
            }
        };
        self.crit = LBN_HIST_WEIGHT * self.crit + (1.0 - LBN_HIST_WEIGHT) * ratio;
        self.crit > LBN_MAX_THR
    }
}

/// Everything the voicing path decided about one analysis window.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoicingFrame {
    pub class: FrameClass,
    pub pitch: PitchEstimate,
    pub vad: VadDecision,
    pub energy: f32,
    pub log_energy: f32,
    pub low_band_noise: bool,
    /// Long-term SNR of the channel VAD, dB.
    pub snr: f32,
}

pub struct VoicingAnalyzer {
    vad_bank: MelBank,
    vad: AfeVad,
    low_band: LowBandNoiseDetector,
    splitter: BandSplitter,
    estimator: PitchEstimator,
    first_frame: bool,
    preemph_gain: Vec<f32>,
    stft: Vec<Cplx<f32>>,
    power: Vec<f32>,
    preemph_power: Vec<f32>,
    channels: [f32; NUM_CHANNELS],
    head: [f32; FRAME_LENGTH],
}

impl VoicingAnalyzer {
    pub fn new(budgets: PitchConfig) -> Result<Self> {
        let rom = PitchRom::shared(VOICING_SAMPLE_RATE)?;
        Self::with_rom(rom, budgets)
    }

    pub fn with_rom(rom: std::sync::Arc<PitchRom>, budgets: PitchConfig) -> Result<Self> {
        let sample_rate = rom.sample_rate();
        let splitter = BandSplitter::new(sample_rate)?;
        let rate = sample_rate as f32;
        // |1 - 0.97 e^{-jw}|^2 on the bin grid.
        let preemph_gain = (0..BINS)
            .map(|k| {
                1.9409 - 1.94 * (std::f32::consts::PI * k as f32 / (BINS - 1) as f32).cos()
            })
            .collect();
        info!(sample_rate, ?budgets, "voicing analyzer ready");
        Ok(Self {
            vad_bank: MelBank::vad(rate, FFT_LENGTH, VAD_START_FREQ, NUM_CHANNELS),
            vad: AfeVad::new(),
            low_band: LowBandNoiseDetector::new(sample_rate, FFT_LENGTH),
            splitter,
            estimator: PitchEstimator::new(rom, budgets),
            first_frame: true,
            preemph_gain,
            stft: vec![Cplx::new(0.0, 0.0); BINS],
            power: vec![0.0; BINS],
            preemph_power: vec![0.0; BINS],
            channels: [0.0; NUM_CHANNELS],
            head: [0.0; FRAME_LENGTH],
        })
    }

    pub fn reset(&mut self) {
        self.vad.reset();
        self.low_band.reset();
        self.splitter.reset();
        self.estimator.reset();
        self.first_frame = true;
    }

    /// Power spectrum of the last analysed window with its DC bin notched.
    pub fn power_spectrum(&self) -> &[f32] {
        &self.power
    }

    pub fn estimator(&self) -> &PitchEstimator {
        &self.estimator
    }

    /// `speech` is the unwindowed analysis window; `spectrum` is the
    /// `FFT_LENGTH`-point transform of its windowed, zero-padded copy.
    pub fn analyze(&mut self, speech: &[f32], spectrum: &[Cplx<f32>]) -> Result<VoicingFrame> {
        if speech.len() != FRAME_LENGTH {
            return Err(CepstraError::FrameLength {
                expected: FRAME_LENGTH,
                actual: speech.len(),
            });
        }
        if spectrum.len() != BINS {
            return Err(CepstraError::FrameLength {
                expected: BINS,
                actual: spectrum.len(),
            });
        }

        let nyquist = spectrum[BINS - 1].re;
        self.stft.copy_from_slice(spectrum);
        self.stft[0] = Cplx::new(0.0, 0.0);
        self.stft[BINS - 1] = Cplx::new(nyquist, 0.0);
        let spec_average = (2.0 * self.stft[1..BINS - 1].iter().map(|c| c.re).sum::<f32>()
            + nyquist)
            / FFT_LENGTH as f32;

        for ((p, pe), (c, g)) in self
            .power
            .iter_mut()
            .zip(self.preemph_power.iter_mut())
            .zip(self.stft.iter().zip(&self.preemph_gain))
        {
            *p = c.norm_sqr();
            *pe = *p * g;
        }

        let sum: f32 = speech.iter().sum();
        let raw_energy = speech.iter().map(|x| x * x).sum::<f32>() - sum * sum / FRAME_LENGTH as f32;
        let (energy, log_energy) = if raw_energy < ENERGY_FLOOR {
            (ENERGY_FLOOR, LOG_ENERGY_FLOOR)
        } else {
            (raw_energy, raw_energy.ln())
        };

        self.vad_bank.apply(&self.power, &mut self.channels);
        let vad = self.vad.classify(&self.channels);
        let low_band_noise = self
            .low_band
            .update(&self.preemph_power, vad.is_speech(), energy);

        if self.first_frame {
            self.head[..FRAME_SHIFT].fill(0.0);
            self.head[FRAME_SHIFT..].copy_from_slice(&speech[..FRAME_LENGTH - FRAME_SHIFT]);
            self.splitter.split(&self.head, true, false)?;
            self.first_frame = false;
        }
        self.splitter.split(speech, false, low_band_noise)?;

        let input = PitchInput {
            spec_average,
            stft: &self.stft,
            power_spectrum: &self.power,
            decimated: LaggedSignal::new(self.splitter.decimated(), HISTORY_LENGTH / DOWN_SAMPLE),
            log_energy,
            is_speech: vad.is_speech(),
            low_band_noise,
        };
        let pitch = self.estimator.estimate(&input)?;

        let class = classify_frame(
            vad.is_speech(),
            vad.is_hangover(),
            pitch.period,
            energy,
            speech,
            self.splitter.upper_band(),
        );

        Ok(VoicingFrame {
            class,
            pitch,
            vad,
            energy,
            log_energy,
            low_band_noise,
            snr: self.vad.snr(),
        })
    }
}
