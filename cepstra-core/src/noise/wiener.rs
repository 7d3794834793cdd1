//! The two Wiener stages and the pipeline that chains them.
//!
//! ## Algorithm
//!
//! Per stage and per shift:
//!
//! 1. Hanning-window the 200-sample analysis window, zero-pad to 256 and
//!    transform.
//! 2. Fold the spectrum onto 65 bins and average it with the previous
//!    frame's PSD.
//! 3. Update the noise estimate. Stage 0 learns only while the energy VAD
//!    reports silence. Stage 1 runs a soft-minimum tracker on power.
//! 4. Decision-directed prior SNR, Wiener gain, floored second pass.
//! 5. Map the gains onto 25 mel bands (stage 1 applies gain factorization
//!    there), transform to a 17-tap impulse response and filter the
//!    current shift with the previous one as history.

use tracing::{debug, info};

use super::frame_drop::{FrameDropDetector, SpectralEntropy, MIN_ENTROPY};
use super::gain::GainFactorizer;
use super::melfb::{hanning, MelBank, MelIdct};
use super::{
    NoiseSuppressor, SuppressedFrame, NS_FFT_LENGTH, NS_FILTER_LENGTH, NS_FRAME_LENGTH,
    NS_FRAME_SHIFT, NS_HALF_FILTER_LENGTH, NS_NB_FRAMES_LATENCY, NS_SAMPLE_RATE, NS_SPEC_ORDER,
    WF_MEL_ORDER,
};
use crate::classify::FrameClass;
use crate::config::{NoiseConfig, PitchConfig};
use crate::error::{CepstraError, Result};
use crate::numeric::{Cplx, RealFft, RustFft};
use crate::pitch::PitchEstimate;
use crate::vad::{EnergyVad, VadDecision, VoiceActivityDetector};
use crate::voicing::VoicingAnalyzer;

const BUFFER_LENGTH: usize = 320;
const DATA_IN: usize = BUFFER_LENGTH - NS_FRAME_SHIFT;
const ANALYSIS_WINDOW: usize = 20;
const PRV_FRAME: usize = 0;
const CUR_FRAME: usize = NS_FRAME_SHIFT;
/// Shifts the energy VAD needs in a row before `speech_found` holds.
const SPEECH_FOUND_FRAMES: u32 = 4;

const EPS: f32 = 1e-16;
const BETA: f32 = 0.98;
const RSB_MIN: f32 = 0.079432823;
const NSE_FRAMES: u32 = 100;
const LAMBDA_NSE: f32 = 0.99;
const SOFT_MIN_BOOTSTRAP_FRAMES: u32 = 11;
const DC_POLE: f32 = 0.9990234375;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoiseTracking {
    /// Exponential learning in magnitude, frozen during speech.
    VadGated,
    /// Soft minimum statistics in power, independent of the VAD.
    SoftMinimum,
}

#[derive(Debug, Clone)]
struct WienerStage {
    tracking: NoiseTracking,
    frames: u32,
    psd: [f32; NS_SPEC_ORDER],
    psd_history: [[f32; 2]; NS_SPEC_ORDER],
    slot: usize,
    meaned: [f32; NS_SPEC_ORDER],
    noise: [f32; NS_SPEC_ORDER],
    denoised: [f32; NS_SPEC_ORDER],
}

impl WienerStage {
    fn new(tracking: NoiseTracking) -> Self {
        Self {
            tracking,
            frames: 0,
            psd: [0.0; NS_SPEC_ORDER],
            psd_history: [[0.0; 2]; NS_SPEC_ORDER],
            slot: 0,
            meaned: [0.0; NS_SPEC_ORDER],
            noise: [0.0; NS_SPEC_ORDER],
            denoised: [0.0; NS_SPEC_ORDER],
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.tracking);
    }

    fn frames(&self) -> u32 {
        self.frames
    }

    fn update_psd(&mut self, spectrum: &[Cplx<f32>]) {
        self.frames = self.frames.saturating_add(1);
        fft_to_psd(spectrum, &mut self.psd);
        self.slot = 1 - self.slot;
        let slot = self.slot;
        for ((history, meaned), &p) in self
            .psd_history
            .iter_mut()
            .zip(self.meaned.iter_mut())
            .zip(&self.psd)
        {
            history[slot] = p;
            *meaned = (history[1 - slot] + p) / 2.0;
        }
    }

    /// Designs the 65-bin gain curve. `speech` only matters for VAD-gated
    /// tracking.
    fn design(&mut self, speech: bool, gains: &mut [f32; NS_SPEC_ORDER]) {
        let n = self.frames.max(1);

        if self.tracking == NoiseTracking::SoftMinimum {
            for (noise, &p) in self.noise.iter_mut().zip(&self.meaned) {
                let mut energy = *noise * *noise;
                if n < SOFT_MIN_BOOTSTRAP_FRAMES {
                    let lambda = 1.0 - 1.0 / n as f32;
                    energy = (lambda * energy + (1.0 - lambda) * p).max(EPS);
                } else {
                    energy *= 0.9 + 0.1 * (p / (p + energy)) * (1.0 + 1.0 / (1.0 + 0.1 * p / energy));
                }
                *noise = energy.sqrt().max(EPS);
            }
        }

        for (p, m) in self.psd.iter_mut().zip(self.meaned.iter_mut()) {
            *p = p.sqrt();
            *m = m.sqrt();
        }

        if self.tracking == NoiseTracking::VadGated && !speech {
            let lambda = if n < NSE_FRAMES {
                1.0 - 1.0 / n as f32
            } else {
                LAMBDA_NSE
            };
            for (noise, &m) in self.noise.iter_mut().zip(&self.meaned) {
                *noise = (lambda * *noise + (1.0 - lambda) * m).max(EPS);
            }
        }

        for (i, w) in gains.iter_mut().enumerate() {
            let noise = self.noise[i].max(EPS);
            let post = self.meaned[i] / noise - 1.0;
            let prio = BETA * (self.denoised[i] / noise) + (1.0 - BETA) * post.max(0.0);
            let first = prio / (1.0 + prio);
            let prio = (first * self.meaned[i] / noise).max(RSB_MIN);
            *w = prio / (1.0 + prio);
        }
        for ((d, &w), &p) in self.denoised.iter_mut().zip(gains.iter()).zip(&self.psd) {
            *d = w * p;
        }
    }
}

/// Folds a 129-bin spectrum onto 65 PSD bins by averaging bin pairs.
fn fft_to_psd(spectrum: &[Cplx<f32>], psd: &mut [f32; NS_SPEC_ORDER]) {
    let last = NS_SPEC_ORDER - 1;
    for (i, p) in psd.iter_mut().enumerate().take(last).skip(1) {
        *p = (spectrum[2 * i].norm_sqr() + spectrum[2 * i + 1].norm_sqr()) / 2.0;
    }
    psd[0] = (spectrum[0].re * spectrum[0].re + spectrum[1].norm_sqr()) / 2.0;
    psd[last] = spectrum[2 * last].re * spectrum[2 * last].re;
}

/// Convolves the current shift with the symmetric filter, reading
/// negative time from the end of `previous`. `current` must hold at least
/// `NS_FRAME_SHIFT + NS_HALF_FILTER_LENGTH` samples.
fn apply_filter(
    current: &[f32],
    previous: &[f32],
    filter: &[f32; NS_FILTER_LENGTH],
    out: &mut [f32; NS_FRAME_SHIFT],
) {
    let half = NS_HALF_FILTER_LENGTH as isize;
    let shift = NS_FRAME_SHIFT as isize;
    for (i, o) in out.iter_mut().enumerate() {
        let i = i as isize;
        let mut sum = 0.0;
        for j in -half..=i.min(half) {
            sum += filter[(j + half) as usize] * current[(i - j) as usize];
        }
        for j in i + 1..=half {
            sum += filter[(j + half) as usize] * previous[(shift - j + i) as usize];
        }
        *o = sum;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DcOffset {
    last_in: f32,
    last_out: f32,
}

impl DcOffset {
    fn apply(&mut self, samples: &mut [f32]) {
        for s in samples {
            let x = *s;
            *s = x - self.last_in + DC_POLE * self.last_out;
            self.last_in = x;
            self.last_out = *s;
        }
    }
}

/// Windowed forward transform shared by both stages.
struct Analysis {
    fft: RustFft,
    window: Vec<f32>,
    padded: Vec<f32>,
    spectrum: Vec<Cplx<f32>>,
}

impl Analysis {
    fn new() -> Result<Self> {
        let fft = RustFft::plan(NS_FFT_LENGTH)?;
        Ok(Self {
            fft,
            window: hanning(NS_FRAME_LENGTH),
            padded: vec![0.0; NS_FFT_LENGTH],
            spectrum: vec![Cplx::new(0.0, 0.0); NS_FFT_LENGTH / 2 + 1],
        })
    }

    fn transform(&mut self, frame: &[f32]) -> &[Cplx<f32>] {
        for ((p, &x), &w) in self.padded.iter_mut().zip(frame).zip(&self.window) {
            *p = x * w;
        }
        self.fft.forward(&self.padded, &mut self.spectrum);
        &self.spectrum
    }
}

/// Mel mapping and impulse response design.
struct FilterDesign {
    bank: MelBank,
    idct: MelIdct,
    ir_window: Vec<f32>,
    taps: Vec<f32>,
}

impl FilterDesign {
    fn new() -> Self {
        let rate = NS_SAMPLE_RATE as f32;
        let bank = MelBank::wiener(rate, NS_SPEC_ORDER, WF_MEL_ORDER);
        let idct = MelIdct::new(&bank, rate);
        let taps = vec![0.0; idct.taps()];
        Self {
            bank,
            idct,
            ir_window: hanning(NS_FILTER_LENGTH),
            taps,
        }
    }

    fn to_mel(&self, gains: &[f32], mel: &mut [f32; WF_MEL_ORDER]) {
        self.bank.apply(gains, mel);
    }

    fn impulse_response(&mut self, mel: &[f32], filter: &mut [f32; NS_FILTER_LENGTH]) {
        self.idct.transform(mel, &mut self.taps);
        for j in 0..=NS_HALF_FILTER_LENGTH {
            let tap = self.taps[j] * self.ir_window[NS_HALF_FILTER_LENGTH + j];
            filter[NS_HALF_FILTER_LENGTH + j] = tap;
            filter[NS_HALF_FILTER_LENGTH - j] = tap;
        }
    }
}

/// What stage 0 decided on its latest frame.
#[derive(Debug, Clone, Copy, Default)]
struct Decisions {
    vad: VadDecision,
    speech_found: bool,
    speech_found_var: bool,
    speech_found_spec: bool,
    speech_found_mel: bool,
    entropy: f32,
    class: FrameClass,
    pitch: PitchEstimate,
}

pub struct WienerSuppressor {
    first: [f32; BUFFER_LENGTH],
    second: [f32; BUFFER_LENGTH],
    frames_in_first: u32,
    frames_in_second: u32,
    frames_out: u32,
    stages: [WienerStage; 2],
    analysis: Analysis,
    design: FilterDesign,
    vad: EnergyVad,
    gain: GainFactorizer,
    frame_drop: FrameDropDetector,
    entropy: SpectralEntropy,
    voicing: Option<VoicingAnalyzer>,
    dc: DcOffset,
    gains: [f32; NS_SPEC_ORDER],
    mel: [f32; WF_MEL_ORDER],
    filter: [f32; NS_FILTER_LENGTH],
    decisions: Decisions,
}

impl WienerSuppressor {
    pub fn new(config: NoiseConfig, budgets: PitchConfig) -> Result<Self> {
        let voicing = if config.pitch_classification {
            Some(VoicingAnalyzer::new(budgets)?)
        } else {
            None
        };
        info!(
            sample_rate = NS_SAMPLE_RATE,
            pitch_classification = config.pitch_classification,
            "wiener suppressor ready"
        );
        Ok(Self {
            first: [0.0; BUFFER_LENGTH],
            second: [0.0; BUFFER_LENGTH],
            frames_in_first: 0,
            frames_in_second: 0,
            frames_out: 0,
            stages: [
                WienerStage::new(NoiseTracking::VadGated),
                WienerStage::new(NoiseTracking::SoftMinimum),
            ],
            analysis: Analysis::new()?,
            design: FilterDesign::new(),
            vad: EnergyVad::new(),
            gain: GainFactorizer::new(),
            frame_drop: FrameDropDetector::new(),
            entropy: SpectralEntropy::new(NS_FFT_LENGTH / 2 + 1),
            voicing,
            dc: DcOffset::default(),
            gains: [0.0; NS_SPEC_ORDER],
            mel: [0.0; WF_MEL_ORDER],
            filter: [0.0; NS_FILTER_LENGTH],
            decisions: Decisions::default(),
        })
    }

    /// Shifts the energy VAD has classified so far.
    pub fn frames(&self) -> u32 {
        self.vad.frames()
    }

    pub fn voicing(&self) -> Option<&VoicingAnalyzer> {
        self.voicing.as_ref()
    }

    fn first_stage(&mut self, out: &mut [f32; NS_FRAME_SHIFT]) -> Result<()> {
        let mut window = [0.0f32; NS_FRAME_LENGTH];
        window.copy_from_slice(&self.first[ANALYSIS_WINDOW..ANALYSIS_WINDOW + NS_FRAME_LENGTH]);
        let spectrum = self.analysis.transform(&window);

        let voiced = match self.voicing.as_mut() {
            Some(analyzer) => Some(analyzer.analyze(&window, spectrum)?),
            None => None,
        };

        let stage = &mut self.stages[0];
        stage.update_psd(spectrum);
        let vad = self
            .vad
            .classify(&self.first[CUR_FRAME..CUR_FRAME + NS_FRAME_SHIFT]);
        stage.design(vad.is_speech(), &mut self.gains);
        let frame = stage.frames();

        let speech_found_var = self.frame_drop.speech_by_variance(&self.gains, frame);
        self.design.to_mel(&self.gains, &mut self.mel);
        let speech_found_spec = self.frame_drop.speech_by_gain_sum(&self.mel, frame);

        let (entropy, class, pitch) = match (voiced, self.voicing.as_ref()) {
            (Some(v), Some(analyzer)) => {
                let entropy = self.entropy.estimate(
                    analyzer.power_spectrum(),
                    v.log_energy,
                    frame,
                    speech_found_spec,
                );
                (entropy, v.class, v.pitch)
            }
            _ => (MIN_ENTROPY, FrameClass::NonSpeech, PitchEstimate::default()),
        };
        let speech_found_mel = self
            .frame_drop
            .speech_by_low_band(&self.mel, frame, class, entropy);

        self.gain.record(&stage.denoised);
        self.design.impulse_response(&self.mel, &mut self.filter);
        apply_filter(
            &self.first[CUR_FRAME..],
            &self.first[PRV_FRAME..PRV_FRAME + NS_FRAME_SHIFT],
            &self.filter,
            out,
        );

        self.decisions = Decisions {
            vad,
            speech_found: self.vad.speech_frames() > SPEECH_FOUND_FRAMES,
            speech_found_var,
            speech_found_spec,
            speech_found_mel,
            entropy,
            class,
            pitch,
        };
        Ok(())
    }

    fn second_stage(&mut self, out: &mut [f32; NS_FRAME_SHIFT]) {
        let mut window = [0.0f32; NS_FRAME_LENGTH];
        window.copy_from_slice(&self.second[ANALYSIS_WINDOW..ANALYSIS_WINDOW + NS_FRAME_LENGTH]);
        let spectrum = self.analysis.transform(&window);

        let stage = &mut self.stages[1];
        stage.update_psd(spectrum);
        stage.design(false, &mut self.gains);

        self.design.to_mel(&self.gains, &mut self.mel);
        self.gain.apply(&stage.noise, stage.frames(), &mut self.mel);
        self.design.impulse_response(&self.mel, &mut self.filter);
        apply_filter(
            &self.second[CUR_FRAME..],
            &self.second[PRV_FRAME..PRV_FRAME + NS_FRAME_SHIFT],
            &self.filter,
            out,
        );
    }
}

impl NoiseSuppressor for WienerSuppressor {
    fn suppress(&mut self, shift: &[f32]) -> Result<Option<SuppressedFrame>> {
        if shift.len() != NS_FRAME_SHIFT {
            return Err(CepstraError::FrameLength {
                expected: NS_FRAME_SHIFT,
                actual: shift.len(),
            });
        }

        self.first[DATA_IN..].copy_from_slice(shift);
        self.frames_in_first = self.frames_in_first.saturating_add(1);

        let mut filtered = [0.0f32; NS_FRAME_SHIFT];
        if self.frames_in_first - self.frames_in_second > NS_NB_FRAMES_LATENCY {
            self.first_stage(&mut filtered)?;
            self.second[DATA_IN..].copy_from_slice(&filtered);
            self.frames_in_second += 1;
        }

        let mut produced = false;
        if self.frames_in_second - self.frames_out > NS_NB_FRAMES_LATENCY {
            self.second_stage(&mut filtered);
            self.frames_out += 1;
            produced = true;
            if self.frames_out == 1 {
                debug!(calls = self.frames_in_first, "suppressor pipeline primed");
            }
        }

        self.first.copy_within(NS_FRAME_SHIFT.., 0);
        if self.frames_in_second > 0 {
            self.second.copy_within(NS_FRAME_SHIFT.., 0);
        }

        if !produced {
            return Ok(None);
        }
        self.dc.apply(&mut filtered);
        let d = self.decisions;
        Ok(Some(SuppressedFrame {
            samples: filtered,
            vad: d.vad,
            speech_found: d.speech_found,
            speech_found_var: d.speech_found_var,
            speech_found_spec: d.speech_found_spec,
            speech_found_mel: d.speech_found_mel,
            entropy: d.entropy,
            class: d.class,
            pitch: d.pitch,
        }))
    }

    fn reset(&mut self) {
        self.first.fill(0.0);
        self.second.fill(0.0);
        self.frames_in_first = 0;
        self.frames_in_second = 0;
        self.frames_out = 0;
        for stage in &mut self.stages {
            stage.reset();
        }
        self.vad.reset();
        self.gain = GainFactorizer::new();
        self.frame_drop = FrameDropDetector::new();
        self.entropy.reset();
        if let Some(analyzer) = self.voicing.as_mut() {
            analyzer.reset();
        }
        self.dc = DcOffset::default();
        self.decisions = Decisions::default();
    }

    fn latency(&self) -> usize {
        2 * NS_NB_FRAMES_LATENCY as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn suppressor(pitch_classification: bool) -> WienerSuppressor {
        let config = NoiseConfig {
            use_dithering: false,
            pitch_classification,
        };
        WienerSuppressor::new(config, PitchConfig::default()).unwrap()
    }

    fn noise_frames(seed: u64, frames: usize, amp: f32) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..frames)
            .map(|_| (0..NS_FRAME_SHIFT).map(|_| rng.gen_range(-amp..amp)).collect())
            .collect()
    }

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|x| x * x).sum()
    }

    #[test]
    fn output_starts_after_latency() {
        let mut ns = suppressor(true);
        assert_eq!(ns.latency(), 4);
        for (call, frame) in noise_frames(1, 20, 100.0).iter().enumerate() {
            let out = ns.suppress(frame).unwrap();
            assert_eq!(out.is_some(), call >= 4, "call {call}");
        }
    }

    #[test]
    fn wrong_shift_is_rejected() {
        let mut ns = suppressor(false);
        let err = ns.suppress(&[0.0; 79]).unwrap_err();
        assert!(matches!(err, CepstraError::FrameLength { expected: 80, actual: 79 }));
    }

    #[test]
    fn silence_stays_silent() {
        let mut ns = suppressor(true);
        for _ in 0..30 {
            if let Some(out) = ns.suppress(&[0.0; NS_FRAME_SHIFT]).unwrap() {
                assert!(out.samples.iter().all(|s| s.is_finite()));
                assert_abs_diff_eq!(energy(&out.samples), 0.0, epsilon = 1e-3);
                assert_eq!(out.class, FrameClass::NonSpeech);
                assert!(!out.speech_found);
            }
        }
    }

    #[test]
    fn stationary_noise_is_attenuated() {
        let mut ns = suppressor(false);
        let frames = noise_frames(7, 200, 500.0);
        let mut input = 0.0;
        let mut output = 0.0;
        for (call, frame) in frames.iter().enumerate() {
            let out = ns.suppress(frame).unwrap();
            // Output at call c is the input of call c - 4.
            if call >= 150 {
                input += energy(&frames[call - 4]);
                output += energy(&out.unwrap().samples);
            }
        }
        assert!(output < 0.25 * input, "out {output} in {input}");
    }

    #[test]
    fn tone_survives_better_than_noise() {
        let mut ns = suppressor(false);
        let noise = noise_frames(11, 260, 100.0);
        let tone: Vec<Vec<f32>> = noise
            .iter()
            .enumerate()
            .map(|(f, frame)| {
                frame
                    .iter()
                    .enumerate()
                    .map(|(i, n)| {
                        let t = (f * NS_FRAME_SHIFT + i) as f32 / 8000.0;
                        n + 3000.0 * (std::f32::consts::TAU * 500.0 * t).sin()
                    })
                    .collect()
            })
            .collect();

        for frame in noise.iter().take(4) {
            assert!(ns.suppress(frame).unwrap().is_none());
        }
        let mut ratio = |from: usize, to: usize, inputs: &dyn Fn(usize) -> Vec<f32>| {
            let (mut i_e, mut o_e) = (0.0, 0.0);
            for call in from..to {
                let out = ns.suppress(&inputs(call)).unwrap().unwrap();
                if call >= from + 20 {
                    i_e += energy(&inputs(call - 4));
                    o_e += energy(&out.samples);
                }
            }
            o_e / i_e
        };
        let noise_ratio = ratio(4, 200, &|c| noise[c].clone());
        let tone_ratio = ratio(200, 260, &|c| if c < 204 { noise[c].clone() } else { tone[c].clone() });
        assert!(tone_ratio > 2.0 * noise_ratio, "tone {tone_ratio} noise {noise_ratio}");
    }

    #[test]
    fn reset_reproduces_output() {
        let frames = noise_frames(3, 40, 800.0);
        let mut ns = suppressor(true);
        let run = |ns: &mut WienerSuppressor| -> Vec<f32> {
            frames
                .iter()
                .filter_map(|f| ns.suppress(f).unwrap())
                .flat_map(|out| out.samples)
                .collect()
        };
        let first = run(&mut ns);
        ns.reset();
        let second = run(&mut ns);
        assert_eq!(first, second);
    }

    #[test]
    fn unit_filter_passes_current_shift() {
        let mut filter = [0.0; NS_FILTER_LENGTH];
        filter[NS_HALF_FILTER_LENGTH] = 1.0;
        let current: Vec<f32> = (0..88).map(|i| i as f32).collect();
        let mut out = [0.0; NS_FRAME_SHIFT];
        apply_filter(&current, &[9.0; NS_FRAME_SHIFT], &filter, &mut out);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[79], 79.0);
    }

    #[test]
    fn dc_offset_removes_constant() {
        let mut dc = DcOffset::default();
        let mut samples = [100.0f32; 400];
        dc.apply(&mut samples);
        assert!(samples[399].abs() < samples[0].abs() * 0.75);
    }
}
