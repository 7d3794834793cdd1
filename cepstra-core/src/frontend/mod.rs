//! `FrontEnd`: one channel from raw PCM to feature frames.
//!
//! ## Per call
//!
//! ```text
//! frame (10 ms) ─► dither ─► per 80-sample half:
//!                              GSM HPF ─► zero gate ─► NoiseSuppressor
//!                                                         │
//!                        pair halves into one shift (16 kHz only)
//!                                                         │
//!                                   i16 saturation ─► MfccExtractor<S>
//! ```
//!
//! The suppressor core always sees 80-sample shifts. At 16 kHz a frame is
//! split in two halves and their decisions are merged back, averaging the
//! class and speech flag as integers rounded up and the entropy as a mean.
//!
//! ## Faults
//!
//! A wrong frame length is rejected before any state changes. An error from
//! inside the pipeline leaves the channel poisoned: every later call returns
//! [`CepstraError::ChannelPoisoned`] until [`FrontEnd::reset`].

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::classify::FrameClass;
use crate::config::{FrontEndConfig, BASE_SHIFT};
use crate::error::{CepstraError, Result};
use crate::events::{ChannelStatus, StreamSummary};
use crate::hpf::GsmHighPass;
use crate::mfcc::{MfccExtractor, MfccFrame};
use crate::noise::{NoiseSuppressor, SuppressedFrame, WienerSuppressor};
use crate::numeric::Scalar;
use crate::pitch::PitchEstimate;
use crate::vad::VadDecision;

const DITHER_SWING: i16 = 64;
/// Keeps the MFCC dither stream apart from the front-end dither stream.
const MFCC_SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// One denoised shift and everything decided about it.
#[derive(Debug, Clone)]
pub struct FrontEndFrame {
    /// Output index, counting from 0.
    pub index: u64,
    pub samples: Vec<i16>,
    pub class: FrameClass,
    /// Low-band mel speech decision of the suppressor.
    pub speech_found: bool,
    pub entropy: f32,
    pub vad: VadDecision,
    pub pitch: PitchEstimate,
    /// `None` while the extractor fills its window.
    pub mfcc: Option<MfccFrame>,
}

/// Decisions of the halves collected so far for the next shift.
#[derive(Debug, Default)]
struct Pending {
    samples: Vec<i16>,
    halves: i32,
    class_sum: i32,
    speech_sum: i32,
    entropy_sum: f32,
    vad: VadDecision,
    pitch: PitchEstimate,
}

impl Pending {
    fn push(&mut self, half: &SuppressedFrame) {
        self.samples.extend(
            half.samples
                .iter()
                .map(|&x| x.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16),
        );
        self.halves += 1;
        self.class_sum += half.class.index();
        self.speech_sum += i32::from(half.speech_found_mel);
        self.entropy_sum += half.entropy;
        if half.vad.is_speech() || self.halves == 1 {
            self.vad = half.vad;
        }
        if half.pitch.is_voiced() || self.halves == 1 {
            self.pitch = half.pitch;
        }
    }

    fn class(&self) -> FrameClass {
        if self.halves > 1 {
            FrameClass::from_index((self.class_sum + 1) / self.halves)
        } else {
            FrameClass::from_index(self.class_sum)
        }
    }

    fn speech_found(&self) -> bool {
        if self.halves > 1 {
            (self.speech_sum + 1) / self.halves != 0
        } else {
            self.speech_sum != 0
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.halves = 0;
        self.class_sum = 0;
        self.speech_sum = 0;
        self.entropy_sum = 0.0;
        self.vad = VadDecision::default();
        self.pitch = PitchEstimate::default();
    }
}

/// One front-end channel, generic over the MFCC numeric path.
pub struct FrontEnd<S: Scalar = f32> {
    config: FrontEndConfig,
    hpf: GsmHighPass,
    suppressor: Box<dyn NoiseSuppressor>,
    mfcc: MfccExtractor<S>,
    dither: StdRng,
    raw: Vec<i16>,
    filtered: [f32; BASE_SHIFT],
    pending: Pending,
    onset: bool,
    poisoned: bool,
    seed: u64,
    input_frames: u64,
    output_frames: u64,
    zero_frames: u64,
}

impl<S: Scalar> FrontEnd<S> {
    pub fn new(config: FrontEndConfig) -> Result<Self> {
        Self::with_seed(config, rand::random())
    }

    /// Both dither streams derive from `seed`, so two channels built with
    /// the same seed produce identical output for identical input.
    pub fn with_seed(config: FrontEndConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let suppressor = WienerSuppressor::new(config.noise.clone(), config.pitch.clone())?;
        Self::with_suppressor(config, Box::new(suppressor), seed)
    }

    /// Build around another suppressor backend.
    pub fn with_suppressor(
        config: FrontEndConfig,
        suppressor: Box<dyn NoiseSuppressor>,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let mfcc = MfccExtractor::with_seed(config.mfcc.clone(), seed ^ MFCC_SEED_SALT)?;
        info!(
            sample_rate = config.mfcc.sample_rate,
            mfcc_type = ?config.mfcc.mfcc_type,
            feature_dim = config.mfcc.feature_dim(),
            dithering = config.noise.use_dithering,
            "front-end channel ready"
        );
        Ok(Self {
            raw: Vec::with_capacity(config.frame_shift()),
            hpf: GsmHighPass::new(),
            suppressor,
            mfcc,
            dither: StdRng::seed_from_u64(seed),
            seed,
            filtered: [0.0; BASE_SHIFT],
            pending: Pending {
                samples: Vec::with_capacity(config.frame_shift()),
                ..Pending::default()
            },
            onset: false,
            poisoned: false,
            input_frames: 0,
            output_frames: 0,
            zero_frames: 0,
            config,
        })
    }

    pub fn config(&self) -> &FrontEndConfig {
        &self.config
    }

    pub fn frame_shift(&self) -> usize {
        self.config.frame_shift()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn status(&self) -> ChannelStatus {
        if self.poisoned {
            ChannelStatus::Poisoned
        } else if self.output_frames > 0 {
            ChannelStatus::Streaming
        } else if self.input_frames > 0 {
            ChannelStatus::Priming
        } else {
            ChannelStatus::Idle
        }
    }

    /// Feed one 10 ms frame in capture order.
    pub fn process(&mut self, frame: &[i16]) -> Result<Option<FrontEndFrame>> {
        if self.poisoned {
            return Err(CepstraError::ChannelPoisoned);
        }
        let shift = self.frame_shift();
        if frame.len() != shift {
            return Err(CepstraError::FrameLength {
                expected: shift,
                actual: frame.len(),
            });
        }
        match self.run(frame) {
            Ok(out) => Ok(out),
            Err(e) => {
                warn!(frame = self.input_frames, error = %e, "front-end channel poisoned");
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn run(&mut self, frame: &[i16]) -> Result<Option<FrontEndFrame>> {
        self.input_frames += 1;
        self.raw.clear();
        self.raw.extend_from_slice(frame);
        if self.config.noise.use_dithering {
            for x in self.raw.iter_mut() {
                let d: i16 = self.dither.gen_range(-DITHER_SWING..DITHER_SWING);
                if i32::from(*x).abs() + i32::from(DITHER_SWING) < i32::from(i16::MAX) {
                    *x -= d;
                }
            }
        }

        let mut out = None;
        for half in 0..self.raw.len() / BASE_SHIFT {
            let range = half * BASE_SHIFT..(half + 1) * BASE_SHIFT;
            self.hpf.process(&self.raw[range], &mut self.filtered);

            let energy: f32 = self.filtered.iter().map(|x| x * x).sum();
            if energy as i64 == 0 && !self.onset {
                self.zero_frames += 1;
                continue;
            }
            self.onset = true;

            let Some(suppressed) = self.suppressor.suppress(&self.filtered)? else {
                continue;
            };
            self.pending.push(&suppressed);
            if self.pending.samples.len() >= self.frame_shift() {
                out = Some(self.emit()?);
            }
        }
        Ok(out)
    }

    fn emit(&mut self) -> Result<FrontEndFrame> {
        let class = self.pending.class();
        let vad = class.index() / 2 != 0;
        let mfcc = self.mfcc.convert_frame(&self.pending.samples, vad)?;
        let frame = FrontEndFrame {
            index: self.output_frames,
            samples: self.pending.samples.clone(),
            class,
            speech_found: self.pending.speech_found(),
            entropy: self.pending.entropy_sum / self.pending.halves.max(1) as f32,
            vad: self.pending.vad,
            pitch: self.pending.pitch,
            mfcc,
        };
        if self.output_frames == 0 {
            debug!(
                input_frames = self.input_frames,
                zero_frames = self.zero_frames,
                "first denoised frame"
            );
        }
        self.output_frames += 1;
        self.pending.clear();
        Ok(frame)
    }

    /// Restore the initial state without reallocating. Dither generators
    /// restart from the channel seed, so a reset channel replays a fresh one.
    pub fn reset(&mut self) {
        self.dither = StdRng::seed_from_u64(self.seed);
        self.hpf.reset();
        self.suppressor.reset();
        self.mfcc.reset();
        self.pending.clear();
        self.onset = false;
        self.poisoned = false;
        self.input_frames = 0;
        self.output_frames = 0;
        self.zero_frames = 0;
    }

    pub fn summary(&self, elapsed: Duration) -> StreamSummary {
        StreamSummary {
            input_frames: self.input_frames,
            output_frames: self.output_frames,
            zero_frames_skipped: self.zero_frames,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MfccConfig, MfccType, NoiseConfig};
    use crate::numeric::Fixed;

    fn narrowband() -> FrontEndConfig {
        FrontEndConfig::new(MfccConfig::narrowband(MfccType::Htk))
    }

    fn noise_frame(rng: &mut StdRng, len: usize) -> Vec<i16> {
        (0..len).map(|_| rng.gen_range(-500..500)).collect()
    }

    #[test]
    fn leading_zero_frames_are_skipped() {
        let mut cfg = narrowband();
        cfg.noise.use_dithering = false;
        let mut fe = FrontEnd::<f32>::with_seed(cfg, 1).unwrap();
        for _ in 0..5 {
            assert!(fe.process(&[0; 80]).unwrap().is_none());
        }
        let s = fe.summary(Duration::ZERO);
        assert_eq!(s.zero_frames_skipped, 5);
        assert_eq!(s.output_frames, 0);
    }

    #[test]
    fn first_output_after_suppressor_latency() {
        let mut fe = FrontEnd::<f32>::with_seed(narrowband(), 2).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut first = None;
        for call in 1..=10 {
            if fe.process(&noise_frame(&mut rng, 80)).unwrap().is_some() && first.is_none() {
                first = Some(call);
            }
        }
        assert_eq!(first, Some(5));
    }

    #[test]
    fn mfcc_starts_after_its_own_window() {
        let mut fe = FrontEnd::<f32>::with_seed(narrowband(), 3).unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        let frames: Vec<FrontEndFrame> = (0..12)
            .filter_map(|_| fe.process(&noise_frame(&mut rng, 80)).unwrap())
            .collect();
        assert_eq!(frames.len(), 8);
        assert!(frames[0].mfcc.is_none());
        assert!(frames[1].mfcc.is_none());
        let m = frames[2].mfcc.as_ref().unwrap();
        assert_eq!(m.features.len(), 13);
        assert_eq!(frames[2].samples.len(), 80);
    }

    #[test]
    fn broadband_merges_halves() {
        let cfg = FrontEndConfig::new(MfccConfig::broadband(MfccType::Etsi));
        let mut fe = FrontEnd::<f32>::with_seed(cfg, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let mut outputs = Vec::new();
        for _ in 0..8 {
            if let Some(f) = fe.process(&noise_frame(&mut rng, 160)).unwrap() {
                outputs.push(f);
            }
        }
        // Four half-shifts of latency is two full frames.
        assert_eq!(outputs.len(), 6);
        assert!(outputs.iter().all(|f| f.samples.len() == 160));
    }

    #[test]
    fn reset_reproduces_a_fresh_dithered_channel() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut input: Vec<Vec<i16>> = vec![vec![0; 80]; 3];
        input.extend((0..12).map(|_| noise_frame(&mut rng, 80)));
        input.extend(vec![vec![0; 80]; 6]);

        let run = |fe: &mut FrontEnd| -> Vec<(Vec<i16>, Option<Vec<f32>>)> {
            input
                .iter()
                .filter_map(|f| fe.process(f).unwrap())
                .map(|out| (out.samples, out.mfcc.map(|m| m.features)))
                .collect()
        };

        let mut used = FrontEnd::<f32>::with_seed(narrowband(), 6).unwrap();
        assert!(used.config().noise.use_dithering);
        run(&mut used);
        used.reset();
        let replayed = run(&mut used);

        let mut fresh = FrontEnd::<f32>::with_seed(narrowband(), 6).unwrap();
        assert_eq!(replayed, run(&mut fresh));
    }

    #[test]
    fn wrong_length_leaves_channel_usable() {
        let mut fe = FrontEnd::<f32>::with_seed(narrowband(), 5).unwrap();
        assert!(matches!(
            fe.process(&[0; 160]),
            Err(CepstraError::FrameLength { expected: 80, actual: 160 })
        ));
        assert!(!fe.is_poisoned());
        assert!(fe.process(&[1; 80]).is_ok());
    }

    struct Failing;

    impl NoiseSuppressor for Failing {
        fn suppress(&mut self, _shift: &[f32]) -> Result<Option<SuppressedFrame>> {
            Err(anyhow::anyhow!("backend fault").into())
        }
        fn reset(&mut self) {}
        fn latency(&self) -> usize {
            0
        }
    }

    #[test]
    fn backend_fault_poisons_until_reset() {
        let mut fe = FrontEnd::<f32>::with_suppressor(narrowband(), Box::new(Failing), 6).unwrap();
        assert!(matches!(fe.process(&[100; 80]), Err(CepstraError::Other(_))));
        assert!(matches!(fe.process(&[100; 80]), Err(CepstraError::ChannelPoisoned)));
        assert_eq!(fe.status(), ChannelStatus::Poisoned);
        fe.reset();
        assert_eq!(fe.status(), ChannelStatus::Idle);
    }

    #[test]
    fn fixed_path_runs_the_same_pipeline() {
        let cfg = FrontEndConfig {
            noise: NoiseConfig {
                use_dithering: false,
                pitch_classification: false,
            },
            ..narrowband()
        };
        let mut float = FrontEnd::<f32>::with_seed(cfg.clone(), 1).unwrap();
        let mut fixed = FrontEnd::<Fixed>::with_seed(cfg, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(10);
        for _ in 0..10 {
            let frame = noise_frame(&mut rng, 80);
            let a = float.process(&frame).unwrap();
            let b = fixed.process(&frame).unwrap();
            assert_eq!(a.is_some(), b.is_some());
            if let (Some(a), Some(b)) = (a, b) {
                assert_eq!(a.samples, b.samples);
                assert_eq!(a.mfcc.is_some(), b.mfcc.is_some());
            }
        }
    }
}
