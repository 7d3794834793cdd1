//! Two-stage Wiener noise suppression.
//!
//! ```text
//! shift ─► stage 0 ─► stage 1 ─► DC offset ─► SuppressedFrame
//!          │ VAD-gated noise     │ soft-min noise
//!          │ frame-drop tests    │ gain factorization
//!          └► voicing analysis (optional)
//! ```
//!
//! Each stage buffers two shifts before it filters, so the first denoised
//! shift comes out of the fifth call. The core always runs at 8 kHz on
//! 80-sample shifts; broadband callers hand it two halves per frame.

pub mod melfb;

mod frame_drop;
mod gain;
mod wiener;

pub use frame_drop::{FrameDropDetector, SpectralEntropy, MIN_ENTROPY};
pub use gain::GainFactorizer;
pub use wiener::WienerSuppressor;

use crate::classify::FrameClass;
use crate::error::Result;
use crate::pitch::PitchEstimate;
use crate::vad::VadDecision;

pub const NS_SAMPLE_RATE: u32 = 8000;
pub const NS_FRAME_SHIFT: usize = 80;
pub const NS_FRAME_LENGTH: usize = 200;
pub const NS_FFT_LENGTH: usize = 256;
/// Bins of the half-resolution PSD the filter is designed on.
pub const NS_SPEC_ORDER: usize = NS_FFT_LENGTH / 4 + 1;
/// Frames each stage buffers before it filters.
pub const NS_NB_FRAMES_LATENCY: u32 = 2;
pub const NS_FILTER_LENGTH: usize = 17;
pub const NS_HALF_FILTER_LENGTH: usize = NS_FILTER_LENGTH / 2;
pub const WF_MEL_ORDER: usize = 25;

/// One denoised shift plus the stage-0 decisions made alongside it.
#[derive(Debug, Clone)]
pub struct SuppressedFrame {
    pub samples: [f32; NS_FRAME_SHIFT],
    /// Energy VAD of the suppressor.
    pub vad: VadDecision,
    /// More than four consecutive VAD speech shifts.
    pub speech_found: bool,
    pub speech_found_var: bool,
    pub speech_found_spec: bool,
    pub speech_found_mel: bool,
    pub entropy: f32,
    pub class: FrameClass,
    pub pitch: PitchEstimate,
}

/// A noise suppression backend fed one shift per call, in capture order.
pub trait NoiseSuppressor: Send {
    /// Returns `None` while the internal pipeline is still filling.
    fn suppress(&mut self, shift: &[f32]) -> Result<Option<SuppressedFrame>>;

    fn reset(&mut self);

    /// Calls that return `None` before the first output.
    fn latency(&self) -> usize;
}
