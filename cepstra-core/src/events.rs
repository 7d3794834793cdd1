//! Serialisable records a channel hands to its consumers.
//!
//! The CLI writes one [`FeatureRecord`] per line followed by a single
//! [`StreamSummary`]. All types use camelCase field names.

use serde::{Deserialize, Serialize};

use crate::classify::FrameClass;
use crate::frontend::FrontEndFrame;
use crate::vad::VadDecision;

// ---------------------------------------------------------------------------
// Feature records
// ---------------------------------------------------------------------------

/// One denoised frame and its feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    /// Front-end output index.
    pub frame: u64,
    pub class: FrameClass,
    pub speech_found: bool,
    pub vad: VadDecision,
    pub entropy: f32,
    /// Pitch frequency in Hz, `0.0` when unvoiced.
    pub pitch_hz: f32,
    /// `None` while the extractor fills its window.
    pub log_energy: Option<f32>,
    pub log_power: Option<f32>,
    /// Cepstra, energy term and the optional entropy slot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<f32>,
    /// Some fixed-point intermediate clipped while producing `features`.
    #[serde(default)]
    pub saturated: bool,
}

impl From<&FrontEndFrame> for FeatureRecord {
    fn from(frame: &FrontEndFrame) -> Self {
        let mfcc = frame.mfcc.as_ref();
        Self {
            frame: frame.index,
            class: frame.class,
            speech_found: frame.speech_found,
            vad: frame.vad,
            entropy: frame.entropy,
            pitch_hz: frame.pitch.freq,
            log_energy: mfcc.map(|m| m.log_energy),
            log_power: mfcc.map(|m| m.log_power),
            features: mfcc.map(|m| m.features.clone()).unwrap_or_default(),
            saturated: mfcc.is_some_and(|m| m.status.saturated),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel status
// ---------------------------------------------------------------------------

/// Coarse state of one front-end channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Nothing fed since construction or the last reset.
    Idle,
    /// Frames accepted, pipeline still filling.
    Priming,
    /// Denoised frames are being produced.
    Streaming,
    /// A pipeline error occurred; reset required.
    Poisoned,
}

// ---------------------------------------------------------------------------
// Stream summary
// ---------------------------------------------------------------------------

/// Totals for one processed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub input_frames: u64,
    pub output_frames: u64,
    /// Leading all-zero shifts dropped before the first non-zero input.
    pub zero_frames_skipped: u64,
    pub elapsed_ms: f64,
}
