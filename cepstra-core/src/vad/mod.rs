//! Voice activity detection.
//!
//! Two detectors share the [`VoiceActivityDetector`] trait:
//!
//! - [`EnergyVad`] rates the log energy of one 80-sample shift against a
//!   long-term mean. It gates noise tracking inside the suppressor.
//! - [`AfeVad`] rates 23 mel channel energies against per-channel noise
//!   estimates. It drives frame classification on the voicing path.
//!
//! Both are stateful and must see frames in capture order.

pub mod afe;
pub mod energy;

pub use afe::AfeVad;
pub use energy::EnergyVad;

use serde::{Deserialize, Serialize};

/// Per-frame speech decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VadDecision {
    /// The frame itself carries speech.
    Speech,
    /// Speech is declared only because it recently ended.
    Hangover,
    #[default]
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self != VadDecision::Silence
    }

    pub fn is_hangover(self) -> bool {
        self == VadDecision::Hangover
    }
}

/// Trait for all VAD implementations.
///
/// The meaning of `input` depends on the detector: time samples for
/// [`EnergyVad`], filter-bank energies for [`AfeVad`].
pub trait VoiceActivityDetector: Send + 'static {
    fn classify(&mut self, input: &[f32]) -> VadDecision;

    /// Return to the state of a freshly constructed detector.
    fn reset(&mut self);
}
