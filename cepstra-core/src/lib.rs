//! # cepstra-core
//!
//! Adaptive speech-recognition front end: a two-stage Wiener noise
//! suppressor with pitch tracking and frame voicing classification, feeding
//! an MFCC extractor with HTK, ETSI, DPS and PDPS variants.
//!
//! ## Architecture
//!
//! ```text
//! i16 PCM (10 ms) → dither → GSM HPF → zero gate
//!                                        │
//!                               WienerSuppressor (80-sample shifts)
//!                                ├── EnergyVad / AfeVad
//!                                ├── BandSplitter → PitchEstimator(PitchRom)
//!                                └── frame classifier
//!                                        │
//!                           denoised i16 shift + class + pitch
//!                                        │
//!                          MfccExtractor<f32 | Fixed> → MfccFrame
//! ```
//!
//! A [`FrontEnd`] owns every stage of one channel. Channels share only the
//! immutable pitch tables, so independent channels can run on separate
//! threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod frontend;
pub mod hpf;
pub mod mfcc;
pub mod noise;
pub mod numeric;
pub mod pcorr;
pub mod pitch;
pub mod preproc;
pub mod vad;
pub mod voicing;

// Convenience re-exports for downstream crates
pub use classify::FrameClass;
pub use config::{ConfigMap, EnergyType, FrontEndConfig, MfccConfig, MfccType, NoiseConfig, PitchConfig};
pub use error::CepstraError;
pub use events::{ChannelStatus, FeatureRecord, StreamSummary};
pub use frontend::{FrontEnd, FrontEndFrame};
pub use mfcc::{ConvertStatus, MfccExtractor, MfccFrame};
pub use noise::{NoiseSuppressor, SuppressedFrame, WienerSuppressor};
pub use numeric::{ArithStatus, Fixed, Scalar};
pub use pitch::{PitchEstimate, PitchRom};
pub use vad::VadDecision;
