//! Typed configuration for one front-end channel.
//!
//! Every struct here can be built from a [`ConfigMap`] or from a preset, and
//! serializes to camelCase JSON so hosts can echo the effective settings.

mod map;

pub use map::ConfigMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CepstraError, Result};

/// Block length used by the log-power history and the suppressor core.
pub const BASE_SHIFT: usize = 80;

/// Sample rates the front end accepts.
pub const SUPPORTED_RATES: [u32; 2] = [8000, 16000];

/// Mel spectrum variant driving the cepstral analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MfccType {
    #[serde(rename = "HTK_MFCC")]
    Htk,
    #[serde(rename = "ETSI_MFCC")]
    Etsi,
    #[serde(rename = "DPS_MFCC")]
    Dps,
    #[serde(rename = "PDPS_MFCC")]
    Pdps,
}

impl MfccType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "HTK_MFCC" => Some(Self::Htk),
            "ETSI_MFCC" => Some(Self::Etsi),
            "DPS_MFCC" => Some(Self::Dps),
            "PDPS_MFCC" => Some(Self::Pdps),
            _ => None,
        }
    }
}

/// Source of the energy coefficient appended after the cepstra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnergyType {
    /// Block log-power of the time signal.
    Time,
    /// Log of the summed subband energies.
    Freq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfccConfig {
    pub sample_rate: u32,
    pub mfcc_type: MfccType,
    pub energy_type: EnergyType,
    pub frame_shift: usize,
    pub frame_size: usize,
    pub fft_size: usize,
    pub num_filters: usize,
    pub num_cepstra: usize,
    pub lower_mel_freq: f32,
    pub upper_mel_freq: f32,
    pub preemphasis: f32,
    pub weight_c0: f32,
    pub lifter_order: usize,
    pub entropy_bias: i32,
    pub use_spec_entropy: bool,
}

impl MfccConfig {
    /// 8 kHz preset: 240-sample window, 80-sample shift, 256-point FFT.
    pub fn narrowband(mfcc_type: MfccType) -> Self {
        Self::preset(8000, 80, 240, 256, 64.0, 4000.0, mfcc_type)
    }

    /// 16 kHz preset: 480-sample window, 160-sample shift, 512-point FFT.
    pub fn broadband(mfcc_type: MfccType) -> Self {
        Self::preset(16000, 160, 480, 512, 128.0, 8000.0, mfcc_type)
    }

    /// Preset for one of the supported rates.
    pub fn for_rate(sample_rate: u32, mfcc_type: MfccType) -> Result<Self> {
        match sample_rate {
            8000 => Ok(Self::narrowband(mfcc_type)),
            16000 => Ok(Self::broadband(mfcc_type)),
            other => Err(CepstraError::UnsupportedSampleRate(other)),
        }
    }

    fn preset(
        sample_rate: u32,
        frame_shift: usize,
        frame_size: usize,
        fft_size: usize,
        lower_mel_freq: f32,
        upper_mel_freq: f32,
        mfcc_type: MfccType,
    ) -> Self {
        let (preemphasis, weight_c0) = match mfcc_type {
            MfccType::Etsi => (0.9, 0.6),
            _ => (0.97, 0.0),
        };
        let lifter_order = if mfcc_type == MfccType::Htk { 22 } else { 0 };
        Self {
            sample_rate,
            mfcc_type,
            energy_type: EnergyType::Time,
            frame_shift,
            frame_size,
            fft_size,
            num_filters: 23,
            num_cepstra: 12,
            lower_mel_freq,
            upper_mel_freq,
            preemphasis,
            weight_c0,
            lifter_order,
            entropy_bias: 0,
            use_spec_entropy: false,
        }
    }

    /// Read every MFCC key. All keys except `DO_USE_SPEC_ENTROPY` are required.
    pub fn from_config(map: &ConfigMap) -> Result<Self> {
        let mfcc_name = map.require_str("MFCC_TYPE")?;
        let mfcc_type = MfccType::from_name(mfcc_name)
            .ok_or_else(|| CepstraError::invalid("MFCC_TYPE", mfcc_name))?;
        let energy_name = map.require_str("ENERGY_TYPE")?;
        let energy_type = match energy_name {
            "TIME" => EnergyType::Time,
            "FREQ" => EnergyType::Freq,
            other => return Err(CepstraError::invalid("ENERGY_TYPE", other)),
        };

        let cfg = Self {
            sample_rate: map.require_parsed("SAMPLE_RATE")?,
            mfcc_type,
            energy_type,
            frame_shift: map.require_parsed("FRAME_SHIFT")?,
            frame_size: map.require_parsed("FRAME_SIZE")?,
            fft_size: map.require_parsed("FFT_SIZE")?,
            num_filters: map.require_parsed("NUM_FILTER_BANK")?,
            num_cepstra: map.require_parsed("CEPSTRUM_ORDER")?,
            lower_mel_freq: map.require_parsed("LOWER_MEL_FREQ")?,
            upper_mel_freq: map.require_parsed("UPPER_MEL_FREQ")?,
            preemphasis: map.require_parsed("PREEMPHASIS_ALPHA")?,
            weight_c0: map.require_parsed("WEIGHT_C0")?,
            lifter_order: map.require_parsed("CEP_LIFTER_ORDER")?,
            entropy_bias: map.require_parsed("ENTROPY_BIAS")?,
            use_spec_entropy: map.get_bool("DO_USE_SPEC_ENTROPY")?.unwrap_or(false),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_RATES.contains(&self.sample_rate) {
            return Err(CepstraError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.frame_shift == 0 || self.frame_shift % BASE_SHIFT != 0 {
            return Err(CepstraError::invalid("FRAME_SHIFT", self.frame_shift));
        }
        if self.frame_size <= self.frame_shift || self.frame_size % self.frame_shift != 0 {
            return Err(CepstraError::invalid("FRAME_SIZE", self.frame_size));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < self.frame_size {
            return Err(CepstraError::invalid("FFT_SIZE", self.fft_size));
        }
        if self.num_filters < 2 {
            return Err(CepstraError::invalid("NUM_FILTER_BANK", self.num_filters));
        }
        if self.num_cepstra == 0 || self.num_cepstra >= self.num_filters {
            return Err(CepstraError::invalid("CEPSTRUM_ORDER", self.num_cepstra));
        }
        if self.upper_mel_freq > self.sample_rate as f32 {
            return Err(CepstraError::invalid("UPPER_MEL_FREQ", self.upper_mel_freq));
        }
        if self.lower_mel_freq < 0.0 || self.lower_mel_freq >= self.upper_mel_freq {
            return Err(CepstraError::invalid("LOWER_MEL_FREQ", self.lower_mel_freq));
        }
        if !(0.0..1.0).contains(&self.preemphasis) {
            return Err(CepstraError::invalid("PREEMPHASIS_ALPHA", self.preemphasis));
        }
        Ok(())
    }

    /// Output vector length: cepstra, energy, and the optional entropy slot.
    pub fn feature_dim(&self) -> usize {
        self.num_cepstra + 1 + usize::from(self.use_spec_entropy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct NoiseConfig {
    /// Add ±64 dither to every raw sample before suppression.
    pub use_dithering: bool,
    /// Run the pitch and voicing classification path inside stage 0.
    pub pitch_classification: bool,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            use_dithering: true,
            pitch_classification: true,
        }
    }
}

impl NoiseConfig {
    pub fn from_config(map: &ConfigMap) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            use_dithering: map
                .get_bool("USE_DITHERING")?
                .unwrap_or(defaults.use_dithering),
            pitch_classification: map
                .get_bool("DO_PITCH_CLASSIFY")?
                .unwrap_or(defaults.pitch_classification),
        })
    }
}

/// Iteration budgets for utility-function construction, per sub-range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PitchConfig {
    pub budget_short: u32,
    pub budget_single: u32,
    pub budget_double: u32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            budget_short: 20,
            budget_single: 30,
            budget_double: 60,
        }
    }
}

impl PitchConfig {
    pub fn from_config(map: &ConfigMap) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            budget_short: map
                .get_parsed("PITCH_BUDGET_SHORT")?
                .unwrap_or(defaults.budget_short),
            budget_single: map
                .get_parsed("PITCH_BUDGET_SINGLE")?
                .unwrap_or(defaults.budget_single),
            budget_double: map
                .get_parsed("PITCH_BUDGET_DOUBLE")?
                .unwrap_or(defaults.budget_double),
        })
    }
}

/// Everything one channel needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontEndConfig {
    pub mfcc: MfccConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub pitch: PitchConfig,
}

impl FrontEndConfig {
    pub fn new(mfcc: MfccConfig) -> Self {
        Self {
            mfcc,
            noise: NoiseConfig::default(),
            pitch: PitchConfig::default(),
        }
    }

    pub fn from_config(map: &ConfigMap) -> Result<Self> {
        let cfg = Self {
            mfcc: MfccConfig::from_config(map)?,
            noise: NoiseConfig::from_config(map)?,
            pitch: PitchConfig::from_config(map)?,
        };
        cfg.validate()?;
        info!(
            sample_rate = cfg.mfcc.sample_rate,
            mfcc_type = ?cfg.mfcc.mfcc_type,
            energy_type = ?cfg.mfcc.energy_type,
            dithering = cfg.noise.use_dithering,
            pitch = cfg.noise.pitch_classification,
            "front-end configuration parsed"
        );
        Ok(cfg)
    }

    /// The channel feeds one 10 ms shift per call.
    pub fn validate(&self) -> Result<()> {
        self.mfcc.validate()?;
        let expected = self.mfcc.sample_rate as usize / 100;
        if self.mfcc.frame_shift != expected {
            return Err(CepstraError::invalid("FRAME_SHIFT", self.mfcc.frame_shift));
        }
        Ok(())
    }

    pub fn frame_shift(&self) -> usize {
        self.mfcc.frame_shift
    }
}
