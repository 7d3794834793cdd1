//! Read-only tables shared by every pitch estimator at one sample rate.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{DIRICHLET_SPAN, MIN_PITCH_FREQ, REF_BANDWIDTH, UDIST1, UDIST2};
use crate::config::SUPPORTED_RATES;
use crate::error::{CepstraError, Result};
use crate::numeric::Cplx;
use crate::preproc::{FRAME_LENGTH, FRAME_SHIFT};

pub(crate) const DFT_SIZE: usize = 256;
const HIGHPASS_CUTOFF_FREQ: f32 = 300.0;

/// Number of harmonic shapes in the utility-function table.
const NO_OF_FRACS: usize = 1 + (REF_BANDWIDTH / MIN_PITCH_FREQ) as usize;

/// Pitch-domain edges of the trapezoid placed around one harmonic index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Fractions {
    pub far_low: f32,
    pub low: f32,
    pub high: f32,
    pub far_high: f32,
}

#[derive(Debug)]
pub struct PitchRom {
    sample_rate: u32,
    dft_size: usize,
    window_size: usize,
    /// DFT bin at 4 kHz, the last one interpolated.
    last_interp_bin: usize,
    interp_len: usize,
    fractions: Vec<Fractions>,
    window_shift: Vec<Cplx<f32>>,
    dirichlet: [f32; DIRICHLET_SPAN],
    high_pass_cutoff: usize,
}

static ROM_CACHE: Mutex<Vec<Arc<PitchRom>>> = parking_lot::const_mutex(Vec::new());

impl PitchRom {
    pub fn new(sample_rate: u32) -> Result<Self> {
        if !SUPPORTED_RATES.contains(&sample_rate) {
            return Err(CepstraError::UnsupportedSampleRate(sample_rate));
        }
        let rate = sample_rate as f32;
        let last_interp_bin = (REF_BANDWIDTH * DFT_SIZE as f32 / rate) as usize;
        let interp_len = 2 * last_interp_bin + 1;

        let fractions = (0..=NO_OF_FRACS)
            .map(|i| {
                let i = i as f32;
                Fractions {
                    far_low: 1.0 / (i + UDIST2),
                    low: 1.0 / (i + UDIST1),
                    high: 1.0 / (i - UDIST1),
                    far_high: 1.0 / (i - UDIST2),
                }
            })
            .collect();

        // Time shift by one frame step, expressed on the 2x interpolated grid.
        let shift = -(std::f32::consts::PI * FRAME_SHIFT as f32 / DFT_SIZE as f32);
        let window_shift = (0..interp_len)
            .map(|i| {
                let theta = shift * i as f32;
                Cplx::new(theta.cos(), theta.sin())
            })
            .collect();

        let pi_div_n = std::f32::consts::PI / DFT_SIZE as f32;
        let inv_n = 1.0 / DFT_SIZE as f32;
        let mut dirichlet = [0.0; DIRICHLET_SPAN];
        for (k, d) in dirichlet.iter_mut().enumerate() {
            *d = -inv_n / (pi_div_n * (k as f32 + 0.5)).tan();
        }

        let high_pass_cutoff = (HIGHPASS_CUTOFF_FREQ * 2.0 * DFT_SIZE as f32 / rate) as usize;

        Ok(Self {
            sample_rate,
            dft_size: DFT_SIZE,
            window_size: FRAME_LENGTH,
            last_interp_bin,
            interp_len,
            fractions,
            window_shift,
            dirichlet,
            high_pass_cutoff,
        })
    }

    /// One ROM per sample rate for the whole process.
    pub fn shared(sample_rate: u32) -> Result<Arc<Self>> {
        let mut cache = ROM_CACHE.lock();
        if let Some(rom) = cache.iter().find(|r| r.sample_rate == sample_rate) {
            return Ok(Arc::clone(rom));
        }
        let rom = Arc::new(Self::new(sample_rate)?);
        debug!(sample_rate, interp_len = rom.interp_len, "pitch ROM built");
        cache.push(Arc::clone(&rom));
        Ok(rom)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Complex bins expected in the single-window STFT.
    pub fn stft_bins(&self) -> usize {
        self.dft_size / 2 + 1
    }

    pub(crate) fn dft_size(&self) -> usize {
        self.dft_size
    }

    pub(crate) fn window_size(&self) -> usize {
        self.window_size
    }

    pub(crate) fn last_interp_bin(&self) -> usize {
        self.last_interp_bin
    }

    pub(crate) fn interp_len(&self) -> usize {
        self.interp_len
    }

    pub(crate) fn fractions(&self) -> &[Fractions] {
        &self.fractions
    }

    pub(crate) fn window_shift(&self) -> &[Cplx<f32>] {
        &self.window_shift
    }

    pub(crate) fn dirichlet(&self) -> &[f32; DIRICHLET_SPAN] {
        &self.dirichlet
    }

    pub(crate) fn high_pass_cutoff(&self) -> usize {
        self.high_pass_cutoff
    }
}
