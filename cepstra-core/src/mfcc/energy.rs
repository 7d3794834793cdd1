//! Frame power and frame energy terms.

use std::ops::Range;

use crate::config::BASE_SHIFT;
use crate::numeric::Scalar;

/// Log of `value`, or 0 when it is below 1.
pub(crate) fn floored_ln<S: Scalar>(value: S) -> S {
    if value < S::ONE {
        S::ZERO
    } else {
        value.ln()
    }
}

/// Block powers over the samples of one analysis window.
#[derive(Debug, Clone)]
pub(crate) struct BlockPower<S> {
    blocks: Vec<S>,
    new_blocks: usize,
}

impl<S: Scalar> BlockPower<S> {
    pub fn new(frame_size: usize, frame_shift: usize) -> Self {
        Self {
            blocks: vec![S::ZERO; frame_size / BASE_SHIFT],
            new_blocks: frame_shift / BASE_SHIFT,
        }
    }

    pub fn reset(&mut self) {
        self.blocks.fill(S::ZERO);
    }

    /// Push one pre-emphasized shift and return the log power of the whole
    /// window. Returns 0 until the window has been filled once.
    pub fn push(&mut self, shift: &[S], filled: bool) -> S {
        self.blocks.rotate_left(self.new_blocks);
        let start = self.blocks.len() - self.new_blocks;
        for (slot, block) in self.blocks[start..].iter_mut().zip(shift.chunks(BASE_SHIFT)) {
            *slot = block.iter().fold(S::ZERO, |acc, &x| acc + x * x);
        }
        if !filled {
            return S::ZERO;
        }
        let total = self.blocks.iter().fold(S::ZERO, |acc, &p| acc + p);
        floored_ln(total)
    }
}

/// Bins summed for the FREQ energy term.
pub(crate) fn energy_band(sample_rate: u32, bins: usize) -> Range<usize> {
    let high = if sample_rate == 8000 { 120 } else { 240 };
    8.min(bins)..high.min(bins)
}

/// Log of the summed subband power over [`energy_band`].
pub(crate) fn band_log_energy<S: Scalar>(power: &[S], band: Range<usize>) -> S {
    floored_ln(power[band].iter().fold(S::ZERO, |acc, &p| acc + p))
}

const BOOTSTRAP_FRAMES: u32 = 12;
const BOOTSTRAP_CAP: f32 = 19.0;
const LOUD_ONSET_FRAMES: u32 = 6;
const DEFAULT_BOUNDS: (f32, f32) = (15.0, 20.0);
const LOUD_ONSET_BOUNDS: (f32, f32) = (16.5, 20.5);

/// `(average below, min, max)` in ascending order; the last row covers the rest.
const BOUND_TABLE: [(f32, f32, f32); 16] = [
    (6.0, 14.0, 17.1),
    (7.0, 14.2, 17.2),
    (8.0, 14.5, 17.3),
    (9.0, 14.8, 17.4),
    (10.0, 15.0, 17.8),
    (11.0, 15.2, 18.0),
    (12.0, 15.4, 19.9),
    (13.0, 15.7, 20.0),
    (14.0, 16.0, 20.2),
    (15.0, 17.5, 20.5),
    (16.0, 17.8, 21.0),
    (17.0, 18.0, 21.0),
    (18.0, 18.5, 21.5),
    (19.0, 19.0, 22.0),
    (21.0, 19.2, 22.2),
    (f32::INFINITY, 19.3, 22.5),
];

/// Log-energy range the entropy noise model is clamped to, learned from
/// the energies of the first frames.
#[derive(Debug, Clone)]
pub(crate) struct EnergyBounds {
    min: f32,
    max: f32,
    sum: f32,
    count: u32,
}

impl EnergyBounds {
    pub fn new() -> Self {
        Self {
            min: DEFAULT_BOUNDS.0,
            max: DEFAULT_BOUNDS.1,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// `frame` counts calls including this one.
    pub fn observe(&mut self, energy: f32, frame: u32) {
        if frame > BOOTSTRAP_FRAMES {
            return;
        }
        if energy > BOOTSTRAP_CAP && frame < LOUD_ONSET_FRAMES {
            (self.min, self.max) = LOUD_ONSET_BOUNDS;
            return;
        }
        self.count += 1;
        self.sum += energy.min(BOOTSTRAP_CAP);
        let average = self.sum / self.count as f32;
        if let Some(&(_, min, max)) = BOUND_TABLE.iter().find(|(below, _, _)| average < *below) {
            self.min = min;
            self.max = max;
        }
    }
}
