//! Band-split preprocessing for the pitch path.
//!
//! Each 200-sample analysis frame is filtered twice:
//!
//! ```text
//! input ──► 6th-order HPF ──► upper band (200)          → classifier
//!       └─► 7th-order LPF ──► processed (120 + 200) ──► ÷4 ──► decimated (80)
//! ```
//!
//! When low-band noise is flagged the low-pass filter switches to a 6th-order
//! design without low-frequency emphasis. Filter states live in the output
//! buffers themselves, so the first frame of a session runs a separate path
//! that starts from zero history.

use crate::error::{CepstraError, Result};

pub const FRAME_LENGTH: usize = 200;
pub const FRAME_SHIFT: usize = 80;
pub const HISTORY_LENGTH: usize = 120;
pub const DOWN_SAMPLE: usize = 4;
pub const PROC_LENGTH: usize = HISTORY_LENGTH + FRAME_LENGTH;
pub const DECIMATED_LENGTH: usize = PROC_LENGTH / DOWN_SAMPLE;

const HPF_ORDER: usize = 6;
const LPF_ORDER: usize = 7;
const LPF_ORDER_NO_LB_EMPH: usize = 6;

struct FilterBank {
    hpf_a: [f32; HPF_ORDER + 1],
    hpf_b: [f32; HPF_ORDER + 1],
    lpf_a: [f32; LPF_ORDER + 1],
    lpf_b: [f32; LPF_ORDER + 1],
    flat_a: [f32; LPF_ORDER_NO_LB_EMPH + 1],
    flat_b: [f32; LPF_ORDER_NO_LB_EMPH + 1],
}

static BANK_8K: FilterBank = FilterBank {
    hpf_a: [1.0, -2.37972104, 2.91040657, -2.05513144, 0.87792390, -0.20986545, 0.02183157],
    hpf_b: [0.14773250, -0.88639500, 2.21598750, -2.95464999, 2.21598749, -0.88639500, 0.14773250],
    lpf_a: [1.0, -4.47943480, 8.88015848, -10.05821568, 6.99836861, -2.98181953, 0.71850318, -0.07538083],
    lpf_b: [
        0.0003405377, 0.0018389033, 0.0038821292, 0.0037459142, 0.0010216130, -0.0010216130,
        -0.0008853979, -0.0002043226,
    ],
    flat_a: [1.0, -3.57943480, 5.65866717, -4.96541523, 2.52949491, -0.70527411, 0.08375648],
    flat_b: [0.00034054, 0.00204323, 0.00510806, 0.00681075, 0.00510806, 0.00204323, 0.00034054],
};

static BANK_11K: FilterBank = FilterBank {
    hpf_a: [
        1.0, -3.36067979080750, 5.06982907485034, -4.27873732337721, 2.10853144888207,
        -0.57109866030671, 0.06610536478028,
    ],
    hpf_b: [
        0.25710908848444, -1.54265453090663, 3.85663632726659, -5.14218176968878,
        3.85663632726659, -1.54265453090663, 0.25710908848444,
    ],
    lpf_a: [
        1.0, -5.16457301342956, 11.60327150757658, -14.68045002998683, 11.28039703154784,
        -5.25795344738947, 1.37514936680065, -0.15553999870817,
    ],
    lpf_b: [
        0.00006475945579, 0.00034263580465, 0.00069586625626, 0.00060637516431,
        0.00005297323484, -0.00030025721678, -0.00021076612482, -0.00004592093010,
    ],
    flat_a: [
        1.0, -4.23729801342957, 7.67413099217370, -7.56442021421899, 4.26609927740795,
        -1.30210623993103, 0.16773880316861,
    ],
    flat_b: [
        0.00006475945579, 0.00038855673475, 0.00097139183688, 0.00129518911584,
        0.00097139183688, 0.00038855673475, 0.00006475945579,
    ],
};

static BANK_16K: FilterBank = FilterBank {
    hpf_a: [
        1.0, -4.18238957916850, 7.49161108458765, -7.31359596689075, 4.08934993183312,
        -1.23852537177671, 0.15842763255178,
    ],
    hpf_b: [
        0.39802968073138, -2.38817808438830, 5.97044521097075, -7.96059361462766,
        5.97044521097075, -2.38817808438830, 0.39802968073138,
    ],
    lpf_a: [
        1.0, -5.73713549885214, 14.19729645263144, -19.63612073482969, 16.38673682892475,
        -8.24809503698812, 2.31775924387808, -0.28041380978170,
    ],
    lpf_b: [
        0.00000857655707, 0.00004459809678, 0.00008748088215, 0.00006861245659,
        -0.00000857655707, -0.00005145934244, -0.00003259091688, -0.00000686124566,
    ],
    flat_a: [
        1.0, -4.78713549885213, 9.64951772872192, -10.46907889254388, 6.44111188100808,
        -2.12903875003046, 0.29517243134916,
    ],
    flat_b: [
        0.00000857655707, 0.00005145934244, 0.00012864835610, 0.00017153114146,
        0.00012864835610, 0.00005145934244, 0.00000857655707,
    ],
};

/// Direct-form IIR over `len` samples. Input history is read from
/// `input[in_at - order..in_at]` and output history from
/// `output[out_at - order..out_at]`.
fn filter(
    b: &[f32],
    a: &[f32],
    input: &[f32],
    in_at: usize,
    len: usize,
    output: &mut [f32],
    out_at: usize,
) {
    let order = b.len() - 1;
    for i in 0..len {
        let mut y = b[0] * input[in_at + i];
        for j in 1..=order {
            y += b[j] * input[in_at + i - j];
            y -= a[j] * output[out_at + i - j];
        }
        output[out_at + i] = y;
    }
}

pub struct BandSplitter {
    bank: &'static FilterBank,
    input: [f32; FRAME_LENGTH],
    upper_band: [f32; FRAME_LENGTH],
    processed: [f32; PROC_LENGTH],
    decimated: [f32; DECIMATED_LENGTH],
}

impl BandSplitter {
    /// Filters exist for 8, 11 and 16 kHz.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let bank = match sample_rate {
            8000 => &BANK_8K,
            11000 => &BANK_11K,
            16000 => &BANK_16K,
            other => return Err(CepstraError::UnsupportedSampleRate(other)),
        };
        Ok(Self {
            bank,
            input: [0.0; FRAME_LENGTH],
            upper_band: [0.0; FRAME_LENGTH],
            processed: [0.0; PROC_LENGTH],
            decimated: [0.0; DECIMATED_LENGTH],
        })
    }

    pub fn reset(&mut self) {
        self.input = [0.0; FRAME_LENGTH];
        self.upper_band = [0.0; FRAME_LENGTH];
        self.processed = [0.0; PROC_LENGTH];
        self.decimated = [0.0; DECIMATED_LENGTH];
    }

    /// Filter one analysis frame of [`FRAME_LENGTH`] samples.
    pub fn split(&mut self, frame: &[f32], first_frame: bool, low_band_noise: bool) -> Result<()> {
        if frame.len() != FRAME_LENGTH {
            return Err(CepstraError::FrameLength {
                expected: FRAME_LENGTH,
                actual: frame.len(),
            });
        }
        self.input.copy_from_slice(frame);

        let bank = self.bank;
        let (lpf_a, lpf_b): (&[f32], &[f32]) = if low_band_noise {
            (&bank.flat_a, &bank.flat_b)
        } else {
            (&bank.lpf_a, &bank.lpf_b)
        };
        let lpf_order = lpf_b.len() - 1;

        if first_frame {
            let len = FRAME_LENGTH - FRAME_SHIFT;
            let start = FRAME_LENGTH - len;
            for i in 0..HPF_ORDER {
                self.input[start - 1 - i] = 0.0;
                self.upper_band[start - 1 - i] = 0.0;
            }
            filter(&bank.hpf_b, &bank.hpf_a, &self.input, start, len, &mut self.upper_band, start);

            for i in 0..lpf_order {
                self.input[start - 1 - i] = 0.0;
                self.processed[HISTORY_LENGTH + start - 1 - i] = 0.0;
            }
            filter(lpf_b, lpf_a, &self.input, start, len, &mut self.processed, HISTORY_LENGTH + start);
        } else {
            let len = FRAME_SHIFT;
            let start = FRAME_LENGTH - len;
            self.upper_band.copy_within(len.., 0);
            filter(&bank.hpf_b, &bank.hpf_a, &self.input, start, len, &mut self.upper_band, start);

            self.processed.copy_within(len.., 0);
            filter(lpf_b, lpf_a, &self.input, start, len, &mut self.processed, HISTORY_LENGTH + start);
        }

        for (j, d) in self.decimated.iter_mut().enumerate() {
            *d = self.processed[j * DOWN_SAMPLE];
        }
        Ok(())
    }

    pub fn upper_band(&self) -> &[f32] {
        &self.upper_band
    }

    pub fn processed(&self) -> &[f32] {
        &self.processed
    }

    /// Decimated low band, [`DECIMATED_LENGTH`] samples of which the first
    /// `HISTORY_LENGTH / DOWN_SAMPLE` are history.
    pub fn decimated(&self) -> &[f32] {
        &self.decimated
    }
}
