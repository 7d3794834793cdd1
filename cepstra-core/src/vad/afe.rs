//! Channel-SNR voice activity detector over 23 mel channel energies.
//!
//! ## Algorithm
//!
//! 1. Smooth the shaped channel energies (rate 0.55, floor 5000).
//! 2. Quantize each channel's SNR against the channel noise estimate in
//!    0.375 dB steps and sum a nonlinear voice metric over channels.
//! 3. Track a long-term SNR. Its 20-level quantization selects the signal,
//!    update and VAD thresholds together with the burst and hangover
//!    lengths.
//! 4. Update the noise estimate on low-metric, flat-spectrum frames, and
//!    force an update after 500 stationary frames.
//! 5. Declare speech on `metric > vad_threshold`. A burst of such frames
//!    arms a hangover that keeps speech declared after the burst ends.

use tracing::debug;

use super::{VadDecision, VoiceActivityDetector};

pub const NUM_CHANNELS: usize = 23;

const MIN_CH_ENERGY: f32 = 5000.0;
const INIT_SIG_ENERGY: f32 = 1.0e9;
const CE_SM_FAC: f32 = 0.55;
const CNE_SM_FAC: f32 = 0.1;
const LO_GAMMA: f32 = 0.7;
const HI_GAMMA: f32 = 0.9;
const LO_BETA: f32 = 0.95;
const HI_BETA: f32 = 0.998;
const INIT_FRAMES: u32 = 10;
const SINE_START_CHANNEL: usize = 4;
const PEAK_TO_AVE_THLD: f32 = 10.0;
const DEV_THLD: f32 = 70.0;
const HYSTER_CNT_THLD: u32 = 9;
const F_UPDATE_CNT_THLD: u32 = 500;
const NON_SPEECH_THLD: u32 = 32;

static VM_TABLE: [u32; 90] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6, 7, 7, 7, 8, 8, 9, 9, 10,
    10, 11, 12, 12, 13, 13, 14, 15, 15, 16, 17, 17, 18, 19, 20, 20, 21, 22, 23, 24, 24, 25, 26, 27,
    28, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49,
    50, 50, 50, 50, 50, 50, 50, 50, 50, 50,
];

static SIG_THLD: [u32; 20] = [
    36, 43, 52, 62, 73, 86, 101, 117, 134, 153, 173, 194, 217, 242, 268, 295, 295, 295, 295, 295,
];

static UPDATE_THLD: [u32; 20] = [
    31, 32, 33, 34, 35, 36, 37, 37, 37, 37, 37, 37, 37, 37, 37, 38, 38, 38, 38, 38,
];

static BURST_CONST: [u32; 20] = [2, 2, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6];

static HANG_CONST: [i32; 20] = [
    54, 52, 50, 48, 46, 44, 42, 40, 38, 36, 34, 32, 30, 28, 26, 24, 22, 20, 18, 16,
];

static VAD_THLD: [u32; 20] = [
    32, 34, 36, 38, 40, 42, 44, 46, 48, 50, 52, 54, 55, 56, 57, 57, 58, 58, 58, 58,
];

static SHAPE_8K: [f32; NUM_CHANNELS] = [
    0.3333, 0.3333, 0.2857, 0.2857, 0.2857, 0.2500, 0.2500, 0.2222, 0.2000, 0.2000, 0.2000, 0.1818,
    0.1667, 0.1538, 0.1429, 0.1429, 0.1333, 0.1176, 0.1111, 0.1111, 0.1000, 0.0909, 0.0870,
];

fn quantized_snr(snr: f32) -> usize {
    ((snr / 1.5) as i32).clamp(0, 19) as usize
}

#[derive(Debug, Clone)]
pub struct AfeVad {
    frame_count: u32,
    chan_energy: [f32; NUM_CHANNELS],
    chan_noise: [f32; NUM_CHANNELS],
    log_spec_long: [f32; NUM_CHANNELS],
    noise_energy: f32,
    snr: f32,
    beta: f32,
    sig_thld: u32,
    forced_update: bool,
    update_count: u32,
    last_update_count: u32,
    hyster_count: u32,
    burst_const: u32,
    burst_count: u32,
    hang_const: i32,
    hang_count: i32,
    vad_thld: u32,
}

impl AfeVad {
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            chan_energy: [0.0; NUM_CHANNELS],
            chan_noise: [0.0; NUM_CHANNELS],
            log_spec_long: [0.0; NUM_CHANNELS],
            noise_energy: 0.0,
            snr: 0.0,
            beta: LO_BETA,
            sig_thld: 217,
            forced_update: false,
            update_count: 0,
            last_update_count: 0,
            hyster_count: 0,
            burst_const: 6,
            burst_count: 0,
            hang_const: 28,
            hang_count: -1,
            vad_thld: 56,
        }
    }

    /// Long-term SNR estimate in dB.
    pub fn snr(&self) -> f32 {
        self.snr
    }

    fn in_init(&self) -> bool {
        self.frame_count <= INIT_FRAMES || self.forced_update
    }

    fn voice_metric(&mut self, mfb: &[f32]) -> u32 {
        self.frame_count = self.frame_count.saturating_add(1);

        let alpha = if self.frame_count == 1 { 1.0 } else { CE_SM_FAC };
        for ((ch, &e), &shape) in self.chan_energy.iter_mut().zip(mfb).zip(&SHAPE_8K) {
            *ch = ((1.0 - alpha) * *ch + alpha * e * shape).max(MIN_CH_ENERGY);
        }

        let peak = self.chan_energy[SINE_START_CHANNEL..]
            .iter()
            .fold(0.0f32, |m, &c| m.max(c));
        let ave = self.chan_energy.iter().sum::<f32>() / NUM_CHANNELS as f32;
        let peak_to_ave = 10.0 * (peak / ave).log10();

        if self.in_init() {
            if peak_to_ave < PEAK_TO_AVE_THLD {
                let first = self.frame_count == 1;
                for (n, &c) in self.chan_noise.iter_mut().zip(&self.chan_energy) {
                    *n = if first { c } else { 0.7 * *n + 0.3 * c };
                }
            } else {
                self.chan_noise = [MIN_CH_ENERGY; NUM_CHANNELS];
            }
        }

        let metric: u32 = self
            .chan_energy
            .iter()
            .zip(&self.chan_noise)
            .map(|(&c, &n)| {
                let snr = (10.0 * (c / n).log10()).max(0.0);
                let q = ((snr + 0.1875) / 0.375) as usize;
                VM_TABLE[q.min(VM_TABLE.len() - 1)]
            })
            .sum();

        let mut log_spec = [0.0f32; NUM_CHANNELS];
        for (l, &c) in log_spec.iter_mut().zip(&self.chan_energy) {
            *l = 10.0 * c.log10();
        }
        if self.in_init() {
            self.log_spec_long = log_spec;
        }
        let deviation: f32 = self
            .log_spec_long
            .iter()
            .zip(&log_spec)
            .map(|(a, b)| (a - b).abs())
            .sum();
        let gamma = if metric > self.sig_thld { HI_GAMMA } else { LO_GAMMA };
        for (long, &l) in self.log_spec_long.iter_mut().zip(&log_spec) {
            *long = gamma * *long + (1.0 - gamma) * l;
        }

        self.noise_energy = self.chan_noise.iter().sum();
        let sig_inst = if self.in_init() {
            INIT_SIG_ENERGY
        } else if metric > self.sig_thld {
            self.chan_energy
                .iter()
                .zip(&self.chan_noise)
                .map(|(&c, &n)| c.max(n))
                .sum()
        } else {
            self.noise_energy
        };
        let snr_inst = (10.0 * (sig_inst / self.noise_energy).log10()).max(0.0);

        if self.in_init() {
            self.snr = snr_inst;
        } else if metric > self.sig_thld {
            self.snr = self.beta * self.snr + (1.0 - self.beta) * snr_inst;
            self.beta = (self.beta + 0.003).min(HI_BETA);
        } else {
            self.beta = (self.beta - 0.003).max(LO_BETA);
        }

        let q = quantized_snr(self.snr);
        self.sig_thld = SIG_THLD[q];
        let update_thld = UPDATE_THLD[q];

        let mut update = false;
        self.forced_update = false;
        if metric < update_thld && peak_to_ave < PEAK_TO_AVE_THLD && self.frame_count > INIT_FRAMES {
            update = true;
            self.update_count = 0;
        } else if peak_to_ave < PEAK_TO_AVE_THLD && deviation < DEV_THLD {
            self.update_count += 1;
            if self.update_count >= F_UPDATE_CNT_THLD {
                update = true;
                self.forced_update = true;
                debug!(frame = self.frame_count, "forced noise estimate update");
            }
        }

        if self.update_count == self.last_update_count {
            self.hyster_count += 1;
        } else {
            self.hyster_count = 0;
        }
        self.last_update_count = self.update_count;
        if self.hyster_count > HYSTER_CNT_THLD {
            self.update_count = 0;
        }

        if update {
            for (n, &c) in self.chan_noise.iter_mut().zip(&self.chan_energy) {
                *n = ((1.0 - CNE_SM_FAC) * *n + CNE_SM_FAC * c).max(MIN_CH_ENERGY);
            }
        }

        if self.frame_count <= INIT_FRAMES {
            NON_SPEECH_THLD
        } else {
            metric
        }
    }
}

impl Default for AfeVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivityDetector for AfeVad {
    /// `energies` holds [`NUM_CHANNELS`] mel filter-bank outputs; missing
    /// channels count as zero energy.
    fn classify(&mut self, energies: &[f32]) -> VadDecision {
        let mut mfb = [0.0f32; NUM_CHANNELS];
        for (m, &e) in mfb.iter_mut().zip(energies) {
            *m = e;
        }
        let metric = self.voice_metric(&mfb);

        let voiced = metric > self.vad_thld;
        if voiced {
            self.burst_count += 1;
        } else {
            self.burst_count = 0;
        }
        if self.burst_count >= self.burst_const {
            self.hang_count = self.hang_const;
            self.burst_count = self.burst_const;
        }

        let decision = if voiced {
            VadDecision::Speech
        } else if self.hang_count >= 0 {
            VadDecision::Hangover
        } else {
            VadDecision::Silence
        };
        if self.hang_count >= 0 {
            self.hang_count -= 1;
        }

        let q = quantized_snr(self.snr);
        self.vad_thld = VAD_THLD[q];
        self.burst_const = BURST_CONST[q];
        self.hang_const = HANG_CONST[q];
        decision
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}
