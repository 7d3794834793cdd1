//! Normalized correlation at a non-integer pitch lag.
//!
//! ## Algorithm
//!
//! 1. Convert the candidate frequency to a decimated lag `P` and bracket it
//!    with the integer lags `floor(P)` and `floor(P) + 1`, weighted by
//!    `alpha = floor(P) + 1 - P`.
//! 2. Place a fixed analysis window (75 samples at 8 kHz before decimation)
//!    on the most energetic stretch of the frame. Short periods fit inside
//!    the window; long periods are treated as cyclic, so the window may be
//!    split in two.
//! 3. Accumulate energies, cross products and sums at both lags, remove DC,
//!    then interpolate the normalized correlation and clamp it to `[0, 1]`.
//!
//! Results for one `(frame, integer lag)` pair are cached, because the
//! candidate search often asks twice for neighbouring frequencies.

/// Read access to a signal whose origin is not its first element, so that
/// lags may reach back into history.
#[derive(Debug, Clone, Copy)]
pub struct LaggedSignal<'a> {
    data: &'a [f32],
    origin: usize,
}

impl<'a> LaggedSignal<'a> {
    /// `origin` is the index in `data` treated as position zero.
    pub fn new(data: &'a [f32], origin: usize) -> Self {
        Self { data, origin }
    }

    #[inline]
    fn at(&self, i: isize) -> f32 {
        let idx = self.origin as isize + i;
        if idx < 0 {
            return 0.0;
        }
        self.data.get(idx as usize).copied().unwrap_or(0.0)
    }

    fn offset(&self, by: isize) -> Self {
        Self {
            data: self.data,
            origin: (self.origin as isize + by).max(0) as usize,
        }
    }
}

/// Scalar products, energies and sums over the analysis window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Products {
    x1_x1: f32,
    z1_z1: f32,
    z2_z2: f32,
    x1_z1: f32,
    x1_z2: f32,
    z1_z2: f32,
    x1_sum: f32,
    z1_sum: f32,
    z2_sum: f32,
}

impl Products {
    fn accumulate(&mut self, s: &LaggedSignal<'_>, x1: isize, period: isize, len: isize) {
        let z1 = x1 - period;
        let z2 = z1 + 1;
        let mut z1_sum = 0.0;
        let mut z1_z1 = 0.0;
        for j in 0..len {
            let x = s.at(x1 + j);
            let a = s.at(z1 + j);
            let b = s.at(z2 + j);
            self.x1_sum += x;
            z1_sum += a;
            self.x1_x1 += x * x;
            z1_z1 += a * a;
            self.x1_z1 += x * a;
            self.x1_z2 += x * b;
            self.z1_z2 += a * b;
        }
        let head = s.at(z1);
        let tail = s.at(z1 + len);
        self.z1_sum += z1_sum;
        self.z1_z1 += z1_z1;
        self.z2_sum += z1_sum + tail - head;
        self.z2_z2 += z1_z1 + tail * tail - head * head;
    }

    fn remove_dc(&mut self, win_len: usize) {
        let inv = 1.0 / win_len as f32;
        self.x1_x1 -= self.x1_sum * self.x1_sum * inv;
        self.z1_z1 -= self.z1_sum * self.z1_sum * inv;
        self.z2_z2 -= self.z2_sum * self.z2_sum * inv;
        self.x1_z1 -= self.x1_sum * self.z1_sum * inv;
        self.x1_z2 -= self.x1_sum * self.z2_sum * inv;
        self.z1_z2 -= self.z1_sum * self.z2_sum * inv;
    }

    fn interpolate(&self, alpha: f32, beta: f32) -> f32 {
        let numer = beta * self.x1_z1 + alpha * self.x1_z2;
        let denom = ((beta * beta * self.z1_z1
            + 2.0 * beta * alpha * self.z1_z2
            + alpha * alpha * self.z2_z2)
            * self.x1_x1)
            .sqrt();
        if denom > 0.0 {
            (numer / denom).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Left edge of the most energetic `win`-sample window within `len` samples.
fn most_energetic_window(s: &LaggedSignal<'_>, len: isize, win: isize) -> isize {
    let mut sum = 0.0f32;
    for i in 0..win {
        sum += s.at(i) * s.at(i);
    }
    let mut best = sum;
    let mut loc = 0;
    let mut i1 = 0;
    for i2 in win..len {
        sum += s.at(i2) * s.at(i2) - s.at(i1) * s.at(i1);
        i1 += 1;
        if sum > best {
            best = sum;
            loc = i1;
        }
    }
    loc
}

/// Same search over two signals of one period each, continuing cyclically
/// past the period end.
fn most_energetic_window_cyclic(
    a: &LaggedSignal<'_>,
    b: &LaggedSignal<'_>,
    period: isize,
    win: isize,
) -> isize {
    let energy = |i: isize| a.at(i) * a.at(i) + b.at(i) * b.at(i);
    let mut sum = 0.0f32;
    for i in 0..win {
        sum += energy(i);
    }
    let mut best = sum;
    let mut loc = 0;
    let mut i1 = 0;
    for i2 in win..period {
        sum += energy(i2) - energy(i1);
        i1 += 1;
        if sum > best {
            best = sum;
            loc = i1;
        }
    }
    for i2 in 0..win - 1 {
        sum += energy(i2) - energy(i1);
        i1 += 1;
        if sum > best {
            best = sum;
            loc = i1;
        }
    }
    loc
}

/// Per-channel correlation engine with its one-entry cache.
#[derive(Debug, Clone)]
pub struct PitchCorrelator {
    down_sample: usize,
    sample_rate: f32,
    cached_period: Option<(u64, isize)>,
    products: Products,
}

impl PitchCorrelator {
    pub fn new(sample_rate: f32, down_sample: usize) -> Self {
        Self {
            down_sample: down_sample.max(1),
            sample_rate,
            cached_period: None,
            products: Products::default(),
        }
    }

    pub fn reset(&mut self) {
        self.cached_period = None;
        self.products = Products::default();
    }

    /// Correlation in `[0, 1]` for `pitch_freq` over a frame of `frame_len`
    /// samples (before decimation). A zero frequency yields zero.
    pub fn correlate(
        &mut self,
        signal: &LaggedSignal<'_>,
        frame_len: usize,
        pitch_freq: f32,
        frame_no: u64,
    ) -> f32 {
        if pitch_freq == 0.0 {
            return 0.0;
        }
        let frame_len_ds = (frame_len / self.down_sample) as isize;
        let period_f = self.sample_rate / pitch_freq / self.down_sample as f32;
        let period = period_f as isize + 1;
        let alpha = period as f32 - period_f;
        let beta = 1.0 - alpha;

        if self.cached_period == Some((frame_no, period)) {
            return self.products.interpolate(alpha, beta);
        }

        let mut x1 = if period < frame_len_ds / 2 {
            frame_len_ds / 2
        } else {
            frame_len_ds - period
        };
        let win = (75.0 * self.sample_rate / 8000.0 / self.down_sample as f32) as isize;
        let mut p = Products::default();

        if period <= win {
            x1 = most_energetic_window(signal, frame_len_ds, period + win) + period;
            p.accumulate(signal, x1, period, win);
        } else {
            let loc = most_energetic_window_cyclic(
                &signal.offset(x1),
                &signal.offset(x1 - period),
                period,
                win,
            );
            if loc + win <= period {
                p.accumulate(signal, x1 + loc, period, win);
            } else {
                let first = period - loc;
                p.accumulate(signal, x1 + loc, period, first);
                p.accumulate(signal, x1, period, win - first);
            }
        }

        p.remove_dc(win.max(1) as usize);
        self.products = p;
        self.cached_period = Some((frame_no, period));
        p.interpolate(alpha, beta)
    }
}
