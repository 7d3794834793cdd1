//! Interpolated spectra and spectral peak extraction.
//!
//! The single-window DFT is interpolated by two with a truncated Dirichlet
//! kernel, so peaks can be located on a 8000/512 Hz grid. A double-window
//! DFT is synthesized from the current and previous interpolated spectra by
//! shifting the previous one by a frame step.

use super::rom::PitchRom;
use super::{Point, DIRICHLET_SPAN, REF_BANDWIDTH};
use crate::numeric::Cplx;

/// Guard points stored on each side of the interpolated DFT.
const GUARD: usize = 2 * (DIRICHLET_SPAN - 1);

const MAX_PEAKS_FOR_SORT: usize = 30;
const MAX_AMP_FRACTION: f32 = 0.001;
const SUM_FRACTION: f32 = 0.95;
const AMP_FRACTION: f32 = 0.406;
const CENTER_WEIGHT: f32 = 0.625;
const SIDE_WEIGHT: f32 = 0.1875;
const AMP_SCALE_DOWN1: f32 = 0.65;
const AMP_SCALE_DOWN2: f32 = 0.45;
const THIRD_REF_BANDWIDTH: f32 = REF_BANDWIDTH / 3.0;
const TWO_THIRDS_REF_BANDWIDTH: f32 = 2.0 * REF_BANDWIDTH / 3.0;

pub(crate) const MAX_PEAKS_FINAL: usize = 20;
pub(crate) const MIN_PEAKS: usize = 7;
pub(crate) const MAX_LOCAL_MAXIMA: usize = 70;

/// Interpolated DFT addressable at negative indices and slightly past its
/// end, as the interpolation kernel needs.
#[derive(Debug, Clone)]
pub(crate) struct InterpDft {
    data: Vec<Cplx<f32>>,
    len: usize,
}

impl InterpDft {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![Cplx::new(0.0, 0.0); len + 2 * GUARD],
            len,
        }
    }

    #[inline]
    fn at(&self, i: isize) -> Cplx<f32> {
        self.data[(i + GUARD as isize) as usize]
    }

    #[inline]
    fn set(&mut self, i: isize, v: Cplx<f32>) {
        self.data[(i + GUARD as isize) as usize] = v;
    }

    pub fn bins(&self) -> &[Cplx<f32>] {
        &self.data[GUARD..GUARD + self.len]
    }

    fn bins_mut(&mut self) -> &mut [Cplx<f32>] {
        &mut self.data[GUARD..GUARD + self.len]
    }

    pub fn clear(&mut self) {
        self.data.fill(Cplx::new(0.0, 0.0));
    }
}

/// Interpolate `stft` (`dft_size/2 + 1` bins) by two into `out`. Even points
/// are copies of the input bins; odd points come from the kernel.
pub(crate) fn dirichlet_interpolate(
    rom: &PitchRom,
    stft: &[Cplx<f32>],
    spec_average: f32,
    out: &mut InterpDft,
) {
    let last_interp = rom.last_interp_bin();
    let last_available = rom.dft_size() / 2;
    let last_needed = last_interp + DIRICHLET_SPAN - 1;
    let kernel = rom.dirichlet();

    for i in 1..DIRICHLET_SPAN {
        out.set(-2 * i as isize, stft[i].conj());
    }
    let max_index = last_needed.min(last_available);
    for (i, &bin) in stft.iter().enumerate().take(max_index + 1) {
        out.set(2 * i as isize, bin);
    }
    // Past Nyquist the spectrum mirrors.
    let mut j = last_available.saturating_sub(1);
    for i in max_index + 1..=last_needed {
        out.set(2 * i as isize, stft[j].conj());
        j = j.saturating_sub(1);
    }

    for i in (1..2 * last_interp as isize).step_by(2) {
        let mut re = spec_average;
        let mut im = 0.0;
        for (k, &d) in kernel.iter().enumerate() {
            let right = out.at(i + 1 + 2 * k as isize);
            let left = out.at(i - 1 - 2 * k as isize);
            re -= d * (-right.im + left.im);
            im += d * (-right.re + left.re);
        }
        out.set(i, Cplx::new(re, im));
    }
}

/// `out = first + shift * second`, with `shift` the one-frame phase ramp.
pub(crate) fn double_window(rom: &PitchRom, first: &InterpDft, second: &InterpDft, out: &mut InterpDft) {
    let shift = rom.window_shift();
    for (((o, a), b), w) in out
        .bins_mut()
        .iter_mut()
        .zip(first.bins())
        .zip(second.bins())
        .zip(shift)
    {
        *o = a + b * w;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct IndexedPeak {
    ind: usize,
    amp: f32,
}

/// Per-estimator scratch space for peak picking.
#[derive(Debug, Clone)]
pub(crate) struct PeakScratch {
    power: Vec<f32>,
    smoothed: Vec<f32>,
    locs: Vec<IndexedPeak>,
}

impl PeakScratch {
    pub fn new(interp_len: usize) -> Self {
        Self {
            power: vec![0.0; interp_len],
            smoothed: vec![0.0; interp_len],
            locs: Vec::with_capacity(interp_len / 2 + 1),
        }
    }

    fn find_peaks(&mut self, dft: &[Cplx<f32>], even_power: Option<&[f32]>, hp_cutoff: usize) {
        let len = dft.len();
        match even_power {
            None => {
                for (p, d) in self.power.iter_mut().zip(dft) {
                    *p = d.norm_sqr();
                }
            }
            Some(even) => {
                for (j, &p) in even.iter().enumerate() {
                    if 2 * j < len {
                        self.power[2 * j] = p;
                    }
                }
                for i in (1..len).step_by(2) {
                    self.power[i] = dft[i].norm_sqr();
                }
            }
        }

        let t = &self.power;
        let s = &mut self.smoothed;
        s[0] = t[0];
        s[len - 1] = t[len - 1];
        for i in 1..len - 1 {
            s[i] = CENTER_WEIGHT * t[i] + SIDE_WEIGHT * (t[i - 1] + t[i + 1]);
        }

        self.locs.clear();
        let mut i = hp_cutoff + 2;
        while i + 2 < len {
            let (y0, y1, y2, y3, y4) = (s[i - 2], s[i - 1], s[i], s[i + 1], s[i + 2]);
            if y2 > y1 && y2 > y3 {
                if y1 >= y0 || y3 >= y4 {
                    self.locs.push(IndexedPeak { ind: i, amp: y2 });
                }
                i += 1;
            }
            i += 1;
        }
    }
}

/// Attenuate peaks in the upper two thirds of the band whose amplitude is
/// out of proportion with the strongest low-band peak. `limits` bound the
/// first and second band and `key` maps a peak to the compared position.
fn scale_down_high_bands<T>(
    peaks: &mut [T],
    limits: (f32, f32),
    factors: (f32, f32),
    key: impl Fn(&T) -> f32,
    amp: impl Fn(&mut T) -> &mut f32,
) {
    let n = peaks.len();
    let mut i = 0;
    let mut max1 = 0.0f32;
    while i < n && key(&peaks[i]) <= limits.0 {
        max1 = max1.max(*amp(&mut peaks[i]));
        i += 1;
    }
    if i == n || max1 == 0.0 {
        return;
    }
    let start2 = i;
    let mut max2 = 0.0f32;
    while i < n && key(&peaks[i]) <= limits.1 {
        max2 = max2.max(*amp(&mut peaks[i]));
        i += 1;
    }
    let start3 = i;
    let mut max3 = 0.0f32;
    for p in peaks[start3..].iter_mut() {
        max3 = max3.max(*amp(p));
    }

    for (range, band_max, factor) in [(start2..start3, max2, factors.0), (start3..n, max3, factors.1)] {
        let allowed = factor * max1;
        if band_max > allowed {
            let scale = allowed / band_max;
            for p in peaks[range].iter_mut() {
                let a = amp(p);
                if *a > allowed {
                    *a *= scale;
                }
            }
        }
    }
}

/// Extract at most [`MAX_PEAKS_FINAL`] refined spectral peaks, strongest
/// first, into `out`. A spectrum with more than [`MAX_LOCAL_MAXIMA`] local
/// maxima is treated as peakless.
pub(crate) fn prepare_peaks(
    rom: &PitchRom,
    dft: &[Cplx<f32>],
    even_power: Option<&[f32]>,
    hp_cutoff: usize,
    scratch: &mut PeakScratch,
    out: &mut Vec<Point>,
) {
    out.clear();
    scratch.find_peaks(dft, even_power, hp_cutoff);
    if scratch.locs.len() > MAX_LOCAL_MAXIMA {
        return;
    }

    let len = dft.len();
    let limits = ((len / 3) as f32, (2 * len / 3) as f32);
    scale_down_high_bands(
        &mut scratch.locs,
        limits,
        (AMP_SCALE_DOWN1 * AMP_SCALE_DOWN1, AMP_SCALE_DOWN2 * AMP_SCALE_DOWN2),
        |p| p.ind as f32,
        |p| &mut p.amp,
    );

    if scratch.locs.len() > MAX_PEAKS_FOR_SORT {
        let max = scratch.locs.iter().fold(0.0f32, |m, p| m.max(p.amp));
        let thr = MAX_AMP_FRACTION * MAX_AMP_FRACTION * max;
        scratch.locs.retain(|p| p.amp >= thr);
        scratch.locs.truncate(MAX_PEAKS_FOR_SORT);
    }
    scratch.locs.sort_by(|a, b| b.amp.total_cmp(&a.amp));
    scratch.locs.truncate(MAX_PEAKS_FINAL);

    // Parabolic refinement on the smoothed power.
    let factor = rom.sample_rate() as f32 / (2 * rom.dft_size()) as f32;
    let s = &scratch.smoothed;
    for p in &scratch.locs {
        let i = p.ind;
        let (y1, y2, y3) = (s[i - 1], s[i], s[i + 1]);
        let a2 = y1 - 2.0 * y2 + y3;
        let b2 = y3 - y1;
        let x = -b2 / (2.0 * a2);
        let y = y2 + 0.25 * b2 * x;
        out.push(Point {
            freq: factor * (x + i as f32),
            amp: y.max(0.0).sqrt(),
        });
    }

    scale_down_high_bands(
        out,
        (THIRD_REF_BANDWIDTH, TWO_THIRDS_REF_BANDWIDTH),
        (AMP_SCALE_DOWN1, AMP_SCALE_DOWN2),
        |p| p.freq,
        |p| &mut p.amp,
    );

    let n = out.len();
    if n > MIN_PEAKS {
        let total: f32 = out.iter().map(|p| p.amp).sum();
        let thr = SUM_FRACTION * total;
        let mut sum = 0.0;
        let mut keep = n;
        for (i, p) in out.iter().enumerate() {
            sum += p.amp;
            if sum >= thr {
                keep = i + 1;
                break;
            }
        }
        if keep < n {
            out.truncate(keep);
        } else {
            let thr = AMP_FRACTION * out[MIN_PEAKS - 1].amp;
            let mut last = n - 1;
            while last >= MIN_PEAKS && out[last].amp < thr {
                last -= 1;
            }
            out.truncate(last + 1);
        }
    }
}
