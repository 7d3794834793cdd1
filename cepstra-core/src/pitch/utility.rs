//! Harmonic utility function over candidate pitch frequencies.
//!
//! Every spectral peak at `f` votes for the pitches `p` that place it close
//! to a harmonic, `f / p ≈ n`. One vote is a run of trapezoids in the pitch
//! domain, one per harmonic index, stored as differential break points. The
//! votes of all peaks are merged and integrated into a piecewise-constant
//! function whose local maxima are the pitch candidates.

use super::rom::Fractions;
use super::{Point, UDIST1, UDIST2, USTEP};

/// Pitch candidates taken from the utility function per search range.
pub(crate) const MAX_PRELIM_CANDS: usize = 4;
const STABLE_UPPER: f32 = 1.22;
const STABLE_LOWER: f32 = 1.0 / STABLE_UPPER;
const AMP_MARGIN1: f32 = 0.06;

/// Builds utility functions under a per-stage budget of harmonic shapes.
#[derive(Debug)]
pub(crate) struct UtilityBuilder {
    breaks: Vec<Point>,
    shape: Vec<Point>,
    segments: Vec<(usize, usize)>,
    points: Vec<Point>,
    loop_count: u32,
    budget: u32,
    exhausted: bool,
}

impl UtilityBuilder {
    pub fn new() -> Self {
        Self {
            breaks: Vec::new(),
            shape: Vec::new(),
            segments: Vec::new(),
            points: Vec::new(),
            loop_count: 0,
            budget: u32::MAX,
            exhausted: false,
        }
    }

    /// Start a new search stage with its own shape budget.
    pub fn start_stage(&mut self, budget: u32) {
        self.loop_count = 0;
        self.budget = budget;
        self.exhausted = false;
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Break points of one peak's vote. Returns false when the shapes would
    /// exceed the stage budget; nothing is added in that case.
    fn piecewise(&mut self, peak: Point, fmin: f32, fmax: f32, fractions: &[Fractions]) -> bool {
        let a_low = peak.amp * USTEP;
        let a_high = peak.amp;
        let da_high = a_high - a_low;

        let from = peak.freq / fmin + UDIST2;
        let mut i_from = from as usize;
        if i_from as f32 == from {
            i_from = i_from.saturating_sub(1);
        }
        i_from = i_from.min(fractions.len() - 1);

        let to = peak.freq / fmax - UDIST2;
        let zeroth_inside = to < 0.0;
        let i_to = if zeroth_inside { 1 } else { to as usize + 1 };

        let n = (i_from + 1).saturating_sub(i_to) as u32;
        if self.loop_count + n > self.budget {
            self.exhausted = true;
            return false;
        }
        self.loop_count += n;

        let seg = &mut self.shape;
        seg.clear();
        for frac in fractions[i_to.min(i_from + 1)..=i_from].iter().rev() {
            seg.push(Point { freq: peak.freq * frac.far_low, amp: a_low });
            seg.push(Point { freq: peak.freq * frac.low, amp: da_high });
            seg.push(Point { freq: peak.freq * frac.high, amp: -da_high });
            seg.push(Point { freq: peak.freq * frac.far_high, amp: -a_low });
        }

        let mut start = 0;
        if !seg.is_empty() {
            while start <= 3 && start < seg.len() && seg[start].freq < fmin {
                start += 1;
            }
            if start > 0 {
                start -= 1;
                let carried: f32 = seg[..start].iter().map(|p| p.amp).sum();
                seg[start].freq = fmin;
                seg[start].amp += carried;
            }
            let floor = seg.len().saturating_sub(4).max(start);
            let mut end = seg.len();
            while end > floor && seg[end - 1].freq >= fmax {
                end -= 1;
            }
            seg.truncate(end);
        }

        if zeroth_inside {
            let f0 = peak.freq * fractions[0].far_low;
            let f1 = peak.freq * fractions[0].low;
            if f0 < fmin {
                if f1 <= fmin {
                    seg.push(Point { freq: fmin, amp: a_high });
                } else {
                    seg.push(Point { freq: fmin, amp: a_low });
                    if f1 <= fmax {
                        seg.push(Point { freq: f1, amp: da_high });
                    }
                }
            } else {
                seg.push(Point { freq: f0, amp: a_low });
                if f1 <= fmax {
                    seg.push(Point { freq: f1, amp: da_high });
                }
            }
        }

        let base = self.breaks.len();
        let len = seg.len().saturating_sub(start);
        self.breaks.extend_from_slice(&seg[start..]);
        self.segments.push((base, len));
        true
    }

    /// Utility function over `[fmin, fmax]` for `peaks`, as ascending
    /// frequency break points holding the function value from that frequency
    /// on. Peaks past the budget are ignored.
    pub fn build(&mut self, peaks: &[Point], fmin: f32, fmax: f32, fractions: &[Fractions]) -> &[Point] {
        self.breaks.clear();
        self.segments.clear();
        self.points.clear();

        for &peak in peaks {
            if !self.piecewise(peak, fmin, fmax, fractions) {
                break;
            }
        }
        if self.segments.iter().all(|&(_, len)| len == 0) {
            return &self.points;
        }

        // Each segment is already ascending. The merged order of points at
        // an equal frequency does not affect the integrated function.
        self.breaks.sort_by(|a, b| a.freq.total_cmp(&b.freq));

        let mut acc = 0.0f32;
        for p in &self.breaks {
            acc += p.amp;
            match self.points.last_mut() {
                Some(last) if last.freq == p.freq => last.amp = acc,
                _ => self.points.push(Point { freq: p.freq, amp: acc }),
            }
        }
        if self.points.last().is_some_and(|p| p.freq < fmax) {
            self.points.push(Point { freq: fmax, amp: 0.0 });
        }
        &self.points
    }
}

impl Default for UtilityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ranked shortlist of break point indices, highest key first.
struct Shortlist {
    entries: Vec<(usize, f32)>,
}

impl Shortlist {
    fn insert(&mut self, index: usize, key: f32) -> bool {
        let k = self
            .entries
            .iter()
            .position(|&(_, best)| key >= best)
            .unwrap_or(self.entries.len());
        if k >= MAX_PRELIM_CANDS {
            return false;
        }
        if self.entries.len() == MAX_PRELIM_CANDS {
            self.entries.pop();
        }
        self.entries.insert(k, (index, key));
        true
    }

    fn contains(&self, index: usize) -> bool {
        self.entries.iter().any(|&(i, _)| i == index)
    }
}

/// Up to [`MAX_PRELIM_CANDS`] dominant local maxima of `points`. A local
/// maximum near `stable_freq` gets a small bonus so an established track is
/// not lost to a slightly stronger competitor. The returned amplitudes are
/// ranking keys only.
pub(crate) fn dominant_maxima(points: &[Point], stable_freq: f32, out: &mut Vec<Point>) {
    out.clear();
    let n = points.len();
    if n == 0 {
        return;
    }
    let mut list = Shortlist {
        entries: Vec::with_capacity(MAX_PRELIM_CANDS),
    };

    if n == 1 {
        list.insert(0, points[0].amp);
    } else {
        if points[0].amp > points[1].amp {
            list.insert(0, points[0].amp);
        }
        let mut i = 1;
        while i + 1 < n {
            let amp = points[i].amp;
            if amp >= points[i - 1].amp && amp > points[i + 1].amp && list.insert(i, amp) {
                i += 1;
            }
            i += 1;
        }
        if points[n - 1].amp > points[n - 2].amp {
            list.insert(n - 1, points[n - 1].amp);
        }

        if stable_freq != 0.0 {
            let low = stable_freq * STABLE_LOWER;
            let high = stable_freq * STABLE_UPPER;
            let mut best: Option<(usize, f32)> = None;
            for i in 1..n - 1 {
                let p = points[i];
                if p.freq < low || p.freq > high {
                    continue;
                }
                let local_max = p.amp >= points[i - 1].amp && p.amp > points[i + 1].amp;
                if local_max && best.map_or(true, |(_, a)| p.amp > a) {
                    best = Some((i, p.amp));
                }
            }
            if let Some((i, amp)) = best {
                if !list.contains(i) {
                    list.insert(i, amp + AMP_MARGIN1);
                }
            }
        }
    }

    for &(i, key) in &list.entries {
        let freq = if i + 1 < n {
            0.5 * (points[i].freq + points[i + 1].freq)
        } else {
            points[i].freq
        };
        out.push(Point { freq, amp: key });
    }
}

/// Summed amplitude of the peaks that lie near a harmonic of `pitch`.
pub(crate) fn utility_at(peaks: &[Point], pitch: f32) -> f32 {
    peaks.iter().fold(0.0, |sum, p| {
        let ratio = p.freq / pitch;
        let mut arg = ratio - ratio.floor();
        if arg > 0.5 {
            arg = 1.0 - arg;
        }
        if arg < UDIST1 {
            sum + p.amp
        } else if arg < UDIST2 {
            sum + USTEP * p.amp
        } else {
            sum
        }
    })
}
