//! Candidate ranking and the final pitch decision.

use super::Point;

const AMP_MARGIN1: f32 = 0.06;
const AMP_MARGIN2: f32 = 0.06;
const FREQ_MARGIN1: f32 = 1.17;
const STABLE_UPPER: f32 = 1.22;
const STABLE_LOWER: f32 = 1.0 / STABLE_UPPER;
const CLOSE_RATIO: f32 = 1.20;
const SIGNIFICANT_GAIN: f32 = 0.18;

/// A pitch hypothesis with its spectral (`amp`) and temporal (`corr`)
/// scores. A zero frequency is the unvoiced hypothesis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Candidate {
    pub freq: f32,
    pub amp: f32,
    pub corr: f32,
}

impl Candidate {
    pub const UNVOICED: Candidate = Candidate {
        freq: 0.0,
        amp: 0.0,
        corr: 0.0,
    };

    pub fn is_voiced(&self) -> bool {
        self.freq != 0.0
    }

    fn close_to(&self, other: &Candidate) -> bool {
        self.freq * CLOSE_RATIO > other.freq && other.freq * CLOSE_RATIO > self.freq
    }

    fn good_enough(&self) -> bool {
        (self.amp >= 0.78 && self.corr >= 0.79) || (self.amp >= 0.68 && self.amp + self.corr >= 1.6)
    }

    fn better_than(&self, other: &Candidate) -> bool {
        self.corr > other.corr && self.amp > other.amp
    }
}

/// Both frequencies voiced and within the stable-track ratio of each other.
pub(crate) fn is_continuous(prev: f32, freq: f32) -> bool {
    prev != 0.0 && freq != 0.0 && freq > prev * STABLE_LOWER && freq < prev * STABLE_UPPER
}

/// Pick up to `out.len()` candidates from `cands` (ascending frequency).
/// Scanning from high to low frequency, a lower candidate displaces a
/// higher one only with a clear amplitude gain, which guards against
/// sub-harmonics. With a track frequency, the strongest candidate near it
/// gets a second chance. Unused slots are left unvoiced.
pub(crate) fn select_top(cands: &[Point], track_freq: f32, out: &mut [Candidate]) {
    let n_out = out.len();
    out.fill(Candidate::UNVOICED);
    if cands.is_empty() || n_out == 0 {
        return;
    }
    let mut index: Vec<Option<usize>> = vec![None; n_out];
    let mut amp_best = vec![-AMP_MARGIN1; n_out];
    let mut freq_best = vec![0.0f32; n_out];

    for (i, c) in cands.iter().enumerate().rev() {
        let slot = (0..n_out).find(|&k| {
            c.amp > amp_best[k] + AMP_MARGIN1
                || (c.amp > amp_best[k] && FREQ_MARGIN1 * c.freq > freq_best[k])
        });
        if let Some(k) = slot {
            for j in (k + 1..n_out).rev() {
                index[j] = index[j - 1];
                amp_best[j] = amp_best[j - 1];
                freq_best[j] = freq_best[j - 1];
            }
            index[k] = Some(i);
            amp_best[k] = c.amp;
            freq_best[k] = c.freq;
        }
    }

    if track_freq != 0.0 {
        let low = STABLE_LOWER * track_freq;
        let high = STABLE_UPPER * track_freq;
        let mut amp_alt = 0.0f32;
        let mut alt = None;
        for (i, c) in cands.iter().enumerate().take_while(|(_, c)| c.freq < high) {
            if c.freq > low && c.amp >= amp_alt {
                amp_alt = c.amp;
                alt = Some(i);
            }
        }
        if let Some(a) = alt.filter(|a| !index.contains(&Some(*a))) {
            if let Some(k) = (0..n_out).find(|&k| amp_alt + AMP_MARGIN2 > amp_best[k]) {
                for j in (k + 1..n_out).rev() {
                    index[j] = index[j - 1];
                }
                index[k] = Some(a);
            }
        }
    }

    for (slot, i) in out.iter_mut().zip(index.iter().map_while(|i| *i)) {
        let c = cands[i];
        *slot = Candidate {
            freq: c.freq,
            amp: c.amp,
            corr: 0.0,
        };
    }
}

/// Scan forward from `from` while candidates stay close to `cands[anchor]`
/// and keep the one that beats the current choice on both scores. Returns
/// the choice and the first index not scanned.
fn refine_in_vicinity(cands: &[Candidate], anchor: usize, from: usize) -> (usize, usize) {
    let mut best = anchor;
    let mut i = from;
    while i < cands.len() {
        if !cands[anchor].close_to(&cands[i]) {
            break;
        }
        if cands[i].better_than(&cands[best]) {
            best = i;
        }
        i += 1;
    }
    (best, i)
}

/// Tracking state consulted by [`select_final`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrackState {
    pub prev_freq: f32,
    pub stable_count: u32,
    pub stable_freq: f32,
}

/// Choose the frame pitch among `cands`. The slice is reordered. In strict
/// mode only a near-certain candidate is accepted.
pub(crate) fn select_final(cands: &mut [Candidate], track: TrackState, strict: bool) -> Candidate {
    cands.sort_by(|a, b| b.freq.total_cmp(&a.freq));
    let n = cands.iter().take_while(|c| c.is_voiced()).count();
    let cands = &cands[..n];
    if n == 0 {
        return Candidate::UNVOICED;
    }

    let mut good = cands.iter().position(Candidate::good_enough);
    if let Some(first) = good {
        let (mut best, mut i) = refine_in_vicinity(cands, first, first + 1);
        let crit0 = cands[best].amp + cands[best].corr + SIGNIFICANT_GAIN;
        while i < n {
            if cands[i].good_enough() && cands[i].amp + cands[i].corr >= crit0 {
                best = i;
                break;
            }
            i += 1;
        }
        let (refined, _) = refine_in_vicinity(cands, best, i + 1);
        good = Some(refined);
    }

    if strict {
        return match good {
            Some(g) if cands[g].amp >= 0.95 && cands[g].corr >= 0.95 => cands[g],
            _ => Candidate::UNVOICED,
        };
    }
    if let Some(g) = good {
        return cands[g];
    }

    let relaxed = |c: &Candidate| c.amp > 0.70 || c.corr > 0.70;

    if track.stable_freq != 0.0 {
        return match cands
            .iter()
            .position(|c| is_continuous(track.stable_freq, c.freq) && relaxed(c))
        {
            Some(i) => cands[refine_in_vicinity(cands, i, i + 1).0],
            None => Candidate::UNVOICED,
        };
    }

    if track.prev_freq != 0.0 && track.stable_count > 1 {
        let near_prev = |c: &Candidate| is_continuous(track.prev_freq, c.freq);
        if let Some(first) = cands.iter().position(|c| near_prev(c) && relaxed(c)) {
            let mut best = first;
            for i in first + 1..n {
                if near_prev(&cands[i]) && cands[i].better_than(&cands[best]) {
                    best = i;
                }
            }
            return cands[best];
        }
    }

    match cands.iter().position(|c| c.amp >= 0.82 || c.corr >= 0.85) {
        Some(i) => cands[refine_in_vicinity(cands, i, i + 1).0],
        None => Candidate::UNVOICED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(freq: f32, amp: f32, corr: f32) -> Candidate {
        Candidate { freq, amp, corr }
    }

    fn no_track() -> TrackState {
        TrackState {
            prev_freq: 0.0,
            stable_count: 0,
            stable_freq: 0.0,
        }
    }

    #[test]
    fn continuity_window() {
        assert!(is_continuous(100.0, 110.0));
        assert!(!is_continuous(100.0, 125.0));
        assert!(!is_continuous(0.0, 100.0));
        assert!(!is_continuous(100.0, 0.0));
    }

    #[test]
    fn top_selection_prefers_higher_frequency_on_near_ties() {
        let cands = [
            Point { freq: 100.0, amp: 0.82 },
            Point { freq: 200.0, amp: 0.80 },
        ];
        let mut out = [Candidate::UNVOICED; 2];
        select_top(&cands, 0.0, &mut out);
        assert_eq!(out[0].freq, 200.0);
        assert_eq!(out[1].freq, 100.0);
    }

    #[test]
    fn top_selection_takes_clearly_stronger_subharmonic() {
        let cands = [
            Point { freq: 100.0, amp: 0.95 },
            Point { freq: 200.0, amp: 0.60 },
        ];
        let mut out = [Candidate::UNVOICED; 2];
        select_top(&cands, 0.0, &mut out);
        assert_eq!(out[0].freq, 100.0);
    }

    #[test]
    fn track_candidate_gets_second_chance() {
        let cands = [
            Point { freq: 90.0, amp: 0.50 },
            Point { freq: 150.0, amp: 0.90 },
            Point { freq: 300.0, amp: 0.88 },
        ];
        let mut out = [Candidate::UNVOICED; 2];
        select_top(&cands, 95.0, &mut out);
        assert!(out.iter().all(|c| c.freq != 0.0));
        let mut without = [Candidate::UNVOICED; 2];
        select_top(&cands, 0.0, &mut without);
        assert!(without.iter().all(|c| c.freq != 90.0));
        // Amplitude 0.50 is not within the margin of either slot.
        assert!(out.iter().all(|c| c.freq != 90.0));

        let strong = [Point { freq: 90.0, amp: 0.85 }, cands[1], cands[2]];
        select_top(&strong, 95.0, &mut out);
        assert!(out.iter().any(|c| c.freq == 90.0));
    }

    #[test]
    fn strict_mode_requires_near_certainty() {
        let mut c = [cand(150.0, 0.9, 0.9)];
        assert!(!select_final(&mut c, no_track(), true).is_voiced());
        let mut c = [cand(150.0, 0.97, 0.96)];
        assert_eq!(select_final(&mut c, no_track(), true).freq, 150.0);
    }

    #[test]
    fn significantly_better_candidate_wins() {
        let mut c = [
            cand(300.0, 0.80, 0.80),
            cand(100.0, 0.99, 0.99),
            cand(0.0, 0.0, 0.0),
        ];
        assert_eq!(select_final(&mut c, no_track(), false).freq, 100.0);
    }

    #[test]
    fn relaxed_continuation_of_stable_track() {
        let mut c = [cand(205.0, 0.72, 0.3), cand(120.0, 0.75, 0.3)];
        let track = TrackState {
            prev_freq: 0.0,
            stable_count: 0,
            stable_freq: 120.0,
        };
        assert_eq!(select_final(&mut c, track, false).freq, 120.0);
    }

    #[test]
    fn weak_candidates_are_unvoiced() {
        let mut c = [cand(150.0, 0.5, 0.5), cand(75.0, 0.4, 0.6)];
        assert!(!select_final(&mut c, no_track(), false).is_voiced());
    }
}
