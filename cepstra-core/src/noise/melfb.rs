//! Triangular mel filter banks and the mel-domain inverse DCT.
//!
//! Two banks are built here:
//!
//! - the Wiener bank, 25 bands on the 65-bin suppressor spectrum with
//!   centres linear in mel between 0 and fs/2, normalised by band weight
//! - the VAD bank, 23 channels on the 129-bin pitch spectrum from 64 Hz to
//!   fs/2, unnormalised

/// Mel scale `2595 log10(1 + f/700)`.
pub fn mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

pub fn inverse_mel(m: f32) -> f32 {
    700.0 * (10f32.powf(m / 2595.0) - 1.0)
}

#[derive(Debug, Clone)]
struct Band {
    start: usize,
    weights: Vec<f32>,
    norm: f32,
}

#[derive(Debug, Clone)]
pub struct MelBank {
    bands: Vec<Band>,
    centres: Vec<f32>,
    bins: usize,
    normalise: bool,
}

impl MelBank {
    /// The 25-band bank of the suppressor, `bins` spectral bins spanning
    /// 0..fs/2.
    pub fn wiener(sample_rate: f32, bins: usize, num_bands: usize) -> Self {
        let nyquist = sample_rate / 2.0;
        let mel_step = mel(nyquist) / (num_bands - 1) as f32;
        let centres: Vec<f32> = (0..num_bands)
            .map(|k| match k {
                0 => 0.0,
                k if k == num_bands - 1 => nyquist,
                k => inverse_mel(k as f32 * mel_step),
            })
            .collect();
        let to_bin = (bins - 1) as f32 / nyquist;
        let positions: Vec<f32> = centres.iter().map(|f| f * to_bin).collect();

        let bands = (0..num_bands)
            .map(|k| {
                let centre = positions[k];
                let left = if k == 0 { None } else { Some(positions[k - 1]) };
                let right = positions.get(k + 1).copied();
                let mut start = None;
                let mut weights = Vec::new();
                for i in 0..bins {
                    let x = i as f32;
                    let w = if x <= centre {
                        match left {
                            Some(l) if x >= l => (x - l) / (centre - l),
                            None if x == centre => 1.0,
                            _ => 0.0,
                        }
                    } else {
                        match right {
                            Some(r) if x <= r => 1.0 - (x - centre) / (r - centre),
                            _ => 0.0,
                        }
                    };
                    if w > 0.0 {
                        start.get_or_insert(i);
                        weights.push(w);
                    } else if start.is_some() {
                        break;
                    }
                }
                Band::new(start.unwrap_or(0), weights)
            })
            .collect();

        Self {
            bands,
            centres,
            bins,
            normalise: true,
        }
    }

    /// The VAD bank: `num_channels` triangles whose centre bins are rounded
    /// to the FFT grid between `start_freq` and fs/2.
    pub fn vad(sample_rate: f32, fft_len: usize, start_freq: f32, num_channels: usize) -> Self {
        let bins = fft_len / 2 + 1;
        let nyquist = sample_rate / 2.0;
        let mel_lo = mel(start_freq);
        let mel_step = (mel(nyquist) - mel_lo) / (num_channels + 1) as f32;
        let to_bin = fft_len as f32 / sample_rate;

        let centres: Vec<f32> = (0..num_channels + 2)
            .map(|k| inverse_mel(mel_lo + k as f32 * mel_step))
            .collect();
        let cbin: Vec<usize> = centres
            .iter()
            .map(|f| ((f * to_bin).round() as usize).min(bins - 1))
            .collect();

        let bands = (1..=num_channels)
            .map(|k| {
                let (lo, mid, hi) = (cbin[k - 1], cbin[k], cbin[k + 1]);
                let mut weights = Vec::with_capacity(hi - lo + 1);
                for i in lo..=mid {
                    weights.push((i - lo + 1) as f32 / (mid - lo + 1) as f32);
                }
                for i in mid + 1..=hi {
                    weights.push(1.0 - (i - mid) as f32 / (hi - mid + 1) as f32);
                }
                Band::new(lo, weights)
            })
            .collect();

        Self {
            bands,
            centres: centres[1..=num_channels].to_vec(),
            bins,
            normalise: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Number of spectral bins the bank reads.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Band centre frequencies in Hz.
    pub fn centres(&self) -> &[f32] {
        &self.centres
    }

    /// `out[k]` receives the weighted sum of `spectrum` under band `k`,
    /// divided by the band weight for normalised banks.
    pub fn apply(&self, spectrum: &[f32], out: &mut [f32]) {
        for (o, band) in out.iter_mut().zip(&self.bands) {
            let sum: f32 = spectrum
                .iter()
                .skip(band.start)
                .zip(&band.weights)
                .map(|(x, w)| x * w)
                .sum();
            *o = if self.normalise { sum * band.norm } else { sum };
        }
    }
}

impl Band {
    fn new(start: usize, weights: Vec<f32>) -> Self {
        let total: f32 = weights.iter().sum();
        let norm = if total > 0.0 { 1.0 / total } else { 0.0 };
        Self {
            start,
            weights,
            norm,
        }
    }
}

/// Cosine basis turning a mel-domain gain curve into a time-domain impulse
/// response: `h(n) = Σ_k W(k) cos(2π n fc(k)/fs) df(k)`.
#[derive(Debug, Clone)]
pub struct MelIdct {
    basis: Vec<Vec<f32>>,
}

impl MelIdct {
    pub fn new(bank: &MelBank, sample_rate: f32) -> Self {
        let fc = bank.centres();
        let n = fc.len();
        let widths: Vec<f32> = (0..n)
            .map(|k| {
                let lo = if k == 0 { fc[0] } else { fc[k - 1] };
                let hi = if k + 1 == n { fc[k] } else { fc[k + 1] };
                (hi - lo) / sample_rate
            })
            .collect();
        let basis = (0..n)
            .map(|tap| {
                (0..n)
                    .map(|k| {
                        (std::f32::consts::TAU * tap as f32 * fc[k] / sample_rate).cos() * widths[k]
                    })
                    .collect()
            })
            .collect();
        Self { basis }
    }

    pub fn taps(&self) -> usize {
        self.basis.len()
    }

    pub fn transform(&self, gains: &[f32], out: &mut [f32]) {
        for (o, row) in out.iter_mut().zip(&self.basis) {
            *o = row.iter().zip(gains).map(|(b, g)| b * g).sum();
        }
    }
}

/// Hanning window `0.5 - 0.5 cos(2π(i + 0.5)/len)`.
pub fn hanning(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (std::f32::consts::TAU * (i as f32 + 0.5) / len as f32).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mel_round_trips() {
        for f in [0.0f32, 64.0, 1000.0, 4000.0] {
            assert_abs_diff_eq!(inverse_mel(mel(f)), f, epsilon = 1e-2);
        }
    }

    #[test]
    fn wiener_bank_spans_spectrum() {
        let bank = MelBank::wiener(8000.0, 65, 25);
        assert_eq!(bank.len(), 25);
        assert_eq!(bank.centres()[0], 0.0);
        assert_eq!(bank.centres()[24], 4000.0);
        // A flat gain stays flat through a normalised bank.
        let mut out = vec![0.0; 25];
        bank.apply(&vec![0.7; 65], &mut out);
        for v in out {
            assert_abs_diff_eq!(v, 0.7, epsilon = 1e-5);
        }
    }

    #[test]
    fn unit_gain_gives_impulse() {
        let bank = MelBank::wiener(8000.0, 65, 25);
        let idct = MelIdct::new(&bank, 8000.0);
        let mut h = vec![0.0; idct.taps()];
        idct.transform(&[1.0; 25], &mut h);
        assert_abs_diff_eq!(h[0], 1.0, epsilon = 1e-4);
        // Only the taps inside the 17-tap filter matter.
        for &tap in &h[1..=8] {
            assert!(tap.abs() < 0.01, "tap {tap}");
        }
    }

    #[test]
    fn vad_bank_channels_are_ordered() {
        let bank = MelBank::vad(8000.0, 256, 64.0, 23);
        assert_eq!(bank.len(), 23);
        assert!(bank.centres().windows(2).all(|w| w[0] < w[1]));
        let mut spectrum = vec![0.0; 129];
        spectrum[64] = 1.0;
        let mut out = vec![0.0; 23];
        bank.apply(&spectrum, &mut out);
        let hit = out.iter().filter(|v| **v > 0.0).count();
        assert!((1..=3).contains(&hit));
    }

    #[test]
    fn hanning_peaks_in_the_middle() {
        let w = hanning(17);
        assert_abs_diff_eq!(w[8], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w[0], w[16], epsilon = 1e-6);
    }
}
