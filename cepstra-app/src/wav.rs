//! WAV loading: any integer or float format, downmixed to mono.

use std::path::Path;

use anyhow::{Context, Result};

pub struct MonoAudio {
    /// Samples scaled to the i16 range.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub fn read_mono(path: &Path) -> Result<MonoAudio> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("open {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let scale = f32::from(i16::MAX);

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v * scale))
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
            .samples::<i16>()
            .map(|s| s.map(f32::from))
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    tracing::debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels,
        bits = spec.bits_per_sample,
        samples = samples.len(),
        "wav loaded"
    );
    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Round and saturate to i16.
pub fn to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&x| x.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
        .collect()
}
