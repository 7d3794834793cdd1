//! Cepstra offline host: one WAV file through one front-end channel.
//!
//! ```text
//! WAV ─► downmix ─► RateConverter ─► 10 ms i16 frames ─► FrontEnd ─► JSON lines
//! ```
//!
//! Records go to stdout or `--output`; the stream summary goes to stderr.

mod resample;
mod wav;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use cepstra_core::{
    ConfigMap, FeatureRecord, Fixed, FrontEnd, FrontEndConfig, MfccConfig, MfccType, Scalar,
};
use tracing::info;

use resample::RateConverter;

const USAGE: &str = "Usage: cepstra <input.wav> [--config FILE] [--rate 8000|16000] \
[--type HTK_MFCC|ETSI_MFCC|DPS_MFCC|PDPS_MFCC] [--fixed] [--seed N] [--no-dither] [--output FILE]";

/// Input frames handed to rubato per call: 30 ms at 44.1 kHz.
const RESAMPLE_CHUNK: usize = 1323;

#[derive(Debug)]
struct Args {
    input: PathBuf,
    config: Option<PathBuf>,
    rate: Option<u32>,
    mfcc_type: MfccType,
    fixed: bool,
    seed: Option<u64>,
    no_dither: bool,
    output: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut input = None;
    let mut args = Args {
        input: PathBuf::new(),
        config: None,
        rate: None,
        mfcc_type: MfccType::Etsi,
        fixed: false,
        seed: None,
        no_dither: false,
        output: None,
    };

    let mut it = std::env::args().skip(1).peekable();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --config");
                };
                args.config = Some(PathBuf::from(v));
            }
            "--rate" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --rate");
                };
                args.rate = Some(v.parse().context("invalid value for --rate")?);
            }
            "--type" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --type");
                };
                let Some(t) = MfccType::from_name(&v) else {
                    bail!("unknown MFCC type: {v}");
                };
                args.mfcc_type = t;
            }
            "--seed" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --seed");
                };
                args.seed = Some(v.parse().context("invalid value for --seed")?);
            }
            "--output" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --output");
                };
                args.output = Some(PathBuf::from(v));
            }
            "--fixed" => args.fixed = true,
            "--no-dither" => args.no_dither = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown argument: {other}"),
            other => {
                if input.is_some() {
                    bail!("more than one input file given");
                }
                input = Some(PathBuf::from(other));
            }
        }
    }
    let Some(input) = input else {
        bail!("no input file\n{USAGE}");
    };
    args.input = input;
    Ok(args)
}

/// The config file wins over `--rate` and `--type`.
fn front_end_config(args: &Args, source_rate: u32) -> Result<FrontEndConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let map = ConfigMap::load(path).with_context(|| format!("load {}", path.display()))?;
            FrontEndConfig::from_config(&map)?
        }
        None => {
            let rate = args
                .rate
                .unwrap_or(if source_rate >= 16_000 { 16_000 } else { 8_000 });
            FrontEndConfig::new(MfccConfig::for_rate(rate, args.mfcc_type)?)
        }
    };
    if args.no_dither {
        config.noise.use_dithering = false;
    }
    Ok(config)
}

fn run_channel<S: Scalar>(
    config: FrontEndConfig,
    seed: Option<u64>,
    pcm: &[i16],
    out: &mut dyn Write,
) -> Result<()> {
    let mut channel = match seed {
        Some(seed) => FrontEnd::<S>::with_seed(config, seed)?,
        None => FrontEnd::<S>::new(config)?,
    };
    let shift = channel.frame_shift();
    let started = Instant::now();
    for frame in pcm.chunks_exact(shift) {
        if let Some(frame) = channel.process(frame)? {
            serde_json::to_writer(&mut *out, &FeatureRecord::from(&frame))?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;

    let summary = channel.summary(started.elapsed());
    info!(
        input_frames = summary.input_frames,
        output_frames = summary.output_frames,
        zero_frames = summary.zero_frames_skipped,
        elapsed_ms = summary.elapsed_ms,
        "stream done"
    );
    eprintln!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn run() -> Result<()> {
    let args = parse_args()?;
    let audio = wav::read_mono(&args.input)?;
    let config = front_end_config(&args, audio.sample_rate)?;
    let target = config.mfcc.sample_rate;
    info!(
        config = %serde_json::to_string(&config)?,
        fixed = args.fixed,
        "effective configuration"
    );

    let mut converter = RateConverter::new(audio.sample_rate, target, RESAMPLE_CHUNK)?;
    let mut samples = converter.process(&audio.samples)?;
    samples.extend(converter.flush()?);
    let pcm = wav::to_pcm(&samples);

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    if args.fixed {
        run_channel::<Fixed>(config, args.seed, &pcm, &mut *out)
    } else {
        run_channel::<f32>(config, args.seed, &pcm, &mut *out)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cepstra=info,cepstra_core=info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("cepstra failed: {e:#}");
        std::process::exit(1);
    }
}
