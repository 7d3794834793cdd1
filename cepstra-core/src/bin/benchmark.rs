fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use cepstra_core::{Fixed, FrontEnd, FrontEndConfig, MfccConfig, MfccType, Scalar};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde::Serialize;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        fixtures_dir: Option<PathBuf>,
        seconds: usize,
        iterations: usize,
        sample_rate: u32,
        mfcc_type: MfccType,
        fixed: bool,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CaseResult {
        name: String,
        iteration: usize,
        frames: usize,
        outputs: usize,
        p50_frame_us: f64,
        p95_frame_us: f64,
        avg_frame_us: f64,
        max_frame_us: f64,
        real_time_factor: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        sample_rate: u32,
        mfcc_type: MfccType,
        fixed_point: bool,
        iterations: usize,
        total_frames: usize,
        p50_frame_us: f64,
        p95_frame_us: f64,
        avg_frame_us: f64,
        real_time_factor: f64,
        cases: Vec<CaseResult>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut args = Args {
            fixtures_dir: None,
            seconds: 10,
            iterations: 3,
            sample_rate: 8000,
            mfcc_type: MfccType::Etsi,
            fixed: false,
            output: None,
        };

        let mut it = std::env::args().skip(1).peekable();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--fixtures" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --fixtures".into());
                    };
                    args.fixtures_dir = Some(PathBuf::from(v));
                }
                "--seconds" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --seconds".into());
                    };
                    args.seconds = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --seconds".to_string())?
                        .clamp(1, 600);
                }
                "--iterations" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --iterations".into());
                    };
                    args.iterations = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --iterations".to_string())?
                        .clamp(1, 10);
                }
                "--rate" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --rate".into());
                    };
                    args.sample_rate = v
                        .parse::<u32>()
                        .map_err(|_| "invalid value for --rate".to_string())?;
                }
                "--type" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --type".into());
                    };
                    args.mfcc_type =
                        MfccType::from_name(&v).ok_or_else(|| format!("unknown MFCC type: {v}"))?;
                }
                "--fixed" => args.fixed = true,
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    args.output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p cepstra-core --release --bin benchmark -- \\
  [--fixtures <dir>] [--seconds <n>] [--iterations <n>] [--rate 8000|16000] \\
  [--type HTK_MFCC|ETSI_MFCC|DPS_MFCC|PDPS_MFCC] [--fixed] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }
        Ok(args)
    }

    fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir).map_err(|e| e.to_string())?;
        for entry in entries {
            let path = entry.map_err(|e| e.to_string())?.path();
            if path.is_dir() {
                collect_wavs(&path, out)?;
                continue;
            }
            let is_wav = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if is_wav {
                out.push(path);
            }
        }
        Ok(())
    }

    /// First channel of a 16-bit fixture recorded at the benchmark rate.
    fn read_wav_i16(path: &Path, rate: u32) -> Result<Vec<i16>, String> {
        let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        if spec.sample_rate != rate || spec.bits_per_sample != 16 {
            return Err(format!(
                "{}: expected 16-bit audio at {rate} Hz, got {}-bit at {} Hz",
                path.display(),
                spec.bits_per_sample,
                spec.sample_rate
            ));
        }
        let channels = usize::from(spec.channels.max(1));
        let samples = reader
            .samples::<i16>()
            .step_by(channels)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(samples)
    }

    fn synthetic_cases(rate: u32, seconds: usize) -> Vec<(String, Vec<i16>)> {
        let len = rate as usize * seconds;
        let mut rng = StdRng::seed_from_u64(0xce95);
        let noise: Vec<i16> = (0..len).map(|_| rng.gen_range(-800..800)).collect();
        let vowel: Vec<i16> = (0..len)
            .map(|n| {
                let t = n as f32 / rate as f32;
                let gate = if (n / (rate as usize / 2)) % 2 == 0 { 1.0 } else { 0.05 };
                let voiced: f32 = (1..=8)
                    .map(|h| (2.0 * std::f32::consts::PI * 120.0 * h as f32 * t).sin() / h as f32)
                    .sum();
                (gate * 6000.0 * voiced) as i16 + noise[n] / 4
            })
            .collect();
        vec![
            ("silence".into(), vec![0; len]),
            ("white_noise".into(), noise),
            ("gated_vowel".into(), vowel),
        ]
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn measure<S: Scalar>(
        config: &FrontEndConfig,
        name: &str,
        iteration: usize,
        samples: &[i16],
    ) -> Result<(CaseResult, Vec<f64>), String> {
        let mut channel = FrontEnd::<S>::with_seed(config.clone(), iteration as u64)
            .map_err(|e| e.to_string())?;
        let shift = channel.frame_shift();
        let mut timings = Vec::with_capacity(samples.len() / shift);
        let mut outputs = 0;
        let started = Instant::now();
        for frame in samples.chunks_exact(shift) {
            let t = Instant::now();
            if channel.process(frame).map_err(|e| format!("{name}: {e}"))?.is_some() {
                outputs += 1;
            }
            timings.push(t.elapsed().as_secs_f64() * 1.0e6);
        }
        let wall = started.elapsed().as_secs_f64();
        let audio = samples.len() as f64 / config.mfcc.sample_rate as f64;
        let avg = if timings.is_empty() {
            0.0
        } else {
            timings.iter().sum::<f64>() / timings.len() as f64
        };
        let result = CaseResult {
            name: name.to_string(),
            iteration,
            frames: timings.len(),
            outputs,
            p50_frame_us: percentile(&timings, 0.50),
            p95_frame_us: percentile(&timings, 0.95),
            avg_frame_us: avg,
            max_frame_us: timings.iter().copied().fold(0.0, f64::max),
            real_time_factor: if audio > 0.0 { wall / audio } else { 0.0 },
        };
        Ok((result, timings))
    }

    let args = parse_args()?;
    let mfcc = MfccConfig::for_rate(args.sample_rate, args.mfcc_type).map_err(|e| e.to_string())?;
    let config = FrontEndConfig::new(mfcc);

    let mut inputs = synthetic_cases(args.sample_rate, args.seconds);
    if let Some(dir) = &args.fixtures_dir {
        let mut wavs = Vec::new();
        collect_wavs(dir, &mut wavs)?;
        wavs.sort();
        for wav in wavs {
            let name = wav.strip_prefix(dir).unwrap_or(&wav).display().to_string();
            inputs.push((name, read_wav_i16(&wav, args.sample_rate)?));
        }
    }

    println!(
        "Running Cepstra benchmark on {} inputs (rate={} type={:?} fixed={} iterations={})",
        inputs.len(),
        args.sample_rate,
        args.mfcc_type,
        args.fixed,
        args.iterations
    );

    let mut cases = Vec::new();
    let mut all_timings = Vec::new();
    let mut total_wall_us = 0.0;
    let mut total_audio_s = 0.0;
    for (name, samples) in &inputs {
        for iteration in 1..=args.iterations {
            let (case, timings) = if args.fixed {
                measure::<Fixed>(&config, name, iteration, samples)?
            } else {
                measure::<f32>(&config, name, iteration, samples)?
            };
            println!(
                "{name} [{iteration}/{iters}] p50={p50:.1}us p95={p95:.1}us rtf={rtf:.4}",
                iters = args.iterations,
                p50 = case.p50_frame_us,
                p95 = case.p95_frame_us,
                rtf = case.real_time_factor
            );
            total_wall_us += timings.iter().sum::<f64>();
            total_audio_s += samples.len() as f64 / args.sample_rate as f64;
            all_timings.extend(timings);
            cases.push(case);
        }
    }

    let summary = Summary {
        sample_rate: args.sample_rate,
        mfcc_type: args.mfcc_type,
        fixed_point: args.fixed,
        iterations: args.iterations,
        total_frames: all_timings.len(),
        p50_frame_us: percentile(&all_timings, 0.50),
        p95_frame_us: percentile(&all_timings, 0.95),
        avg_frame_us: if all_timings.is_empty() {
            0.0
        } else {
            total_wall_us / all_timings.len() as f64
        },
        real_time_factor: if total_audio_s > 0.0 {
            total_wall_us / 1.0e6 / total_audio_s
        } else {
            0.0
        },
        cases,
    };

    println!(
        "Done. frames={} p50={:.1}us p95={:.1}us rtf={:.4}",
        summary.total_frames, summary.p50_frame_us, summary.p95_frame_us, summary.real_time_factor
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
