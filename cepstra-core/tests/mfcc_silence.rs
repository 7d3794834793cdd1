use cepstra_core::mfcc::MFCC_MIN_ENTROPY;
use cepstra_core::{
    ConvertStatus, EnergyType, FrontEnd, FrontEndConfig, MfccConfig, MfccExtractor, MfccType,
    NoiseConfig,
};

const TYPES: [MfccType; 4] = [MfccType::Htk, MfccType::Etsi, MfccType::Dps, MfccType::Pdps];

#[test]
fn digital_silence_sits_on_the_floor_for_every_variant() {
    for rate in [8000, 16000] {
        for mfcc_type in TYPES {
            for energy_type in [EnergyType::Time, EnergyType::Freq] {
                let mut config = MfccConfig::for_rate(rate, mfcc_type).unwrap();
                config.energy_type = energy_type;
                let shift = config.frame_shift;
                let mut ex = MfccExtractor::<f32>::without_dither(config).unwrap();
                let zeros = vec![0i16; shift];
                let mut produced = 0;
                for _ in 0..20 {
                    let Some(frame) = ex.convert_frame(&zeros, false).unwrap() else {
                        continue;
                    };
                    produced += 1;
                    assert_eq!(frame.log_energy, 0.0);
                    assert_eq!(frame.log_power, 0.0);
                    assert!(frame.features.iter().all(|&c| c == 0.0), "{mfcc_type:?} {rate}");
                    assert!(frame.entropy <= MFCC_MIN_ENTROPY + 1e-6);
                    assert!(frame.filter_bank.iter().all(|&v| v == 0.0));
                }
                assert_eq!(produced, 20 - ex.latency());
            }
        }
    }
}

#[test]
fn status_reports_priming_and_output() {
    let config = MfccConfig::narrowband(MfccType::Etsi);
    let mut ex = MfccExtractor::<f32>::without_dither(config).unwrap();
    assert_eq!(ConvertStatus::of(&ex.convert_frame(&[0; 80], false)), ConvertStatus::NoOutput);
    assert_eq!(ConvertStatus::of(&ex.convert_frame(&[0; 80], false)), ConvertStatus::NoOutput);
    assert_eq!(ConvertStatus::of(&ex.convert_frame(&[0; 80], false)), ConvertStatus::Ok);
    assert_eq!(ConvertStatus::of(&ex.convert_frame(&[0; 40], false)), ConvertStatus::Fail);
}

#[test]
fn zero_input_never_reaches_the_suppressor_without_dither() {
    let config = FrontEndConfig {
        noise: NoiseConfig {
            use_dithering: false,
            pitch_classification: true,
        },
        ..FrontEndConfig::new(MfccConfig::broadband(MfccType::Htk))
    };
    let mut fe = FrontEnd::<f32>::with_seed(config, 0).unwrap();
    for _ in 0..50 {
        assert!(fe.process(&[0; 160]).unwrap().is_none());
    }
    let summary = fe.summary(std::time::Duration::ZERO);
    assert_eq!(summary.input_frames, 50);
    assert_eq!(summary.zero_frames_skipped, 100);
}

#[test]
fn dithered_silence_stays_finite_and_quiet() {
    let config = FrontEndConfig::new(MfccConfig::narrowband(MfccType::Pdps));
    let mut fe = FrontEnd::<f32>::with_seed(config, 8).unwrap();
    let mut frames = 0;
    for _ in 0..100 {
        if let Some(out) = fe.process(&[0; 80]).unwrap() {
            frames += 1;
            assert!(out.samples.iter().all(|s| s.unsigned_abs() < 200));
            if let Some(mfcc) = out.mfcc {
                assert!(mfcc.features.iter().all(|c| c.is_finite()));
                assert!(mfcc.log_power < 16.0, "log power {}", mfcc.log_power);
            }
        }
    }
    assert_eq!(frames, 96);
}
