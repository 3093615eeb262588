//! Tests for spectral feature extraction and the frame layout

use std::f32::consts::PI;

use super::layout::{validate_layout, FeatureLayout, FEATURE_VERSION};
use super::spectral::{FeatureFrame, SpectralConfig, SpectralExtractor};

fn sine(freq: f32, sample_rate: f32, amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate).sin())
        .collect()
}

#[test]
fn test_short_waveform_yields_no_frames() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    let samples = vec![0.5f32; 255];

    assert_eq!(extractor.frames(&samples).count(), 0);
    assert_eq!(extractor.frames(&[]).count(), 0);
}

#[test]
fn test_frame_count_follows_hop() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();

    assert_eq!(extractor.frame_count(256), 1);
    assert_eq!(extractor.frame_count(767), 1);
    assert_eq!(extractor.frame_count(768), 2);
    assert_eq!(extractor.frames(&vec![0.0; 768]).len(), 2);
}

#[test]
fn test_frames_have_fixed_width_and_bounded_values() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    let samples = sine(1000.0, 16000.0, 1.0, 4096);

    for frame in extractor.frames(&samples) {
        assert_eq!(frame.width(), 128);
        assert!(frame.values().iter().all(|v| (0.0..=255.0).contains(v)));
    }
}

#[test]
fn test_sine_peaks_in_expected_bin() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    // 16 kHz / 256 = 62.5 Hz per bin → 1 kHz lands in bin 16
    let samples = sine(1000.0, 16000.0, 0.001, 2048);

    let frame = extractor.frames(&samples).next().unwrap();
    let (peak_bin, peak) = frame
        .values()
        .iter()
        .enumerate()
        .fold((0, 0.0f32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });

    assert_eq!(peak_bin, 16);
    assert!(peak > 50.0 && peak < 255.0, "peak = {}", peak);
}

#[test]
fn test_silence_is_zero() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    let frame = extractor.frames(&vec![0.0; 512]).next().unwrap();

    assert!(frame.values().iter().all(|&v| v == 0.0));
    assert_eq!(frame.amplitude(), 0.0);
}

#[test]
fn test_loud_input_is_clamped() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    let samples = sine(1000.0, 16000.0, 1.0, 256);

    let frame = extractor.frames(&samples).next().unwrap();
    assert_eq!(frame.values()[16], 255.0);
}

#[test]
fn test_training_frames_are_subsampled() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    let samples = vec![0.1f32; 512 * 450 + 256];

    let total = extractor.frame_count(samples.len());
    assert_eq!(total, 451);

    let frames = extractor.training_frames(&samples, 100);
    assert_eq!(frames.len(), 100);

    let few = extractor.training_frames(&vec![0.1f32; 512 * 10 + 256], 100);
    assert_eq!(few.len(), 11);
}

#[test]
fn test_invalid_config_rejected() {
    let too_many_bins = SpectralConfig { bins: 200, ..Default::default() };
    assert!(SpectralExtractor::new(too_many_bins).is_err());

    let zero_hop = SpectralConfig { hop_length: 0, ..Default::default() };
    assert!(SpectralExtractor::new(zero_hop).is_err());

    let bad_gain = SpectralConfig { gain: -1.0, ..Default::default() };
    assert!(SpectralExtractor::new(bad_gain).is_err());
}

#[test]
fn test_frame_period() {
    let extractor = SpectralExtractor::new(SpectralConfig::default()).unwrap();
    assert!((extractor.frame_period(16000) - 0.032).abs() < 1e-12);
    assert_eq!(extractor.frame_period(0), 0.0);
}

#[test]
fn test_feature_frame_clamps_and_amplitude() {
    let frame = FeatureFrame::new(vec![-5.0, 300.0, f32::NAN, 127.5]);
    assert_eq!(frame.values(), &[0.0, 255.0, 0.0, 127.5]);

    let full = FeatureFrame::new(vec![255.0; 128]);
    assert!((full.amplitude() - 100.0).abs() < 1e-3);
}

#[test]
fn test_voice_band_suppression() {
    let frame = FeatureFrame::new(vec![100.0; 128]);
    let shielded = frame.suppress_voice_band();

    assert_eq!(shielded.values()[8], 100.0);
    assert!((shielded.values()[9] - 20.0).abs() < 1e-4);
    assert!((shielded.values()[39] - 20.0).abs() < 1e-4);
    assert_eq!(shielded.values()[40], 100.0);
}

#[test]
fn test_layout_hash_and_validation() {
    let layout = FeatureLayout::default();
    assert_eq!(layout.version, FEATURE_VERSION);
    assert!(validate_layout(&layout).is_ok());

    let other = FeatureLayout::from_spectral(&SpectralConfig { hop_length: 128, ..Default::default() });
    assert_ne!(layout.hash, other.hash);

    let mut tampered = layout.clone();
    tampered.gain = 900.0;
    let err = validate_layout(&tampered).unwrap_err();
    assert_eq!(err.actual_hash, layout.hash);
    assert_ne!(err.expected_hash, layout.hash);

    assert_eq!(layout.to_spectral(), SpectralConfig::default());
}
