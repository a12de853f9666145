//! Integration tests for the full listening chain
//!
//! These tests render real signals through the components and check the
//! result in the frequency domain, and run the same control sequence on the
//! offline graph and on the realtime proxy/engine pair.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tiltlab_core::domain::*;
use tiltlab_infra::audio::{welch_psd, RealtimeGraph, Spectrum};

const SAMPLE_RATE: u32 = 48000;
const FFT_SIZE: usize = 4096;

fn pink(seed: u64, seconds: f32) -> NoiseBuffer {
    NoiseBuffer::generate_with(&mut StdRng::seed_from_u64(seed), seconds, SAMPLE_RATE)
}

/// Render `seconds` after letting filters and ramps settle
fn render_settled(graph: &mut RenderGraph, seconds: f32) -> Vec<f32> {
    graph.advance(SAMPLE_RATE as usize / 4);
    let mut out = vec![0.0; (seconds * SAMPLE_RATE as f32) as usize];
    graph.render(&mut out);
    out
}

fn spectrum(samples: &[f32]) -> Spectrum {
    welch_psd(samples, SAMPLE_RATE, FFT_SIZE).unwrap()
}

fn band_level(spectrum: &Spectrum, center: f32) -> f32 {
    let edge = 2f32.powf(1.0 / 6.0);
    let density = spectrum.mean_density(center / edge, center * edge).unwrap();
    10.0 * density.log10()
}

fn tilted_noise_slope(slope: f32) -> f32 {
    let mut graph = RenderGraph::new(SAMPLE_RATE);
    let mut noise = NoiseSource::new(&mut graph, pink(21, 2.0), 0.5).unwrap();
    let config = TiltBankConfig {
        initial_slope: slope,
        ..TiltBankConfig::default()
    };
    let mut bank = SpectralTiltBank::new(&mut graph, config).unwrap();
    graph.connect(noise.output().unwrap(), bank.input().unwrap()).unwrap();
    let dest = graph.destination();
    graph.connect(bank.output().unwrap(), dest).unwrap();

    let out = render_settled(&mut graph, 4.0);
    bank.dispose(&mut graph).unwrap();
    noise.dispose(&mut graph).unwrap();

    spectrum(&out).slope_db_per_octave(100.0, 8000.0).unwrap()
}

// ============================================================================
// SPECTRAL TILT
// ============================================================================

#[test]
fn test_tilt_bank_output_follows_target_slope() {
    let natural = tilted_noise_slope(INHERENT_SLOPE_DB_PER_OCTAVE);
    let steep = tilted_noise_slope(-6.0);

    assert!((natural + 3.0).abs() < 1.0, "natural slope {natural}");
    assert!((steep + 6.0).abs() < 1.0, "steep slope {steep}");
    // Same noise and same filters, so the difference is the gain shaping alone
    assert!(((steep - natural) + 3.0).abs() < 0.5, "difference {}", steep - natural);
}

#[test]
fn test_live_slope_change_reaches_rendered_output() {
    let mut graph = RenderGraph::new(SAMPLE_RATE);
    let mut noise = NoiseSource::new(&mut graph, pink(22, 2.0), 0.5).unwrap();
    let mut bank = SpectralTiltBank::new(&mut graph, TiltBankConfig::default()).unwrap();
    graph.connect(noise.output().unwrap(), bank.input().unwrap()).unwrap();
    let dest = graph.destination();
    graph.connect(bank.output().unwrap(), dest).unwrap();

    let before = spectrum(&render_settled(&mut graph, 2.0));
    bank.set_slope(&mut graph, 0.0).unwrap();
    let after = spectrum(&render_settled(&mut graph, 2.0));

    let low_shift = band_level(&after, 125.0) - band_level(&before, 125.0);
    let high_shift = band_level(&after, 8000.0) - band_level(&before, 8000.0);
    // +3 dB/octave around the 800 Hz reference: quieter lows, louder highs
    assert!(low_shift < -5.0, "low band moved {low_shift} dB");
    assert!(high_shift > 5.0, "high band moved {high_shift} dB");

    bank.dispose(&mut graph).unwrap();
    noise.dispose(&mut graph).unwrap();
}

// ============================================================================
// BAND CARVING
// ============================================================================

#[test]
fn test_carver_attenuates_outside_the_band() {
    let mut graph = RenderGraph::new(SAMPLE_RATE);
    let mut noise = NoiseSource::new(&mut graph, pink(23, 2.0), 0.5).unwrap();
    let mut carver = BandRegionCarver::new(&mut graph, CarverConfig::default()).unwrap();
    graph.connect(noise.output().unwrap(), carver.input().unwrap()).unwrap();
    let dest = graph.destination();
    graph.connect(carver.output().unwrap(), dest).unwrap();

    let edges = carver.edges();
    assert_eq!((edges.lower, edges.upper), (500.0, 2000.0));

    let measured = spectrum(&render_settled(&mut graph, 3.0));
    let inside = band_level(&measured, 1000.0);
    assert!(band_level(&measured, 63.0) < inside - 10.0);
    assert!(band_level(&measured, 8000.0) < inside - 20.0);

    carver.dispose(&mut graph).unwrap();
    noise.dispose(&mut graph).unwrap();
}

#[test]
fn test_bypassed_lowpass_leaves_highs_untouched() {
    let mut graph = RenderGraph::new(SAMPLE_RATE);
    let config = CarverConfig {
        center_frequency: 1000.0,
        bandwidth_octaves: 2.0,
        ..CarverConfig::default()
    };
    let mut carver = BandRegionCarver::new(&mut graph, config).unwrap();
    let dest = graph.destination();
    graph.connect(carver.output().unwrap(), dest).unwrap();
    let (highpass, lowpass) = carver.stage_nodes();
    assert!(graph.model().reaches(lowpass, dest));

    carver.set_center_frequency(&mut graph, 19000.0).unwrap();
    carver.set_bandwidth(&mut graph, 6.0).unwrap();

    let state = carver.state();
    assert!(state.highpass_active);
    assert!(!state.lowpass_active);
    assert!(graph.model().reaches(highpass, dest));
    assert!(!graph.model().reaches(lowpass, dest));
    assert!((carver.edges().lower - 2375.0).abs() < 0.1);

    carver.dispose(&mut graph).unwrap();
    assert_eq!(graph.model().node_count(), 1);
}

// ============================================================================
// EQUALIZER
// ============================================================================

#[test]
fn test_peaking_band_boost_measured_in_spectrum() {
    let render = |profile: &EqProfile| {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let mut noise = NoiseSource::new(&mut graph, pink(24, 2.0), 0.5).unwrap();
        let mut eq = ParametricEqualizer::new(&mut graph, EqualizerConfig::default()).unwrap();
        eq.apply_profile(&mut graph, profile).unwrap();
        graph.connect(noise.output().unwrap(), eq.input().unwrap()).unwrap();
        let dest = graph.destination();
        graph.connect(eq.output().unwrap(), dest).unwrap();

        let out = render_settled(&mut graph, 3.0);
        eq.dispose(&mut graph).unwrap();
        noise.dispose(&mut graph).unwrap();
        spectrum(&out)
    };

    let flat = render(&EqProfile::default());
    let boosted = render(&EqProfile::new(vec![Band::new(2000.0, 12.0, 2.0)], 0.0));

    let boost = band_level(&boosted, 2000.0) - band_level(&flat, 2000.0);
    assert!((9.0..13.0).contains(&boost), "boost {boost} dB");
    let untouched = band_level(&boosted, 125.0) - band_level(&flat, 125.0);
    assert!(untouched.abs() < 0.5, "125 Hz moved {untouched} dB");
}

#[tokio::test]
async fn test_preset_round_trip_through_equalizer() {
    let temp_dir = TempDir::new().unwrap();
    let presets = PresetManager::new(temp_dir.path().to_path_buf());
    let profile = EqProfile::new(
        vec![
            Band::new(80.0, 3.0, 0.7),
            Band::new(1200.0, -4.5, 1.4),
            Band::new(9000.0, 2.0, 0.9),
        ],
        -2.0,
    );
    presets.save_preset("warm", &profile).await.unwrap();
    let loaded = presets.load_preset("warm").await.unwrap();

    let mut graph = RenderGraph::new(SAMPLE_RATE);
    let mut eq = ParametricEqualizer::new(&mut graph, EqualizerConfig::default()).unwrap();
    eq.apply_profile(&mut graph, &loaded).unwrap();
    graph.advance(SAMPLE_RATE as usize / 10);

    assert_eq!(eq.profile(), &profile);
    assert_eq!(eq.live_bands(&graph).unwrap(), profile.bands);
    assert!((eq.live_volume(&graph).unwrap() + 2.0).abs() < 1e-3);
    eq.dispose(&mut graph).unwrap();
}

// ============================================================================
// REALTIME PARITY
// ============================================================================

/// Drive the same chain and control sequence on any graph, rendering through `render`
fn scripted_session<G: AudioGraph>(graph: &mut G, mut render: impl FnMut(&mut G, usize) -> Vec<f32>) -> Vec<f32> {
    let mut noise = NoiseSource::new(graph, pink(25, 0.5), 0.5).unwrap();
    let mut carver = BandRegionCarver::new(graph, CarverConfig::default()).unwrap();
    let mut eq = ParametricEqualizer::new(graph, EqualizerConfig::default()).unwrap();
    graph.connect(noise.output().unwrap(), carver.input().unwrap()).unwrap();
    graph.connect(carver.output().unwrap(), eq.input().unwrap()).unwrap();
    let dest = graph.destination();
    graph.connect(eq.output().unwrap(), dest).unwrap();

    let mut out = render(graph, 1024);

    carver.set_center_frequency(graph, 4000.0).unwrap();
    eq.apply_profile(
        graph,
        &EqProfile::new(vec![Band::new(3000.0, 6.0, 1.0), Band::new(6000.0, -3.0, 2.0)], -1.0),
    )
    .unwrap();
    out.extend(render(graph, 2048));

    // Upper edge goes past 20 kHz: the lowpass leaves the path mid-session
    carver.set_bandwidth(graph, 5.0).unwrap();
    eq.update_band(graph, 0, 9.0, Some(2500.0), None).unwrap();
    out.extend(render(graph, 1024));

    eq.set_enabled(graph, false).unwrap();
    noise.set_level(graph, 0.25, ParameterRamp::linear(0.01)).unwrap();
    out.extend(render(graph, 2048));

    eq.dispose(graph).unwrap();
    carver.dispose(graph).unwrap();
    noise.dispose(graph).unwrap();
    out
}

#[test]
fn test_realtime_engine_matches_offline_render() {
    let mut offline = RenderGraph::new(SAMPLE_RATE);
    let expected = scripted_session(&mut offline, |graph, frames| {
        let mut out = vec![0.0; frames];
        graph.render(&mut out);
        out
    });

    let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
    let actual = scripted_session(&mut proxy, |_, frames| {
        let mut out = vec![0.0; frames];
        engine.render(&mut out);
        out
    });

    assert_eq!(expected.len(), actual.len());
    assert!(expected.iter().any(|&s| s != 0.0));
    assert_eq!(expected, actual);

    engine.drain();
    assert_eq!(engine.graph().model().node_count(), 1);
    assert_eq!(offline.model().node_count(), 1);
}
