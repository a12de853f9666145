//! Slope-matched multi-band filter bank
//!
//! Splits the input into N constant-Q bandpass channels with log-spaced centers
//! and gives each channel a gain so the summed output has a target spectral
//! slope. Gains are expressed relative to the slope the input already has
//! (pink noise: -3 dB/octave), and are 0 dB at the reference frequency.
//!
//! Graph shape:
//! ```text
//! input ─┬─ bandpass(fc_1) ─ gain_1 ─┬─ output
//!        ├─ bandpass(fc_2) ─ gain_2 ─┤
//!        └─ ...                      ┘
//! ```
//! [`SpectralTiltBank::set_slope`] only ramps the per-band gains; the topology
//! is fixed for the life of the bank.

use crate::domain::error::{Result, SynthError};
use crate::domain::graph::{AudioGraph, Edge, FilterKind, NodeId, NodeSpec, Param, Rewire};
use crate::domain::noise::INHERENT_SLOPE_DB_PER_OCTAVE;
use crate::domain::params::{self, db_to_gain, MAX_FREQUENCY, MIN_FREQUENCY};
use crate::domain::ramp::ParameterRamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Construction parameters of a tilt bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltBankConfig {
    /// Number of bandpass channels (at least 1)
    pub num_bands: usize,
    /// Q of every bandpass channel
    pub q: f32,
    /// Frequency where the shaping gain is 0 dB
    pub reference_frequency: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Slope of the signal fed into the bank (dB/octave)
    pub inherent_slope: f32,
    /// Target slope applied at construction (dB/octave)
    pub initial_slope: f32,
    /// Linear gain of the summing stage
    pub output_gain: f32,
    /// Ramp time for slope changes
    pub slope_ramp_secs: f64,
}

impl Default for TiltBankConfig {
    fn default() -> Self {
        Self {
            num_bands: 20,
            q: 1.5,
            reference_frequency: 800.0,
            min_frequency: MIN_FREQUENCY,
            max_frequency: MAX_FREQUENCY,
            inherent_slope: INHERENT_SLOPE_DB_PER_OCTAVE,
            initial_slope: INHERENT_SLOPE_DB_PER_OCTAVE,
            output_gain: 1.0,
            slope_ramp_secs: ParameterRamp::BAND_TWEAK_SECS,
        }
    }
}

impl TiltBankConfig {
    /// Copy with every field forced into a usable range
    ///
    /// The range always spans at least one octave inside the audible band.
    pub fn sanitized(&self) -> Self {
        let min_frequency = params::clamp_frequency(self.min_frequency).min(MAX_FREQUENCY / 2.0);
        let max_frequency = params::clamp_frequency(self.max_frequency).max(min_frequency * 2.0);
        let inherent_slope = finite_or(self.inherent_slope, INHERENT_SLOPE_DB_PER_OCTAVE);
        Self {
            num_bands: self.num_bands.max(1),
            q: params::clamp_q(self.q),
            reference_frequency: params::clamp_frequency(self.reference_frequency),
            min_frequency,
            max_frequency,
            inherent_slope,
            initial_slope: finite_or(self.initial_slope, inherent_slope),
            output_gain: finite_or(self.output_gain, 1.0).max(0.0),
            slope_ramp_secs: self.slope_ramp_secs,
        }
    }

    /// `num_bands` log2-spaced centers strictly inside the frequency range
    pub fn center_frequencies(&self) -> Vec<f32> {
        let steps = (self.num_bands + 1) as f32;
        let ratio = (self.max_frequency / self.min_frequency).log2();
        (1..=self.num_bands)
            .map(|i| self.min_frequency * 2.0_f32.powf(ratio * i as f32 / steps))
            .collect()
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// One channel of the bank
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TiltBand {
    pub center_frequency: f32,
    pub gain_db: f32,
    pub linear_gain: f32,
}

/// Band layout and current shaping gains of a bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBankState {
    pub bands: Vec<TiltBand>,
    /// Current target slope (dB/octave)
    pub slope: f32,
    pub inherent_slope: f32,
    pub reference_frequency: f32,
}

impl FilterBankState {
    fn new(config: &TiltBankConfig) -> Self {
        let mut state = Self {
            bands: config
                .center_frequencies()
                .into_iter()
                .map(|center_frequency| TiltBand {
                    center_frequency,
                    gain_db: 0.0,
                    linear_gain: 1.0,
                })
                .collect(),
            slope: config.inherent_slope,
            inherent_slope: config.inherent_slope,
            reference_frequency: config.reference_frequency,
        };
        state.retarget(config.initial_slope);
        state
    }

    /// Shaping gain for a band centered at `frequency` under the current slope
    pub fn gain_db_at(&self, frequency: f32) -> f32 {
        (self.slope - self.inherent_slope) * (frequency / self.reference_frequency).log2()
    }

    fn retarget(&mut self, slope: f32) {
        self.slope = slope;
        for i in 0..self.bands.len() {
            let gain_db = self.gain_db_at(self.bands[i].center_frequency);
            self.bands[i].gain_db = gain_db;
            self.bands[i].linear_gain = db_to_gain(gain_db);
        }
    }

    /// Least-squares fit of band gain (dB) against octaves from the reference
    ///
    /// Returns `(slope, gain_at_reference)`; the slope is the shaping slope,
    /// i.e. target minus inherent.
    pub fn fitted_slope(&self) -> (f32, f32) {
        let n = self.bands.len() as f64;
        if self.bands.len() < 2 {
            return (0.0, self.bands.first().map_or(0.0, |b| b.gain_db));
        }
        let points: Vec<(f64, f64)> = self
            .bands
            .iter()
            .map(|b| {
                let x = (b.center_frequency as f64 / self.reference_frequency as f64).log2();
                (x, b.gain_db as f64)
            })
            .collect();

        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
        let covariance: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
        let variance: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();

        let slope = covariance / variance;
        let intercept = mean_y - slope * mean_x;
        (slope as f32, intercept as f32)
    }
}

/// N-band spectral tilt stage
#[derive(Debug)]
pub struct SpectralTiltBank {
    config: TiltBankConfig,
    input: NodeId,
    output: NodeId,
    filters: Vec<NodeId>,
    gains: Vec<NodeId>,
    state: FilterBankState,
    disposed: bool,
}

impl SpectralTiltBank {
    /// Build the bank in `graph`; gains start at `config.initial_slope`
    pub fn new<G: AudioGraph + ?Sized>(graph: &mut G, config: TiltBankConfig) -> Result<Self> {
        let config = config.sanitized();
        let state = FilterBankState::new(&config);

        let input = graph.add_node(NodeSpec::gain(1.0))?;
        let output = graph.add_node(NodeSpec::gain(config.output_gain))?;
        let mut filters = Vec::with_capacity(state.bands.len());
        let mut gains = Vec::with_capacity(state.bands.len());
        let mut edges = Vec::with_capacity(state.bands.len() * 3);

        for band in &state.bands {
            let filter = graph.add_node(NodeSpec::filter(
                FilterKind::Bandpass,
                band.center_frequency,
                config.q,
            ))?;
            let gain = graph.add_node(NodeSpec::gain(band.linear_gain))?;
            edges.extend(Edge::path(&[input, filter, gain, output]));
            filters.push(filter);
            gains.push(gain);
        }
        graph.rewire(&Rewire::connect(edges))?;

        debug!(
            bands = state.bands.len(),
            slope = state.slope,
            "Spectral tilt bank created"
        );
        Ok(Self {
            config,
            input,
            output,
            filters,
            gains,
            state,
            disposed: false,
        })
    }

    fn check(&self) -> Result<()> {
        if self.disposed {
            Err(SynthError::Disposed("SpectralTiltBank"))
        } else {
            Ok(())
        }
    }

    /// Ramp every band gain to produce `slope` dB/octave at the output
    pub fn set_slope<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, slope: f32) -> Result<()> {
        self.check()?;
        if !slope.is_finite() {
            return Err(SynthError::InvalidParameter(format!("slope {slope}")));
        }

        self.state.retarget(slope);
        let ramp = ParameterRamp::linear(self.config.slope_ramp_secs);
        for (band, &gain) in self.state.bands.iter().zip(&self.gains) {
            ramp.apply(graph, gain, Param::Gain, band.linear_gain)?;
        }

        trace!(slope, "Tilt slope updated");
        Ok(())
    }

    /// Ramp the summing stage to a new linear gain
    pub fn set_output_gain<G: AudioGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        gain: f32,
        ramp: ParameterRamp,
    ) -> Result<()> {
        self.check()?;
        self.config.output_gain = gain.max(0.0);
        ramp.apply(graph, self.output, Param::Gain, self.config.output_gain)
    }

    pub fn input(&self) -> Result<NodeId> {
        self.check()?;
        Ok(self.input)
    }

    pub fn output(&self) -> Result<NodeId> {
        self.check()?;
        Ok(self.output)
    }

    pub fn state(&self) -> &FilterBankState {
        &self.state
    }

    pub fn slope(&self) -> f32 {
        self.state.slope
    }

    pub fn num_bands(&self) -> usize {
        self.state.bands.len()
    }

    pub fn config(&self) -> &TiltBankConfig {
        &self.config
    }

    /// Gain nodes of each band, in center-frequency order
    pub fn band_gain_nodes(&self) -> &[NodeId] {
        &self.gains
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Remove every node of the bank (and with them all wiring)
    pub fn dispose<G: AudioGraph + ?Sized>(&mut self, graph: &mut G) -> Result<()> {
        self.check()?;
        for &node in self.filters.iter().chain(&self.gains) {
            graph.remove_node(node)?;
        }
        graph.remove_node(self.input)?;
        graph.remove_node(self.output)?;
        self.disposed = true;
        debug!(bands = self.filters.len(), "Spectral tilt bank disposed");
        Ok(())
    }
}

impl Drop for SpectralTiltBank {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                bands = self.filters.len(),
                "SpectralTiltBank dropped without dispose; its nodes stay in the graph"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::RenderGraph;
    use proptest::prelude::*;

    const SAMPLE_RATE: u32 = 48000;

    #[test]
    fn test_centers_are_interior_and_log_spaced() {
        let config = TiltBankConfig::default();
        let centers = config.center_frequencies();
        assert_eq!(centers.len(), 20);
        assert!(centers[0] > MIN_FREQUENCY);
        assert!(centers[19] < MAX_FREQUENCY);

        let ratio = centers[1] / centers[0];
        for pair in centers.windows(2) {
            assert!((pair[1] / pair[0] - ratio).abs() < 1e-3);
        }
        // 21 equal steps across the full range
        assert!((ratio.powi(21) - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_unity_gains_at_inherent_slope() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let mut bank = SpectralTiltBank::new(&mut graph, TiltBankConfig::default()).unwrap();
        for &gain in bank.band_gain_nodes() {
            assert_eq!(graph.param_value(gain, Param::Gain).unwrap(), 1.0);
        }
        assert!(bank.state().bands.iter().all(|b| b.gain_db == 0.0));
        bank.dispose(&mut graph).unwrap();
    }

    #[test]
    fn test_gain_at_100hz_for_carving_slope() {
        let config = TiltBankConfig {
            initial_slope: -4.5,
            ..TiltBankConfig::default()
        };
        let state = FilterBankState::new(&config.sanitized());
        assert!((state.gain_db_at(100.0) - 4.5).abs() < 1e-4);
        assert!(state.gain_db_at(800.0).abs() < 1e-6);
        assert!((state.gain_db_at(6400.0) + 4.5).abs() < 1e-4);
    }

    #[test]
    fn test_set_slope_ramps_band_gains() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let mut bank = SpectralTiltBank::new(&mut graph, TiltBankConfig::default()).unwrap();
        bank.set_slope(&mut graph, -6.0).unwrap();

        // Nothing jumps on the call itself
        let first = bank.band_gain_nodes()[0];
        assert_eq!(graph.param_value(first, Param::Gain).unwrap(), 1.0);

        graph.advance(SAMPLE_RATE as usize / 10);
        for (band, &node) in bank.state().bands.iter().zip(bank.band_gain_nodes()) {
            let live = graph.param_value(node, Param::Gain).unwrap();
            assert!((live - band.linear_gain).abs() < 1e-6);
        }
        // Lows boosted, highs cut
        assert!(bank.state().bands[0].gain_db > 0.0);
        assert!(bank.state().bands[19].gain_db < 0.0);
        bank.dispose(&mut graph).unwrap();
    }

    #[test]
    fn test_set_slope_rejects_nan() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let mut bank = SpectralTiltBank::new(&mut graph, TiltBankConfig::default()).unwrap();
        assert!(matches!(
            bank.set_slope(&mut graph, f32::NAN),
            Err(SynthError::InvalidParameter(_))
        ));
        assert_eq!(bank.slope(), -3.0);
        bank.dispose(&mut graph).unwrap();
    }

    #[test]
    fn test_dispose_releases_nodes() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let mut bank = SpectralTiltBank::new(&mut graph, TiltBankConfig::default()).unwrap();
        assert_eq!(graph.model().node_count(), 1 + 2 + 40);

        bank.dispose(&mut graph).unwrap();
        assert_eq!(graph.model().node_count(), 1);
        assert_eq!(graph.model().edges().count(), 0);
        assert_eq!(
            bank.set_slope(&mut graph, -4.0),
            Err(SynthError::Disposed("SpectralTiltBank"))
        );
    }

    #[test]
    fn test_zero_bands_clamps_to_one() {
        let config = TiltBankConfig {
            num_bands: 0,
            ..TiltBankConfig::default()
        };
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let mut bank = SpectralTiltBank::new(&mut graph, config).unwrap();
        assert_eq!(bank.num_bands(), 1);
        bank.dispose(&mut graph).unwrap();
    }

    #[test]
    fn test_high_min_frequency_stays_audible() {
        let config = TiltBankConfig {
            min_frequency: 15000.0,
            ..TiltBankConfig::default()
        }
        .sanitized();
        assert_eq!(config.min_frequency, MAX_FREQUENCY / 2.0);
        assert_eq!(config.max_frequency, MAX_FREQUENCY);
        for center in config.center_frequencies() {
            assert!(center > config.min_frequency && center < MAX_FREQUENCY, "{center}");
        }
    }

    #[test]
    fn test_nan_inherent_slope_falls_back_for_initial_slope() {
        let config = TiltBankConfig {
            inherent_slope: f32::NAN,
            initial_slope: f32::NAN,
            ..TiltBankConfig::default()
        }
        .sanitized();
        assert_eq!(config.inherent_slope, INHERENT_SLOPE_DB_PER_OCTAVE);
        assert_eq!(config.initial_slope, INHERENT_SLOPE_DB_PER_OCTAVE);
        let state = FilterBankState::new(&config);
        assert!(state.bands.iter().all(|b| b.gain_db.is_finite()));
    }

    proptest! {
        #[test]
        fn prop_fitted_slope_matches_shaping(target in -12.0_f32..3.0, bands in 4_usize..40) {
            let config = TiltBankConfig {
                num_bands: bands,
                initial_slope: target,
                ..TiltBankConfig::default()
            };
            let state = FilterBankState::new(&config.sanitized());
            let (slope, at_reference) = state.fitted_slope();

            prop_assert!((slope - (target - INHERENT_SLOPE_DB_PER_OCTAVE)).abs() < 0.5);
            prop_assert!(at_reference.abs() < 0.5);
        }
    }
}
