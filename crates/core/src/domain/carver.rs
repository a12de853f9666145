//! Band region carver
//!
//! Confines tilted noise to one region of controllable center and width. A
//! highpass at the lower edge and a lowpass at the upper edge do the carving;
//! a stage whose edge falls outside the audible range is taken out of the
//! signal path instead of running at a meaningless cutoff.
//!
//! Signal path, with either filter optional:
//! ```text
//! tilt bank -> [highpass] -> [lowpass] -> output
//! ```
//! The path is only rewired when one of the two stage flags flips. Moving the
//! band while both flags stay put just ramps the filter parameters.

use crate::domain::error::{Result, SynthError};
use crate::domain::graph::{AudioGraph, Edge, FilterKind, NodeId, NodeSpec, Param, Rewire};
use crate::domain::params;
use crate::domain::ramp::ParameterRamp;
use crate::domain::tilt::{SpectralTiltBank, TiltBankConfig};
use serde::{Deserialize, Serialize};
use std::f32::consts::SQRT_2;
use tracing::{debug, trace, warn};

/// Carving parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarverConfig {
    /// Slope of the carved noise (dB/octave)
    pub carve_slope: f32,
    pub center_frequency: f32,
    pub bandwidth_octaves: f32,
    /// Linear gain of the output stage
    pub output_gain: f32,
    /// Ramp time for edge and Q changes
    pub ramp_secs: f64,
    /// Inner tilt bank; its initial slope is replaced by `carve_slope`
    pub tilt: TiltBankConfig,
}

impl Default for CarverConfig {
    fn default() -> Self {
        Self {
            carve_slope: -4.5,
            center_frequency: 1000.0,
            bandwidth_octaves: 2.0,
            output_gain: 1.0,
            ramp_secs: ParameterRamp::BAND_TWEAK_SECS,
            tilt: TiltBankConfig::default(),
        }
    }
}

/// Cutoffs and stage flags for one carving region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandEdges {
    /// Highpass cutoff, clamped into the range
    pub lower: f32,
    /// Lowpass cutoff, clamped into the range
    pub upper: f32,
    pub q: f32,
    pub need_highpass: bool,
    pub need_lowpass: bool,
}

/// Edges of a `bandwidth`-octave region centered on `center`
///
/// The stage flags are decided on the unclamped edges; the cutoffs are then
/// clamped into `[min, max]`.
pub fn band_edges(center: f32, bandwidth: f32, min: f32, max: f32) -> BandEdges {
    let center = if center.is_nan() { min } else { center.clamp(min, max) };
    let half = 2.0_f32.powf(params::clamp_bandwidth(bandwidth) / 2.0);
    let lower = center / half;
    let upper = center * half;

    BandEdges {
        lower: lower.clamp(min, max),
        upper: upper.clamp(min, max),
        q: params::clamp_q(SQRT_2 / (half - 1.0 / half)),
        need_highpass: lower >= min,
        need_lowpass: upper <= max,
    }
}

/// Bandwidth in octaves that yields `q` under the carving formula
///
/// Solves `x^2 - (sqrt(2)/q) x - 1 = 0` for `x = 2^(bw/2)`.
pub fn bandwidth_from_q(q: f32) -> f32 {
    let k = SQRT_2 / q;
    let x = (k + (k * k + 4.0).sqrt()) / 2.0;
    2.0 * x.log2()
}

/// Observable carver settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarverState {
    pub center_frequency: f32,
    pub bandwidth_octaves: f32,
    pub highpass_active: bool,
    pub lowpass_active: bool,
}

/// Tilt bank followed by a bypassable highpass/lowpass pair
#[derive(Debug)]
pub struct BandRegionCarver {
    config: CarverConfig,
    tilt: SpectralTiltBank,
    highpass: NodeId,
    lowpass: NodeId,
    output: NodeId,
    state: CarverState,
    edges: BandEdges,
    disposed: bool,
}

impl BandRegionCarver {
    pub fn new<G: AudioGraph + ?Sized>(graph: &mut G, config: CarverConfig) -> Result<Self> {
        let tilt_config = TiltBankConfig {
            initial_slope: config.carve_slope,
            ..config.tilt.clone()
        };
        let tilt = SpectralTiltBank::new(graph, tilt_config)?;
        let (min, max) = (tilt.config().min_frequency, tilt.config().max_frequency);

        let center = params::clamp_frequency(config.center_frequency).clamp(min, max);
        let bandwidth = params::clamp_bandwidth(config.bandwidth_octaves);
        let edges = band_edges(center, bandwidth, min, max);

        let highpass = graph.add_node(NodeSpec::filter(FilterKind::Highpass, edges.lower, edges.q))?;
        let lowpass = graph.add_node(NodeSpec::filter(FilterKind::Lowpass, edges.upper, edges.q))?;
        let output = graph.add_node(NodeSpec::gain(config.output_gain.max(0.0)))?;

        let carver = Self {
            config,
            tilt,
            highpass,
            lowpass,
            output,
            state: CarverState {
                center_frequency: center,
                bandwidth_octaves: bandwidth,
                highpass_active: edges.need_highpass,
                lowpass_active: edges.need_lowpass,
            },
            edges,
            disposed: false,
        };
        let path = carver.signal_path(edges.need_highpass, edges.need_lowpass)?;
        graph.rewire(&Rewire::connect(path))?;

        debug!(
            center,
            bandwidth,
            highpass = edges.need_highpass,
            lowpass = edges.need_lowpass,
            "Band region carver created"
        );
        Ok(carver)
    }

    fn check(&self) -> Result<()> {
        if self.disposed {
            Err(SynthError::Disposed("BandRegionCarver"))
        } else {
            Ok(())
        }
    }

    /// Series edges from the tilt output through the active stages
    fn signal_path(&self, highpass: bool, lowpass: bool) -> Result<Vec<Edge>> {
        let mut nodes = vec![self.tilt.output()?];
        if highpass {
            nodes.push(self.highpass);
        }
        if lowpass {
            nodes.push(self.lowpass);
        }
        nodes.push(self.output);
        Ok(Edge::path(&nodes))
    }

    pub fn set_center_frequency<G: AudioGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        frequency: f32,
    ) -> Result<()> {
        self.check()?;
        let (min, max) = self.frequency_range();
        self.state.center_frequency = params::clamp_frequency(frequency).clamp(min, max);
        self.update(graph)
    }

    pub fn set_bandwidth<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, octaves: f32) -> Result<()> {
        self.check()?;
        self.state.bandwidth_octaves = params::clamp_bandwidth(octaves);
        self.update(graph)
    }

    fn frequency_range(&self) -> (f32, f32) {
        let tilt = self.tilt.config();
        (tilt.min_frequency, tilt.max_frequency)
    }

    /// Recompute the edges, ramp the filters and rewire if a flag flipped
    fn update<G: AudioGraph + ?Sized>(&mut self, graph: &mut G) -> Result<()> {
        let (min, max) = self.frequency_range();
        let edges = band_edges(
            self.state.center_frequency,
            self.state.bandwidth_octaves,
            min,
            max,
        );

        let ramp = ParameterRamp::exponential(self.config.ramp_secs);
        // A stage entering the path jumps to its new settings; it has been silent
        let entering_hp = edges.need_highpass && !self.state.highpass_active;
        let entering_lp = edges.need_lowpass && !self.state.lowpass_active;
        let hp_ramp = if entering_hp { ParameterRamp::instant() } else { ramp };
        let lp_ramp = if entering_lp { ParameterRamp::instant() } else { ramp };

        hp_ramp.apply(graph, self.highpass, Param::Frequency, edges.lower)?;
        hp_ramp.apply(graph, self.highpass, Param::Q, edges.q)?;
        lp_ramp.apply(graph, self.lowpass, Param::Frequency, edges.upper)?;
        lp_ramp.apply(graph, self.lowpass, Param::Q, edges.q)?;

        if edges.need_highpass != self.state.highpass_active
            || edges.need_lowpass != self.state.lowpass_active
        {
            let current = self.signal_path(self.state.highpass_active, self.state.lowpass_active)?;
            let desired = self.signal_path(edges.need_highpass, edges.need_lowpass)?;
            graph.rewire(&Rewire::between(&current, &desired))?;
            debug!(
                highpass = edges.need_highpass,
                lowpass = edges.need_lowpass,
                "Carver stages rewired"
            );
        }

        self.state.highpass_active = edges.need_highpass;
        self.state.lowpass_active = edges.need_lowpass;
        self.edges = edges;
        trace!(
            lower = edges.lower,
            upper = edges.upper,
            q = edges.q,
            "Carver edges updated"
        );
        Ok(())
    }

    /// Ramp the output stage to a new linear gain
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

    /// Input of the inner tilt bank
    pub fn input(&self) -> Result<NodeId> {
        self.check()?;
        self.tilt.input()
    }

    pub fn output(&self) -> Result<NodeId> {
        self.check()?;
        Ok(self.output)
    }

    pub fn state(&self) -> CarverState {
        self.state
    }

    pub fn edges(&self) -> BandEdges {
        self.edges
    }

    pub fn tilt(&self) -> &SpectralTiltBank {
        &self.tilt
    }

    /// Highpass and lowpass nodes, whether or not they are in the path
    pub fn stage_nodes(&self) -> (NodeId, NodeId) {
        (self.highpass, self.lowpass)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tear down the tilt bank, both stages and the output
    pub fn dispose<G: AudioGraph + ?Sized>(&mut self, graph: &mut G) -> Result<()> {
        self.check()?;
        self.tilt.dispose(graph)?;
        graph.remove_node(self.highpass)?;
        graph.remove_node(self.lowpass)?;
        graph.remove_node(self.output)?;
        self.disposed = true;
        debug!("Band region carver disposed");
        Ok(())
    }
}

impl Drop for BandRegionCarver {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                center = self.state.center_frequency,
                "BandRegionCarver dropped without dispose; its nodes stay in the graph"
            );
        }
    }
}
