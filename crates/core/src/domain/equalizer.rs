//! Live parametric equalizer
//!
//! A series chain of peaking filters between an input stage and a make-up
//! volume stage:
//! ```text
//! input -> peaking(band 0) -> ... -> peaking(band n-1) -> volume
//! ```
//! An empty profile wires `input -> volume` directly.
//!
//! Every mutation is glitch free:
//! - same band count: frequency, Q and gain ramp in place
//! - different band count: a new chain is built next to the old one and
//!   swapped in with one atomic rewire, then the old nodes are removed
//! - disabling ramps every band to 0 dB and the volume to unity, keeping the
//!   stored profile so re-enabling restores it exactly

use crate::domain::error::{Result, SynthError};
use crate::domain::graph::{AudioGraph, Edge, NodeId, NodeSpec, Param, Rewire};
use crate::domain::params::{self, db_to_gain, gain_to_db};
use crate::domain::ramp::ParameterRamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// One peaking band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
}

impl Band {
    /// Create a band with every value clamped into its supported range
    pub fn new(frequency: f32, gain_db: f32, q: f32) -> Self {
        Self {
            frequency,
            gain_db,
            q,
        }
        .clamped()
    }

    pub fn clamped(&self) -> Self {
        Self {
            frequency: params::clamp_frequency(self.frequency),
            gain_db: params::clamp_gain_db(self.gain_db),
            q: params::clamp_q(self.q),
        }
    }

    fn is_finite(&self) -> bool {
        self.frequency.is_finite() && self.gain_db.is_finite() && self.q.is_finite()
    }
}

/// A complete equalizer setting, applied as a unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EqProfile {
    #[serde(default)]
    pub volume_db: f32,
    #[serde(default)]
    pub bands: Vec<Band>,
}

impl EqProfile {
    pub fn new(bands: Vec<Band>, volume_db: f32) -> Self {
        Self { volume_db, bands }
    }

    /// Reject NaN and infinite values
    pub fn validate(&self) -> Result<()> {
        if !self.volume_db.is_finite() {
            return Err(SynthError::InvalidProfile(format!(
                "volume {} dB is not finite",
                self.volume_db
            )));
        }
        if let Some(index) = self.bands.iter().position(|b| !b.is_finite()) {
            return Err(SynthError::InvalidProfile(format!(
                "band {index} has non-finite values: {:?}",
                self.bands[index]
            )));
        }
        Ok(())
    }

    /// Copy with the volume and every band clamped into their supported ranges
    pub fn clamped(&self) -> Self {
        Self {
            volume_db: params::clamp_volume_db(self.volume_db),
            bands: self.bands.iter().map(Band::clamped).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SynthError::InvalidProfile(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let profile: Self =
            serde_json::from_str(json).map_err(|e| SynthError::InvalidProfile(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }
}

/// Transition times used by the equalizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqRampTimes {
    /// Single band updates
    pub band_secs: f64,
    /// Whole profiles and volume changes
    pub profile_secs: f64,
    /// Enable / disable
    pub enable_secs: f64,
}

impl Default for EqRampTimes {
    fn default() -> Self {
        Self {
            band_secs: ParameterRamp::BAND_TWEAK_SECS,
            profile_secs: ParameterRamp::PROFILE_SECS,
            enable_secs: ParameterRamp::ENABLE_SECS,
        }
    }
}

/// Equalizer settings that are not part of a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerConfig {
    pub enabled_on_start: bool,
    /// Match distance (Hz) for [`ParametricEqualizer::remove_band_by_frequency`]
    pub frequency_tolerance: f32,
    pub ramps: EqRampTimes,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            enabled_on_start: true,
            frequency_tolerance: 1.0,
            ramps: EqRampTimes::default(),
        }
    }
}

/// Peaking filter chain with a make-up volume stage
///
/// Mutations take `&mut self`, so one equalizer has a single writer.
#[derive(Debug)]
pub struct ParametricEqualizer {
    config: EqualizerConfig,
    input: NodeId,
    volume: NodeId,
    filters: Vec<NodeId>,
    profile: EqProfile,
    enabled: bool,
    disposed: bool,
}

impl ParametricEqualizer {
    /// Flat equalizer: no bands, 0 dB volume
    pub fn new<G: AudioGraph + ?Sized>(graph: &mut G, config: EqualizerConfig) -> Result<Self> {
        let input = graph.add_node(NodeSpec::gain(1.0))?;
        let volume = graph.add_node(NodeSpec::gain(1.0))?;
        graph.rewire(&Rewire::connect([Edge::new(input, volume)]))?;

        debug!(enabled = config.enabled_on_start, "Parametric equalizer created");
        Ok(Self {
            config,
            input,
            volume,
            filters: Vec::new(),
            profile: EqProfile::default(),
            enabled: config.enabled_on_start,
            disposed: false,
        })
    }

    fn check(&self) -> Result<()> {
        if self.disposed {
            Err(SynthError::Disposed("ParametricEqualizer"))
        } else {
            Ok(())
        }
    }

    fn chain(&self, filters: &[NodeId]) -> Vec<Edge> {
        let mut nodes = Vec::with_capacity(filters.len() + 2);
        nodes.push(self.input);
        nodes.extend_from_slice(filters);
        nodes.push(self.volume);
        Edge::path(&nodes)
    }

    fn live_gain_db(&self, band: &Band) -> f32 {
        if self.enabled {
            band.gain_db
        } else {
            0.0
        }
    }

    fn live_volume_gain(&self) -> f32 {
        if self.enabled {
            db_to_gain(self.profile.volume_db)
        } else {
            1.0
        }
    }

    fn peaking_node(&self, band: &Band) -> NodeSpec {
        NodeSpec::peaking(band.frequency, band.q, self.live_gain_db(band))
    }

    fn ramp_band<G: AudioGraph + ?Sized>(
        &self,
        graph: &mut G,
        node: NodeId,
        band: &Band,
        secs: f64,
    ) -> Result<()> {
        ParameterRamp::exponential(secs).apply(graph, node, Param::Frequency, band.frequency)?;
        ParameterRamp::exponential(secs).apply(graph, node, Param::Q, band.q)?;
        ParameterRamp::linear(secs).apply(graph, node, Param::Gain, self.live_gain_db(band))
    }

    // ===================================================================
    // Profiles
    // ===================================================================

    /// Apply every band and the volume of `profile`
    ///
    /// Rejected before any change if the profile holds non-finite values.
    pub fn apply_profile<G: AudioGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        profile: &EqProfile,
    ) -> Result<()> {
        self.check()?;
        profile.validate()?;
        let profile = profile.clamped();
        let secs = self.config.ramps.profile_secs;

        if profile.bands.len() == self.filters.len() {
            for (band, &node) in profile.bands.iter().zip(&self.filters) {
                self.ramp_band(graph, node, band, secs)?;
            }
        } else {
            self.rebuild(graph, &profile.bands)?;
        }

        self.profile = profile;
        ParameterRamp::linear(secs).apply(graph, self.volume, Param::Gain, self.live_volume_gain())?;

        trace!(
            bands = self.profile.bands.len(),
            volume_db = self.profile.volume_db,
            "EQ profile applied"
        );
        Ok(())
    }

    /// Swap the whole filter chain for one built from `bands`
    fn rebuild<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, bands: &[Band]) -> Result<()> {
        let mut filters = Vec::with_capacity(bands.len());
        for band in bands {
            match graph.add_node(self.peaking_node(band)) {
                Ok(node) => filters.push(node),
                Err(e) => {
                    for node in filters {
                        graph.remove_node(node)?;
                    }
                    return Err(e);
                }
            }
        }

        let plan = Rewire::between(&self.chain(&self.filters), &self.chain(&filters));
        graph.rewire(&plan)?;

        let old = std::mem::replace(&mut self.filters, filters);
        for node in &old {
            graph.remove_node(*node)?;
        }

        debug!(
            removed = old.len(),
            created = self.filters.len(),
            "EQ chain rebuilt"
        );
        Ok(())
    }

    /// Ramp every band to its stored gain (enabled) or 0 dB (disabled)
    ///
    /// The volume follows the same rule. No-op when the state is unchanged.
    pub fn set_enabled<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, enabled: bool) -> Result<()> {
        self.check()?;
        if enabled == self.enabled {
            return Ok(());
        }
        self.enabled = enabled;

        let ramp = ParameterRamp::linear(self.config.ramps.enable_secs);
        for (band, &node) in self.profile.bands.iter().zip(&self.filters) {
            ramp.apply(graph, node, Param::Gain, self.live_gain_db(band))?;
        }
        ramp.apply(graph, self.volume, Param::Gain, self.live_volume_gain())?;

        debug!(enabled, "Equalizer toggled");
        Ok(())
    }

    /// Update one band; `None` keeps the current frequency or Q
    ///
    /// Returns `Ok(false)` if `index` is out of range. While disabled only the
    /// stored gain changes; the live gain stays at 0 dB.
    pub fn update_band<G: AudioGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        index: usize,
        gain_db: f32,
        frequency: Option<f32>,
        q: Option<f32>,
    ) -> Result<bool> {
        self.check()?;
        let finite = gain_db.is_finite()
            && frequency.map_or(true, f32::is_finite)
            && q.map_or(true, f32::is_finite);
        if !finite {
            return Err(SynthError::InvalidParameter(format!(
                "band {index}: gain {gain_db}, frequency {frequency:?}, q {q:?}"
            )));
        }
        let Some(&node) = self.filters.get(index) else {
            return Ok(false);
        };

        let current = self.profile.bands[index];
        let band = Band::new(
            frequency.unwrap_or(current.frequency),
            gain_db,
            q.unwrap_or(current.q),
        );
        self.profile.bands[index] = band;

        let secs = self.config.ramps.band_secs;
        if frequency.is_some() {
            ParameterRamp::exponential(secs).apply(graph, node, Param::Frequency, band.frequency)?;
        }
        if q.is_some() {
            ParameterRamp::exponential(secs).apply(graph, node, Param::Q, band.q)?;
        }
        ParameterRamp::linear(secs).apply(graph, node, Param::Gain, self.live_gain_db(&band))?;

        trace!(
            "EQ band {} updated: {:.1}dB@{:.0}Hz, Q={:.2}",
            index,
            band.gain_db,
            band.frequency,
            band.q
        );
        Ok(true)
    }

    /// Set the make-up volume (dB)
    pub fn set_volume<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, volume_db: f32) -> Result<()> {
        self.check()?;
        if !volume_db.is_finite() {
            return Err(SynthError::InvalidParameter(format!("volume {volume_db} dB")));
        }
        self.profile.volume_db = params::clamp_volume_db(volume_db);
        ParameterRamp::linear(self.config.ramps.profile_secs).apply(
            graph,
            self.volume,
            Param::Gain,
            self.live_volume_gain(),
        )
    }

    // ===================================================================
    // Incremental band editing
    // ===================================================================

    /// Index of the band closest to `frequency`, if within `tolerance` Hz
    pub fn find_band_index_by_frequency(&self, frequency: f32, tolerance: f32) -> Option<usize> {
        self.profile
            .bands
            .iter()
            .enumerate()
            .map(|(i, b)| (i, (b.frequency - frequency).abs()))
            .filter(|&(_, distance)| distance <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Append a band at the end of the chain; returns its index
    pub fn add_band<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, band: Band) -> Result<usize> {
        self.check()?;
        if !band.is_finite() {
            return Err(SynthError::InvalidParameter(format!("band {band:?}")));
        }
        let band = band.clamped();
        let node = graph.add_node(self.peaking_node(&band))?;

        let mut filters = self.filters.clone();
        filters.push(node);
        if let Err(e) = graph.rewire(&Rewire::between(&self.chain(&self.filters), &self.chain(&filters))) {
            graph.remove_node(node)?;
            return Err(e);
        }

        self.filters = filters;
        self.profile.bands.push(band);
        debug!(frequency = band.frequency, "EQ band added");
        Ok(self.filters.len() - 1)
    }

    /// Remove the band closest to `frequency` within the configured tolerance
    ///
    /// Returns whether a band was removed.
    pub fn remove_band_by_frequency<G: AudioGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        frequency: f32,
    ) -> Result<bool> {
        self.check()?;
        let Some(index) = self.find_band_index_by_frequency(frequency, self.config.frequency_tolerance)
        else {
            return Ok(false);
        };

        let mut filters = self.filters.clone();
        let node = filters.remove(index);
        graph.rewire(&Rewire::between(&self.chain(&self.filters), &self.chain(&filters)))?;
        graph.remove_node(node)?;

        self.filters = filters;
        let band = self.profile.bands.remove(index);
        debug!(frequency = band.frequency, index, "EQ band removed");
        Ok(true)
    }

    // ===================================================================
    // Accessors
    // ===================================================================

    /// Stored profile (gains as set, even while disabled)
    pub fn profile(&self) -> &EqProfile {
        &self.profile
    }

    pub fn band_count(&self) -> usize {
        self.filters.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn input(&self) -> Result<NodeId> {
        self.check()?;
        Ok(self.input)
    }

    /// The volume stage
    pub fn output(&self) -> Result<NodeId> {
        self.check()?;
        Ok(self.volume)
    }

    /// Band settings currently sounding in the graph
    pub fn live_bands<G: AudioGraph + ?Sized>(&self, graph: &G) -> Result<Vec<Band>> {
        self.check()?;
        self.filters
            .iter()
            .map(|&node| {
                Ok(Band {
                    frequency: graph.param_value(node, Param::Frequency)?,
                    gain_db: graph.param_value(node, Param::Gain)?,
                    q: graph.param_value(node, Param::Q)?,
                })
            })
            .collect()
    }

    /// Volume currently sounding in the graph (dB)
    pub fn live_volume<G: AudioGraph + ?Sized>(&self, graph: &G) -> Result<f32> {
        self.check()?;
        Ok(gain_to_db(graph.param_value(self.volume, Param::Gain)?))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn dispose<G: AudioGraph + ?Sized>(&mut self, graph: &mut G) -> Result<()> {
        self.check()?;
        for &node in &self.filters {
            graph.remove_node(node)?;
        }
        graph.remove_node(self.input)?;
        graph.remove_node(self.volume)?;
        self.disposed = true;
        debug!(bands = self.filters.len(), "Parametric equalizer disposed");
        Ok(())
    }
}

impl Drop for ParametricEqualizer {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                bands = self.filters.len(),
                "ParametricEqualizer dropped without dispose; its nodes stay in the graph"
            );
        }
    }
}
