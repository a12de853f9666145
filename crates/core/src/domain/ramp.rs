//! Smooth parameter transitions
//!
//! Every live parameter change in the components goes through
//! [`ParameterRamp::apply`]: hold whatever value is sounding right now, then
//! ramp from there to the target. Holding first means a ramp scheduled while
//! another is still running starts from the actual current value.

use crate::domain::error::Result;
use crate::domain::graph::{AudioGraph, NodeId, Param, RampShape};
use crate::domain::params::{RAMP_FLOOR, RAMP_MAX_SECS};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// How long and along which curve a parameter moves to a new value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRamp {
    pub duration_secs: f64,
    pub shape: RampShape,
}

impl ParameterRamp {
    /// Single band tweaks
    pub const BAND_TWEAK_SECS: f64 = 0.02;
    /// Whole-profile and volume changes
    pub const PROFILE_SECS: f64 = 0.05;
    /// Enabling or bypassing the equalizer
    pub const ENABLE_SECS: f64 = 0.1;

    /// Linear ramp; durations are clamped to [0, 10] seconds
    pub fn linear(duration_secs: f64) -> Self {
        Self {
            duration_secs: clamp_duration(duration_secs),
            shape: RampShape::Linear,
        }
    }

    /// Exponential ramp, for parameters used on a log scale (frequency, Q)
    pub fn exponential(duration_secs: f64) -> Self {
        Self {
            duration_secs: clamp_duration(duration_secs),
            shape: RampShape::Exponential,
        }
    }

    /// Jump immediately
    pub fn instant() -> Self {
        Self::linear(0.0)
    }

    /// Move `param` of `node` to `target`, reaching it at `now + duration`
    pub fn apply<G: AudioGraph + ?Sized>(
        &self,
        graph: &mut G,
        node: NodeId,
        param: Param,
        target: f32,
    ) -> Result<()> {
        let target = match self.shape {
            RampShape::Exponential => target.max(RAMP_FLOOR),
            RampShape::Linear => target,
        };
        let duration = clamp_duration(self.duration_secs);
        let now = graph.now();

        graph.cancel_and_hold(node, param, now)?;
        if duration == 0.0 {
            graph.set_param(node, param, target)?;
        } else {
            graph.ramp_param(node, param, target, now + duration, self.shape)?;
        }

        trace!(node = %node, ?param, target, duration, "Parameter ramp scheduled");
        Ok(())
    }
}

fn clamp_duration(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.clamp(0.0, RAMP_MAX_SECS)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{FilterKind, NodeSpec, RenderGraph};

    const SAMPLE_RATE: u32 = 48000;

    #[test]
    fn test_duration_clamping() {
        assert_eq!(ParameterRamp::linear(-1.0).duration_secs, 0.0);
        assert_eq!(ParameterRamp::linear(f64::NAN).duration_secs, 0.0);
        assert_eq!(ParameterRamp::linear(f64::INFINITY).duration_secs, 0.0);
        assert_eq!(ParameterRamp::linear(60.0).duration_secs, RAMP_MAX_SECS);
    }

    #[test]
    fn test_ramp_completes_at_duration() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let gain = graph.add_node(NodeSpec::gain(1.0)).unwrap();

        ParameterRamp::linear(0.05)
            .apply(&mut graph, gain, Param::Gain, 0.0)
            .unwrap();
        graph.advance(1200);
        let midway = graph.param_value(gain, Param::Gain).unwrap();
        assert!((midway - 0.5).abs() < 1e-3);

        graph.advance(1200);
        assert_eq!(graph.param_value(gain, Param::Gain).unwrap(), 0.0);
    }

    #[test]
    fn test_instant_sets_value() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let gain = graph.add_node(NodeSpec::gain(1.0)).unwrap();
        ParameterRamp::instant()
            .apply(&mut graph, gain, Param::Gain, 0.25)
            .unwrap();
        assert_eq!(graph.param_value(gain, Param::Gain).unwrap(), 0.25);
    }

    #[test]
    fn test_exponential_target_floor() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let filter = graph
            .add_node(NodeSpec::filter(FilterKind::Highpass, 1000.0, 0.707))
            .unwrap();
        ParameterRamp::exponential(0.01)
            .apply(&mut graph, filter, Param::Q, 0.0)
            .unwrap();
        graph.advance(SAMPLE_RATE as usize / 10);
        assert_eq!(graph.param_value(filter, Param::Q).unwrap(), RAMP_FLOOR);
    }

    #[test]
    fn test_retarget_starts_from_current_value() {
        let mut graph = RenderGraph::new(SAMPLE_RATE);
        let gain = graph.add_node(NodeSpec::gain(0.0)).unwrap();

        let ramp = ParameterRamp::linear(0.1);
        ramp.apply(&mut graph, gain, Param::Gain, 1.0).unwrap();
        graph.advance(2400);
        let before = graph.param_value(gain, Param::Gain).unwrap();

        ramp.apply(&mut graph, gain, Param::Gain, 0.0).unwrap();
        let after = graph.param_value(gain, Param::Gain).unwrap();
        assert!((before - 0.5).abs() < 1e-3);
        assert_eq!(before, after);
    }
}
