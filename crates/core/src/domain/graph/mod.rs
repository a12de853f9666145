//! Node graph the synthesis components are wired into
//!
//! Components never process audio themselves. They create nodes, describe the
//! wiring they want, and schedule parameter changes on an [`AudioGraph`]. The
//! graph is an arena of nodes plus an explicit edge list, so swapping one wiring
//! for another is a single [`Rewire`].
//!
//! Two implementations exist:
//! - [`RenderGraph`] renders blocks in-process (offline rendering, tests)
//! - the realtime proxy in `tiltlab-infra`, which forwards every mutation by value
//!   to a render thread

mod automation;
mod model;
mod render;

pub use automation::{AutomatedParam, Ramp, RampShape};
pub use model::{GraphModel, NodeEntry, Topology};
pub use render::{PreparedNode, Released, RenderGraph};

use crate::domain::error::Result;
use crate::domain::noise::NoiseBuffer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Generational handle to a node in a graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot of this node
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Directed connection: the output of `from` is summed into the input of `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }

    /// Edges of a series path `a -> b -> c ...`
    pub fn path(nodes: &[NodeId]) -> Vec<Edge> {
        nodes.windows(2).map(|w| Edge::new(w[0], w[1])).collect()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Response shape of a filter node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    Bandpass,
    Highpass,
    Lowpass,
    Peaking,
}

/// What a node is, without its initial parameter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Loops a noise buffer; silent until started
    BufferSource,
    Filter(FilterKind),
    /// Scales (and sums) its inputs
    Gain,
}

/// Everything needed to instantiate a node
#[derive(Debug, Clone)]
pub enum NodeSpec {
    BufferSource {
        buffer: NoiseBuffer,
    },
    Filter {
        kind: FilterKind,
        frequency: f32,
        q: f32,
        gain_db: f32,
    },
    Gain {
        gain: f32,
    },
}

impl NodeSpec {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSpec::BufferSource { .. } => NodeKind::BufferSource,
            NodeSpec::Filter { kind, .. } => NodeKind::Filter(*kind),
            NodeSpec::Gain { .. } => NodeKind::Gain,
        }
    }

    pub fn filter(kind: FilterKind, frequency: f32, q: f32) -> Self {
        NodeSpec::Filter {
            kind,
            frequency,
            q,
            gain_db: 0.0,
        }
    }

    pub fn peaking(frequency: f32, q: f32, gain_db: f32) -> Self {
        NodeSpec::Filter {
            kind: FilterKind::Peaking,
            frequency,
            q,
            gain_db,
        }
    }

    pub fn gain(gain: f32) -> Self {
        NodeSpec::Gain { gain }
    }
}

/// Automatable parameter of a node
///
/// `Gain` is in dB on filter nodes and a linear factor on gain nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Param {
    Frequency,
    Q,
    Gain,
}

/// One atomic topology change
///
/// Applied as a whole between two render blocks: the signal is never routed
/// through both the old and new wiring, nor through neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewire {
    pub disconnect: Vec<Edge>,
    pub connect: Vec<Edge>,
}

impl Rewire {
    pub fn connect(edges: impl IntoIterator<Item = Edge>) -> Self {
        Self {
            disconnect: Vec::new(),
            connect: edges.into_iter().collect(),
        }
    }

    pub fn disconnect(edges: impl IntoIterator<Item = Edge>) -> Self {
        Self {
            disconnect: edges.into_iter().collect(),
            connect: Vec::new(),
        }
    }

    /// Minimal change turning the `current` wiring into the `desired` one
    pub fn between(current: &[Edge], desired: &[Edge]) -> Self {
        let current: BTreeSet<Edge> = current.iter().copied().collect();
        let desired: BTreeSet<Edge> = desired.iter().copied().collect();
        Self {
            disconnect: current.difference(&desired).copied().collect(),
            connect: desired.difference(&current).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.disconnect.is_empty() && self.connect.is_empty()
    }
}

/// The execution substrate the components configure
///
/// Mutations are cheap bookkeeping; none of them blocks. Time is in seconds on
/// the render timeline.
pub trait AudioGraph {
    fn sample_rate(&self) -> u32;

    /// Current position of the render timeline
    fn now(&self) -> f64;

    /// Node whose input is what the graph renders
    fn destination(&self) -> NodeId;

    fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId>;

    /// Remove a node and every edge touching it
    fn remove_node(&mut self, node: NodeId) -> Result<()>;

    /// Apply a topology change atomically
    ///
    /// The whole plan is validated before anything changes.
    fn rewire(&mut self, plan: &Rewire) -> Result<()>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.rewire(&Rewire::connect([Edge::new(from, to)]))
    }

    fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.rewire(&Rewire::disconnect([Edge::new(from, to)]))
    }

    /// Value of a parameter at `now()`
    fn param_value(&self, node: NodeId, param: Param) -> Result<f32>;

    /// Jump to a value immediately, dropping pending automation
    fn set_param(&mut self, node: NodeId, param: Param, value: f32) -> Result<()>;

    /// Drop pending automation and hold the value reached at `time`
    fn cancel_and_hold(&mut self, node: NodeId, param: Param, time: f64) -> Result<()>;

    /// Ramp from the current value to `target`, arriving at `end_time`
    ///
    /// Supersedes any ramp still pending on the same parameter.
    fn ramp_param(
        &mut self,
        node: NodeId,
        param: Param,
        target: f32,
        end_time: f64,
        shape: RampShape,
    ) -> Result<()>;

    fn start(&mut self, node: NodeId) -> Result<()>;

    fn stop(&mut self, node: NodeId) -> Result<()>;
}
