//! Block renderer for the node graph
//!
//! Renders in blocks of [`BLOCK_SIZE`] frames. Every buffer is allocated when
//! a node is added, so `render` itself never allocates.
//!
//! A render thread that must not allocate or free uses the split API instead
//! of [`AudioGraph`]: nodes arrive as [`PreparedNode`]s, wiring arrives as a
//! finished [`Topology`], and whatever the graph lets go of comes back as
//! [`Released`] memory for another thread to drop.
//!
//! Processing rules:
//! - sources loop their noise buffer while playing, silence otherwise
//! - filter parameters are sampled once per block (k-rate); coefficients are
//!   only recomputed when a value changed
//! - gain parameters are sampled per frame (a-rate) while a ramp is running
//! - a filter that sat out the previous block restarts from cleared state

use super::automation::{AutomatedParam, Ramp};
use super::model::{GraphModel, NodeEntry, Topology};
use super::{AudioGraph, NodeId, NodeKind, NodeSpec, Param, RampShape, Rewire};
use crate::domain::biquad::{BiquadCoeffs, BiquadFilter};
use crate::domain::error::{Result, SynthError};
use crate::domain::noise::NoiseBuffer;
use crate::domain::params::BLOCK_SIZE;
use tracing::{debug, trace};

#[derive(Debug)]
enum NodeState {
    Source {
        buffer: NoiseBuffer,
        position: usize,
    },
    Filter {
        filter: BiquadFilter,
        /// (frequency, q, gain_db) the coefficients were computed from
        cached: Option<(f32, f32, f32)>,
        /// Block index this filter was last rendered in
        last_block: Option<u64>,
    },
    Gain,
}

impl NodeState {
    fn from_spec(spec: NodeSpec) -> Self {
        match spec {
            NodeSpec::BufferSource { buffer } => NodeState::Source {
                buffer,
                position: 0,
            },
            NodeSpec::Filter { .. } => NodeState::Filter {
                filter: BiquadFilter::new(BiquadCoeffs::default()),
                cached: None,
                last_block: None,
            },
            NodeSpec::Gain { .. } => NodeState::Gain,
        }
    }
}

/// A node with its render state and output buffer already allocated
#[derive(Debug)]
pub struct PreparedNode {
    entry: NodeEntry,
    state: NodeState,
    output: Vec<f32>,
}

impl PreparedNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self {
            entry: NodeEntry::from_spec(&spec),
            state: NodeState::from_spec(spec),
            output: vec![0.0; BLOCK_SIZE],
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.entry.kind()
    }
}

/// Memory a render graph let go of; dropping it frees the memory
#[derive(Debug)]
pub struct Released(ReleasedKind);

#[derive(Debug)]
enum ReleasedKind {
    Node { state: NodeState, output: Vec<f32> },
    Topology(Topology),
}

impl Released {
    /// Samples held by a removed node's noise and output buffers
    pub fn samples(&self) -> usize {
        match &self.0 {
            ReleasedKind::Node { state, output } => {
                let noise = match state {
                    NodeState::Source { buffer, .. } => buffer.len(),
                    _ => 0,
                };
                noise + output.len()
            }
            ReleasedKind::Topology(_) => 0,
        }
    }

    /// Edges of a replaced topology
    pub fn edges(&self) -> usize {
        match &self.0 {
            ReleasedKind::Topology(topology) => topology.edges().count(),
            ReleasedKind::Node { .. } => 0,
        }
    }
}

/// In-process graph that renders mono blocks on demand
#[derive(Debug)]
pub struct RenderGraph {
    model: GraphModel,
    sample_rate: u32,
    frame: u64,
    block: u64,
    states: Vec<Option<NodeState>>,
    outputs: Vec<Vec<f32>>,
}

impl RenderGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_capacity(sample_rate, 0)
    }

    /// Reserve room for `nodes` slots so adding nodes does not grow the arena
    pub fn with_capacity(sample_rate: u32, nodes: usize) -> Self {
        let mut states = Vec::with_capacity(nodes.max(1));
        let mut outputs = Vec::with_capacity(nodes.max(1));
        // Destination
        states.push(Some(NodeState::Gain));
        outputs.push(vec![0.0; BLOCK_SIZE]);
        Self {
            model: GraphModel::with_capacity(nodes),
            sample_rate: sample_rate.max(1),
            frame: 0,
            block: 0,
            states,
            outputs,
        }
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    /// Frames rendered so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Install a ramp computed on another thread's mirror of this graph
    pub fn schedule(&mut self, node: NodeId, param: Param, ramp: Ramp) -> Result<()> {
        self.model.schedule(node, param, ramp)
    }

    /// Add a node built off the render thread
    ///
    /// Only allocates if the arena outgrows its capacity.
    pub fn add_prepared(&mut self, node: PreparedNode) -> NodeId {
        let PreparedNode {
            entry,
            state,
            output,
        } = node;
        let id = self.model.insert_entry(entry);
        let index = id.index();
        if self.states.len() <= index {
            self.states.resize_with(index + 1, || None);
            self.outputs.resize_with(index + 1, Vec::new);
        }
        // Freed slots keep an empty buffer, so this drops nothing
        self.outputs[index] = output;
        self.states[index] = Some(state);
        id
    }

    /// Free a node whose edges were already removed by an installed topology
    pub fn release_node(&mut self, node: NodeId) -> Result<Released> {
        self.model.detach(node)?;
        let index = node.index();
        let state = self.states[index].take().ok_or(SynthError::UnknownNode(node))?;
        let output = std::mem::take(&mut self.outputs[index]);
        Ok(Released(ReleasedKind::Node { state, output }))
    }

    /// Swap in wiring computed on another thread
    pub fn install_topology(&mut self, topology: Topology) -> Released {
        Released(ReleasedKind::Topology(self.model.install(topology)))
    }

    /// Start a source without logging, for the render thread
    pub fn start_source(&mut self, node: NodeId) -> Result<()> {
        self.model.set_playing(node, true)?;
        if let Some(Some(NodeState::Source { position, .. })) = self.states.get_mut(node.index()) {
            *position = 0;
        }
        Ok(())
    }

    /// Stop a source without logging, for the render thread
    pub fn stop_source(&mut self, node: NodeId) -> Result<()> {
        self.model.set_playing(node, false)
    }

    /// Render `out.len()` mono frames and advance the timeline
    pub fn render(&mut self, out: &mut [f32]) {
        for chunk in out.chunks_mut(BLOCK_SIZE) {
            self.render_block(chunk);
        }
    }

    /// Advance the timeline by `frames`, discarding the output
    pub fn advance(&mut self, frames: usize) {
        let mut scratch = [0.0_f32; BLOCK_SIZE];
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(BLOCK_SIZE);
            self.render_block(&mut scratch[..n]);
            remaining -= n;
        }
    }

    fn render_block(&mut self, out: &mut [f32]) {
        let frames = out.len();
        let sample_rate = self.sample_rate as f64;
        let block_start = self.frame as f64 / sample_rate;
        let block_end = (self.frame + frames as u64) as f64 / sample_rate;

        for &id in self.model.order() {
            let index = id.index();
            let Ok(entry) = self.model.entry(id) else {
                continue;
            };
            let mut buffer = std::mem::take(&mut self.outputs[index]);
            let output = &mut buffer[..frames];

            if entry.kind() == NodeKind::BufferSource {
                output.fill(0.0);
            } else {
                mix_inputs(output, self.model.inputs(id), &self.outputs);
            }

            match (self.states[index].as_mut(), entry.kind()) {
                (Some(NodeState::Source { buffer: noise, position }), _) => {
                    if entry.is_playing() {
                        let samples = noise.samples();
                        for sample in output.iter_mut() {
                            *sample = samples[*position];
                            *position = (*position + 1) % samples.len();
                        }
                    }
                }
                (
                    Some(NodeState::Filter {
                        filter,
                        cached,
                        last_block,
                    }),
                    NodeKind::Filter(kind),
                ) => {
                    let values = (
                        param_at(entry.param(Param::Frequency), block_start),
                        param_at(entry.param(Param::Q), block_start),
                        param_at(entry.param(Param::Gain), block_start),
                    );
                    if *cached != Some(values) {
                        filter.set_coeffs(BiquadCoeffs::for_kind(
                            kind,
                            self.sample_rate as f32,
                            values.0,
                            values.1,
                            values.2,
                        ));
                        *cached = Some(values);
                    }
                    // Re-inserted after a bypass: stale history would click
                    if *last_block != self.block.checked_sub(1) {
                        filter.reset();
                    }
                    *last_block = Some(self.block);
                    filter.process(output);
                }
                (Some(NodeState::Gain), _) => {
                    if let Some(gain) = entry.param(Param::Gain) {
                        if gain.is_moving(block_start, block_end) {
                            for (i, sample) in output.iter_mut().enumerate() {
                                let t = block_start + i as f64 / sample_rate;
                                *sample *= gain.value_at(t);
                            }
                        } else {
                            let g = gain.value_at(block_start);
                            output.iter_mut().for_each(|s| *s *= g);
                        }
                    }
                }
                _ => {}
            }

            self.outputs[index] = buffer;
        }

        let destination = self.model.destination().index();
        out.copy_from_slice(&self.outputs[destination][..frames]);

        self.frame += frames as u64;
        self.block += 1;
        let now = self.now();
        self.model.settle(now);
    }
}

fn param_at(param: Option<&AutomatedParam>, time: f64) -> f32 {
    param.map_or(0.0, |p| p.value_at(time))
}

fn mix_inputs(output: &mut [f32], inputs: &[NodeId], outputs: &[Vec<f32>]) {
    output.fill(0.0);
    for input in inputs {
        // A node's own buffer is taken while it renders, so empty means no signal
        if let Some(source) = outputs.get(input.index()).filter(|b| !b.is_empty()) {
            for (o, s) in output.iter_mut().zip(source.iter()) {
                *o += s;
            }
        }
    }
}

impl AudioGraph for RenderGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    fn destination(&self) -> NodeId {
        self.model.destination()
    }

    fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let kind = spec.kind();
        let id = self.add_prepared(PreparedNode::new(spec));
        trace!(node = %id, ?kind, "Node added");
        Ok(id)
    }

    fn remove_node(&mut self, node: NodeId) -> Result<()> {
        self.model.remove(node)?;
        self.states[node.index()] = None;
        self.outputs[node.index()] = Vec::new();
        Ok(())
    }

    fn rewire(&mut self, plan: &Rewire) -> Result<()> {
        self.model.apply(plan)
    }

    fn param_value(&self, node: NodeId, param: Param) -> Result<f32> {
        self.model.param_value(node, param, self.now())
    }

    fn set_param(&mut self, node: NodeId, param: Param, value: f32) -> Result<()> {
        self.model.set_param(node, param, value)
    }

    fn cancel_and_hold(&mut self, node: NodeId, param: Param, time: f64) -> Result<()> {
        self.model.cancel_and_hold(node, param, time)
    }

    fn ramp_param(
        &mut self,
        node: NodeId,
        param: Param,
        target: f32,
        end_time: f64,
        shape: RampShape,
    ) -> Result<()> {
        let now = self.now();
        self.model
            .ramp_param(node, param, target, end_time, shape, now)
            .map(|_| ())
    }

    fn start(&mut self, node: NodeId) -> Result<()> {
        self.start_source(node)?;
        debug!(node = %node, "Source started");
        Ok(())
    }

    fn stop(&mut self, node: NodeId) -> Result<()> {
        self.stop_source(node)?;
        debug!(node = %node, "Source stopped");
        Ok(())
    }
}
