//! Arena-backed graph topology and automation state
//!
//! [`GraphModel`] is pure bookkeeping: which nodes exist, how they are wired,
//! the automation timeline of every parameter and which sources are playing.
//! It never touches samples, so the realtime control path can keep a mirror of
//! the render thread's model and answer reads without crossing threads.
//!
//! Node ids are allocated deterministically (free slots are reused in LIFO order
//! with a bumped generation), so two models fed the same mutations hand out the
//! same ids.
//!
//! Wiring lives in a [`Topology`] value: the edge set plus the per-node input
//! lists and processing order derived from it. Building one allocates, so the
//! realtime control side builds it and the render side only swaps it in.

use super::automation::{AutomatedParam, Ramp, RampShape};
use super::{Edge, NodeId, NodeKind, NodeSpec, Param, Rewire};
use crate::domain::error::{Result, SynthError};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};
use tracing::trace;

/// Live state of one node
#[derive(Debug, Clone)]
pub struct NodeEntry {
    kind: NodeKind,
    frequency: AutomatedParam,
    q: AutomatedParam,
    gain: AutomatedParam,
    playing: bool,
}

impl NodeEntry {
    pub(crate) fn from_spec(spec: &NodeSpec) -> Self {
        let (frequency, q, gain) = match spec {
            NodeSpec::BufferSource { .. } => (0.0, 0.0, 0.0),
            NodeSpec::Filter {
                frequency,
                q,
                gain_db,
                ..
            } => (*frequency, *q, *gain_db),
            NodeSpec::Gain { gain } => (0.0, 0.0, *gain),
        };
        Self {
            kind: spec.kind(),
            frequency: AutomatedParam::new(frequency),
            q: AutomatedParam::new(q),
            gain: AutomatedParam::new(gain),
            playing: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The automated parameter, if this node kind has it
    pub fn param(&self, param: Param) -> Option<&AutomatedParam> {
        match (self.kind, param) {
            (NodeKind::Filter(_), Param::Frequency) => Some(&self.frequency),
            (NodeKind::Filter(_), Param::Q) => Some(&self.q),
            (NodeKind::Filter(_), Param::Gain) | (NodeKind::Gain, Param::Gain) => Some(&self.gain),
            _ => None,
        }
    }

    fn param_mut(&mut self, param: Param) -> Option<&mut AutomatedParam> {
        match (self.kind, param) {
            (NodeKind::Filter(_), Param::Frequency) => Some(&mut self.frequency),
            (NodeKind::Filter(_), Param::Q) => Some(&mut self.q),
            (NodeKind::Filter(_), Param::Gain) | (NodeKind::Gain, Param::Gain) => {
                Some(&mut self.gain)
            }
            _ => None,
        }
    }

    fn settle(&mut self, time: f64) {
        self.frequency.settle(time);
        self.q.settle(time);
        self.gain.settle(time);
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

/// Edge set with the input lists and processing order derived from it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    edges: BTreeSet<Edge>,
    /// Inputs per arena slot, in ascending id order
    inputs: Vec<Vec<NodeId>>,
    order: Vec<NodeId>,
}

impl Topology {
    /// Derive input lists and the processing order of `edges`
    ///
    /// Only ancestors of `destination` are ordered. Among nodes whose inputs
    /// are all ready, the lowest id goes first, so the order is deterministic.
    fn build(edges: BTreeSet<Edge>, destination: NodeId, capacity: usize) -> Self {
        let mut inputs: Vec<Vec<NodeId>> = vec![Vec::new(); capacity];
        let mut outputs: Vec<Vec<NodeId>> = vec![Vec::new(); capacity];
        for edge in &edges {
            inputs[edge.to.index()].push(edge.from);
            outputs[edge.from.index()].push(edge.to);
        }

        let mut is_ancestor = vec![false; capacity];
        is_ancestor[destination.index()] = true;
        let mut ancestors = vec![destination];
        let mut queue = VecDeque::from([destination]);
        while let Some(node) = queue.pop_front() {
            for &from in &inputs[node.index()] {
                if !is_ancestor[from.index()] {
                    is_ancestor[from.index()] = true;
                    ancestors.push(from);
                    queue.push_back(from);
                }
            }
        }

        let mut indegree = vec![0usize; capacity];
        for &node in &ancestors {
            indegree[node.index()] = inputs[node.index()].len();
        }
        let mut ready: BinaryHeap<Reverse<NodeId>> = ancestors
            .iter()
            .filter(|n| indegree[n.index()] == 0)
            .map(|&n| Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(ancestors.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &to in &outputs[node.index()] {
                if is_ancestor[to.index()] {
                    indegree[to.index()] -= 1;
                    if indegree[to.index()] == 0 {
                        ready.push(Reverse(to));
                    }
                }
            }
        }

        Self {
            edges,
            inputs,
            order,
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Nodes that feed the destination, in processing order (destination last)
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes summed into `node`'s input, in ascending id order
    pub fn inputs(&self, node: NodeId) -> &[NodeId] {
        self.inputs.get(node.index()).map_or(&[], Vec::as_slice)
    }
}

/// Node arena plus its current [`Topology`]
#[derive(Debug, Clone)]
pub struct GraphModel {
    slots: Vec<Slot>,
    free: Vec<u32>,
    destination: NodeId,
    topology: Topology,
}

impl Default for GraphModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphModel {
    /// Create a model holding only the destination (a unity gain node)
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Like [`GraphModel::new`], with room for `nodes` slots before the arena grows
    pub fn with_capacity(nodes: usize) -> Self {
        let mut model = Self {
            slots: Vec::with_capacity(nodes),
            free: Vec::with_capacity(nodes),
            destination: NodeId::new(0, 0),
            topology: Topology::default(),
        };
        model.destination = model.insert(&NodeSpec::gain(1.0));
        model.topology = Topology::build(BTreeSet::new(), model.destination, model.slots.len());
        model
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Number of live nodes, destination included
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Slots ever allocated; bounds every `NodeId::index`
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|s| s.generation == id.generation() && s.entry.is_some())
    }

    pub fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.entry.as_ref())
            .ok_or(SynthError::UnknownNode(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.entry.as_mut())
            .ok_or(SynthError::UnknownNode(id))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.topology.edges()
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.topology.edges.contains(&Edge::new(from, to))
    }

    /// Nodes that feed the destination, in processing order (destination last)
    pub fn order(&self) -> &[NodeId] {
        self.topology.order()
    }

    /// Nodes summed into `node`'s input, in ascending id order
    pub fn inputs(&self, node: NodeId) -> &[NodeId] {
        self.topology.inputs(node)
    }

    /// Whether a path of edges leads from `from` to `to`
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        Self::path_exists(&self.topology.edges, from, to)
    }

    // ===================================================================
    // Topology
    // ===================================================================

    /// Allocate a node for `spec`
    pub fn insert(&mut self, spec: &NodeSpec) -> NodeId {
        let id = self.insert_entry(NodeEntry::from_spec(spec));
        trace!(node = %id, kind = ?spec.kind(), "Node added");
        id
    }

    /// Allocate a slot for a prebuilt entry; allocation-free within capacity
    pub(crate) fn insert_entry(&mut self, entry: NodeEntry) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.entry = Some(entry);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId::new(index, 0)
            }
        }
    }

    /// Free a node and drop every edge touching it
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.destination {
            return Err(SynthError::ProtectedNode(id));
        }
        self.entry(id)?;

        let mut edges = self.topology.edges.clone();
        edges.retain(|e| e.from != id && e.to != id);
        self.release(id);
        self.topology = Topology::build(edges, self.destination, self.slots.len());

        trace!(node = %id, "Node removed");
        Ok(())
    }

    /// Free a node whose edges are already gone from the topology
    ///
    /// Leaves the topology untouched and never allocates within capacity.
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<()> {
        if id == self.destination {
            return Err(SynthError::ProtectedNode(id));
        }
        self.entry(id)?;
        self.release(id);
        Ok(())
    }

    fn release(&mut self, id: NodeId) {
        self.slots[id.index()].entry = None;
        self.free.push(id.index() as u32);
    }

    /// Apply a rewire plan as one change
    ///
    /// Nothing is modified if any edge names an unknown node or if the
    /// resulting wiring contains a cycle. Connecting an existing edge and
    /// disconnecting a missing one are no-ops.
    pub fn apply(&mut self, plan: &Rewire) -> Result<()> {
        self.topology = self.plan(plan)?;
        trace!(
            disconnected = plan.disconnect.len(),
            connected = plan.connect.len(),
            "Graph rewired"
        );
        Ok(())
    }

    /// The topology `plan` would produce, leaving this model unchanged
    pub fn plan(&self, plan: &Rewire) -> Result<Topology> {
        for edge in plan.disconnect.iter().chain(plan.connect.iter()) {
            self.entry(edge.from)?;
            self.entry(edge.to)?;
        }

        let mut candidate = self.topology.edges.clone();
        for edge in &plan.disconnect {
            candidate.remove(edge);
        }
        for edge in &plan.connect {
            if candidate.contains(edge) {
                continue;
            }
            if edge.from == edge.to || Self::path_exists(&candidate, edge.to, edge.from) {
                return Err(SynthError::Cycle(*edge));
            }
            candidate.insert(*edge);
        }

        Ok(Topology::build(candidate, self.destination, self.slots.len()))
    }

    /// Swap in a topology built elsewhere and hand back the previous one
    pub(crate) fn install(&mut self, topology: Topology) -> Topology {
        std::mem::replace(&mut self.topology, topology)
    }

    fn path_exists(edges: &BTreeSet<Edge>, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            stack.extend(edges.iter().filter(|e| e.from == node).map(|e| e.to));
        }
        false
    }

    // ===================================================================
    // Parameters and playback
    // ===================================================================

    fn automated(&self, id: NodeId, param: Param) -> Result<&AutomatedParam> {
        self.entry(id)?
            .param(param)
            .ok_or(SynthError::UnsupportedParam { node: id, param })
    }

    fn automated_mut(&mut self, id: NodeId, param: Param) -> Result<&mut AutomatedParam> {
        self.entry_mut(id)?
            .param_mut(param)
            .ok_or(SynthError::UnsupportedParam { node: id, param })
    }

    pub fn param_value(&self, id: NodeId, param: Param, time: f64) -> Result<f32> {
        Ok(self.automated(id, param)?.value_at(time))
    }

    /// Value the parameter settles on once its automation completes
    pub fn param_target(&self, id: NodeId, param: Param) -> Result<f32> {
        Ok(self.automated(id, param)?.target())
    }

    pub fn set_param(&mut self, id: NodeId, param: Param, value: f32) -> Result<()> {
        self.automated_mut(id, param)?.set_value(value);
        Ok(())
    }

    pub fn cancel_and_hold(&mut self, id: NodeId, param: Param, time: f64) -> Result<()> {
        self.automated_mut(id, param)?.cancel_and_hold(time);
        Ok(())
    }

    /// Schedule a ramp starting from the value at `now`; returns the ramp
    pub fn ramp_param(
        &mut self,
        id: NodeId,
        param: Param,
        target: f32,
        end_time: f64,
        shape: RampShape,
        now: f64,
    ) -> Result<Ramp> {
        let automated = self.automated_mut(id, param)?;
        let ramp = automated.ramp_from(now, target, end_time, shape);
        automated.schedule(ramp);
        Ok(ramp)
    }

    /// Install a ramp computed elsewhere
    pub fn schedule(&mut self, id: NodeId, param: Param, ramp: Ramp) -> Result<()> {
        self.automated_mut(id, param)?.schedule(ramp);
        Ok(())
    }

    pub fn set_playing(&mut self, id: NodeId, playing: bool) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if entry.kind != NodeKind::BufferSource {
            return Err(SynthError::NotASource(id));
        }
        entry.playing = playing;
        Ok(())
    }

    /// Drop every ramp that finished before `time`
    pub fn settle(&mut self, time: f64) {
        for entry in self.slots.iter_mut().filter_map(|s| s.entry.as_mut()) {
            entry.settle(time);
        }
    }
}
