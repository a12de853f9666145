//! Realtime graph: control-side proxy plus render-side engine
//!
//! The two halves share nothing but two bounded channels and a frame clock:
//!
//! ```text
//! control thread                         audio callback
//! RealtimeGraph ──GraphCommand──────────▶ RenderEngine
//!   (mirror GraphModel)                    (RenderGraph)
//!        ▲  ▲                                   │  │
//!        │  └─────────── EngineEvent ◀──────────┘  │
//!        └────────────── frame clock ◀─────────────┘
//! ```
//!
//! Node ids are allocated deterministically, so the mirror and the engine's
//! graph hand out identical handles as long as they see the same mutations in
//! the same order. The proxy validates every mutation on its mirror first and
//! only forwards the ones that succeeded.
//!
//! The engine neither allocates, frees nor logs while draining commands.
//! Nodes arrive prepared, topologies arrive built, and released memory plus
//! any rejection goes back as an [`EngineEvent`] that the proxy handles on its
//! next mutation or [`RealtimeGraph::collect`].

use crate::audio::command::{EngineEvent, GraphCommand};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiltlab_core::domain::params::BLOCK_SIZE;
use tiltlab_core::domain::{
    AudioGraph, GraphModel, NodeId, NodeSpec, Param, PreparedNode, RampShape, RenderGraph, Result,
    Rewire, SynthError,
};
use tracing::{debug, error, warn};

/// Commands the engine may fall behind by before `send` blocks
pub const COMMAND_CAPACITY: usize = 4096;

/// Events the engine may queue before it drops released memory itself
pub const EVENT_CAPACITY: usize = 4096;

/// Node slots the engine reserves up front
pub const NODE_CAPACITY: usize = 1024;

/// Control-side handle to a graph rendered elsewhere
///
/// Mutations block only when the engine has [`COMMAND_CAPACITY`] commands
/// queued and is not draining them.
#[derive(Debug)]
pub struct RealtimeGraph {
    model: GraphModel,
    sample_rate: u32,
    clock: Arc<AtomicU64>,
    commands: Sender<GraphCommand>,
    events: Receiver<EngineEvent>,
}

impl RealtimeGraph {
    /// Create a connected proxy/engine pair
    pub fn new(sample_rate: u32) -> (Self, RenderEngine) {
        let sample_rate = sample_rate.max(1);
        let clock = Arc::new(AtomicU64::new(0));
        let (commands, command_rx) = bounded(COMMAND_CAPACITY);
        let (event_tx, events) = bounded(EVENT_CAPACITY);

        let proxy = Self {
            model: GraphModel::new(),
            sample_rate,
            clock: Arc::clone(&clock),
            commands,
            events,
        };
        let engine = RenderEngine {
            graph: RenderGraph::with_capacity(sample_rate, NODE_CAPACITY),
            commands: command_rx,
            events: event_tx,
            clock,
            scratch: vec![0.0; BLOCK_SIZE],
        };

        debug!(sample_rate, "Realtime graph created");
        (proxy, engine)
    }

    /// The control side's view of the graph
    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    /// Frames the engine has rendered so far
    pub fn frame(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Handle everything the engine reported; returns how many releases were freed
    pub fn collect(&self) -> usize {
        let mut freed = 0;
        for event in self.events.try_iter() {
            match event {
                EngineEvent::Released(memory) => {
                    drop(memory);
                    freed += 1;
                }
                // The mirror validated these already, so the graphs have diverged
                EngineEvent::Rejected { command, error } => {
                    error!(command, error = %error, "Render engine rejected command")
                }
                EngineEvent::Diverged { expected, created } => {
                    warn!(expected = %expected, created = %created, "Node handles diverged")
                }
            }
        }
        freed
    }

    fn send(&self, command: GraphCommand) -> Result<()> {
        self.collect();
        let name = command.name();
        self.commands.send(command).map_err(|_| {
            SynthError::StreamError(format!("render engine is gone, {name} not delivered"))
        })
    }

    fn send_topology(&self) -> Result<()> {
        self.send(GraphCommand::Rewire(self.model.topology().clone()))
    }
}

impl AudioGraph for RealtimeGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.frame() as f64 / self.sample_rate as f64
    }

    fn destination(&self) -> NodeId {
        self.model.destination()
    }

    fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let id = self.model.insert(&spec);
        let node = PreparedNode::new(spec);
        if let Err(e) = self.send(GraphCommand::AddNode { id, node }) {
            // Keep the mirror in step with an engine that never saw the node
            self.model.remove(id)?;
            return Err(e);
        }
        Ok(id)
    }

    fn remove_node(&mut self, node: NodeId) -> Result<()> {
        let wired = self.model.edges().any(|e| e.from == node || e.to == node);
        self.model.remove(node)?;
        if wired {
            self.send_topology()?;
        }
        self.send(GraphCommand::RemoveNode(node))
    }

    fn rewire(&mut self, plan: &Rewire) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        self.model.apply(plan)?;
        self.send_topology()
    }

    fn param_value(&self, node: NodeId, param: Param) -> Result<f32> {
        self.model.param_value(node, param, self.now())
    }

    fn set_param(&mut self, node: NodeId, param: Param, value: f32) -> Result<()> {
        self.model.set_param(node, param, value)?;
        self.send(GraphCommand::SetParam { node, param, value })
    }

    fn cancel_and_hold(&mut self, node: NodeId, param: Param, time: f64) -> Result<()> {
        self.model.cancel_and_hold(node, param, time)?;
        self.send(GraphCommand::CancelAndHold { node, param, time })
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
        let ramp = self
            .model
            .ramp_param(node, param, target, end_time, shape, now)?;
        self.send(GraphCommand::Automate { node, param, ramp })
    }

    fn start(&mut self, node: NodeId) -> Result<()> {
        self.model.set_playing(node, true)?;
        self.send(GraphCommand::Start(node))
    }

    fn stop(&mut self, node: NodeId) -> Result<()> {
        self.model.set_playing(node, false)?;
        self.send(GraphCommand::Stop(node))
    }
}

/// Render side of a [`RealtimeGraph`]
///
/// Drains pending commands at every block boundary, never in the middle of a
/// block. Neither draining nor rendering locks, allocates or frees while the
/// graph stays within [`NODE_CAPACITY`] slots.
#[derive(Debug)]
pub struct RenderEngine {
    graph: RenderGraph,
    commands: Receiver<GraphCommand>,
    events: Sender<EngineEvent>,
    clock: Arc<AtomicU64>,
    scratch: Vec<f32>,
}

impl RenderEngine {
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    /// Apply every queued command; returns how many were applied
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            let name = command.name();
            match self.apply(command) {
                Ok(()) => applied += 1,
                Err(error) => self.report(EngineEvent::Rejected {
                    command: name,
                    error,
                }),
            }
        }
        applied
    }

    fn apply(&mut self, command: GraphCommand) -> Result<()> {
        match command {
            GraphCommand::AddNode { id, node } => {
                let created = self.graph.add_prepared(node);
                if created != id {
                    self.report(EngineEvent::Diverged {
                        expected: id,
                        created,
                    });
                }
                Ok(())
            }
            GraphCommand::RemoveNode(node) => {
                let released = self.graph.release_node(node)?;
                self.report(EngineEvent::Released(released));
                Ok(())
            }
            GraphCommand::Rewire(topology) => {
                let released = self.graph.install_topology(topology);
                self.report(EngineEvent::Released(released));
                Ok(())
            }
            GraphCommand::SetParam { node, param, value } => {
                self.graph.set_param(node, param, value)
            }
            GraphCommand::CancelAndHold { node, param, time } => {
                self.graph.cancel_and_hold(node, param, time)
            }
            GraphCommand::Automate { node, param, ramp } => self.graph.schedule(node, param, ramp),
            GraphCommand::Start(node) => self.graph.start_source(node),
            GraphCommand::Stop(node) => self.graph.stop_source(node),
        }
    }

    fn report(&self, event: EngineEvent) {
        // With the queue full or the proxy gone, the event is dropped right here
        let _ = self.events.try_send(event);
    }

    /// Render mono frames into `out`
    pub fn render(&mut self, out: &mut [f32]) {
        for chunk in out.chunks_mut(BLOCK_SIZE) {
            self.drain();
            self.graph.render(chunk);
            self.publish();
        }
    }

    /// Render interleaved frames, copying the mono signal to every channel
    ///
    /// `out.len()` should be a multiple of `channels`; a trailing partial frame
    /// is filled with silence.
    pub fn render_interleaved<T: Copy>(
        &mut self,
        out: &mut [T],
        channels: usize,
        convert: impl Fn(f32) -> T,
    ) {
        let channels = channels.max(1);
        let whole = out.len() - out.len() % channels;
        let (frames, rest) = out.split_at_mut(whole);
        rest.fill(convert(0.0));

        for chunk in frames.chunks_mut(BLOCK_SIZE * channels) {
            let n = chunk.len() / channels;
            self.drain();
            self.graph.render(&mut self.scratch[..n]);
            self.publish();

            for (frame, &sample) in chunk.chunks_mut(channels).zip(&self.scratch[..n]) {
                frame.fill(convert(sample));
            }
        }
    }

    fn publish(&self) {
        self.clock.store(self.graph.frame(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiltlab_core::domain::{
        Band, Edge, EqProfile, EqualizerConfig, FilterKind, NoiseBuffer, ParameterRamp,
        ParametricEqualizer,
    };

    const SAMPLE_RATE: u32 = 48000;

    fn dc_buffer(value: f32) -> NoiseBuffer {
        NoiseBuffer::from_samples(Arc::from(vec![value; 64]), SAMPLE_RATE)
    }

    #[test]
    fn test_commands_apply_at_next_render() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let source = proxy
            .add_node(NodeSpec::BufferSource {
                buffer: dc_buffer(0.5),
            })
            .unwrap();
        let dest = proxy.destination();
        proxy.connect(source, dest).unwrap();
        proxy.start(source).unwrap();

        // Nothing reached the engine yet
        assert_eq!(engine.graph().model().node_count(), 1);

        let mut out = vec![0.0; 256];
        engine.render(&mut out);
        assert_eq!(engine.graph().model().node_count(), 2);
        assert!(out.iter().all(|&s| s == 0.5));
        assert_eq!(proxy.frame(), 256);
        assert!((proxy.now() - 256.0 / SAMPLE_RATE as f64).abs() < 1e-12);
    }

    #[test]
    fn test_mirror_rejects_invalid_mutations() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let a = proxy.add_node(NodeSpec::gain(1.0)).unwrap();
        let b = proxy.add_node(NodeSpec::gain(1.0)).unwrap();
        proxy.connect(a, b).unwrap();

        assert!(matches!(proxy.connect(b, a), Err(SynthError::Cycle(_))));
        assert_eq!(
            proxy.remove_node(proxy.destination()),
            Err(SynthError::ProtectedNode(proxy.destination()))
        );
        assert_eq!(proxy.start(a), Err(SynthError::NotASource(a)));

        // Only the valid commands were queued
        assert_eq!(engine.drain(), 3);
        assert!(engine.graph().model().has_edge(a, b));
        assert!(!engine.graph().model().has_edge(b, a));
    }

    #[test]
    fn test_node_handles_match_engine() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let a = proxy.add_node(NodeSpec::gain(1.0)).unwrap();
        proxy.remove_node(a).unwrap();
        let b = proxy
            .add_node(NodeSpec::filter(FilterKind::Lowpass, 1000.0, 0.7))
            .unwrap();
        engine.drain();

        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(engine.graph().model().contains(b));
        assert!(!engine.graph().model().contains(a));
    }

    #[test]
    fn test_ramp_is_resolved_on_control_side() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let gain = proxy.add_node(NodeSpec::gain(0.0)).unwrap();

        ParameterRamp::linear(0.01)
            .apply(&mut proxy, gain, Param::Gain, 1.0)
            .unwrap();
        engine.drain();

        let mirror = proxy.model().entry(gain).unwrap().param(Param::Gain).unwrap();
        let rendered = engine
            .graph()
            .model()
            .entry(gain)
            .unwrap()
            .param(Param::Gain)
            .unwrap();
        assert_eq!(mirror.pending_ramp(), rendered.pending_ramp());
        assert_eq!(rendered.target(), 1.0);
    }

    #[test]
    fn test_render_interleaved_duplicates_channels() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let source = proxy
            .add_node(NodeSpec::BufferSource {
                buffer: dc_buffer(0.25),
            })
            .unwrap();
        let dest = proxy.destination();
        proxy.connect(source, dest).unwrap();
        proxy.start(source).unwrap();

        let mut out = vec![0i32; 2 * 300 + 1];
        engine.render_interleaved(&mut out, 2, |s| (s * 100.0) as i32);
        assert!(out[..600].iter().all(|&s| s == 25));
        assert_eq!(out[600], 0);
        assert_eq!(proxy.frame(), 300);
    }

    #[test]
    fn test_removed_noise_is_freed_on_control_side() {
        let samples: Arc<[f32]> = Arc::from(vec![0.5; 64]);
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let source = proxy
            .add_node(NodeSpec::BufferSource {
                buffer: NoiseBuffer::from_samples(Arc::clone(&samples), SAMPLE_RATE),
            })
            .unwrap();
        let dest = proxy.destination();
        proxy.connect(source, dest).unwrap();
        engine.drain();
        assert_eq!(Arc::strong_count(&samples), 2);

        proxy.remove_node(source).unwrap();
        // Rewire and removal each hand memory back
        assert_eq!(engine.drain(), 2);
        assert_eq!(Arc::strong_count(&samples), 2);
        assert!(!engine.graph().model().contains(source));

        assert_eq!(proxy.collect(), 2);
        assert_eq!(Arc::strong_count(&samples), 1);
    }

    #[test]
    fn test_engine_installs_mirror_topology() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let dest = proxy.destination();
        let a = proxy.add_node(NodeSpec::gain(1.0)).unwrap();
        let b = proxy
            .add_node(NodeSpec::filter(FilterKind::Highpass, 200.0, 0.7))
            .unwrap();
        proxy
            .rewire(&Rewire::connect(Edge::path(&[a, b, dest])))
            .unwrap();
        engine.drain();

        assert_eq!(engine.graph().model().topology(), proxy.model().topology());
        assert_eq!(engine.graph().model().order(), &[a, b, dest]);
    }

    #[test]
    fn test_channels_are_bounded() {
        let (proxy, engine) = RealtimeGraph::new(SAMPLE_RATE);
        assert_eq!(proxy.commands.capacity(), Some(COMMAND_CAPACITY));
        assert_eq!(engine.events.capacity(), Some(EVENT_CAPACITY));
    }

    #[test]
    fn test_send_fails_once_engine_dropped() {
        let (mut proxy, engine) = RealtimeGraph::new(SAMPLE_RATE);
        drop(engine);

        let result = proxy.add_node(NodeSpec::gain(1.0));
        assert!(matches!(result, Err(SynthError::StreamError(_))));
        // The mirror did not keep the node
        assert_eq!(proxy.model().node_count(), 1);
    }

    #[test]
    fn test_equalizer_runs_on_realtime_graph() {
        let (mut proxy, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
        let mut eq = ParametricEqualizer::new(&mut proxy, EqualizerConfig::default()).unwrap();
        let profile = EqProfile::new(vec![Band::new(1000.0, 6.0, 1.0)], -3.0);
        eq.apply_profile(&mut proxy, &profile).unwrap();

        let mut out = vec![0.0; SAMPLE_RATE as usize / 10];
        engine.render(&mut out);

        let bands = eq.live_bands(&proxy).unwrap();
        assert_eq!(bands, profile.bands);
        assert!((eq.live_volume(&proxy).unwrap() + 3.0).abs() < 1e-3);
        eq.dispose(&mut proxy).unwrap();
        engine.drain();
        assert_eq!(engine.graph().model().node_count(), 1);
    }
}
