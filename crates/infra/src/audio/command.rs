//! Messages between the control side and the render engine
//!
//! Every command carries its payload by value, already allocated and resolved
//! on the control side: nodes arrive prepared, wiring arrives as a finished
//! topology, ramps arrive with both endpoints. The engine only installs them.
//! What the engine lets go of travels back as an [`EngineEvent`] so it is
//! freed on the control side.

use tiltlab_core::domain::{NodeId, Param, PreparedNode, Ramp, Released, SynthError, Topology};

/// One graph mutation, applied by the engine at the next block boundary
#[derive(Debug)]
pub enum GraphCommand {
    /// Instantiate a node; `id` is the handle the control side already returned
    AddNode { id: NodeId, node: PreparedNode },
    /// Free a node; a preceding `Rewire` already removed its edges
    RemoveNode(NodeId),
    Rewire(Topology),
    SetParam {
        node: NodeId,
        param: Param,
        value: f32,
    },
    CancelAndHold {
        node: NodeId,
        param: Param,
        time: f64,
    },
    Automate {
        node: NodeId,
        param: Param,
        ramp: Ramp,
    },
    Start(NodeId),
    Stop(NodeId),
}

impl GraphCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            GraphCommand::AddNode { .. } => "add_node",
            GraphCommand::RemoveNode(_) => "remove_node",
            GraphCommand::Rewire(_) => "rewire",
            GraphCommand::SetParam { .. } => "set_param",
            GraphCommand::CancelAndHold { .. } => "cancel_and_hold",
            GraphCommand::Automate { .. } => "automate",
            GraphCommand::Start(_) => "start",
            GraphCommand::Stop(_) => "stop",
        }
    }
}

/// Report from the render engine back to the control side
#[derive(Debug)]
pub enum EngineEvent {
    /// Memory to drop off the audio thread
    Released(Released),
    /// The engine refused a command the mirror had accepted
    Rejected {
        command: &'static str,
        error: SynthError,
    },
    /// The engine allocated a different handle than the mirror
    Diverged { expected: NodeId, created: NodeId },
}
