//! Error types shared by the graph and the components built on it
//!
//! Continuous controls (frequencies, bandwidths, Q, ramp times) are clamped
//! rather than rejected. The variants here cover caller bugs and host failures.

use crate::domain::graph::{Edge, NodeId, Param};
use thiserror::Error;

/// Errors that can occur in the synthesis core
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SynthError {
    /// A component was used after `dispose`
    #[error("{0} used after dispose")]
    Disposed(&'static str),

    /// An EQ profile carried NaN or infinite values
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// A single parameter update carried NaN or infinite values
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The node id does not refer to a live node
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// The node kind has no such parameter
    #[error("Node {node} has no {param:?} parameter")]
    UnsupportedParam { node: NodeId, param: Param },

    /// Start/stop was requested on a node that does not generate sound
    #[error("Node {0} is not a source")]
    NotASource(NodeId),

    /// The requested wiring would feed a node back into itself
    #[error("Wiring {0} would create a cycle")]
    Cycle(Edge),

    /// The graph destination cannot be removed
    #[error("Node {0} is protected")]
    ProtectedNode(NodeId),

    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for audio device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, SynthError>;
