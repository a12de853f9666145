//! Realtime rendering and device playback
//!
//! The control side mutates a [`RealtimeGraph`], which validates every change
//! against its own mirror of the graph and forwards it by value to a
//! [`RenderEngine`]. The engine is owned by the output stream callback:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod analysis;
pub mod command;
pub mod playback;
pub mod realtime;

pub use analysis::{welch_psd, BandLevel, Spectrum};
pub use command::{EngineEvent, GraphCommand};
pub use playback::{OutputDevice, PlaybackStream};
pub use realtime::{RealtimeGraph, RenderEngine, COMMAND_CAPACITY, EVENT_CAPACITY, NODE_CAPACITY};
