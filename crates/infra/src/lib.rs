//! Tiltlab host environment
//!
//! Everything that touches a thread, a device or a spectrum: the realtime
//! graph proxy and its render engine, cpal playback, and FFT analysis.

pub mod audio;

pub use audio::*;
