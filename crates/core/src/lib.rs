//! Tiltlab core: noise synthesis and spectral shaping primitives
//!
//! The `domain` module holds everything: the DSP math, the node graph the
//! components are wired into, and the components themselves.

pub mod domain;

pub use domain::*;
