//! Domain entities and business rules

pub mod biquad;
pub mod carver;
pub mod config;
pub mod equalizer;
pub mod error;
pub mod graph;
pub mod noise;
pub mod params;
pub mod ramp;
pub mod tilt;

// Re-export specific items to avoid ambiguous glob imports
pub use biquad::{BiquadCoeffs, BiquadFilter};
pub use carver::{band_edges, bandwidth_from_q, BandEdges, BandRegionCarver, CarverConfig, CarverState};
pub use config::{ConfigError, ConfigManager, PresetManager, ProfileWatcher, TiltlabConfig};
pub use equalizer::{Band, EqProfile, EqRampTimes, EqualizerConfig, ParametricEqualizer};
pub use error::{Result, SynthError};
pub use graph::{
    AudioGraph, AutomatedParam, Edge, FilterKind, GraphModel, NodeId, NodeKind, NodeSpec, Param,
    PreparedNode, Ramp, RampShape, Released, RenderGraph, Rewire, Topology,
};
pub use noise::{NoiseBuffer, NoiseSource, PinkFilter, INHERENT_SLOPE_DB_PER_OCTAVE};
pub use params::{db_to_gain, gain_to_db};
pub use ramp::ParameterRamp;
pub use tilt::{FilterBankState, SpectralTiltBank, TiltBand, TiltBankConfig};
