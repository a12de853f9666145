//! The full listening chain: noise -> carver -> equalizer -> destination

use tiltlab_core::domain::{
    AudioGraph, BandRegionCarver, EqProfile, NoiseBuffer, NoiseSource, ParametricEqualizer,
    Result, TiltlabConfig,
};
use tracing::{info, warn};

pub struct Chain {
    pub noise: NoiseSource,
    pub carver: BandRegionCarver,
    pub equalizer: ParametricEqualizer,
}

impl Chain {
    /// Build and wire the chain; on failure every node created so far is removed
    pub fn build<G: AudioGraph + ?Sized>(
        graph: &mut G,
        config: &TiltlabConfig,
        buffer: NoiseBuffer,
        profile: &EqProfile,
    ) -> Result<Self> {
        let mut noise = NoiseSource::new(graph, buffer, config.session.level)?;
        let mut carver = match BandRegionCarver::new(graph, config.carver.clone()) {
            Ok(carver) => carver,
            Err(e) => {
                discard(noise.dispose(graph));
                return Err(e);
            }
        };
        let equalizer = match ParametricEqualizer::new(graph, config.equalizer) {
            Ok(equalizer) => equalizer,
            Err(e) => {
                discard(carver.dispose(graph));
                discard(noise.dispose(graph));
                return Err(e);
            }
        };

        let mut chain = Self {
            noise,
            carver,
            equalizer,
        };
        if let Err(e) = chain.wire(graph, profile) {
            discard(chain.dispose(graph));
            return Err(e);
        }

        let edges = chain.carver.edges();
        info!(
            slope = config.carver.carve_slope,
            lower = edges.lower,
            upper = edges.upper,
            eq_bands = chain.equalizer.band_count(),
            "Listening chain built"
        );
        Ok(chain)
    }

    fn wire<G: AudioGraph + ?Sized>(&mut self, graph: &mut G, profile: &EqProfile) -> Result<()> {
        self.equalizer.apply_profile(graph, profile)?;
        graph.connect(self.noise.output()?, self.carver.input()?)?;
        graph.connect(self.carver.output()?, self.equalizer.input()?)?;
        let destination = graph.destination();
        graph.connect(self.equalizer.output()?, destination)
    }

    /// Dispose every component, returning the first failure
    pub fn dispose<G: AudioGraph + ?Sized>(mut self, graph: &mut G) -> Result<()> {
        let results = [
            self.equalizer.dispose(graph),
            self.carver.dispose(graph),
            self.noise.dispose(graph),
        ];
        results.into_iter().collect()
    }
}

fn discard(cleanup: Result<()>) {
    if let Err(e) = cleanup {
        warn!(error = %e, "Cleanup after a failed chain build also failed");
    }
}
