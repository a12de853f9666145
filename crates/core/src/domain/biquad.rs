//! Biquad filters used by every filter node in the graph
//!
//! Coefficients follow the RBJ audio EQ cookbook. The render path holds one
//! [`BiquadFilter`] per filter node and recomputes coefficients only when one of
//! the node's automated parameters moved since the previous block.

use crate::domain::graph::FilterKind;
use crate::domain::params;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Highest cutoff as a fraction of the sample rate
const MAX_NORMALIZED_FREQ: f32 = 0.49;

/// Biquad filter coefficients
///
/// Direct Form I implementation for numerical stability.
/// Coefficients are pre-computed to avoid per-sample calculations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Shared intermediate terms of the cookbook formulas
struct Prewarp {
    cos_w0: f32,
    alpha: f32,
}

impl Prewarp {
    fn new(sample_rate: f32, freq: f32, q: f32) -> Self {
        let freq = freq.clamp(1.0, sample_rate * MAX_NORMALIZED_FREQ);
        let w0 = 2.0 * PI * freq / sample_rate;
        Self {
            cos_w0: w0.cos(),
            alpha: w0.sin() / (2.0 * q.max(1e-4)),
        }
    }
}

impl BiquadCoeffs {
    /// Coefficients for a filter node of the given kind
    #[must_use]
    pub fn for_kind(kind: FilterKind, sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        match kind {
            FilterKind::Bandpass => Self::bandpass(sample_rate, freq, q),
            FilterKind::Highpass => Self::highpass(sample_rate, freq, q),
            FilterKind::Lowpass => Self::lowpass(sample_rate, freq, q),
            FilterKind::Peaking => Self::peaking(sample_rate, freq, gain_db, q),
        }
    }

    /// Bandpass with 0 dB gain at the center frequency
    #[must_use]
    pub fn bandpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prewarp::new(sample_rate, freq, q);
        Self::normalize(p.alpha, 0.0, -p.alpha, 1.0 + p.alpha, -2.0 * p.cos_w0, 1.0 - p.alpha)
    }

    /// Second-order highpass
    #[must_use]
    pub fn highpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prewarp::new(sample_rate, freq, q);
        let b = (1.0 + p.cos_w0) / 2.0;
        Self::normalize(b, -(1.0 + p.cos_w0), b, 1.0 + p.alpha, -2.0 * p.cos_w0, 1.0 - p.alpha)
    }

    /// Second-order lowpass
    #[must_use]
    pub fn lowpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prewarp::new(sample_rate, freq, q);
        let b = (1.0 - p.cos_w0) / 2.0;
        Self::normalize(b, 1.0 - p.cos_w0, b, 1.0 + p.alpha, -2.0 * p.cos_w0, 1.0 - p.alpha)
    }

    /// Calculate coefficients for a peaking EQ filter
    ///
    /// Boosts or cuts frequencies around a center frequency.
    #[must_use]
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = params::clamp_gain_db(gain_db);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let p = Prewarp::new(sample_rate, freq, q);

        Self::normalize(
            1.0 + p.alpha * a,
            -2.0 * p.cos_w0,
            1.0 - p.alpha * a,
            1.0 + p.alpha / a,
            -2.0 * p.cos_w0,
            1.0 - p.alpha / a,
        )
    }

    fn normalize(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude response in dB at `freq`
    pub fn magnitude_db(&self, sample_rate: f32, freq: f32) -> f32 {
        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex32::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = Complex32::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex32::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        params::gain_to_db((num / den).norm())
    }
}

/// Stateful biquad filter using Direct Form I
///
/// Direct Form I is chosen over Transposed Direct Form II for:
/// - Better numerical stability with low-frequency filters
/// - Easier coefficient updates without artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f32,
    x2: f32,
    // Previous output samples (y[n-1], y[n-2])
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    /// Create a new biquad filter with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Update filter coefficients
    ///
    /// Keeps the delay memory, so it can be called between blocks.
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.coeffs.b0 * x + self.coeffs.b1 * self.x1 + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    /// Process a buffer of samples in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn generate_test_signal(samples: usize, frequency: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * PI * frequency * i as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    fn peak(buffer: &[f32]) -> f32 {
        buffer.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
    }

    #[test]
    fn test_biquad_unity() {
        let mut filter = BiquadFilter::new(BiquadCoeffs::default());

        let input = vec![0.5, 0.3, 0.7];
        let mut output = input.clone();
        filter.process(&mut output);

        for (in_sample, out_sample) in input.iter().zip(output.iter()) {
            assert!((in_sample - out_sample).abs() < 0.01);
        }
    }

    #[test]
    fn test_biquad_reset() {
        let coeffs = BiquadCoeffs::peaking(SAMPLE_RATE, 200.0, 6.0, 0.707);
        let mut filter = BiquadFilter::new(coeffs);

        let mut buffer = vec![0.5; 100];
        filter.process(&mut buffer);

        filter.reset();
        let mut silence = vec![0.0; 10];
        filter.process(&mut silence);

        assert!(silence.iter().all(|&s| s.abs() < 0.01));
    }

    #[test]
    fn test_bandpass_center_is_unity() {
        let coeffs = BiquadCoeffs::bandpass(SAMPLE_RATE, 1000.0, 1.5);
        assert!(coeffs.magnitude_db(SAMPLE_RATE, 1000.0).abs() < 0.1);
        assert!(coeffs.magnitude_db(SAMPLE_RATE, 100.0) < -12.0);
        assert!(coeffs.magnitude_db(SAMPLE_RATE, 10000.0) < -12.0);
    }

    #[test]
    fn test_highpass_and_lowpass_response() {
        let hp = BiquadCoeffs::highpass(SAMPLE_RATE, 1000.0, 0.707);
        assert!(hp.magnitude_db(SAMPLE_RATE, 100.0) < -30.0);
        assert!(hp.magnitude_db(SAMPLE_RATE, 10000.0).abs() < 0.5);

        let lp = BiquadCoeffs::lowpass(SAMPLE_RATE, 1000.0, 0.707);
        assert!(lp.magnitude_db(SAMPLE_RATE, 10000.0) < -30.0);
        assert!(lp.magnitude_db(SAMPLE_RATE, 100.0).abs() < 0.5);
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let coeffs = BiquadCoeffs::peaking(SAMPLE_RATE, 2000.0, 6.0, 1.0);
        assert!((coeffs.magnitude_db(SAMPLE_RATE, 2000.0) - 6.0).abs() < 0.1);

        let flat = BiquadCoeffs::peaking(SAMPLE_RATE, 2000.0, 0.0, 1.0);
        assert!(flat.magnitude_db(SAMPLE_RATE, 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_peaking_boosts_signal() {
        let mut filter = BiquadFilter::new(BiquadCoeffs::peaking(SAMPLE_RATE, 100.0, 6.0, 1.0));

        let mut signal = generate_test_signal(4800, 100.0);
        let original_peak = peak(&signal);
        filter.process(&mut signal);

        assert!(peak(&signal[2400..]) > original_peak * 1.5);
    }

    #[test]
    fn test_cutoff_above_nyquist_is_stable() {
        let coeffs = BiquadCoeffs::lowpass(44100.0, 30000.0, 30.0);
        let mut filter = BiquadFilter::new(coeffs);
        let mut signal = generate_test_signal(4410, 440.0);
        filter.process(&mut signal);
        assert!(signal.iter().all(|s| s.is_finite()));
    }
}
