//! Spectrum measurement of rendered signals
//!
//! Welch's method: Hann-windowed segments with 50% overlap, averaged
//! periodograms scaled to a one-sided power spectral density. Third-octave
//! band levels are the mean density inside each band, so pink noise measures
//! -3 dB/octave and white noise 0 dB/octave.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::Serialize;
use std::f32::consts::PI;
use tiltlab_core::domain::params::gain_to_db;
use tiltlab_core::domain::{Result, SynthError};
use tracing::debug;

/// One-sided power spectral density
#[derive(Debug, Clone)]
pub struct Spectrum {
    sample_rate: u32,
    fft_size: usize,
    /// Power per Hz for bins 0..=fft_size/2
    density: Vec<f32>,
    segments: usize,
}

/// Mean density of one third-octave band
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandLevel {
    pub center_frequency: f32,
    pub level_db: f32,
}

/// Estimate the power spectral density of `samples`
///
/// `fft_size` must be a power of two no larger than the signal.
pub fn welch_psd(samples: &[f32], sample_rate: u32, fft_size: usize) -> Result<Spectrum> {
    if !fft_size.is_power_of_two() || fft_size < 16 {
        return Err(SynthError::InvalidConfiguration(format!(
            "FFT size {fft_size} is not a power of two >= 16"
        )));
    }
    if samples.len() < fft_size {
        return Err(SynthError::InvalidConfiguration(format!(
            "{} samples is shorter than one {fft_size}-point segment",
            samples.len()
        )));
    }

    let window: Vec<f32> = (0..fft_size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / fft_size as f32).cos())
        .collect();
    let window_power: f32 = window.iter().map(|w| w * w).sum();

    let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
    let mut buffer = vec![Complex::new(0.0, 0.0); fft_size];
    let bins = fft_size / 2 + 1;
    let mut density = vec![0.0_f32; bins];

    let hop = fft_size / 2;
    let mut segments = 0;
    for start in (0..=samples.len() - fft_size).step_by(hop) {
        for ((slot, &sample), &w) in buffer
            .iter_mut()
            .zip(&samples[start..start + fft_size])
            .zip(&window)
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        fft.process(&mut buffer);
        for (d, c) in density.iter_mut().zip(&buffer) {
            *d += c.norm_sqr();
        }
        segments += 1;
    }

    let scale = 1.0 / (segments as f32 * window_power * sample_rate as f32);
    for (i, d) in density.iter_mut().enumerate() {
        // Fold negative frequencies into the one-sided spectrum
        let one_sided = if i == 0 || i == bins - 1 { 1.0 } else { 2.0 };
        *d *= scale * one_sided;
    }

    debug!(fft_size, segments, "Power spectrum estimated");
    Ok(Spectrum {
        sample_rate,
        fft_size,
        density,
        segments,
    })
}

impl Spectrum {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of averaged segments
    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn density(&self) -> &[f32] {
        &self.density
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    /// Bin with the most power
    pub fn peak_frequency(&self) -> f32 {
        let bin = self
            .density
            .iter()
            .enumerate()
            .skip(1)
            .fold((0, 0.0_f32), |best, (i, &d)| if d > best.1 { (i, d) } else { best })
            .0;
        self.bin_frequency(bin)
    }

    /// Mean density of the bins in `[low, high)`, or `None` if no bin falls inside
    pub fn mean_density(&self, low: f32, high: f32) -> Option<f32> {
        let (sum, count) = self
            .density
            .iter()
            .enumerate()
            .filter(|&(i, _)| {
                let f = self.bin_frequency(i);
                f >= low && f < high
            })
            .fold((0.0_f32, 0usize), |(s, n), (_, &d)| (s + d, n + 1));
        (count > 0).then(|| sum / count as f32)
    }

    /// Third-octave band levels (dB of mean density) between `min` and `max`
    ///
    /// Centers follow the base-two series around 1 kHz; bands without bins are
    /// skipped.
    pub fn third_octave_levels(&self, min: f32, max: f32) -> Vec<BandLevel> {
        let edge = 2f32.powf(1.0 / 6.0);
        (-30..=15)
            .map(|n| 1000.0 * 2f32.powf(n as f32 / 3.0))
            .filter(|&center| center >= min && center <= max)
            .filter_map(|center| {
                let density = self.mean_density(center / edge, center * edge)?;
                Some(BandLevel {
                    center_frequency: center,
                    // Power quantity, so 10·log10 = 20·log10 of the square root
                    level_db: gain_to_db(density.sqrt()),
                })
            })
            .collect()
    }

    /// Least-squares slope of the third-octave levels in dB/octave
    pub fn slope_db_per_octave(&self, min: f32, max: f32) -> Option<f32> {
        let levels = self.third_octave_levels(min, max);
        let points: Vec<(f32, f32)> = levels
            .iter()
            .map(|b| (b.center_frequency.log2(), b.level_db))
            .collect();
        regression_slope(&points)
    }
}

fn regression_slope(points: &[(f32, f32)]) -> Option<f32> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f32;
    let mean_x = points.iter().map(|p| p.0).sum::<f32>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f32>() / n;
    let sxy: f32 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let sxx: f32 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    (sxx > 0.0).then(|| sxy / sxx)
}
