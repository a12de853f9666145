//! Playback of a [`RenderEngine`] on the default output device
//!
//! The engine renders at the device's own rate, so open the device first and
//! build the graph at [`OutputDevice::sample_rate`].

use crate::audio::realtime::RenderEngine;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample, Stream, StreamConfig};
use std::fmt;
use tiltlab_core::domain::{Result, SynthError};
use tracing::{debug, error, info};

/// Default output device with its default stream configuration
pub struct OutputDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    name: String,
}

impl OutputDevice {
    /// Open the host's default output device
    pub fn default_output() -> Result<Self> {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or_else(|| SynthError::DeviceNotFound("No default output device".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| SynthError::InvalidConfiguration(e.to_string()))?;

        #[allow(deprecated)]
        let name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        info!(
            device = %name,
            sample_rate = config.sample_rate(),
            channels = config.channels(),
            format = ?config.sample_format(),
            "Output device opened"
        );

        Ok(Self {
            device,
            config,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Start playing `engine` on this device
    ///
    /// Fails if the engine renders at a different rate than the device.
    pub fn play(self, engine: RenderEngine) -> Result<PlaybackStream> {
        if engine.sample_rate() != self.sample_rate() {
            return Err(SynthError::InvalidConfiguration(format!(
                "engine renders at {} Hz but {} runs at {} Hz",
                engine.sample_rate(),
                self.name,
                self.sample_rate()
            )));
        }

        let config: StreamConfig = self.config.config();
        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&self.device, &config, engine)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&self.device, &config, engine)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&self.device, &config, engine)?,
            format => {
                return Err(SynthError::InvalidConfiguration(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| SynthError::StreamError(format!("Failed to start stream: {}", e)))?;

        info!(device = %self.name, "Playback started");
        Ok(PlaybackStream {
            _stream: stream,
            sample_rate: config.sample_rate,
            channels: config.channels,
        })
    }
}

impl fmt::Debug for OutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDevice")
            .field("name", &self.name)
            .field("sample_rate", &self.sample_rate())
            .field("channels", &self.channels())
            .finish()
    }
}

fn build_stream<T>(device: &cpal::Device, config: &StreamConfig, mut engine: RenderEngine) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                engine.render_interleaved(data, channels, |s| T::from_sample(s.clamp(-1.0, 1.0)));
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| SynthError::StreamError(format!("Failed to build stream: {}", e)))
}

/// A running output stream; playback stops when this is dropped
pub struct PlaybackStream {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl fmt::Debug for PlaybackStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackStream")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        info!("Playback stopped");
    }
}
