//! Tiltlab CLI Application

mod chain;

use anyhow::{bail, Context};
use chain::Chain;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tiltlab_core::domain::params::{MAX_FREQUENCY, MIN_FREQUENCY};
use tiltlab_core::domain::{
    band_edges, Band, ConfigManager, EqProfile, NoiseBuffer, PresetManager, ProfileWatcher,
    RenderGraph, SpectralTiltBank, TiltBankConfig, TiltlabConfig,
};
use tiltlab_infra::audio::{welch_psd, BandLevel, OutputDevice, RealtimeGraph};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tiltlab")]
#[command(about = "Tilted pink noise, band carving and parametric EQ", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tilt bank's band table for a slope
    Bands {
        /// Target slope in dB/octave
        #[arg(short, long, allow_hyphen_values = true)]
        slope: Option<f32>,
    },
    /// Print carving edges for a center frequency and bandwidth
    Edges {
        /// Center frequency in Hz
        center: f32,
        /// Bandwidth in octaves
        bandwidth: f32,
    },
    /// Render the chain offline and measure its spectrum
    Render {
        #[arg(long, default_value_t = 4.0)]
        seconds: f32,
        /// Override the carve slope (dB/octave)
        #[arg(short, long, allow_hyphen_values = true)]
        slope: Option<f32>,
        /// Override the carving center frequency (Hz)
        #[arg(long)]
        center: Option<f32>,
        /// Override the carving bandwidth (octaves)
        #[arg(long)]
        bandwidth: Option<f32>,
        /// EQ preset to apply
        #[arg(short, long)]
        preset: Option<String>,
        #[arg(long, default_value_t = 4096)]
        fft_size: usize,
        /// Print the measurement as JSON
        #[arg(long)]
        json: bool,
    },
    /// Play the chain on the default output device
    Play {
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,
        /// EQ preset to apply
        #[arg(short, long)]
        preset: Option<String>,
        /// Re-apply presets when their files change
        #[arg(short, long)]
        watch: bool,
        /// Move the carving center up a third octave every second
        #[arg(long)]
        sweep: bool,
    },
    /// Manage EQ presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand)]
enum PresetAction {
    List,
    Show {
        name: String,
    },
    Save {
        name: String,
        /// Band as frequency:gain_db:q, repeatable
        #[arg(short, long = "band", value_parser = parse_band)]
        bands: Vec<Band>,
        /// Make-up volume in dB
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        volume: f32,
    },
    Delete {
        name: String,
    },
}

fn parse_band(s: &str) -> Result<Band, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [frequency, gain_db, q] = parts.as_slice() else {
        return Err(format!("expected frequency:gain_db:q, got {s:?}"));
    };
    let parse = |v: &str| v.trim().parse::<f32>().map_err(|e| format!("{v:?}: {e}"));
    Ok(Band::new(parse(frequency)?, parse(gain_db)?, parse(q)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let (config, config_dir) = load_config(cli.config.as_deref()).await?;
    let presets = PresetManager::new(resolve(&config_dir, &config.preset_dir));

    match cli.command {
        Command::Bands { slope } => print_bands(&config, slope),
        Command::Edges { center, bandwidth } => {
            print_edges(center, bandwidth);
            Ok(())
        }
        Command::Render {
            seconds,
            slope,
            center,
            bandwidth,
            preset,
            fft_size,
            json,
        } => {
            let mut config = config;
            if let Some(slope) = slope {
                config.carver.carve_slope = slope;
            }
            if let Some(center) = center {
                config.carver.center_frequency = center;
            }
            if let Some(bandwidth) = bandwidth {
                config.carver.bandwidth_octaves = bandwidth;
            }
            let profile = load_profile(&presets, preset.as_deref()).await?;
            render(&config, &profile, seconds, fft_size, json)
        }
        Command::Play {
            seconds,
            preset,
            watch,
            sweep,
        } => {
            let profile = load_profile(&presets, preset.as_deref()).await?;
            play(&config, &presets, profile, seconds, watch, sweep).await
        }
        Command::Preset { action } => preset_command(&presets, action).await,
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<(TiltlabConfig, PathBuf)> {
    match path {
        Some(path) => {
            let config = TiltlabConfig::load_from_file(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?;
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            Ok((config, dir))
        }
        None => {
            let dir = ConfigManager::default_config_dir()?;
            let config = ConfigManager::new(dir.clone()).load().await;
            Ok((config, dir))
        }
    }
}

/// Relative preset directories live next to the config file
fn resolve(config_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

async fn load_profile(presets: &PresetManager, name: Option<&str>) -> anyhow::Result<EqProfile> {
    match name {
        Some(name) => Ok(presets.load_preset(name).await?),
        None => Ok(EqProfile::default()),
    }
}

fn print_bands(config: &TiltlabConfig, slope: Option<f32>) -> anyhow::Result<()> {
    let tilt_config = TiltBankConfig {
        initial_slope: slope.unwrap_or(config.carver.carve_slope),
        ..config.carver.tilt.clone()
    };

    let mut graph = RenderGraph::new(config.session.sample_rate);
    let mut bank = SpectralTiltBank::new(&mut graph, tilt_config)?;
    let state = bank.state().clone();
    bank.dispose(&mut graph)?;

    println!(
        "slope {:+.2} dB/oct (noise {:+.2} dB/oct), reference {} Hz",
        state.slope, state.inherent_slope, state.reference_frequency
    );
    println!("{:>4}  {:>10}  {:>9}  {:>7}", "band", "center Hz", "gain dB", "linear");
    for (i, band) in state.bands.iter().enumerate() {
        println!(
            "{:>4}  {:>10.1}  {:>+9.2}  {:>7.3}",
            i, band.center_frequency, band.gain_db, band.linear_gain
        );
    }
    let (fitted, intercept) = state.fitted_slope();
    println!("fitted gain slope {:+.3} dB/oct, intercept {:+.3} dB", fitted, intercept);
    Ok(())
}

fn print_edges(center: f32, bandwidth: f32) {
    let edges = band_edges(center, bandwidth, MIN_FREQUENCY, MAX_FREQUENCY);
    println!("lower  {:>9.1} Hz  highpass {}", edges.lower, stage(edges.need_highpass));
    println!("upper  {:>9.1} Hz  lowpass  {}", edges.upper, stage(edges.need_lowpass));
    println!("q      {:>9.3}", edges.q);
}

fn stage(active: bool) -> &'static str {
    if active {
        "active"
    } else {
        "bypassed"
    }
}

fn render(
    config: &TiltlabConfig,
    profile: &EqProfile,
    seconds: f32,
    fft_size: usize,
    json: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let sample_rate = config.session.sample_rate;
    let mut graph = RenderGraph::new(sample_rate);
    let buffer = NoiseBuffer::generate(config.session.noise_seconds, sample_rate);
    let chain = Chain::build(&mut graph, config, buffer, profile)?;

    // Let the filters settle before measuring
    graph.advance(sample_rate as usize / 4);
    let frames = (seconds.max(0.0) * sample_rate as f32) as usize;
    let mut out = vec![0.0; frames];
    graph.render(&mut out);
    let edges = chain.carver.edges();
    chain.dispose(&mut graph)?;

    let spectrum = welch_psd(&out, sample_rate, fft_size)?;
    let report = RenderReport {
        sample_rate,
        segments: spectrum.segments(),
        lower_edge: edges.lower,
        upper_edge: edges.upper,
        target_slope: config.carver.carve_slope,
        measured_slope: spectrum.slope_db_per_octave(edges.lower, edges.upper),
        bands: spectrum.third_octave_levels(MIN_FREQUENCY, MAX_FREQUENCY.min(sample_rate as f32 / 2.0)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{:>10}  {:>9}", "center Hz", "level dB");
    for band in &report.bands {
        println!("{:>10.1}  {:>+9.2}", band.center_frequency, band.level_db);
    }
    match report.measured_slope {
        Some(slope) => println!(
            "measured slope {:+.2} dB/oct between {:.0} and {:.0} Hz (target {:+.2})",
            slope, report.lower_edge, report.upper_edge, report.target_slope
        ),
        None => warn!("Carved band is too narrow to measure a slope"),
    }
    Ok(())
}

/// Measurement printed by `render`
#[derive(Debug, Serialize)]
struct RenderReport {
    sample_rate: u32,
    segments: usize,
    lower_edge: f32,
    upper_edge: f32,
    target_slope: f32,
    measured_slope: Option<f32>,
    bands: Vec<BandLevel>,
}

/// How often `play --sweep` moves the carving center
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

async fn play(
    config: &TiltlabConfig,
    presets: &PresetManager,
    profile: EqProfile,
    seconds: f32,
    watch: bool,
    sweep: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let device = OutputDevice::default_output()?;
    let sample_rate = device.sample_rate();
    let (mut graph, engine) = RealtimeGraph::new(sample_rate);
    let buffer = NoiseBuffer::generate(config.session.noise_seconds, sample_rate);
    let mut chain = Chain::build(&mut graph, config, buffer, &profile)?;
    let stream = device.play(engine)?;

    let watcher = if watch {
        Some(ProfileWatcher::new(presets.preset_dir().to_path_buf()).await?)
    } else {
        None
    };
    let mut changes = watcher.as_ref().map(ProfileWatcher::subscribe);

    let deadline = tokio::time::sleep(Duration::from_secs_f32(seconds.max(0.0)));
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = ticker.tick(), if sweep => {
                let state = chain.carver.state();
                let mut next = state.center_frequency * 2f32.powf(1.0 / 3.0);
                if next > MAX_FREQUENCY {
                    next = MIN_FREQUENCY;
                }
                chain.carver.set_center_frequency(&mut graph, next)?;
                info!(center = next, "Carving center moved");
            }
            changed = async {
                match changes.as_mut() {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending().await,
                }
            } => {
                let Some(path) = changed else { continue };
                match PresetManager::load_profile_file(&path).await {
                    Ok(profile) => {
                        chain.equalizer.apply_profile(&mut graph, &profile)?;
                        info!(path = %path.display(), bands = profile.bands.len(), "Preset re-applied");
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Ignoring preset change"),
                }
            }
        }
    }

    let disposed = chain.dispose(&mut graph);
    // Let the engine drain the disposal before the stream stops
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(stream);
    graph.collect();
    disposed?;
    Ok(())
}

async fn preset_command(presets: &PresetManager, action: PresetAction) -> anyhow::Result<()> {
    match action {
        PresetAction::List => {
            let names = presets.list_presets().await?;
            if names.is_empty() {
                println!("no presets in {}", presets.preset_dir().display());
            }
            for name in names {
                println!("{name}");
            }
        }
        PresetAction::Show { name } => {
            let profile = presets.load_preset(&name).await?;
            println!("{}", profile.to_json()?);
        }
        PresetAction::Save {
            name,
            bands,
            volume,
        } => {
            if !volume.is_finite() {
                bail!("volume must be finite");
            }
            let profile = EqProfile::new(bands, volume);
            presets.save_preset(&name, &profile).await?;
            println!("saved {name} ({} bands)", profile.bands.len());
        }
        PresetAction::Delete { name } => {
            presets.delete_preset(&name).await?;
            println!("deleted {name}");
        }
    }
    Ok(())
}
