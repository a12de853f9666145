//! Configuration management for Tiltlab
//!
//! This module provides:
//! - Session configuration (sample rate, noise buffer, carver with its tilt bank, equalizer)
//! - EQ preset system with TOML serialization
//! - Hot-reload support for presets via file system watcher

use crate::domain::carver::CarverConfig;
use crate::domain::equalizer::{EqProfile, EqualizerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Audio session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Render sample rate; playback uses the device rate when it differs
    pub sample_rate: u32,

    /// Length of the looped pink noise buffer in seconds
    pub noise_seconds: f32,

    /// Linear level of the noise source
    pub level: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            noise_seconds: 2.0,
            level: 0.5,
        }
    }
}

/// Complete Tiltlab configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltlabConfig {
    /// Preset directory
    pub preset_dir: PathBuf,
    pub session: SessionConfig,
    /// Carver settings, including the tilt bank under `[carver.tilt]`
    pub carver: CarverConfig,
    pub equalizer: EqualizerConfig,
}

impl Default for TiltlabConfig {
    fn default() -> Self {
        Self {
            preset_dir: PathBuf::from("presets"),
            session: SessionConfig::default(),
            carver: CarverConfig::default(),
            equalizer: EqualizerConfig::default(),
        }
    }
}

impl TiltlabConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    pub fn factory_default() -> Self {
        Self::default()
    }

    /// Reject settings no session can run with
    ///
    /// Continuous controls are clamped where they are used; only values that
    /// make the session itself meaningless are errors.
    pub fn validate(&self) -> Result<()> {
        if self.session.sample_rate < 8000 {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} Hz is too low",
                self.session.sample_rate
            )));
        }
        if !(self.session.noise_seconds.is_finite() && self.session.noise_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "noise buffer length {} s must be positive",
                self.session.noise_seconds
            )));
        }
        if !self.session.level.is_finite() {
            return Err(ConfigError::Invalid("noise level is not finite".to_string()));
        }
        Ok(())
    }
}

/// File system watcher for preset hot-reload
pub struct ProfileWatcher {
    _watcher: notify::RecommendedWatcher,
    profile_tx: broadcast::Sender<PathBuf>,
}

impl ProfileWatcher {
    /// Watch `preset_dir` for created or modified `.toml` presets
    pub async fn new(preset_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (profile_tx, _profile_rx) = broadcast::channel(32);

        // Create preset directory if it doesn't exist
        fs::create_dir_all(&preset_dir).await?;

        let tx_clone = profile_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                            if let Err(e) = tx_clone.send(path) {
                                debug!("No listener for preset change: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&preset_dir, notify::RecursiveMode::NonRecursive)?;

        info!(
            path = %preset_dir.display(),
            "Preset watcher started"
        );

        Ok(Self {
            _watcher: watcher,
            profile_tx,
        })
    }

    /// Subscribe to preset change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.profile_tx.subscribe()
    }
}

/// EQ preset manager
///
/// Presets are [`EqProfile`]s stored as `<name>.toml` in one directory.
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    /// Create a new preset manager
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    pub fn preset_dir(&self) -> &Path {
        &self.preset_dir
    }

    fn preset_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '));
        if !valid {
            return Err(ConfigError::Invalid(format!("invalid preset name: {name:?}")));
        }
        Ok(self.preset_dir.join(format!("{}.toml", name)))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        if !self.preset_dir.exists() {
            return Ok(presets);
        }

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    /// Load a preset by name
    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<EqProfile> {
        let path = self.preset_path(name)?;

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        Self::load_profile_file(&path).await
    }

    /// Load any profile file, e.g. one reported by [`ProfileWatcher`]
    pub async fn load_profile_file(path: &Path) -> Result<EqProfile> {
        let contents = fs::read_to_string(path).await?;
        let profile: EqProfile = toml::from_str(&contents)?;
        profile
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        debug!(path = %path.display(), bands = profile.bands.len(), "Profile loaded");
        Ok(profile)
    }

    /// Save a preset by name
    #[instrument(skip(self, profile))]
    pub async fn save_preset(&self, name: &str, profile: &EqProfile) -> Result<()> {
        let path = self.preset_path(name)?;
        profile
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        fs::create_dir_all(&self.preset_dir).await?;
        fs::write(&path, toml::to_string_pretty(profile)?).await?;

        info!(name, bands = profile.bands.len(), "Preset saved");
        Ok(())
    }

    /// Delete a preset by name
    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.preset_path(name)?;

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    /// Check if a preset exists
    pub async fn preset_exists(&self, name: &str) -> bool {
        self.preset_path(name).map(|p| p.exists()).unwrap_or(false)
    }
}

/// Configuration manager for the main Tiltlab config
///
/// Manages the main configuration file at `~/.config/tiltlab/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager
    ///
    /// # Arguments
    /// * `config_dir` - Configuration directory path (e.g., `~/.config/tiltlab`)
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/tiltlab` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("tiltlab"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    /// Get the config file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, returns factory default.
    /// If the config file is corrupt, logs an error and returns factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> TiltlabConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = TiltlabConfig::factory_default();

            // Save the factory default for next time
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match TiltlabConfig::load_from_file(&self.config_path).await {
            Ok(config) => {
                info!(
                    path = %self.config_path.display(),
                    "Configuration loaded successfully"
                );
                config
            }
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                // Backup the corrupt config
                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                TiltlabConfig::factory_default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &TiltlabConfig) -> Result<()> {
        // Create config directory if it doesn't exist
        fs::create_dir_all(&self.config_dir).await?;

        config.save_to_file(&self.config_path).await
    }

    /// Clear configuration (delete config file)
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(
                path = %self.config_path.display(),
                "Configuration cleared"
            );
        }

        Ok(())
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
