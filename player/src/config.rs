use anyhow::{Context, Result};
use common::FitMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gpu::{BackendChoice, PowerPreference};
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub gpu: GpuSettings,
}

/// General settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Rendering backend: auto, gpu or cpu
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend: default_backend(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_backend() -> String {
    "auto".to_string()
}

/// Playback and presentation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackSettings {
    #[serde(default = "default_fit")]
    pub fit: String,

    /// Source color was multiplied by alpha before encoding
    #[serde(default)]
    pub premultiplied_alpha: bool,

    #[serde(default)]
    pub autoplay: bool,

    #[serde(default = "default_true", rename = "loop")]
    pub looping: bool,

    /// Frame rate of image sequences (videos carry their own)
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Display refresh rate driving the render loop
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            fit: default_fit(),
            premultiplied_alpha: false,
            autoplay: false,
            looping: true,
            fps: default_fps(),
            refresh_rate: default_refresh_rate(),
        }
    }
}

fn default_fit() -> String {
    "fill".to_string()
}
fn default_true() -> bool {
    true
}
fn default_fps() -> f64 {
    30.0
}
fn default_refresh_rate() -> u32 {
    60
}

/// Scheduler timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingSettings {
    /// Settle delay before the pre-roll draw
    #[serde(default = "default_delay_ms")]
    pub preroll_delay_ms: u64,

    /// Debounce applied to container resize and pixel ratio changes
    #[serde(default = "default_delay_ms")]
    pub resize_debounce_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            preroll_delay_ms: default_delay_ms(),
            resize_debounce_ms: default_delay_ms(),
        }
    }
}

fn default_delay_ms() -> u64 {
    100
}

/// GPU context hints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuSettings {
    #[serde(default = "default_power_preference")]
    pub power_preference: String,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            power_preference: default_power_preference(),
        }
    }
}

fn default_power_preference() -> String {
    "low-power".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("alphastack");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        match self.general.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.general.log_level),
        }

        validate_enum!(self.general.backend.as_str(), "auto", "gpu", "cpu")?;
        self.validate_fit(&self.playback.fit)?;
        validate_enum!(
            self.gpu.power_preference.as_str(),
            "low-power",
            "high-performance"
        )?;

        if !(self.playback.fps.is_finite() && self.playback.fps > 0.0) {
            anyhow::bail!("Invalid fps: {} (must be positive)", self.playback.fps);
        }
        if self.playback.refresh_rate == 0 {
            anyhow::bail!("Invalid refresh rate: 0 (must be positive)");
        }

        Ok(())
    }

    fn validate_fit(&self, fit: &str) -> Result<()> {
        validate_enum!(fit, "fill", "contain", "cover")
    }

    pub fn fit_mode(&self) -> FitMode {
        self.playback.fit.parse().unwrap_or_default()
    }

    pub fn backend(&self) -> BackendChoice {
        match self.general.backend.as_str() {
            "gpu" => BackendChoice::Gpu,
            "cpu" => BackendChoice::Cpu,
            _ => BackendChoice::Auto,
        }
    }

    pub fn power_preference(&self) -> PowerPreference {
        match self.gpu.power_preference.as_str() {
            "high-performance" => PowerPreference::HighPerformance,
            _ => PowerPreference::LowPower,
        }
    }

    pub fn preroll_delay(&self) -> Duration {
        Duration::from_millis(self.timing.preroll_delay_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.resize_debounce_ms)
    }

    /// Interval between display refreshes
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.playback.refresh_rate.max(1) as f64)
    }
}
