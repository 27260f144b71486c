//! # Host Configuration
//!
//! One TOML file configures the device link, the output scaling, script
//! playback and the random stroke generator. Every section and field is
//! optional.
//!
//! ```toml
//! [device]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [output]
//! intensity = 80
//! park_on_disconnect = true
//!
//! [output.range.L0]
//! min = 100
//! max = 900
//!
//! [player]
//! time_window_ms = 150
//! pause_fill = true
//!
//! [stroke]
//! step_ms = 50
//! speed = 120
//! randomness = 30
//! ```

// src/config.rs - Single configuration file
use crate::axis::Axis;
use crate::tcode::{AxisRange, OutputRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub stroke: StrokeConfig,
}

/// Serial device settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// First available port when unset.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: default_baud(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RangeConfig {
    #[serde(default = "default_range_min")]
    pub min: f64,
    #[serde(default = "default_range_max")]
    pub max: f64,
}

/// Output scaling and channel behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_intensity")]
    pub intensity: f64,
    #[serde(default = "default_true")]
    pub park_on_disconnect: bool,
    #[serde(default = "default_smoothing_ms")]
    pub smoothing_ms: u64,
    /// Keyed by axis name (`L0`, `R0`, ...).
    #[serde(default)]
    pub range: BTreeMap<String, RangeConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            intensity: default_intensity(),
            park_on_disconnect: true,
            smoothing_ms: default_smoothing_ms(),
            range: BTreeMap::new(),
        }
    }
}

impl OutputConfig {
    pub fn smoothing(&self) -> Duration {
        Duration::from_millis(self.smoothing_ms)
    }

    pub fn output_range(&self) -> Result<OutputRange, ConfigError> {
        let mut output = OutputRange {
            intensity: self.intensity,
            ..OutputRange::default()
        };
        for (name, range) in &self.range {
            let axis: Axis = name
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("Unknown axis '{}' in output.range", name)))?;
            output.ranges.insert(
                axis,
                AxisRange {
                    min: range.min,
                    max: range.max,
                },
            );
        }
        Ok(output)
    }
}

/// Script playback settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,
    #[serde(default)]
    pub pause_fill: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            time_window_ms: default_time_window_ms(),
            latency_ms: 0,
            playback_rate: default_playback_rate(),
            pause_fill: false,
        }
    }
}

/// Random stroke generator settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrokeConfig {
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    /// Percent of nominal pattern speed.
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Chance in percent of switching pattern after each job.
    #[serde(default = "default_randomness")]
    pub randomness: u32,
    #[serde(default = "default_refill_threshold_ms")]
    pub refill_threshold_ms: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            step_ms: default_step_ms(),
            speed: default_speed(),
            randomness: default_randomness(),
            refill_threshold_ms: default_refill_threshold_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.baud == 0 {
            return Err(ConfigError::Invalid("device.baud must be > 0".to_string()));
        }
        if !(0.0..=100.0).contains(&self.output.intensity) {
            return Err(ConfigError::Invalid(
                "output.intensity must be between 0 and 100".to_string(),
            ));
        }
        for (name, range) in &self.output.range {
            if name.parse::<Axis>().is_err() {
                return Err(ConfigError::Invalid(format!("Unknown axis '{}' in output.range", name)));
            }
            if range.min > range.max {
                return Err(ConfigError::Invalid(format!(
                    "output.range.{}: min {} is greater than max {}",
                    name, range.min, range.max
                )));
            }
            if range.min < 0.0 || range.max > 1000.0 {
                return Err(ConfigError::Invalid(format!(
                    "output.range.{} must lie within 0..=1000",
                    name
                )));
            }
        }
        if self.player.time_window_ms == 0 {
            return Err(ConfigError::Invalid("player.time_window_ms must be > 0".to_string()));
        }
        if self.player.playback_rate.is_nan() || self.player.playback_rate <= 0.0 {
            return Err(ConfigError::Invalid("player.playback_rate must be > 0".to_string()));
        }
        if self.stroke.step_ms == 0 {
            return Err(ConfigError::Invalid("stroke.step_ms must be > 0".to_string()));
        }
        if !(1..=1000).contains(&self.stroke.speed) {
            return Err(ConfigError::Invalid(
                "stroke.speed must be between 1 and 1000".to_string(),
            ));
        }
        if self.stroke.randomness > 100 {
            return Err(ConfigError::Invalid("stroke.randomness must be <= 100".to_string()));
        }
        Ok(())
    }
}

fn default_baud() -> u32 { 115200 }
fn default_intensity() -> f64 { 100.0 }
fn default_true() -> bool { true }
fn default_smoothing_ms() -> u64 { 1000 }
fn default_range_min() -> f64 { 0.0 }
fn default_range_max() -> f64 { 1000.0 }
fn default_time_window_ms() -> u64 { 150 }
fn default_playback_rate() -> f64 { 1.0 }
fn default_step_ms() -> u64 { 50 }
fn default_speed() -> u32 { 100 }
fn default_randomness() -> u32 { 30 }
fn default_refill_threshold_ms() -> u64 { 500 }
fn default_progress_interval_ms() -> u64 { 250 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
