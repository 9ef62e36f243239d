//! Application configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/rust_ljm.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `RUST_LJM_`, nested keys separated by `__`
//!
//! Every field has a default, so a missing file still yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use rust_ljm::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Device: {} over {}", config.device.device_type, config.device.connection_type);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::device::{ConnectionType, DeviceType};
use crate::error::{AppResult, LjmError};
use crate::manifest::ConfigManifest;
use crate::stream::{
    AnalogInputSettings, StreamSettings, TriggerEdge, TriggerMode, TriggerSettings,
    DEFAULT_SAMPLING_RATE_HZ, DEFAULT_TRIGGER_CHANNEL,
};
use crate::tracing_setup::OutputFormat;

/// Configuration file read by [`AppConfig::load`].
pub const DEFAULT_CONFIG_PATH: &str = "config/rust_ljm.toml";

/// Prefix of environment variables merged over the file.
pub const ENV_PREFIX: &str = "RUST_LJM_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Startup-configuration manifest
    #[serde(default)]
    pub manifest: ManifestConfig,
    /// Device to open
    #[serde(default)]
    pub device: DeviceConfig,
    /// Stream acquisition defaults
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Manifest location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Manifest file; the bundled manifest when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Device selection, as passed to `LJM_OpenS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// ANY, T4, T7, T8 or DIGIT
    #[serde(default = "default_any")]
    pub device_type: String,
    /// ANY, USB, ETHERNET or WIFI
    #[serde(default = "default_any")]
    pub connection_type: String,
    /// Serial number, IP address, name or ANY
    #[serde(default = "default_any")]
    pub identifier: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: default_any(),
            connection_type: default_any(),
            identifier: default_any(),
        }
    }
}

/// Stream acquisition defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Channels in scan order
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    /// Duration in seconds
    #[serde(default = "default_duration")]
    pub duration_s: f64,
    /// Total sampling rate over all channels (Hz)
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate_hz: f64,
    /// Scans per read; whole duration at once when unset
    #[serde(default)]
    pub scans_per_read: Option<usize>,
    /// Analog input front-end
    #[serde(default)]
    pub analog_inputs: AnalogInputSettings,
    /// Triggered start
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            duration_s: default_duration(),
            sampling_rate_hz: default_sampling_rate(),
            scans_per_read: None,
            analog_inputs: AnalogInputSettings::default(),
            trigger: None,
        }
    }
}

/// Trigger settings in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger line
    #[serde(default = "default_trigger_channel")]
    pub channel: String,
    /// frequency_in, pulse_width_in or conditional_reset
    #[serde(default)]
    pub mode: TriggerMode,
    /// rising or falling
    #[serde(default)]
    pub edge: TriggerEdge,
    /// Receive timeout in milliseconds; waits indefinitely when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            channel: default_trigger_channel(),
            mode: TriggerMode::default(),
            edge: TriggerEdge::default(),
            timeout_ms: None,
        }
    }
}

impl From<&TriggerConfig> for TriggerSettings {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            mode: config.mode,
            edge: config.edge,
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "rust-ljm".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_any() -> String {
    "ANY".to_string()
}

fn default_channels() -> Vec<String> {
    StreamSettings::default().channels
}

fn default_duration() -> f64 {
    1.0
}

fn default_sampling_rate() -> f64 {
    DEFAULT_SAMPLING_RATE_HZ
}

fn default_trigger_channel() -> String {
    DEFAULT_TRIGGER_CHANNEL.to_string()
}

impl AppConfig {
    /// Load configuration from `config/rust_ljm.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `RUST_LJM_`.
    /// Example: `RUST_LJM_DEVICE__IDENTIFIER=192.168.1.120`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider chain behind [`load_from`](Self::load_from).
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(LjmError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.application
            .log_format
            .parse::<OutputFormat>()
            .map_err(LjmError::Configuration)?;

        self.device_type()?;
        self.connection_type()?;
        if self.device.identifier.trim().is_empty() {
            return Err(LjmError::Configuration(
                "Device identifier must not be empty".to_string(),
            ));
        }

        self.stream_settings()
            .validate()
            .map_err(|err| LjmError::Configuration(format!("Invalid stream settings: {err}")))
    }

    /// Configured device type.
    pub fn device_type(&self) -> AppResult<DeviceType> {
        self.device
            .device_type
            .parse::<DeviceType>()
            .map_err(|err: LjmError| LjmError::Configuration(err.to_string()))
    }

    /// Configured connection type.
    pub fn connection_type(&self) -> AppResult<ConnectionType> {
        self.device
            .connection_type
            .parse::<ConnectionType>()
            .map_err(|err: LjmError| LjmError::Configuration(err.to_string()))
    }

    /// Stream settings built from the `stream` section.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            channels: self.stream.channels.clone(),
            duration_s: self.stream.duration_s,
            sampling_rate_hz: self.stream.sampling_rate_hz,
            scans_per_read: self.stream.scans_per_read,
            trigger: self.stream.trigger.as_ref().map(TriggerSettings::from),
            analog_inputs: self.stream.analog_inputs,
        }
    }

    /// Effective configuration as TOML, in the layout of the configuration file.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|err| LjmError::Configuration(format!("Failed to serialize configuration: {err}")))
    }

    /// The configured manifest, or the bundled one when no path is set.
    pub fn load_manifest(&self) -> AppResult<ConfigManifest> {
        let manifest = match &self.manifest.path {
            Some(path) => ConfigManifest::load(path)?,
            None => ConfigManifest::builtin()?,
        };
        Ok(manifest)
    }
}
