//! Triggered stream start.
//!
//! A triggered stream waits for an edge on a digital line before the first scan. The line's
//! extended feature (EF) is configured to one of the trigger modes and its address is written
//! to `STREAM_TRIGGER_INDEX`.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::backend::ConfigValue;
use crate::constants::{
    LJM_STREAM_RECEIVE_TIMEOUT_MS, LJM_STREAM_SCANS_RETURN, LJM_STREAM_SCANS_RETURN_ALL,
};
use crate::error::{AppResult, LjmError};

/// Register holding the address of the trigger line.
pub const STREAM_TRIGGER_INDEX: &str = "STREAM_TRIGGER_INDEX";

/// Default trigger line.
pub const DEFAULT_TRIGGER_CHANNEL: &str = "DIO0";

/// Extended feature used to detect the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Frequency measurement
    FrequencyIn,
    /// Pulse width measurement
    PulseWidthIn,
    /// Conditional reset
    #[default]
    ConditionalReset,
}

impl TriggerMode {
    /// Base EF index of the mode.
    pub fn ef_index(self) -> i64 {
        match self {
            Self::FrequencyIn => 3,
            Self::PulseWidthIn => 5,
            Self::ConditionalReset => 12,
        }
    }
}

/// Edge that fires the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    /// High to low
    Falling,
    /// Low to high
    #[default]
    Rising,
}

impl TriggerEdge {
    /// Value written to `EF_CONFIG_A` in conditional reset mode.
    pub fn config_value(self) -> i64 {
        match self {
            Self::Falling => 0,
            Self::Rising => 1,
        }
    }
}

/// Trigger configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSettings {
    /// Trigger line, e.g. `DIO0`
    pub channel: String,
    /// EF mode
    pub mode: TriggerMode,
    /// Edge
    pub edge: TriggerEdge,
    /// How long a read waits for data; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_TRIGGER_CHANNEL.to_string(),
            mode: TriggerMode::default(),
            edge: TriggerEdge::default(),
            timeout: None,
        }
    }
}

impl TriggerSettings {
    /// Trigger on `channel` with default mode and edge.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Set the EF mode.
    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the edge.
    pub fn with_edge(mut self, edge: TriggerEdge) -> Self {
        self.edge = edge;
        self
    }

    /// Set the receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reject an empty channel name or a zero timeout.
    pub fn validate(&self) -> AppResult<()> {
        if self.channel.trim().is_empty() {
            return Err(LjmError::InvalidArgument(
                "Trigger channel name is empty".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(LjmError::InvalidArgument(
                "Trigger timeout should be bigger than 0, or unset to wait indefinitely".to_string(),
            ));
        }
        Ok(())
    }

    /// Receive timeout in milliseconds; `0` waits indefinitely.
    pub fn timeout_ms(&self) -> f64 {
        self.timeout.map_or(0.0, |t| t.as_secs_f64() * 1000.0)
    }

    /// EF index for the mode and edge. Frequency-in on the falling edge is one above rising.
    pub fn ef_index(&self) -> i64 {
        match (self.mode, self.edge) {
            (TriggerMode::FrequencyIn, TriggerEdge::Falling) => self.mode.ef_index() + 1,
            (mode, _) => mode.ef_index(),
        }
    }

    /// Library configurations for a triggered stream.
    pub fn library_batch(&self) -> Vec<(String, ConfigValue)> {
        vec![
            (
                LJM_STREAM_SCANS_RETURN.to_string(),
                ConfigValue::from(LJM_STREAM_SCANS_RETURN_ALL),
            ),
            (
                LJM_STREAM_RECEIVE_TIMEOUT_MS.to_string(),
                ConfigValue::Number(self.timeout_ms()),
            ),
        ]
    }

    /// Clears previous EF settings on the trigger line.
    pub fn disable_batch(&self) -> Vec<(String, ConfigValue)> {
        vec![(self.register("EF_ENABLE"), ConfigValue::from(0))]
    }

    /// Trigger index and EF configuration, given the Modbus address of the trigger line.
    pub fn configure_batch(&self, address: i32) -> Vec<(String, ConfigValue)> {
        let mut batch = vec![
            (STREAM_TRIGGER_INDEX.to_string(), ConfigValue::from(address)),
            (self.register("EF_INDEX"), ConfigValue::from(self.ef_index())),
        ];
        if self.mode == TriggerMode::ConditionalReset {
            batch.push((
                self.register("EF_CONFIG_A"),
                ConfigValue::from(self.edge.config_value()),
            ));
        }
        batch
    }

    /// Enables the EF on the trigger line.
    pub fn enable_batch(&self) -> Vec<(String, ConfigValue)> {
        vec![(self.register("EF_ENABLE"), ConfigValue::from(1))]
    }

    fn register(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.channel)
    }
}
