//! Stream settings and the acquisition plan derived from them.

use serde::{Deserialize, Serialize};

use crate::constants::GND;
use crate::device::DEFAULT_AIN_RANGE;
use crate::error::{AppResult, LjmError};

use super::trigger::TriggerSettings;

/// Default total sampling rate over all channels (Hz).
pub const DEFAULT_SAMPLING_RATE_HZ: f64 = 100e3;

/// Analog input front-end written before streaming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogInputSettings {
    /// Negative channel for every input; `199` (GND) is single-ended
    pub negative_channel: i64,
    /// Input range (±V)
    pub range: f64,
}

impl Default for AnalogInputSettings {
    fn default() -> Self {
        Self {
            negative_channel: GND,
            range: DEFAULT_AIN_RANGE,
        }
    }
}

/// What to stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Channel names in scan order, e.g. `AIN0`
    pub channels: Vec<String>,
    /// Requested duration (s)
    pub duration_s: f64,
    /// Total sampling rate over all channels (Hz)
    pub sampling_rate_hz: f64,
    /// Scans per `eStreamRead`; `None` reads the whole duration at once
    pub scans_per_read: Option<usize>,
    /// Triggered start, when set
    pub trigger: Option<TriggerSettings>,
    /// Analog input front-end
    pub analog_inputs: AnalogInputSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channels: vec!["AIN0".into(), "AIN1".into(), "AIN2".into()],
            duration_s: 1.0,
            sampling_rate_hz: DEFAULT_SAMPLING_RATE_HZ,
            scans_per_read: None,
            trigger: None,
            analog_inputs: AnalogInputSettings::default(),
        }
    }
}

impl StreamSettings {
    /// Settings for `channels` with every other field at its default.
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the duration in seconds.
    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = duration_s;
        self
    }

    /// Set the total sampling rate in Hz.
    pub fn with_sampling_rate(mut self, sampling_rate_hz: f64) -> Self {
        self.sampling_rate_hz = sampling_rate_hz;
        self
    }

    /// Set the scans per read.
    pub fn with_scans_per_read(mut self, scans_per_read: usize) -> Self {
        self.scans_per_read = Some(scans_per_read);
        self
    }

    /// Wait for a trigger before streaming.
    pub fn with_trigger(mut self, trigger: TriggerSettings) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Set the analog input front-end.
    pub fn with_analog_inputs(mut self, analog_inputs: AnalogInputSettings) -> Self {
        self.analog_inputs = analog_inputs;
        self
    }

    /// Check the settings before any device call.
    pub fn validate(&self) -> AppResult<()> {
        if self.channels.is_empty() {
            return Err(LjmError::InvalidArgument(
                "At least one scan channel is required".to_string(),
            ));
        }
        if let Some(name) = self.channels.iter().find(|name| name.trim().is_empty()) {
            return Err(LjmError::InvalidArgument(format!(
                "Invalid scan channel name '{name}'"
            )));
        }
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(LjmError::InvalidArgument(format!(
                "Invalid sampling rate: {} Hz",
                self.sampling_rate_hz
            )));
        }
        if !(self.duration_s.is_finite() && self.duration_s > 0.0) {
            return Err(LjmError::InvalidArgument(format!(
                "Invalid stream duration: {} s",
                self.duration_s
            )));
        }
        if self.scans_per_read == Some(0) {
            return Err(LjmError::InvalidArgument(
                "scans_per_read must be greater than 0".to_string(),
            ));
        }
        if let Some(trigger) = &self.trigger {
            trigger.validate()?;
        }
        Ok(())
    }
}

/// Sample, scan and read counts for one acquisition.
///
/// The sample count is rounded up so that the last scan holds every channel; the effective
/// duration is adjusted to match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamPlan {
    /// Channels per scan
    pub num_channels: usize,
    /// Total sampling rate (Hz)
    pub sampling_rate_hz: f64,
    /// Per-channel scan rate (Hz)
    pub scan_rate_hz: f64,
    /// Duration that was asked for (s)
    pub requested_duration_s: f64,
    /// Effective duration (s)
    pub duration_s: f64,
    /// Samples over all channels
    pub num_samples: usize,
    /// Scans
    pub num_scans: usize,
    /// Scans per `eStreamRead`
    pub scans_per_read: usize,
    /// Number of `eStreamRead` calls
    pub num_reads: usize,
}

impl StreamPlan {
    /// Derive the plan from validated settings.
    pub fn new(settings: &StreamSettings) -> AppResult<Self> {
        settings.validate()?;

        let num_channels = settings.channels.len();
        let sampling_rate_hz = settings.sampling_rate_hz;
        let scan_rate_hz = sampling_rate_hz / num_channels as f64;

        let too_many = || {
            LjmError::InvalidArgument(format!(
                "Stream of {} s at {} Hz has too many samples",
                settings.duration_s, sampling_rate_hz
            ))
        };
        let requested = (sampling_rate_hz * settings.duration_s).ceil();
        if !requested.is_finite() || requested >= usize::MAX as f64 {
            return Err(too_many());
        }
        let requested_samples = requested as usize;
        let num_scans = requested_samples.div_ceil(num_channels).max(1);
        let num_samples = num_scans.checked_mul(num_channels).ok_or_else(too_many)?;
        let duration_s = num_scans as f64 / scan_rate_hz;

        let scans_per_read = settings
            .scans_per_read
            .unwrap_or_else(|| (scan_rate_hz * settings.duration_s).floor() as usize)
            .max(1);
        let num_reads = num_scans.div_ceil(scans_per_read);

        Ok(Self {
            num_channels,
            sampling_rate_hz,
            scan_rate_hz,
            requested_duration_s: settings.duration_s,
            duration_s,
            num_samples,
            num_scans,
            scans_per_read,
            num_reads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_channels_at_default_rate() {
        let plan = StreamPlan::new(&StreamSettings::default()).unwrap();
        assert_eq!(plan.num_channels, 3);
        assert!((plan.scan_rate_hz - 100e3 / 3.0).abs() < 1e-9);
        // 100000 samples round up to 33334 full scans
        assert_eq!(plan.num_scans, 33_334);
        assert_eq!(plan.num_samples, 100_002);
        assert!((plan.duration_s - 33_334.0 / (100e3 / 3.0)).abs() < 1e-12);
        assert_eq!(plan.scans_per_read, 33_333);
        assert_eq!(plan.num_reads, 2);
    }

    #[test]
    fn explicit_scans_per_read() {
        let settings = StreamSettings::new(["AIN0", "AIN1"])
            .with_sampling_rate(1000.0)
            .with_duration(0.5)
            .with_scans_per_read(100);
        let plan = StreamPlan::new(&settings).unwrap();
        assert_eq!(plan.num_scans, 250);
        assert_eq!(plan.num_reads, 3);
    }

    #[test]
    fn tiny_duration_still_reads_once() {
        let settings = StreamSettings::new(["AIN0", "AIN1", "AIN2", "AIN3"])
            .with_sampling_rate(10.0)
            .with_duration(0.01);
        let plan = StreamPlan::new(&settings).unwrap();
        assert_eq!(plan.num_scans, 1);
        assert_eq!(plan.num_samples, 4);
        assert_eq!(plan.scans_per_read, 1);
        assert_eq!(plan.num_reads, 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let none: [&str; 0] = [];
        assert!(StreamPlan::new(&StreamSettings::new(none)).is_err());
        assert!(StreamPlan::new(&StreamSettings::default().with_sampling_rate(0.0)).is_err());
        assert!(StreamPlan::new(&StreamSettings::default().with_duration(-1.0)).is_err());
        assert!(StreamPlan::new(&StreamSettings::default().with_scans_per_read(0)).is_err());
    }

    #[test]
    fn huge_sample_count_is_rejected() {
        let settings = StreamSettings::new(["AIN0", "AIN1"])
            .with_sampling_rate(1e20)
            .with_duration(1.0);
        let err = StreamPlan::new(&settings).unwrap_err();
        assert!(matches!(err, LjmError::InvalidArgument(_)));
        assert!(err.to_string().contains("too many samples"));

        let settings = StreamSettings::new(["AIN0"])
            .with_sampling_rate(f64::MAX)
            .with_duration(10.0);
        assert!(StreamPlan::new(&settings).is_err());
    }
}
