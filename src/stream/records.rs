//! Per-channel stream records.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::plan::StreamPlan;
use super::trigger::TriggerSettings;

/// Samples of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRecord {
    /// Channel name
    pub name: String,
    /// Measured values; skipped samples are NaN
    pub values: Vec<f64>,
    /// Sample times from stream start (s)
    pub times: Vec<f64>,
}

impl ChannelRecord {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no sample was recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean over the non-NaN samples.
    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .values
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        (count > 0).then(|| sum / count as f64)
    }
}

/// Split interleaved stream data into one record per channel.
///
/// Sample `i` of the interleaved data belongs to channel `i % n` and was taken
/// `i / sampling_rate_hz` seconds after the stream started.
pub fn deinterleave(data: &[f64], channels: &[String], sampling_rate_hz: f64) -> Vec<ChannelRecord> {
    let n = channels.len();
    channels
        .iter()
        .enumerate()
        .map(|(position, name)| {
            let indices = (position..data.len()).step_by(n.max(1));
            let (values, times) = indices
                .map(|i| (data[i], i as f64 / sampling_rate_hz))
                .unzip();
            ChannelRecord {
                name: name.clone(),
                values,
                times,
            }
        })
        .collect()
}

/// Bookkeeping for one successful `eStreamRead`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadSummary {
    /// Read index, from 0
    pub index: usize,
    /// When the read returned
    pub returned_at: DateTime<Utc>,
    /// Samples in the read
    pub samples: usize,
    /// Skipped samples in the read
    pub skipped: usize,
    /// Scans left in the device buffer
    pub device_scan_backlog: i32,
    /// Scans left in the LJM buffer
    pub ljm_scan_backlog: i32,
}

/// Result of a stream acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRecording {
    /// Plan the stream ran with
    pub plan: StreamPlan,
    /// Scan rate reported by the device at start (Hz)
    pub actual_scan_rate_hz: f64,
    /// Trigger, when the stream was triggered
    #[serde(skip)]
    pub trigger: Option<TriggerSettings>,
    /// One record per channel, in scan order
    pub records: Vec<ChannelRecord>,
    /// Per-read bookkeeping
    pub reads: Vec<ReadSummary>,
    /// Samples the device skipped (now NaN)
    pub skipped_samples: usize,
    /// Samples received over all channels
    pub samples: usize,
    /// Full scans received
    pub scans: usize,
    /// Reads that returned no scans and were retried
    pub empty_reads: usize,
    /// When the stream started
    pub started_at: DateTime<Utc>,
    /// Time from start to stop
    #[serde(skip)]
    pub elapsed: Duration,
}

impl StreamRecording {
    /// Record of channel `name`.
    pub fn record(&self, name: &str) -> Option<&ChannelRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Whether the stream waited for a trigger.
    pub fn is_triggered(&self) -> bool {
        self.trigger.is_some()
    }
}

impl fmt::Display for StreamRecording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LabJack streamed read data:")?;
        writeln!(f, "\trecords =")?;
        for record in &self.records {
            let mean = record
                .mean()
                .map_or_else(|| "n/a".to_string(), |m| format!("{m:.6}"));
            writeln!(
                f,
                "\t\t{}: {} samples, mean = {mean}",
                record.name,
                record.len()
            )?;
        }
        writeln!(f, "\tduration = {} s", self.plan.duration_s)?;
        writeln!(
            f,
            "\tsampling rate = {} total samples/s, {} samples/s/channel",
            self.plan.sampling_rate_hz, self.plan.scan_rate_hz
        )?;
        writeln!(
            f,
            "\tsamples = {} total, {} scans, {} skipped",
            self.samples, self.scans, self.skipped_samples
        )?;
        write!(f, "\ttriggered = {}", self.is_triggered())?;
        if let Some(trigger) = &self.trigger {
            write!(
                f,
                "\n\t\ttrigger channel = {}\n\t\ttrigger mode = {:?}\n\t\ttrigger edge = {:?}",
                trigger.channel, trigger.mode, trigger.edge
            )?;
        }
        Ok(())
    }
}
