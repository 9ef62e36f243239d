//! Stream acquisition loop.
//!
//! The calling thread issues blocking `eStreamRead` calls and forwards every read over an
//! unbounded channel to a stacking worker thread. The worker counts skipped samples, replaces
//! them with NaN and appends the data. The stream is stopped after the read loop whether it
//! succeeded or not; the worker is then drained and joined before per-channel records are built.

use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::backend::{Handle, StreamReadResult};
use crate::constants::DUMMY_VALUE;
use crate::device::LabJackDevice;
use crate::error::{AppResult, LjmError};

use super::plan::{StreamPlan, StreamSettings};
use super::records::{deinterleave, ReadSummary, StreamRecording};

/// Stream registers reset before every acquisition.
const STREAM_REGISTERS: [(&str, i32); 4] = [
    // Triggered stream disabled until a trigger is configured
    ("STREAM_TRIGGER_INDEX", 0),
    // Internally clocked
    ("STREAM_CLOCK_SOURCE", 0),
    ("STREAM_SETTLING_US", 0),
    ("STREAM_RESOLUTION_INDEX", 0),
];

struct ReadMessage {
    index: usize,
    returned_at: DateTime<Utc>,
    result: StreamReadResult,
}

#[derive(Default)]
struct Stacker {
    num_channels: usize,
    data: Vec<f64>,
    reads: Vec<ReadSummary>,
    skipped: usize,
    samples: usize,
    scans: usize,
}

impl Stacker {
    fn stack(&mut self, message: ReadMessage) {
        let ReadMessage {
            index,
            returned_at,
            result,
        } = message;

        let mut skipped = 0;
        let samples = result.data.len();
        self.data.extend(result.data.into_iter().map(|value| {
            if value == DUMMY_VALUE {
                skipped += 1;
                f64::NAN
            } else {
                value
            }
        }));
        self.skipped += skipped;
        self.samples += samples;
        self.scans += samples / self.num_channels.max(1);

        debug!(
            read = index + 1,
            skipped,
            device_backlog = result.device_scan_backlog,
            ljm_backlog = result.ljm_scan_backlog,
            "Stacked stream read"
        );
        self.reads.push(ReadSummary {
            index,
            returned_at,
            samples,
            skipped,
            device_scan_backlog: result.device_scan_backlog,
            ljm_scan_backlog: result.ljm_scan_backlog,
        });
    }
}

/// One configured stream acquisition on an open device.
#[derive(Debug)]
pub struct StreamIn<'a> {
    device: &'a LabJackDevice,
    settings: StreamSettings,
    plan: StreamPlan,
}

impl<'a> StreamIn<'a> {
    /// Validate `settings` and derive the plan. No device call is made.
    pub fn new(device: &'a LabJackDevice, settings: StreamSettings) -> AppResult<Self> {
        let plan = StreamPlan::new(&settings)?;
        Ok(Self {
            device,
            settings,
            plan,
        })
    }

    /// Configure, trigger if requested, stream and collect the result.
    pub fn acquire(device: &'a LabJackDevice, settings: StreamSettings) -> AppResult<StreamRecording> {
        let stream = Self::new(device, settings)?;
        stream.configure()?;
        if stream.settings.trigger.is_some() {
            stream.configure_trigger()?;
        }
        stream.run()
    }

    /// The derived plan.
    pub fn plan(&self) -> &StreamPlan {
        &self.plan
    }

    /// Write the analog input front-end and reset the stream registers.
    pub fn configure(&self) -> AppResult<()> {
        let started = Instant::now();
        let inputs = self.settings.analog_inputs;
        self.device
            .configure_analog_inputs(Some(inputs.negative_channel), Some(inputs.range))?;
        self.device.configure_register(STREAM_REGISTERS)?;
        info!(
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Configured LabJack for streaming"
        );
        Ok(())
    }

    /// Configure the trigger line. Does nothing for an untriggered stream.
    pub fn configure_trigger(&self) -> AppResult<()> {
        let Some(trigger) = &self.settings.trigger else {
            return Ok(());
        };
        let started = Instant::now();

        self.device.configure_library(trigger.library_batch())?;
        self.device.configure_register(trigger.disable_batch())?;
        let address = self
            .device
            .backend()
            .name_to_address(&trigger.channel)
            .map_err(LjmError::RegisterConfiguration)?;
        self.device.configure_register(trigger.configure_batch(address))?;
        self.device.configure_register(trigger.enable_batch())?;

        info!(
            channel = %trigger.channel,
            mode = ?trigger.mode,
            edge = ?trigger.edge,
            timeout_ms = trigger.timeout_ms(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Configured LabJack trigger"
        );
        Ok(())
    }

    /// Start the stream, read `num_reads` times and stop.
    pub fn run(self) -> AppResult<StreamRecording> {
        let handle = self.device.handle()?;
        let backend = self.device.backend().clone();
        let plan = self.plan;

        let addresses = backend
            .names_to_addresses(&self.settings.channels)
            .map_err(LjmError::StreamRead)?;

        // The stacker exists before the stream does, so every started stream reaches the stop
        let (tx, mut rx) = mpsc::unbounded_channel::<ReadMessage>();
        let num_channels = plan.num_channels;
        let worker = thread::Builder::new()
            .name("ljm-stream-stacker".into())
            .spawn(move || {
                let mut stacker = Stacker {
                    num_channels,
                    ..Stacker::default()
                };
                while let Some(message) = rx.blocking_recv() {
                    stacker.stack(message);
                }
                stacker
            })?;

        let actual_scan_rate_hz =
            match backend.e_stream_start(handle, plan.scans_per_read, &addresses, plan.scan_rate_hz) {
                Ok(rate) => rate,
                Err(err) => {
                    drop(tx);
                    let _ = worker.join();
                    return Err(LjmError::StreamRead(err));
                }
            };
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            channels = ?self.settings.channels,
            scan_rate_hz = actual_scan_rate_hz,
            scans_per_read = plan.scans_per_read,
            num_reads = plan.num_reads,
            "Stream started"
        );
        if self.settings.trigger.is_some() {
            info!("Waiting for trigger");
        }

        let read_outcome = read_loop(self.device, handle, plan.num_reads, &tx);
        drop(tx);

        info!("Stopping stream");
        let stop_outcome = backend.e_stream_stop(handle).map_err(LjmError::StreamRead);
        let elapsed = started.elapsed();

        let stacker = worker
            .join()
            .map_err(|_| LjmError::StreamWorker("stacking thread panicked".to_string()))?;

        let empty_reads = match (read_outcome, stop_outcome) {
            (Ok(empty_reads), Ok(())) => empty_reads,
            (Err(err), stop) => {
                if let Err(stop_err) = stop {
                    warn!(error = %stop_err, "Stream stop failed after read error");
                }
                error!(error = %err, "Stream read failed");
                return Err(err);
            }
            (Ok(_), Err(err)) => {
                error!(error = %err, "Stream stop failed");
                return Err(err);
            }
        };

        info!(
            samples = stacker.samples,
            scans = stacker.scans,
            skipped = stacker.skipped,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Stream stopped"
        );

        let records = deinterleave(&stacker.data, &self.settings.channels, plan.sampling_rate_hz);
        Ok(StreamRecording {
            plan,
            actual_scan_rate_hz,
            trigger: self.settings.trigger,
            records,
            reads: stacker.reads,
            skipped_samples: stacker.skipped,
            samples: stacker.samples,
            scans: stacker.scans,
            empty_reads,
            started_at,
            elapsed,
        })
    }
}

/// Read until `num_reads` reads returned data. Returns the number of empty reads retried.
fn read_loop(
    device: &LabJackDevice,
    handle: Handle,
    num_reads: usize,
    tx: &mpsc::UnboundedSender<ReadMessage>,
) -> AppResult<usize> {
    let backend = device.backend();
    let mut empty_reads = 0;
    let mut index = 0;
    while index < num_reads {
        let result = match backend.e_stream_read(handle) {
            Ok(result) => result,
            Err(err) if err.is_no_scans_returned() => {
                empty_reads += 1;
                trace!(empty_reads, "No scans returned yet");
                continue;
            }
            Err(err) => return Err(LjmError::StreamRead(err)),
        };
        let message = ReadMessage {
            index,
            returned_at: Utc::now(),
            result,
        };
        tx.send(message)
            .map_err(|_| LjmError::StreamWorker("stacking thread stopped receiving".to_string()))?;
        index += 1;
    }
    Ok(empty_reads)
}

impl LabJackDevice {
    /// Stream `settings.channels` and return the per-channel records.
    pub fn stream_in(&self, settings: StreamSettings) -> AppResult<StreamRecording> {
        StreamIn::acquire(self, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::ConfigValue;
    use crate::device::{ConnectionType, DeviceType};
    use crate::mock::MockLjm;
    use crate::stream::TriggerSettings;
    use tracing_test::traced_test;

    fn device(mock: &Arc<MockLjm>) -> LabJackDevice {
        LabJackDevice::open(mock.clone(), DeviceType::T7, ConnectionType::Usb, "ANY").unwrap()
    }

    #[test]
    fn untriggered_stream_collects_every_read() {
        let mock = Arc::new(MockLjm::new());
        let device = device(&mock);
        let settings = StreamSettings::new(["AIN0", "AIN1"])
            .with_sampling_rate(200.0)
            .with_duration(1.0)
            .with_scans_per_read(25);

        let recording = device.stream_in(settings).unwrap();
        assert_eq!(recording.plan.num_reads, 4);
        assert_eq!(recording.reads.len(), 4);
        assert_eq!(recording.samples, 200);
        assert_eq!(recording.scans, 100);
        assert_eq!(recording.record("AIN1").unwrap().values[0], 1.0);
        assert_eq!(mock.stream_stop_count(), 1);

        let start = mock.last_stream_start().unwrap();
        assert_eq!(start.addresses, vec![0, 2]);
        assert_eq!(start.scans_per_read, 25);
        assert_eq!(start.scan_rate, 100.0);
    }

    #[test]
    fn configure_writes_stream_registers() {
        let mock = Arc::new(MockLjm::new());
        let device = device(&mock);
        let stream = StreamIn::new(&device, StreamSettings::default()).unwrap();
        stream.configure().unwrap();
        let names: Vec<String> = mock.register_writes().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "AIN_ALL_NEGATIVE_CH",
                "AIN_ALL_RANGE",
                "STREAM_TRIGGER_INDEX",
                "STREAM_CLOCK_SOURCE",
                "STREAM_SETTLING_US",
                "STREAM_RESOLUTION_INDEX",
            ]
        );
    }

    #[test]
    fn trigger_registers_use_line_address() {
        let mock = Arc::new(MockLjm::new());
        let device = device(&mock);
        let settings = StreamSettings::new(["AIN0"])
            .with_sampling_rate(100.0)
            .with_duration(0.1)
            .with_trigger(TriggerSettings::new("DIO2"));
        device.stream_in(settings).unwrap();

        let writes = mock.register_writes();
        let trigger_index: Vec<&ConfigValue> = writes
            .iter()
            .filter(|(name, _)| name == "STREAM_TRIGGER_INDEX")
            .map(|(_, value)| value)
            .collect();
        // Reset to 0, then the DIO2 address
        assert_eq!(
            trigger_index,
            [&ConfigValue::Number(0.0), &ConfigValue::Number(2002.0)]
        );
        assert_eq!(writes.last().unwrap().0, "DIO2_EF_ENABLE");
        assert_eq!(mock.library_writes().len(), 2);
    }

    #[test]
    fn skipped_samples_become_nan() {
        let mock = Arc::new(MockLjm::new().with_skip_every(10).with_no_scans_reads(2));
        let device = device(&mock);
        let settings = StreamSettings::new(["AIN0", "AIN1"])
            .with_sampling_rate(100.0)
            .with_duration(1.0);
        let recording = device.stream_in(settings).unwrap();
        assert_eq!(recording.skipped_samples, 10);
        assert_eq!(recording.empty_reads, 2);
        assert!(recording.record("AIN1").unwrap().values[4].is_nan());
    }

    #[test]
    #[traced_test]
    fn read_failure_still_stops_stream() {
        let mock = Arc::new(MockLjm::new().with_buffer_overflow_at(1));
        let device = device(&mock);
        let settings = StreamSettings::new(["AIN0"])
            .with_sampling_rate(100.0)
            .with_duration(1.0)
            .with_scans_per_read(10);
        let err = device.stream_in(settings).unwrap_err();
        assert!(matches!(err, LjmError::StreamRead(_)));
        assert_eq!(mock.stream_stop_count(), 1);
        assert!(logs_contain("Stream read failed"));
    }

    #[test]
    #[traced_test]
    fn stop_failure_after_full_read_is_reported() {
        let mock = Arc::new(MockLjm::new().with_stop_failure(1301));
        let device = device(&mock);
        let settings = StreamSettings::new(["AIN0"])
            .with_sampling_rate(100.0)
            .with_duration(0.5)
            .with_scans_per_read(10);
        let err = device.stream_in(settings).unwrap_err();
        assert!(matches!(err, LjmError::StreamRead(_)));
        assert_eq!(err.ljm_code(), Some(1301));
        assert_eq!(mock.read_count(), 5);
        assert_eq!(mock.stream_stop_count(), 1);
        assert!(logs_contain("Stream stop failed"));
    }

    #[test]
    fn start_failure_leaves_nothing_to_stop() {
        let mock = Arc::new(MockLjm::new().with_start_failure(2620));
        let device = device(&mock);
        let settings = StreamSettings::new(["AIN0", "AIN1"])
            .with_sampling_rate(100.0)
            .with_duration(0.5);
        let err = device.stream_in(settings).unwrap_err();
        assert!(matches!(err, LjmError::StreamRead(_)));
        assert_eq!(err.ljm_code(), Some(2620));
        assert!(mock.last_stream_start().is_none());
        assert_eq!(mock.read_count(), 0);
        assert_eq!(mock.stream_stop_count(), 0);
    }
}
