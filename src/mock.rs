//! Simulated LJM library with one attached T-series device.
//!
//! `MockLjm` implements [`LjmBackend`] without hardware. It records every library
//! configuration and register write so tests can assert on them, and synthesises
//! stream data:
//!
//! - sample value = channel position + 0.001 × (scan index mod 100), plus optional noise
//! - every `k`-th sample can be replaced by the LJM dummy value (`-9999.0`)
//! - the first `n` reads can return `LJME_NO_SCANS_RETURNED`
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rust_ljm::MockLjm;
//!
//! let backend = Arc::new(MockLjm::new().with_serial_number(470_000_001).with_skip_every(50));
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use crate::backend::{ConfigValue, Handle, HandleInfo, LjmBackend, LjmCallError, StreamReadResult};
use crate::constants::{
    error_name, DUMMY_VALUE, LJME_DEVICE_NOT_FOUND, LJME_INVALID_HANDLE, LJME_INVALID_NAME,
    LJME_LJM_BUFFER_FULL, LJME_NO_SCANS_RETURNED,
};

fn call_error(function: &'static str, code: i32) -> LjmCallError {
    LjmCallError::new(function, code, error_name(code))
}

/// Parameters of the last `eStreamStart` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStart {
    /// Scan list addresses
    pub addresses: Vec<i32>,
    /// Requested scan rate (Hz)
    pub scan_rate: f64,
    /// Scans returned per read
    pub scans_per_read: usize,
}

#[derive(Debug, Default)]
struct ActiveStream {
    handle: Handle,
    start: Option<StreamStart>,
    next_scan: u64,
    next_sample: u64,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: Handle,
    open_handles: Vec<Handle>,
    opened: HashMap<Handle, (i32, i32)>,
    library_writes: Vec<(String, ConfigValue)>,
    library_values: HashMap<String, f64>,
    register_writes: Vec<(String, ConfigValue)>,
    stream: Option<ActiveStream>,
    last_start: Option<StreamStart>,
    reads: usize,
    no_scans_left: usize,
    stream_stops: usize,
}

/// Simulated LJM library.
#[derive(Debug)]
pub struct MockLjm {
    serial_number: i32,
    ip_address: Ipv4Addr,
    open_error: Option<i32>,
    no_scans_reads: usize,
    skip_every: Option<u64>,
    fail_read: Option<(usize, i32)>,
    start_error: Option<i32>,
    stop_error: Option<i32>,
    noise: f64,
    failing_registers: Vec<String>,
    failing_library: Vec<String>,
    state: Mutex<MockState>,
}

impl Default for MockLjm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLjm {
    /// A T7 with serial number 470010000 at 192.168.1.207.
    pub fn new() -> Self {
        Self {
            serial_number: 470_010_000,
            ip_address: Ipv4Addr::new(192, 168, 1, 207),
            open_error: None,
            no_scans_reads: 0,
            skip_every: None,
            fail_read: None,
            start_error: None,
            stop_error: None,
            noise: 0.0,
            failing_registers: Vec::new(),
            failing_library: Vec::new(),
            state: Mutex::new(MockState {
                next_handle: 1,
                ..MockState::default()
            }),
        }
    }

    /// Serial number reported by the device.
    pub fn with_serial_number(mut self, serial_number: i32) -> Self {
        self.serial_number = serial_number;
        self
    }

    /// IP address reported for Ethernet and WiFi connections.
    pub fn with_ip_address(mut self, ip_address: Ipv4Addr) -> Self {
        self.ip_address = ip_address;
        self
    }

    /// Make `openS` fail with `code`.
    pub fn with_open_error(mut self, code: i32) -> Self {
        self.open_error = Some(code);
        self
    }

    /// Return `LJME_NO_SCANS_RETURNED` from the first `reads` stream reads of each stream.
    pub fn with_no_scans_reads(mut self, reads: usize) -> Self {
        self.no_scans_reads = reads;
        self
    }

    /// Replace every `k`-th sample with the dummy value. `0` disables skipping.
    pub fn with_skip_every(mut self, k: u64) -> Self {
        self.skip_every = (k > 0).then_some(k);
        self
    }

    /// Fail the stream read with index `read` (0-based, counting successful reads) with `code`.
    pub fn with_read_failure(mut self, read: usize, code: i32) -> Self {
        self.fail_read = Some((read, code));
        self
    }

    /// Make `eStreamStart` fail with `code`. No stream is started.
    pub fn with_start_failure(mut self, code: i32) -> Self {
        self.start_error = Some(code);
        self
    }

    /// Make `eStreamStop` fail with `code`. The stream is still torn down and counted.
    pub fn with_stop_failure(mut self, code: i32) -> Self {
        self.stop_error = Some(code);
        self
    }

    /// Fail the stream read with index `read` with `LJME_LJM_BUFFER_FULL`.
    pub fn with_buffer_overflow_at(self, read: usize) -> Self {
        self.with_read_failure(read, LJME_LJM_BUFFER_FULL)
    }

    /// Add uniform noise in `[-amplitude, amplitude]` to every sample.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    /// Reject writes to register `name` with `LJME_INVALID_NAME`.
    pub fn with_failing_register(mut self, name: impl Into<String>) -> Self {
        self.failing_registers.push(name.into());
        self
    }

    /// Reject writes to library configuration `name` with `LJME_INVALID_NAME`.
    pub fn with_failing_library_config(mut self, name: impl Into<String>) -> Self {
        self.failing_library.push(name.into());
        self
    }

    /// Every library configuration write, in order.
    pub fn library_writes(&self) -> Vec<(String, ConfigValue)> {
        self.state.lock().library_writes.clone()
    }

    /// Every register write, in order.
    pub fn register_writes(&self) -> Vec<(String, ConfigValue)> {
        self.state.lock().register_writes.clone()
    }

    /// Number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.state.lock().open_handles.len()
    }

    /// Parameters of the most recent `eStreamStart`.
    pub fn last_stream_start(&self) -> Option<StreamStart> {
        self.state.lock().last_start.clone()
    }

    /// Number of `eStreamStop` calls.
    pub fn stream_stop_count(&self) -> usize {
        self.state.lock().stream_stops
    }

    /// Number of successful stream reads since creation.
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    fn check_handle(state: &MockState, function: &'static str, handle: Handle) -> Result<(), LjmCallError> {
        if state.open_handles.contains(&handle) {
            Ok(())
        } else {
            Err(call_error(function, LJME_INVALID_HANDLE))
        }
    }

    fn sample(&self, channel: usize, scan: u64, sample: u64) -> f64 {
        if let Some(k) = self.skip_every {
            if (sample + 1) % k == 0 {
                return DUMMY_VALUE;
            }
        }
        let mut value = channel as f64 + 0.001 * (scan % 100) as f64;
        if self.noise > 0.0 {
            value += rand::thread_rng().gen_range(-self.noise..=self.noise);
        }
        value
    }
}

fn device_type_code(name: &str) -> Option<i32> {
    match name.to_ascii_uppercase().as_str() {
        "ANY" | "T7" | "LJM_DTT7" => Some(7),
        "T4" | "LJM_DTT4" => Some(4),
        "T8" | "LJM_DTT8" => Some(8),
        "TSERIES" | "LJM_DTTSERIES" => Some(7),
        _ => None,
    }
}

fn connection_type_code(name: &str) -> Option<i32> {
    match name.to_ascii_uppercase().as_str() {
        "ANY" | "USB" | "LJM_CTUSB" => Some(1),
        "ETHERNET" | "TCP" | "LJM_CTETHERNET" => Some(3),
        "WIFI" | "LJM_CTWIFI" => Some(4),
        _ => None,
    }
}

/// Modbus address of a digital or analog I/O line.
fn line_address(name: &str) -> Option<i32> {
    const LINES: [(&str, i32, i32); 6] = [
        ("AIN", 0, 2),
        ("DIO", 2000, 1),
        ("FIO", 2000, 1),
        ("EIO", 2008, 1),
        ("CIO", 2016, 1),
        ("MIO", 2020, 1),
    ];
    LINES.iter().find_map(|&(prefix, base, stride)| {
        let number: i32 = name.strip_prefix(prefix)?.parse().ok()?;
        (0..=254).contains(&number).then_some(base + stride * number)
    })
}

impl LjmBackend for MockLjm {
    fn open_s(
        &self,
        device_type: &str,
        connection_type: &str,
        identifier: &str,
    ) -> Result<Handle, LjmCallError> {
        if let Some(code) = self.open_error {
            return Err(call_error("OpenS", code));
        }
        let (Some(device), Some(connection)) =
            (device_type_code(device_type), connection_type_code(connection_type))
        else {
            return Err(call_error("OpenS", LJME_DEVICE_NOT_FOUND));
        };
        let matches_identifier = identifier.eq_ignore_ascii_case("ANY")
            || identifier == self.serial_number.to_string()
            || (connection != 1 && identifier == self.ip_address.to_string());
        if !matches_identifier {
            return Err(call_error("OpenS", LJME_DEVICE_NOT_FOUND));
        }

        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open_handles.push(handle);
        state.opened.insert(handle, (device, connection));
        debug!(handle, device_type, connection_type, identifier, "Mock device opened");
        Ok(handle)
    }

    fn get_handle_info(&self, handle: Handle) -> Result<HandleInfo, LjmCallError> {
        let state = self.state.lock();
        Self::check_handle(&state, "GetHandleInfo", handle)?;
        let (device_type, connection_type) = state
            .opened
            .get(&handle)
            .copied()
            .ok_or_else(|| call_error("GetHandleInfo", LJME_INVALID_HANDLE))?;
        let usb = connection_type == 1;
        Ok(HandleInfo {
            device_type,
            connection_type,
            serial_number: self.serial_number,
            ip_address: if usb { 0 } else { u32::from(self.ip_address) },
            port: if usb { 0 } else { 502 },
            max_bytes_per_mb: if usb { 64 } else { 1040 },
        })
    }

    fn close(&self, handle: Handle) -> Result<(), LjmCallError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, "Close", handle)?;
        state.open_handles.retain(|&h| h != handle);
        state.opened.remove(&handle);
        if state.stream.as_ref().is_some_and(|s| s.handle == handle) {
            state.stream = None;
        }
        debug!(handle, "Mock device closed");
        Ok(())
    }

    fn write_library_config(&self, name: &str, value: f64) -> Result<(), LjmCallError> {
        if self.failing_library.iter().any(|n| n == name) {
            return Err(call_error("WriteLibraryConfigS", LJME_INVALID_NAME));
        }
        let mut state = self.state.lock();
        state.library_writes.push((name.to_string(), ConfigValue::Number(value)));
        state.library_values.insert(name.to_string(), value);
        Ok(())
    }

    fn write_library_config_string(&self, name: &str, value: &str) -> Result<(), LjmCallError> {
        if self.failing_library.iter().any(|n| n == name) {
            return Err(call_error("WriteLibraryConfigStringS", LJME_INVALID_NAME));
        }
        self.state
            .lock()
            .library_writes
            .push((name.to_string(), ConfigValue::Text(value.to_string())));
        Ok(())
    }

    fn read_library_config(&self, name: &str) -> Result<f64, LjmCallError> {
        let state = self.state.lock();
        state
            .library_values
            .get(name)
            .copied()
            .ok_or_else(|| call_error("ReadLibraryConfigS", LJME_INVALID_NAME))
    }

    fn e_write_names(&self, handle: Handle, writes: &[(String, f64)]) -> Result<(), LjmCallError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, "eWriteNames", handle)?;
        // The device rejects the whole transaction on the first bad name
        if writes
            .iter()
            .any(|(name, _)| self.failing_registers.iter().any(|n| n == name))
        {
            return Err(call_error("eWriteNames", LJME_INVALID_NAME));
        }
        state.register_writes.extend(
            writes
                .iter()
                .map(|(name, value)| (name.clone(), ConfigValue::Number(*value))),
        );
        Ok(())
    }

    fn e_write_name_string(&self, handle: Handle, name: &str, value: &str) -> Result<(), LjmCallError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, "eWriteNameString", handle)?;
        if self.failing_registers.iter().any(|n| n == name) {
            return Err(call_error("eWriteNameString", LJME_INVALID_NAME));
        }
        state
            .register_writes
            .push((name.to_string(), ConfigValue::Text(value.to_string())));
        Ok(())
    }

    fn name_to_address(&self, name: &str) -> Result<i32, LjmCallError> {
        line_address(name).ok_or_else(|| call_error("NameToAddress", LJME_INVALID_NAME))
    }

    fn e_stream_start(
        &self,
        handle: Handle,
        scans_per_read: usize,
        addresses: &[i32],
        scan_rate: f64,
    ) -> Result<f64, LjmCallError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, "eStreamStart", handle)?;
        if let Some(code) = self.start_error {
            return Err(call_error("eStreamStart", code));
        }
        let start = StreamStart {
            addresses: addresses.to_vec(),
            scan_rate,
            scans_per_read,
        };
        state.last_start = Some(start.clone());
        state.stream = Some(ActiveStream {
            handle,
            start: Some(start),
            ..ActiveStream::default()
        });
        state.no_scans_left = self.no_scans_reads;
        debug!(handle, scans_per_read, scan_rate, "Mock stream started");
        Ok(scan_rate)
    }

    fn e_stream_read(&self, handle: Handle) -> Result<StreamReadResult, LjmCallError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, "eStreamRead", handle)?;
        if state.no_scans_left > 0 {
            state.no_scans_left -= 1;
            return Err(call_error("eStreamRead", LJME_NO_SCANS_RETURNED));
        }
        if let Some((read, code)) = self.fail_read {
            if state.reads == read {
                return Err(call_error("eStreamRead", code));
            }
        }

        let stream = state
            .stream
            .as_mut()
            .filter(|s| s.handle == handle)
            .ok_or_else(|| call_error("eStreamRead", LJME_INVALID_HANDLE))?;
        let (channels, scans) = match &stream.start {
            Some(start) => (start.addresses.len(), start.scans_per_read),
            None => (0, 0),
        };

        let mut data = Vec::with_capacity(channels * scans);
        for _ in 0..scans {
            for channel in 0..channels {
                data.push(self.sample(channel, stream.next_scan, stream.next_sample));
                stream.next_sample += 1;
            }
            stream.next_scan += 1;
        }
        state.reads += 1;
        trace!(handle, samples = data.len(), "Mock stream read");

        Ok(StreamReadResult {
            data,
            device_scan_backlog: 0,
            ljm_scan_backlog: 0,
        })
    }

    fn e_stream_stop(&self, handle: Handle) -> Result<(), LjmCallError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, "eStreamStop", handle)?;
        state.stream = None;
        state.stream_stops += 1;
        debug!(handle, "Mock stream stopped");
        match self.stop_error {
            Some(code) => Err(call_error("eStreamStop", code)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_addresses_follow_modbus_map() {
        let ljm = MockLjm::new();
        assert_eq!(ljm.name_to_address("AIN0").unwrap(), 0);
        assert_eq!(ljm.name_to_address("AIN3").unwrap(), 6);
        assert_eq!(ljm.name_to_address("DIO0").unwrap(), 2000);
        assert_eq!(ljm.name_to_address("EIO1").unwrap(), 2009);
        assert_eq!(ljm.name_to_address("AIN").unwrap_err().code, LJME_INVALID_NAME);
        assert_eq!(ljm.name_to_address("FOO0").unwrap_err().code, LJME_INVALID_NAME);
    }

    #[test]
    fn open_matches_identifier() {
        let ljm = MockLjm::new().with_serial_number(470_000_123);
        assert!(ljm.open_s("T7", "USB", "470000123").is_ok());
        assert!(ljm.open_s("ANY", "ETHERNET", "192.168.1.207").is_ok());
        let err = ljm.open_s("T7", "USB", "12").unwrap_err();
        assert_eq!(err.code, LJME_DEVICE_NOT_FOUND);
        assert_eq!(ljm.open_handle_count(), 2);
    }

    #[test]
    fn closed_handle_is_invalid() {
        let ljm = MockLjm::new();
        let handle = ljm.open_s("ANY", "ANY", "ANY").unwrap();
        ljm.close(handle).unwrap();
        assert_eq!(ljm.close(handle).unwrap_err().code, LJME_INVALID_HANDLE);
    }

    #[test]
    fn stream_reads_produce_interleaved_samples() {
        let ljm = MockLjm::new().with_no_scans_reads(1).with_skip_every(4);
        let handle = ljm.open_s("ANY", "ANY", "ANY").unwrap();
        ljm.e_stream_start(handle, 3, &[0, 2], 1000.0).unwrap();

        assert!(ljm.e_stream_read(handle).unwrap_err().is_no_scans_returned());
        let read = ljm.e_stream_read(handle).unwrap();
        assert_eq!(read.data.len(), 6);
        assert_eq!(read.data[0], 0.0);
        assert_eq!(read.data[1], 1.0);
        assert_eq!(read.data[3], DUMMY_VALUE);
        assert!((read.data[4] - 0.002).abs() < 1e-12);

        ljm.e_stream_stop(handle).unwrap();
        assert_eq!(ljm.stream_stop_count(), 1);
        assert_eq!(ljm.read_count(), 1);
    }
}
