//! The LJM library seam.
//!
//! [`LjmBackend`] lists the LJM calls the controller makes. Every method mirrors one LJM
//! function (`LJM_OpenS`, `LJM_eWriteNames`, `LJM_eStreamRead`, ...) and reports failures as an
//! [`LjmCallError`] carrying the LJM error code. The vendor library is not linked by this crate;
//! [`MockLjm`](crate::mock::MockLjm) implements the trait for tests and simulation.
//!
//! # Contract
//! - Calls are blocking, the way the LJM C API is.
//! - Implementations are thread-safe (`Send + Sync`); the stream worker may outlive the call
//!   that started it.

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::constants::LJME_NO_SCANS_RETURNED;

/// LJM device handle.
pub type Handle = i32;

/// One failed LJM call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{function} failed with LJM error {code}: {message}")]
pub struct LjmCallError {
    /// LJM function that failed, e.g. `eStreamRead`
    pub function: &'static str,
    /// LJM error code
    pub code: i32,
    /// Error name or description
    pub message: String,
}

impl LjmCallError {
    /// Create a call error.
    pub fn new(function: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self {
            function,
            code,
            message: message.into(),
        }
    }

    /// Whether a stream read returned no scans yet (retryable).
    pub fn is_no_scans_returned(&self) -> bool {
        self.code == LJME_NO_SCANS_RETURNED
    }
}

/// Value written to a library configuration or a device register.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Written through the numeric API
    Number(f64),
    /// Written through the string API
    Text(String),
}

impl ConfigValue {
    /// Numeric value, when numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    /// Text value, when text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(value) => Some(value),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Number(if value { 1.0 } else { 0.0 })
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Raw result of `LJM_GetHandleInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInfo {
    /// Device type code (`LJM_dtT7`, ...)
    pub device_type: i32,
    /// Connection type code (`LJM_ctETHERNET`, ...)
    pub connection_type: i32,
    /// Serial number
    pub serial_number: i32,
    /// IPv4 address as LJM's 32-bit number, 0 for USB
    pub ip_address: u32,
    /// Port, or pipe for USB
    pub port: i32,
    /// Maximum packet size in bytes
    pub max_bytes_per_mb: i32,
}

impl HandleInfo {
    /// IPv4 address in dotted form (`LJM_NumberToIP`).
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_address)
    }
}

/// Result of one `LJM_eStreamRead`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReadResult {
    /// Interleaved samples: scan 0 channel 0, scan 0 channel 1, ...
    pub data: Vec<f64>,
    /// Scans left in the device buffer
    pub device_scan_backlog: i32,
    /// Scans left in the LJM buffer
    pub ljm_scan_backlog: i32,
}

/// The LJM calls used by [`LabJackDevice`](crate::device::LabJackDevice).
pub trait LjmBackend: Send + Sync {
    /// `LJM_OpenS`: open a device by type name, connection name and identifier.
    fn open_s(
        &self,
        device_type: &str,
        connection_type: &str,
        identifier: &str,
    ) -> Result<Handle, LjmCallError>;

    /// `LJM_GetHandleInfo`. Does not talk to the device.
    fn get_handle_info(&self, handle: Handle) -> Result<HandleInfo, LjmCallError>;

    /// `LJM_Close`.
    fn close(&self, handle: Handle) -> Result<(), LjmCallError>;

    /// `LJM_WriteLibraryConfigS`.
    fn write_library_config(&self, name: &str, value: f64) -> Result<(), LjmCallError>;

    /// `LJM_WriteLibraryConfigStringS`.
    fn write_library_config_string(&self, name: &str, value: &str) -> Result<(), LjmCallError>;

    /// `LJM_ReadLibraryConfigS`.
    fn read_library_config(&self, name: &str) -> Result<f64, LjmCallError>;

    /// `LJM_eWriteNames`: write numeric registers in one transaction.
    fn e_write_names(&self, handle: Handle, writes: &[(String, f64)]) -> Result<(), LjmCallError>;

    /// `LJM_eWriteNameString`.
    fn e_write_name_string(
        &self,
        handle: Handle,
        name: &str,
        value: &str,
    ) -> Result<(), LjmCallError>;

    /// `LJM_NameToAddress`: Modbus address of a register name.
    fn name_to_address(&self, name: &str) -> Result<i32, LjmCallError>;

    /// `LJM_NamesToAddresses`.
    fn names_to_addresses(&self, names: &[String]) -> Result<Vec<i32>, LjmCallError> {
        names.iter().map(|name| self.name_to_address(name)).collect()
    }

    /// `LJM_eStreamStart`. Returns the scan rate the device actually runs at.
    fn e_stream_start(
        &self,
        handle: Handle,
        scans_per_read: usize,
        addresses: &[i32],
        scan_rate: f64,
    ) -> Result<f64, LjmCallError>;

    /// `LJM_eStreamRead`: blocks until `scans_per_read` scans are available.
    fn e_stream_read(&self, handle: Handle) -> Result<StreamReadResult, LjmCallError>;

    /// `LJM_eStreamStop`.
    fn e_stream_stop(&self, handle: Handle) -> Result<(), LjmCallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_info_converts_ip_number() {
        let info = HandleInfo {
            device_type: 7,
            connection_type: 3,
            serial_number: 470_012_345,
            ip_address: 0xC0A8_0178,
            port: 502,
            max_bytes_per_mb: 1040,
        };
        assert_eq!(info.ip(), Ipv4Addr::new(192, 168, 1, 120));
    }

    #[test]
    fn config_value_conversions() {
        assert_eq!(ConfigValue::from(true), ConfigValue::Number(1.0));
        assert_eq!(ConfigValue::from(199_i64).as_number(), Some(199.0));
        assert_eq!(ConfigValue::from("DIO0").as_text(), Some("DIO0"));
        assert_eq!(ConfigValue::from(2.5).to_string(), "2.5");
    }

    #[test]
    fn no_scans_returned_is_recognised() {
        let err = LjmCallError::new("eStreamRead", LJME_NO_SCANS_RETURNED, "LJME_NO_SCANS_RETURNED");
        assert!(err.is_no_scans_returned());
        assert!(!LjmCallError::new("eStreamRead", 1301, "other").is_no_scans_returned());
    }
}
