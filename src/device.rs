//! LabJack T-series device controller.
//!
//! [`LabJackDevice`] owns one LJM handle. It is opened with [`LabJackDevice::open`] and closed
//! either explicitly or when dropped. Library configurations and device registers are written
//! in ordered `(name, value)` batches; numeric values and strings go through separate LJM calls.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{ConfigValue, Handle, HandleInfo, LjmBackend};
use crate::constants::GND;
use crate::error::{AppResult, LjmError};
use crate::manifest::ConfigManifest;
use crate::overrides;

/// Register selecting the negative channel of every analog input.
pub const AIN_ALL_NEGATIVE_CH: &str = "AIN_ALL_NEGATIVE_CH";
/// Register selecting the range (±V) of every analog input.
pub const AIN_ALL_RANGE: &str = "AIN_ALL_RANGE";
/// Analog input range written by [`LabJackDevice::configure_analog_inputs`] by default.
pub const DEFAULT_AIN_RANGE: f64 = 10.0;

/// LabJack device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    /// Any device type
    Any,
    /// T4
    T4,
    /// T7
    T7,
    /// T8
    T8,
    /// Digit
    Digit,
}

impl DeviceType {
    /// Name passed to `LJM_OpenS`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::T4 => "T4",
            Self::T7 => "T7",
            Self::T8 => "T8",
            Self::Digit => "DIGIT",
        }
    }

    /// LJM device type code (`LJM_dtT7` = 7, ...).
    pub fn code(self) -> i32 {
        match self {
            Self::Any => 0,
            Self::T4 => 4,
            Self::T7 => 7,
            Self::T8 => 8,
            Self::Digit => 200,
        }
    }

    /// Device type for an LJM code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Any),
            4 => Some(Self::T4),
            7 => Some(Self::T7),
            8 => Some(Self::T8),
            200 => Some(Self::Digit),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = LjmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "T4" => Ok(Self::T4),
            "T7" => Ok(Self::T7),
            "T8" => Ok(Self::T8),
            "DIGIT" => Ok(Self::Digit),
            other => Err(LjmError::InvalidArgument(format!(
                "Unknown device type '{other}'. Valid: ANY, T4, T7, T8, DIGIT"
            ))),
        }
    }
}

/// How the device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionType {
    /// Any connection
    Any,
    /// USB
    Usb,
    /// Ethernet (TCP)
    Ethernet,
    /// WiFi (TCP)
    Wifi,
}

impl ConnectionType {
    /// Name passed to `LJM_OpenS`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::Usb => "USB",
            Self::Ethernet => "ETHERNET",
            Self::Wifi => "WIFI",
        }
    }

    /// LJM connection type code.
    pub fn code(self) -> i32 {
        match self {
            Self::Any => 0,
            Self::Usb => 1,
            Self::Ethernet => 3,
            Self::Wifi => 4,
        }
    }

    /// Connection type for an LJM code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Any),
            1 => Some(Self::Usb),
            3 => Some(Self::Ethernet),
            4 => Some(Self::Wifi),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = LjmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "USB" => Ok(Self::Usb),
            "ETHERNET" | "TCP" => Ok(Self::Ethernet),
            "WIFI" => Ok(Self::Wifi),
            other => Err(LjmError::InvalidArgument(format!(
                "Unknown connection type '{other}'. Valid: ANY, USB, ETHERNET, WIFI"
            ))),
        }
    }
}

/// What `LJM_GetHandleInfo` reports about an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Device family; `Any` when the code is not recognised
    pub device_type: DeviceType,
    /// Connection in use; `Any` when the code is not recognised
    pub connection_type: ConnectionType,
    /// Serial number
    pub serial_number: i32,
    /// IPv4 address, `0.0.0.0` over USB
    pub ip_address: Ipv4Addr,
    /// Port, or pipe over USB
    pub port: i32,
    /// Maximum packet size in bytes
    pub max_bytes_per_mb: i32,
}

impl From<HandleInfo> for DeviceInfo {
    fn from(info: HandleInfo) -> Self {
        Self {
            device_type: DeviceType::from_code(info.device_type).unwrap_or(DeviceType::Any),
            connection_type: ConnectionType::from_code(info.connection_type)
                .unwrap_or(ConnectionType::Any),
            serial_number: info.serial_number,
            ip_address: info.ip(),
            port: info.port,
            max_bytes_per_mb: info.max_bytes_per_mb,
        }
    }
}

/// An open LabJack device.
pub struct LabJackDevice {
    backend: Arc<dyn LjmBackend>,
    handle: Option<Handle>,
    info: DeviceInfo,
}

impl LabJackDevice {
    /// Open a device and read its handle info.
    ///
    /// `identifier` is a serial number, IP address, device name or `ANY`.
    ///
    /// # Errors
    /// [`LjmError::Connection`] when the device cannot be opened or queried.
    pub fn open(
        backend: Arc<dyn LjmBackend>,
        device_type: DeviceType,
        connection_type: ConnectionType,
        identifier: &str,
    ) -> AppResult<Self> {
        let started = Instant::now();
        let handle = backend
            .open_s(device_type.as_str(), connection_type.as_str(), identifier)
            .map_err(LjmError::Connection)?;

        let info = match backend.get_handle_info(handle) {
            Ok(info) => DeviceInfo::from(info),
            Err(err) => {
                if let Err(close_err) = backend.close(handle) {
                    warn!(handle, error = %close_err, "Failed to close handle after failed open");
                }
                return Err(LjmError::Connection(err));
            }
        };

        info!(
            device_type = %info.device_type,
            connection = %info.connection_type,
            serial = info.serial_number,
            ip = %info.ip_address,
            port = info.port,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Opened LabJack device"
        );

        Ok(Self {
            backend,
            handle: Some(handle),
            info,
        })
    }

    /// Handle info captured when the device was opened.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Whether the handle is still open.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// The open handle.
    ///
    /// # Errors
    /// [`LjmError::NoConnection`] after [`close`](Self::close).
    pub fn handle(&self) -> AppResult<Handle> {
        self.handle.ok_or(LjmError::NoConnection)
    }

    pub(crate) fn backend(&self) -> &Arc<dyn LjmBackend> {
        &self.backend
    }

    /// Close the handle.
    pub fn close(&mut self) -> AppResult<()> {
        let handle = self.handle()?;
        self.backend
            .close(handle)
            .map_err(LjmError::Disconnection)?;
        self.handle = None;
        info!(serial = self.info.serial_number, "Closed LabJack device");
        Ok(())
    }

    /// Write LJM library configurations.
    ///
    /// Numeric values are written first, then strings one at a time, each group in batch order.
    ///
    /// # Errors
    /// [`LjmError::InvalidArgument`] for an empty batch, [`LjmError::LibraryConfiguration`] when
    /// the library rejects a value.
    pub fn configure_library<I, N, V>(&self, batch: I) -> AppResult<()>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<ConfigValue>,
    {
        let (numbers, strings) = split_batch(batch)?;
        let started = Instant::now();

        for (name, value) in &numbers {
            self.backend
                .write_library_config(name, *value)
                .map_err(LjmError::LibraryConfiguration)?;
        }
        for (name, value) in &strings {
            self.backend
                .write_library_config_string(name, value)
                .map_err(LjmError::LibraryConfiguration)?;
        }

        debug!(
            numbers = numbers.len(),
            strings = strings.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Configured LJM library"
        );
        Ok(())
    }

    /// Read back one numeric library configuration.
    pub fn read_library_config(&self, name: &str) -> AppResult<f64> {
        self.backend
            .read_library_config(name)
            .map_err(LjmError::LibraryConfiguration)
    }

    /// Write device registers.
    ///
    /// Numeric values go out in one `eWriteNames` transaction, then strings one at a time.
    ///
    /// # Errors
    /// [`LjmError::InvalidArgument`] for an empty batch, [`LjmError::NoConnection`] when closed,
    /// [`LjmError::RegisterConfiguration`] when the device rejects a write.
    pub fn configure_register<I, N, V>(&self, batch: I) -> AppResult<()>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<ConfigValue>,
    {
        let (numbers, strings) = split_batch(batch)?;
        let handle = self.handle()?;
        let started = Instant::now();

        if !numbers.is_empty() {
            self.backend
                .e_write_names(handle, &numbers)
                .map_err(LjmError::RegisterConfiguration)?;
        }
        for (name, value) in &strings {
            self.backend
                .e_write_name_string(handle, name, value)
                .map_err(LjmError::RegisterConfiguration)?;
        }

        debug!(
            numbers = numbers.len(),
            strings = strings.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Configured device registers"
        );
        Ok(())
    }

    /// Set negative channel and range for every analog input.
    ///
    /// Defaults: single-ended (`GND`) and ±10 V.
    pub fn configure_analog_inputs(
        &self,
        negative_channel: Option<i64>,
        range: Option<f64>,
    ) -> AppResult<()> {
        self.configure_register([
            (
                AIN_ALL_NEGATIVE_CH,
                ConfigValue::from(negative_channel.unwrap_or(GND)),
            ),
            (AIN_ALL_RANGE, ConfigValue::from(range.unwrap_or(DEFAULT_AIN_RANGE))),
        ])
    }

    /// Write every override of a startup-configuration manifest as a library configuration.
    ///
    /// Returns the number of configurations written. A manifest without overrides writes nothing.
    ///
    /// # Errors
    /// [`LjmError::Override`] when an override is illegal; nothing is written in that case.
    pub fn apply_manifest(&self, manifest: &ConfigManifest) -> AppResult<usize> {
        let resolved = overrides::resolve(manifest)?;
        if resolved.is_empty() {
            debug!("Manifest has no overrides; library defaults kept");
            return Ok(0);
        }
        let count = resolved.len();
        self.configure_library(resolved.into_iter().map(|item| (item.name, item.value)))?;
        info!(overrides = count, "Applied startup configuration manifest");
        Ok(count)
    }
}

/// Split a batch into numeric and string writes, keeping order within each group.
fn split_batch<I, N, V>(batch: I) -> AppResult<(Vec<(String, f64)>, Vec<(String, String)>)>
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<ConfigValue>,
{
    let mut numbers = Vec::new();
    let mut strings = Vec::new();
    for (name, value) in batch {
        match value.into() {
            ConfigValue::Number(number) => numbers.push((name.into(), number)),
            ConfigValue::Text(text) => strings.push((name.into(), text)),
        }
    }
    if numbers.is_empty() && strings.is_empty() {
        return Err(LjmError::InvalidArgument("No given configuration.".to_string()));
    }
    Ok((numbers, strings))
}

impl fmt::Display for LabJackDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_open() { "open" } else { "closed" };
        write!(
            f,
            "LabJack {} (serial {}, {}",
            self.info.device_type, self.info.serial_number, self.info.connection_type
        )?;
        if self.info.connection_type != ConnectionType::Usb {
            write!(f, " {}:{}", self.info.ip_address, self.info.port)?;
        }
        write!(f, ", max {} bytes/MB, {state})", self.info.max_bytes_per_mb)
    }
}

impl fmt::Debug for LabJackDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabJackDevice")
            .field("handle", &self.handle)
            .field("info", &self.info)
            .finish()
    }
}

impl Drop for LabJackDevice {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(handle, "Closing LabJack device on drop");
            if let Err(err) = self.backend.close(handle) {
                warn!(handle, error = %err, "Error closing LabJack device");
            }
        }
    }
}
