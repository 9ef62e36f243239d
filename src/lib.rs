//! # Rust LJM Core Library
//!
//! This crate serves as the core library for the `rust-ljm` command-line tool. It covers two
//! related concerns around LabJack's LJM driver library:
//!
//! - the LJM startup-configuration manifest (`ljm_startup_configs.json`): a typed model, a
//!   loader/writer, a structural conformance checker and the override rules a consuming driver
//!   applies to it;
//! - a LabJack T-series controller that writes library and register configuration and runs
//!   (optionally triggered) stream acquisitions through the [`backend::LjmBackend`] trait.
//!
//! ## Crate Structure
//!
//! - **`manifest`**: `ConfigManifest` and `ParameterDeclaration`, parsing and writing the file.
//! - **`conformance`**: Structural checks over a raw manifest document, reported in full.
//! - **`overrides`**: Which declarations override the driver defaults, and whether they are legal.
//! - **`constants`**: LJM symbolic constants, device/connection codes and error codes.
//! - **`backend`**: The `LjmBackend` trait standing in for the LJM shared library.
//! - **`mock`**: `MockLjm`, a simulated LJM library with one attached device.
//! - **`device`**: `LabJackDevice`, the handle owner and configuration entry point.
//! - **`stream`**: Stream planning, triggering, acquisition and per-channel records.
//! - **`config`**: Application configuration loaded with figment.
//! - **`tracing_setup`**: tracing-subscriber initialisation.
//! - **`error`**: The crate-wide `LjmError` enum.

pub mod backend;
pub mod config;
pub mod conformance;
pub mod constants;
pub mod device;
pub mod error;
pub mod manifest;
pub mod mock;
pub mod overrides;
pub mod stream;
pub mod tracing_setup;

pub use backend::{ConfigValue, LjmBackend, LjmCallError};
pub use conformance::{ConformanceReport, Violation};
pub use device::{ConnectionType, DeviceInfo, DeviceType, LabJackDevice};
pub use error::{AppResult, LjmError};
pub use manifest::{AllowedValues, ConfigManifest, ManifestError, ParamType, ParamValue, ParameterDeclaration};
pub use mock::MockLjm;
pub use overrides::{OverrideAudit, OverrideError, ResolvedOverride};
pub use stream::{StreamIn, StreamPlan, StreamRecording, StreamSettings, TriggerSettings};
