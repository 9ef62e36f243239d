//! Custom error types for the application.
//!
//! This module defines the primary error type, `LjmError`, for the crate. Using the `thiserror`
//! crate, it provides a centralized way to handle everything that can go wrong, from reading a
//! manifest to a failed LJM call halfway through a stream.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches in the
//!   application configuration.
//! - **`Configuration`**: Semantic errors in the application configuration that pass parsing.
//! - **`Manifest`** / **`Override`**: Errors from the LJM startup-configuration manifest layer.
//! - **`Connection`**, **`Disconnection`**, **`LibraryConfiguration`**,
//!   **`RegisterConfiguration`**, **`StreamRead`**: An LJM call failed during the named phase.
//!   The failing call is kept as the error source.
//! - **`NoConnection`**: The device handle was already closed.
//! - **`InvalidArgument`**: Rejected before any LJM call was made.
//! - **`StreamWorker`**: The thread collecting stream reads died.
//!
//! By using `#[from]`, `LjmError` can be created from the underlying error types with `?`.

use thiserror::Error;

use crate::backend::LjmCallError;
use crate::manifest::ManifestError;
use crate::overrides::OverrideError;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, LjmError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum LjmError {
    /// Application configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Application configuration loaded but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure outside of the manifest layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest could not be read, parsed or written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A manifest override is not legal for its declaration.
    #[error(transparent)]
    Override(#[from] OverrideError),

    /// Argument rejected before reaching the LJM library.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Opening the device or reading its handle info failed.
    #[error("LabJack connection failed")]
    Connection(#[source] LjmCallError),

    /// The device handle is not assigned.
    #[error("LabJack connection handle is not assigned")]
    NoConnection,

    /// Closing the device handle failed.
    #[error("LabJack disconnection failed")]
    Disconnection(#[source] LjmCallError),

    /// Writing an LJM library configuration failed.
    #[error("LJM library configuration failed")]
    LibraryConfiguration(#[source] LjmCallError),

    /// Writing a device register failed.
    #[error("LabJack register configuration failed")]
    RegisterConfiguration(#[source] LjmCallError),

    /// Starting, reading or stopping a stream failed.
    #[error("LabJack stream read failed")]
    StreamRead(#[source] LjmCallError),

    /// The thread stacking stream reads stopped unexpectedly.
    #[error("Stream stacking worker terminated: {0}")]
    StreamWorker(String),
}

impl LjmError {
    /// The LJM error code behind this error, when an LJM call failed.
    pub fn ljm_code(&self) -> Option<i32> {
        match self {
            Self::Connection(call)
            | Self::Disconnection(call)
            | Self::LibraryConfiguration(call)
            | Self::RegisterConfiguration(call)
            | Self::StreamRead(call) => Some(call.code),
            _ => None,
        }
    }

    /// Whether this error came out of the LJM library rather than this crate.
    pub fn is_library_error(&self) -> bool {
        self.ljm_code().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn stream_error_keeps_call_as_source() {
        let err = LjmError::StreamRead(LjmCallError::new("eStreamRead", 1221, "LJME_NO_SCANS_RETURNED"));
        assert_eq!(err.ljm_code(), Some(1221));
        assert!(err.is_library_error());
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("eStreamRead"));
        assert!(source.contains("1221"));
    }

    #[test]
    fn argument_errors_are_not_library_errors() {
        let err = LjmError::InvalidArgument("No given configuration.".into());
        assert_eq!(err.ljm_code(), None);
        assert!(err.to_string().contains("No given configuration"));
    }
}
