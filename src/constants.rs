//! LJM constants used by the manifest and the controller.
//!
//! Symbolic integer constants may appear as override values in the startup-configuration
//! manifest (`"LJM_DEBUG_LOG_MODE": "LJM_DEBUG_LOG_MODE_ON_ERROR"`); [`lookup`] resolves them
//! to the number the library expects.

/// Value of a declaration that keeps the library default.
pub const DEFAULT_MARKER: &str = "default";

/// Top-level key holding the declaration list.
pub const CONFIG_VALUES_KEY: &str = "LJM_CONFIG_VALUES";

/// Library configuration selecting how many scans `eStreamRead` returns.
pub const LJM_STREAM_SCANS_RETURN: &str = "LJM_STREAM_SCANS_RETURN";
/// Library configuration for the stream receive timeout in milliseconds.
pub const LJM_STREAM_RECEIVE_TIMEOUT_MS: &str = "LJM_STREAM_RECEIVE_TIMEOUT_MS";

/// `eStreamRead` blocks until a full read is available.
pub const LJM_STREAM_SCANS_RETURN_ALL: i64 = 1;
/// `eStreamRead` returns a full read or nothing.
pub const LJM_STREAM_SCANS_RETURN_ALL_OR_NONE: i64 = 2;

/// Negative channel number selecting single-ended (ground referenced) analog input.
pub const GND: i64 = 199;

/// Sample value LJM substitutes for a scan skipped by the device.
pub const DUMMY_VALUE: f64 = -9999.0;

// Error codes
#[allow(missing_docs)]
pub const LJME_NOERROR: i32 = 0;
#[allow(missing_docs)]
pub const LJME_NO_SCANS_RETURNED: i32 = 1221;
#[allow(missing_docs)]
pub const LJME_INVALID_HANDLE: i32 = 1224;
#[allow(missing_docs)]
pub const LJME_DEVICE_NOT_FOUND: i32 = 1227;
#[allow(missing_docs)]
pub const LJME_INVALID_NAME: i32 = 1294;
#[allow(missing_docs)]
pub const LJME_LJM_BUFFER_FULL: i32 = 1301;

/// Symbolic integer constants accepted as manifest values.
pub static SYMBOLIC_CONSTANTS: &[(&str, i64)] = &[
    // LJM_DEBUG_LOG_MODE
    ("LJM_DEBUG_LOG_MODE_NEVER", 1),
    ("LJM_DEBUG_LOG_MODE_CONTINUOUS", 2),
    ("LJM_DEBUG_LOG_MODE_ON_ERROR", 3),
    // LJM_DEBUG_LOG_LEVEL
    ("LJM_STREAM_PACKET", 1),
    ("LJM_TRACE", 2),
    ("LJM_DEBUG", 4),
    ("LJM_INFO", 6),
    ("LJM_PACKET", 7),
    ("LJM_WARNING", 8),
    ("LJM_USER", 9),
    ("LJM_ERROR", 10),
    ("LJM_FATAL", 12),
    // LJM_STREAM_RECEIVE_TIMEOUT_MODE
    ("LJM_STREAM_RECEIVE_TIMEOUT_MODE_CALCULATED", 1),
    ("LJM_STREAM_RECEIVE_TIMEOUT_MODE_MANUAL", 2),
    // LJM_STREAM_SCANS_RETURN
    ("LJM_STREAM_SCANS_RETURN_ALL", LJM_STREAM_SCANS_RETURN_ALL),
    ("LJM_STREAM_SCANS_RETURN_ALL_OR_NONE", LJM_STREAM_SCANS_RETURN_ALL_OR_NONE),
    // LJM_ZERO_LENGTH_ARRAY_MODE
    ("LJM_ZERO_LENGTH_ARRAY_ERROR", 1),
    ("LJM_ZERO_LENGTH_ARRAY_IGNORE_OPERATION", 2),
];

/// Resolve a symbolic constant to its integer value.
pub fn lookup(symbol: &str) -> Option<i64> {
    SYMBOLIC_CONSTANTS
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|&(_, value)| value)
}

/// Name of an LJM error code, as `LJM_ErrorToString` reports it.
pub fn error_name(code: i32) -> &'static str {
    match code {
        LJME_NOERROR => "LJME_NOERROR",
        LJME_NO_SCANS_RETURNED => "LJME_NO_SCANS_RETURNED",
        LJME_INVALID_HANDLE => "LJME_INVALID_HANDLE",
        LJME_DEVICE_NOT_FOUND => "LJME_DEVICE_NOT_FOUND",
        LJME_INVALID_NAME => "LJME_INVALID_NAME",
        LJME_LJM_BUFFER_FULL => "LJME_LJM_BUFFER_FULL",
        _ => "LJME_UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn debug_log_mode_constants_resolve() {
        assert_eq!(lookup("LJM_DEBUG_LOG_MODE_NEVER"), Some(1));
        assert_eq!(lookup("LJM_DEBUG_LOG_MODE_CONTINUOUS"), Some(2));
        assert_eq!(lookup("LJM_DEBUG_LOG_MODE_ON_ERROR"), Some(3));
        assert_eq!(lookup("LJM_DEBUG_LOG_MODE_SOMETIMES"), None);
    }

    #[test]
    fn error_codes_have_names() {
        assert_eq!(error_name(LJME_NO_SCANS_RETURNED), "LJME_NO_SCANS_RETURNED");
        assert_eq!(error_name(-1), "LJME_UNKNOWN_ERROR");
    }

    #[test]
    fn symbol_names_are_unique() {
        let mut seen = HashSet::new();
        for (name, _) in SYMBOLIC_CONSTANTS {
            assert!(seen.insert(*name), "duplicate constant {name}");
        }
    }
}
