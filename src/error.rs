//! Unified error handling for the IcapGuard library.
//!
//! Uses [`thiserror`] to define a single error enum that covers all failure
//! modes: I/O, config parsing, JSON serialization, template rendering,
//! database access, and scanner backends. Library code returns [`Result<T>`]
//! which aliases `std::result::Result<T, IcapGuardError>`.
//!
//! The binary (`main.rs`) uses [`anyhow`] for top-level error propagation.
//! Failures inside an ICAP transaction never surface through this type; they
//! are mapped to ICAP status codes by the handler layer instead.

use thiserror::Error;

use crate::scanner::ScannerError;

/// Unified error type for the IcapGuard library.
///
/// Each variant wraps an underlying error source, enabling automatic
/// conversion via `?` and preserving the original error chain for
/// diagnostics.
#[derive(Debug, Error)]
pub enum IcapGuardError {
    /// File I/O error (config read, template write, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration parsing error.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is well-formed but semantically invalid.
    #[error("Config error: {0}")]
    ConfigInvalid(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Block-page template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// SQLite audit-log error (schema init, query, insert).
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Scanner backend error (submit, status, report, local stream).
    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),
}

/// Convenience type alias for `std::result::Result<T, IcapGuardError>`.
pub type Result<T> = std::result::Result<T, IcapGuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IcapGuardError = io_err.into();
        assert!(matches!(err, IcapGuardError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn config_invalid_displays_message() {
        let err = IcapGuardError::ConfigInvalid("missing api_key".to_string());
        assert_eq!(err.to_string(), "Config error: missing api_key");
    }

    #[test]
    fn config_parse_error_converts() {
        let bad_toml = "[invalid";
        let toml_err = toml::from_str::<toml::Value>(bad_toml).unwrap_err();
        let err: IcapGuardError = toml_err.into();
        assert!(matches!(err, IcapGuardError::ConfigParse(_)));
    }

    #[test]
    fn scanner_error_converts() {
        let err: IcapGuardError = ScannerError::Protocol("short reply".to_string()).into();
        assert!(matches!(err, IcapGuardError::Scanner(_)));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IcapGuardError>();
    }
}
