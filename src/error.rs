//! Error handling for the telemetry core
//!
//! This module defines the crate-wide error type and a Result alias. Storage
//! and layout validation keep their own error enums (see
//! [`crate::storage::StoreError`] and [`crate::config::LayoutError`]) which
//! convert into [`TelemetryError`] at module boundaries.

use crate::config::LayoutError;
use crate::storage::StoreError;
use thiserror::Error;

/// Main error type for telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The frame layout is not usable for the selected protocol
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Errors from the sample store
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A transport could not be opened (port busy, bind failure, missing device)
    #[error("{0}")]
    TransportOpen(String),

    /// The connection is not in a state that allows the operation
    #[error("Connection error: {0}")]
    Connection(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors while importing a recorded file
    #[error("{0}")]
    Import(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TelemetryError>,
    },
}

impl TelemetryError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TelemetryError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TelemetryError {
    fn from(err: toml::de::Error) -> Self {
        TelemetryError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TelemetryError {
    fn from(err: toml::ser::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TelemetryError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| TelemetryError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("missing layout".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing layout");
    }

    #[test]
    fn test_transport_open_is_shown_verbatim() {
        let err = TelemetryError::TransportOpen("Unable to connect to /dev/ttyUSB0.".to_string());
        assert_eq!(err.to_string(), "Unable to connect to /dev/ttyUSB0.");
    }

    #[test]
    fn test_error_with_context() {
        let err = TelemetryError::Import("Unable to read line 3".to_string());
        let with_ctx = err.with_context("Importing capture.csv");
        assert!(with_ctx.to_string().contains("Importing capture.csv"));
        assert!(with_ctx.to_string().contains("line 3"));
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res.context("Unable to open the CSV file").unwrap_err();
        assert!(matches!(err, TelemetryError::WithContext { .. }));
        assert!(err.to_string().starts_with("Unable to open the CSV file"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: TelemetryError = StoreError::Full { max: 10 }.into();
        assert!(matches!(err, TelemetryError::Storage(StoreError::Full { max: 10 })));
    }
}
