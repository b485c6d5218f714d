//! Settings error types.

use std::path::PathBuf;

use simbus_core::ValidationError;
use thiserror::Error;

/// Errors from loading or checking [`BusSettings`](crate::BusSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser failure.
        source: serde_json::Error,
    },
    /// The merged document does not fit the settings shape.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A value is outside its allowed range.
    #[error("{key}: {reason}")]
    OutOfRange {
        /// camelCase key as written in the file.
        key: &'static str,
        /// What was expected and what was found.
        reason: String,
    },
    /// The configured identity does not form valid topic segments.
    #[error("invalid identity: {0}")]
    Identity(#[from] ValidationError),
}

impl SettingsError {
    /// The offending key, for range errors.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::OutOfRange { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
