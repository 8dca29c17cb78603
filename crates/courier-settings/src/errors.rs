//! Errors raised while loading settings.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file could not be turned into [`CourierSettings`](crate::CourierSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid JSON.
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying JSON failure.
        source: serde_json::Error,
    },
    /// The file parsed, but its top level is not an object.
    #[error("{} must hold a JSON object", path.display())]
    NotAnObject {
        /// Offending file.
        path: PathBuf,
    },
    /// The merged document does not fit the settings schema.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Result alias for settings loading.
pub type Result<T> = std::result::Result<T, SettingsError>;
