//! Errors raised while loading gateway settings.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON or has the wrong shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A field holds a value the client cannot use.
    #[error("{field}: {reason}")]
    Invalid {
        /// camelCase path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
