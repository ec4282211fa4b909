//! Errors raised while assembling [`HuddleSettings`](crate::HuddleSettings).

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings layer could not be applied.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings at {}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("settings at {} are not valid JSON", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Parser error with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// The merged layers do not fit the settings layout, e.g. a string where
    /// a port number belongs.
    #[error("settings do not match the expected layout: {0}")]
    Layout(#[from] serde_json::Error),

    /// A field parsed but holds a value the hub cannot run with.
    #[error("{key}: {reason}")]
    InvalidValue {
        /// Dotted camelCase key as written in the settings file.
        key: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

impl SettingsError {
    /// The offending key for [`SettingsError::InvalidValue`].
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(*key),
            _ => None,
        }
    }
}

/// Result of a settings operation.
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;
