use std::path::PathBuf;
use thiserror::Error;

use crate::Provider;

#[derive(Error, Debug)]
pub enum SriError {
    /// Every configured upstream source came back empty or failed.
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// A single source failed after its retry budget was spent.
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: Provider, message: String },

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Persisted panel not found at {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SriError {
    pub fn provider(provider: Provider, message: impl Into<String>) -> Self {
        SriError::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Transient failures are worth another attempt; everything else fails the same way twice.
    pub fn is_transient(&self) -> bool {
        matches!(self, SriError::Http(_))
    }
}
