use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Policy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid policy file {path}: {reason}")]
    PolicyFormat { path: PathBuf, reason: String },

    #[error("Unable to parse timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },

    #[error("Log sink error: {0}")]
    Sink(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
