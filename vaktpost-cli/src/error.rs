use thiserror::Error;
use vaktpost_config::ConfigError;
use vaktpost_engine::EngineError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid time '{value}': expected RFC 3339 or YYYY-MM-DD")]
    InvalidTime { value: String },

    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}
