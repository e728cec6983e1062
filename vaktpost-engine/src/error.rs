use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use vaktpost_capture::CaptureError;
use vaktpost_config::ConfigError;
use vaktpost_core::CoreError;
use vaktpost_prevention::FirewallError;
use vaktpost_transport::TransportError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Firewall error: {0}")]
    Firewall(#[from] FirewallError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("Unknown enforcement mode '{0}'")]
    UnknownMode(String),

    #[error("Policy {0} not found")]
    PolicyNotFound(u64),

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

impl From<tokio::sync::AcquireError> for EngineError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        EngineError::Task(err.to_string())
    }
}

/// Bound `future` by `after`, naming the operation in the timeout error.
pub(crate) async fn with_timeout<T, E, F>(
    operation: impl Into<String>,
    after: Duration,
    future: F,
) -> Result<T, EngineError>
where
    F: std::future::Future<Output = Result<T, E>>,
    EngineError: From<E>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(EngineError::Timeout {
            operation: operation.into(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_operation_times_out_with_its_name() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), FirewallError>(())
        };
        let err = with_timeout("listing INPUT", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { ref operation, .. } if operation == "listing INPUT"));
    }

    #[tokio::test]
    async fn inner_error_is_converted() {
        let failing = async { Err::<(), _>(FirewallError::UnknownChain("FORWARD".into())) };
        let err = with_timeout("adding rule", Duration::from_secs(1), failing)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Firewall(FirewallError::UnknownChain(_))));
    }
}
