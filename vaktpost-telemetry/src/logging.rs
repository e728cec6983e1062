//! Structured logging with tracing and OpenTelemetry attributes.

use opentelemetry::KeyValue;
use tracing::{info_span, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Install the global subscriber. `RUST_LOG` wins over `default_level`.
    pub fn init(default_level: &str) -> Result<(), InitError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(default_level)?,
        };
        fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
    }

    /// Emit a security-relevant event (a HIGH verdict, a blocked peer) with
    /// its attributes attached.
    #[inline]
    pub async fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "security_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        async {
            let attributes = metadata
                .iter()
                .map(|kv| format!("{}={}", kv.key.as_str(), kv.value))
                .collect::<Vec<_>>()
                .join(" ");
            tracing::warn!(%attributes, "Security event occurred");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn events_carry_attributes() {
        EventLogger::log_event(
            "flow_match",
            vec![
                KeyValue::new("source", "10.0.0.5"),
                KeyValue::new("port", "22"),
            ],
        )
        .await;
        assert!(logs_contain("Security event occurred"));
        assert!(logs_contain("source=10.0.0.5 port=22"));
    }
}
