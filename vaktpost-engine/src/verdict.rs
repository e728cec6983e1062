//! Verdict service: classifies streamed flow records against the policy set.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{debug, warn};
use vaktpost_core::events::{FlowRecord, Severity, Verdict};
use vaktpost_core::policy::find_match;
use vaktpost_core::sink::{LogEntry, LogSink};
use vaktpost_core::store::PolicyStore;
use vaktpost_core::time::TimestampParser;
use vaktpost_telemetry::{EventLogger, MetricsRecorder};
use vaktpost_transport::Classifier;

use crate::EngineError;

pub struct VerdictService {
    store: Arc<dyn PolicyStore>,
    sink: Arc<dyn LogSink>,
    parser: TimestampParser,
    metrics: Option<MetricsRecorder>,
}

impl VerdictService {
    pub fn new(store: Arc<dyn PolicyStore>, sink: Arc<dyn LogSink>, parser: TimestampParser) -> Self {
        Self {
            store,
            sink,
            parser,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Classify, persist, then answer. A record that cannot be timestamped
    /// or persisted gets no verdict.
    async fn judge(&self, record: FlowRecord) -> Result<Verdict, EngineError> {
        let policies = self.store.list_policies().await?;
        let matched = find_match(&policies, &record.source, &record.port);
        let severity = if matched.is_some() {
            Severity::High
        } else {
            Severity::Low
        };

        let time = self.parser.parse(&record.time)?;
        self.sink
            .append(&LogEntry::from_record(&record, time, severity))
            .await?;

        if let Some(policy) = matched {
            EventLogger::log_event(
                "policy_match",
                vec![
                    KeyValue::new("policy.id", policy.id as i64),
                    KeyValue::new("policy.name", policy.name.clone()),
                    KeyValue::new("flow.source", record.source.clone()),
                    KeyValue::new("flow.destination", record.destination.clone()),
                    KeyValue::new("flow.port", record.port.clone()),
                    KeyValue::new("flow.protocol", record.protocol.to_string()),
                    KeyValue::new("flow.type", record.direction.to_string()),
                ],
            )
            .await;
        }
        debug!(source = %record.source, port = %record.port, %severity, "Flow classified");
        Ok(Verdict::new(record, severity))
    }
}

#[async_trait]
impl Classifier for VerdictService {
    type Error = EngineError;

    async fn classify(&self, record: FlowRecord) -> Result<Verdict, EngineError> {
        let source = record.source.clone();
        match self.judge(record).await {
            Ok(verdict) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_classified(&verdict.severity().to_string());
                }
                Ok(verdict)
            }
            Err(e) => {
                warn!(%source, error = %e, "Flow record not classified");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_rejected();
                }
                Err(e)
            }
        }
    }
}
