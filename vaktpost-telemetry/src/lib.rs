//! # Vaktpost Telemetry
//!
//! Structured logging and Prometheus counters shared by the reconciler,
//! the verdict service and the capture client, plus an optional HTTP
//! endpoint Prometheus can scrape them from.

pub mod exporter;
pub mod logging;
pub mod metrics;

pub use exporter::MetricsExporter;
pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
