/*!
# Runtime wiring

Builds the long-running services from a loaded [`VaktpostConfig`] so every
frontend shares the same assembly: the reconciler, the verdict service, the
capture client, standalone enforcement, purge and log queries.
*/

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use vaktpost_capture::{CaptureFilter, CaptureOptions, Forwarder, ForwarderOptions, LocalAddrs};
use vaktpost_config::VaktpostConfig;
use vaktpost_core::events::Verdict;
use vaktpost_core::sink::{JsonlLogSink, LogEntry, LogQuery, LogSink};
use vaktpost_core::store::{CachedPolicyStore, FilePolicyStore, PolicyStore};
use vaktpost_core::time::TimestampParser;
use vaktpost_prevention::{
    ChainLayout, FirewallBackend, IptablesBackend, ListedRule, MemoryFirewall,
};
use vaktpost_telemetry::{MetricsExporter, MetricsRecorder};
use vaktpost_transport::TransportServer;

use crate::enforcer::{EnforceReport, Enforcer};
use crate::locks::ChainLocks;
use crate::plan::PlanOptions;
use crate::reconciler::{CycleReport, Reconciler, ReconcilerSettings};
use crate::verdict::VerdictService;
use crate::EngineError;

pub fn chain_layout(config: &VaktpostConfig) -> ChainLayout {
    ChainLayout::new(&config.firewall.ingress_chain, &config.firewall.egress_chain)
}

pub fn plan_options(config: &VaktpostConfig) -> Result<PlanOptions, EngineError> {
    Ok(PlanOptions {
        mode: config.firewall.enforcement_mode.parse()?,
        whitelist: config.firewall.whitelist.clone(),
        src_port: None,
    })
}

pub fn reconciler_settings(config: &VaktpostConfig) -> Result<ReconcilerSettings, EngineError> {
    let r = &config.reconciler;
    Ok(ReconcilerSettings {
        interval: Duration::from_millis(r.interval_ms),
        max_concurrency: r.max_concurrency,
        operation_timeout: Duration::from_millis(r.operation_timeout_ms),
        cycle_deadline: Duration::from_millis(r.cycle_deadline_ms),
        plan: plan_options(config)?,
    })
}

pub fn timestamp_parser(config: &VaktpostConfig) -> TimestampParser {
    let parser = TimestampParser::new(&config.classifier.time_format);
    if config.classifier.apply_offset {
        parser
    } else {
        parser.wall_clock()
    }
}

pub fn policy_store(config: &VaktpostConfig) -> Arc<dyn PolicyStore> {
    Arc::new(FilePolicyStore::new(&config.store.policies_path))
}

/// The live firewall, or an in-memory stand-in when `dry_run` is set.
/// The live backend is probed first; a missing binary is fatal.
pub async fn firewall_backend(
    config: &VaktpostConfig,
    dry_run: bool,
) -> Result<Arc<dyn FirewallBackend>, EngineError> {
    let layout = chain_layout(config);
    if dry_run {
        info!("Dry run: rules are applied to an in-memory firewall");
        return Ok(Arc::new(MemoryFirewall::new(layout)));
    }
    let fw = &config.firewall;
    let mut backend = IptablesBackend::new(&fw.binary, &fw.table, layout);
    if let Some(v6) = &fw.ipv6_binary {
        backend = backend.with_ipv6(v6);
    }
    backend.probe().await?;
    Ok(Arc::new(backend))
}

/// Counters of one running command. When `telemetry.metrics_addr` is set
/// they are also served for scraping until this is dropped.
struct Metrics {
    recorder: MetricsRecorder,
    exporter: Option<JoinHandle<()>>,
}

impl Drop for Metrics {
    fn drop(&mut self) {
        if let Some(exporter) = self.exporter.take() {
            exporter.abort();
        }
    }
}

async fn metrics(config: &VaktpostConfig) -> Result<Metrics, EngineError> {
    let recorder = MetricsRecorder::new().map_err(|e| EngineError::Telemetry(e.to_string()))?;
    let Some(addr) = &config.telemetry.metrics_addr else {
        return Ok(Metrics {
            recorder,
            exporter: None,
        });
    };

    let exporter = MetricsExporter::bind(addr, recorder.clone())
        .await
        .map_err(|e| EngineError::Telemetry(format!("failed to listen on {addr}: {e}")))?;
    let handle = tokio::spawn(async move {
        if let Err(e) = exporter.serve(std::future::pending()).await {
            warn!(error = %e, "Metrics endpoint stopped");
        }
    });
    Ok(Metrics {
        recorder,
        exporter: Some(handle),
    })
}

/// Run the reconciliation loop, or a single cycle with `once`.
#[instrument(level = "info", name = "reconcile", skip(config, shutdown))]
pub async fn run_reconciler<F>(
    config: &VaktpostConfig,
    once: bool,
    dry_run: bool,
    shutdown: F,
) -> Result<Option<CycleReport>, EngineError>
where
    F: Future<Output = ()>,
{
    let backend = firewall_backend(config, dry_run).await?;
    let metrics = metrics(config).await?;
    let reconciler = Reconciler::new(policy_store(config), backend, reconciler_settings(config)?)
        .with_metrics(metrics.recorder.clone());

    if once {
        return reconciler.run_cycle().await.map(Some);
    }
    reconciler.run(shutdown).await;
    Ok(None)
}

/// Serve verdicts on the configured listener until `shutdown` resolves.
#[instrument(level = "info", name = "serve", skip(config, shutdown))]
pub async fn run_verdict_service<F>(config: &VaktpostConfig, shutdown: F) -> Result<(), EngineError>
where
    F: Future<Output = ()>,
{
    let ttl = Duration::from_millis(config.classifier.policy_cache_ttl_ms);
    let store = CachedPolicyStore::new(FilePolicyStore::new(&config.store.policies_path), ttl);
    let metrics = metrics(config).await?;
    let sink = JsonlLogSink::new(&config.store.log_dir);
    let service = VerdictService::new(Arc::new(store), Arc::new(sink), timestamp_parser(config))
        .with_metrics(metrics.recorder.clone());

    let server = TransportServer::bind(&config.transport.listen_addr)
        .await?
        .with_max_line_bytes(config.transport.max_line_bytes);
    server.serve(Arc::new(service), shutdown).await?;
    Ok(())
}

/// Capture on the configured interface and stream flows to the verdict
/// service, handing each verdict to `on_verdict`.
#[instrument(level = "info", name = "capture", skip(config, shutdown, on_verdict))]
pub async fn run_capture<F>(
    config: &VaktpostConfig,
    on_verdict: Arc<dyn Fn(Verdict) + Send + Sync>,
    shutdown: F,
) -> Result<u64, EngineError>
where
    F: Future<Output = ()>,
{
    let c = &config.capture;
    let filter: CaptureFilter = c.filter.parse()?;

    let mut excluded_ports = c.excluded_ports.clone();
    if let Ok(addr) = config.transport.server_addr.parse::<SocketAddr>() {
        excluded_ports.push(addr.port());
    }
    let options = CaptureOptions {
        interface: c.interface.clone(),
        filter,
        excluded_ports,
        promiscuous: c.promiscuous,
        snaplen: c.snaplen,
        buffer_size: c.buffer_size,
    };

    let local = LocalAddrs::discover()?;
    let metrics = metrics(config).await?;
    let (forwarder, workers) = Forwarder::spawn(
        ForwarderOptions {
            server_addr: config.transport.server_addr.clone(),
            connect_timeout: Duration::from_millis(config.transport.connect_timeout_ms),
            reply_timeout: Duration::from_millis(config.transport.reply_timeout_ms),
            workers: c.workers,
            queue_depth: c.queue_depth,
        },
        on_verdict,
        Some(metrics.recorder.clone()),
    );

    let terminate = Arc::new(AtomicBool::new(false));
    let capture = {
        let terminate = Arc::clone(&terminate);
        let forwarder = forwarder.clone();
        tokio::task::spawn_blocking(move || {
            vaktpost_capture::run(&options, &local, &terminate, |flow| {
                forwarder.submit(flow);
            })
        })
    };

    tokio::pin!(capture);
    let captured = tokio::select! {
        joined = &mut capture => joined?,
        _ = shutdown => {
            terminate.store(true, Ordering::Relaxed);
            capture.await?
        }
    };

    let dropped = forwarder.dropped();
    drop(forwarder);
    for worker in workers {
        worker.await?;
    }
    let captured = captured?;
    info!(captured, dropped, "Capture finished");
    Ok(captured)
}

/// Apply or remove one policy's rules right away.
///
/// This runs as its own process, so its chain locks are private; a
/// reconciler running elsewhere is ordered against it by `iptables -w`.
pub async fn enforce_policy(
    config: &VaktpostConfig,
    policy_id: u64,
    app_port: Option<u16>,
    remove: bool,
) -> Result<EnforceReport, EngineError> {
    let backend = firewall_backend(config, false).await?;
    let enforcer = Enforcer::new(
        policy_store(config),
        backend,
        Arc::new(ChainLocks::new()),
        plan_options(config)?,
        Duration::from_millis(config.reconciler.operation_timeout_ms),
    );
    enforcer.enforce(policy_id, app_port, remove).await
}

/// Remove every managed rule from the live firewall. With `dry_run` the
/// rules are only listed.
pub async fn purge(config: &VaktpostConfig, dry_run: bool) -> Result<Vec<ListedRule>, EngineError> {
    let backend = firewall_backend(config, false).await?;
    let reconciler = Reconciler::new(policy_store(config), backend, reconciler_settings(config)?);
    reconciler.purge(dry_run).await
}

pub async fn query_logs(
    config: &VaktpostConfig,
    query: &LogQuery,
) -> Result<Vec<LogEntry>, EngineError> {
    let sink = JsonlLogSink::new(&config.store.log_dir);
    Ok(sink.query(query).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::EnforcementMode;

    #[test]
    fn settings_follow_config() {
        let mut config = VaktpostConfig::default();
        config.reconciler.interval_ms = 250;
        config.firewall.enforcement_mode = "toggle".into();
        config.firewall.whitelist = vec!["10.0.0.0/8".parse().unwrap()];

        let settings = reconciler_settings(&config).unwrap();
        assert_eq!(settings.interval, Duration::from_millis(250));
        assert_eq!(settings.plan.mode, EnforcementMode::Toggle);
        assert_eq!(settings.plan.whitelist.len(), 1);
    }

    #[test]
    fn timestamp_offset_handling_follows_config() {
        let mut config = VaktpostConfig::default();
        let wire = "2024-05-01 12:00:00 +0200 CEST";
        let utc = timestamp_parser(&config).parse(wire).unwrap();
        assert_eq!(utc.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        config.classifier.apply_offset = false;
        let written = timestamp_parser(&config).parse(wire).unwrap();
        assert_eq!(written.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut config = VaktpostConfig::default();
        config.firewall.enforcement_mode = "both".into();
        assert!(matches!(
            reconciler_settings(&config),
            Err(EngineError::UnknownMode(_))
        ));
    }

    #[tokio::test]
    async fn metrics_endpoint_follows_config() {
        let config = VaktpostConfig::default();
        let quiet = metrics(&config).await.unwrap();
        assert!(quiet.exporter.is_none());

        let mut config = VaktpostConfig::default();
        config.telemetry.metrics_addr = Some("127.0.0.1:0".into());
        let served = metrics(&config).await.unwrap();
        let handle = served.exporter.as_ref().unwrap();
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn dry_run_reconciles_against_memory() {
        let dir = tempfile::tempdir().unwrap();
        let policies = dir.path().join("policies.yaml");
        std::fs::write(
            &policies,
            "policies:\n  - id: 1\n    name: ssh\n    direction: ingress\n    ips: [\"10.0.0.5\"]\n    ports: [\"22\"]\n",
        )
        .unwrap();

        let mut config = VaktpostConfig::default();
        config.store.policies_path = policies;
        let report = run_reconciler(&config, true, true, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.errors, 0);
    }
}
