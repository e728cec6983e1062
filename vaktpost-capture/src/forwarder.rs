//! Bounded hand-off from the capture loop to the verdict stream.
//!
//! The capture thread never waits on the network: records go into a fixed
//! size queue with `try_send` and are dropped (and counted) when it is full.
//! A fixed set of workers drains the queue, each over its own connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vaktpost_core::events::{FlowRecord, Verdict};
use vaktpost_telemetry::MetricsRecorder;
use vaktpost_transport::{TransportClient, TransportError};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Called for every verdict a worker receives.
pub type VerdictHandler = Arc<dyn Fn(Verdict) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    pub server_addr: String,
    pub connect_timeout: Duration,
    /// A worker that waits longer for a verdict drops its connection.
    pub reply_timeout: Duration,
    pub workers: usize,
    pub queue_depth: usize,
}

#[derive(Clone)]
pub struct Forwarder {
    tx: mpsc::Sender<FlowRecord>,
    dropped: Arc<AtomicU64>,
    metrics: Option<MetricsRecorder>,
}

impl Forwarder {
    fn channel(
        queue_depth: usize,
        metrics: Option<MetricsRecorder>,
    ) -> (Self, mpsc::Receiver<FlowRecord>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let forwarder = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            metrics,
        };
        (forwarder, rx)
    }

    /// Start the worker pool. Workers stop once every `Forwarder` clone has
    /// been dropped and the queue is drained.
    pub fn spawn(
        options: ForwarderOptions,
        on_verdict: VerdictHandler,
        metrics: Option<MetricsRecorder>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (forwarder, rx) = Self::channel(options.queue_depth, metrics);
        let rx = Arc::new(Mutex::new(rx));
        let workers = options.workers.max(1);
        info!(
            workers,
            queue_depth = options.queue_depth,
            server = %options.server_addr,
            "Starting flow forwarders"
        );

        let handles = (0..workers)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let options = options.clone();
                let on_verdict = Arc::clone(&on_verdict);
                tokio::spawn(worker(id, rx, options, on_verdict))
            })
            .collect();
        (forwarder, handles)
    }

    /// Queue a record without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, record: FlowRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(metrics) = &self.metrics {
                    metrics.inc_capture_dropped();
                }
                if dropped.is_power_of_two() {
                    warn!(dropped, "Forwarding queue full, dropping flow records");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Forwarders stopped, discarding flow record");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<FlowRecord>>>,
    options: ForwarderOptions,
    on_verdict: VerdictHandler,
) {
    let mut client: Option<TransportClient> = None;
    let mut retry_at: Option<Instant> = None;

    loop {
        let next = rx.lock().await.recv().await;
        let Some(record) = next else { break };

        if client.is_none() {
            if retry_at.is_some_and(|at| Instant::now() < at) {
                debug!(worker = id, "Verdict service unreachable, dropping flow record");
                continue;
            }
            match TransportClient::connect(&options.server_addr, options.connect_timeout).await {
                Ok(connected) => {
                    debug!(worker = id, "Connected to verdict service");
                    client = Some(connected.with_reply_timeout(options.reply_timeout));
                    retry_at = None;
                }
                Err(e) => {
                    warn!(worker = id, error = %e, "Failed to connect to verdict service");
                    retry_at = Some(Instant::now() + RECONNECT_BACKOFF);
                    continue;
                }
            }
        }
        let Some(conn) = client.as_mut() else { continue };

        match conn.classify(&record).await {
            Ok(verdict) => on_verdict(verdict),
            Err(TransportError::Rejected(reason)) => {
                warn!(worker = id, source = %record.source, %reason, "Flow record rejected");
            }
            Err(e) => {
                warn!(worker = id, error = %e, "Verdict stream failed, reconnecting");
                client = None;
            }
        }
    }

    debug!(worker = id, "Forwarder stopped");
}
