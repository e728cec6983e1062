//! Prometheus counters for reconciliation and classification.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Outcome label of a single rule operation.
pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_ERROR: &str = "error";

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub reconcile_cycles: IntCounter,
    pub reconcile_failures: IntCounter,
    pub cycle_duration: Histogram,
    /// Rule operations by `op` (add, remove, sweep) and `outcome`.
    pub rule_operations: IntCounterVec,
    /// Classified flows by `severity`.
    pub flows_classified: IntCounterVec,
    pub flows_rejected: IntCounter,
    pub capture_dropped: IntCounter,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_cycles =
            IntCounter::new("vaktpost_reconcile_cycles_total", "Completed reconciliation cycles")?;
        let reconcile_failures = IntCounter::new(
            "vaktpost_reconcile_failures_total",
            "Reconciliation cycles aborted before sweeping",
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vaktpost_reconcile_cycle_seconds",
                "Wall time of a reconciliation cycle",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        let rule_operations = IntCounterVec::new(
            Opts::new("vaktpost_rule_operations_total", "Firewall rule operations"),
            &["op", "outcome"],
        )?;
        let flows_classified = IntCounterVec::new(
            Opts::new("vaktpost_flows_classified_total", "Flow records classified"),
            &["severity"],
        )?;
        let flows_rejected = IntCounter::new(
            "vaktpost_flows_rejected_total",
            "Flow records whose classification failed",
        )?;
        let capture_dropped = IntCounter::new(
            "vaktpost_capture_dropped_total",
            "Flow records dropped because the forwarding queue was full",
        )?;

        registry.register(Box::new(reconcile_cycles.clone()))?;
        registry.register(Box::new(reconcile_failures.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(rule_operations.clone()))?;
        registry.register(Box::new(flows_classified.clone()))?;
        registry.register(Box::new(flows_rejected.clone()))?;
        registry.register(Box::new(capture_dropped.clone()))?;

        Ok(Self {
            registry,
            reconcile_cycles,
            reconcile_failures,
            cycle_duration,
            rule_operations,
            flows_classified,
            flows_rejected,
            capture_dropped,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn observe_cycle(&self, seconds: f64) {
        self.reconcile_cycles.inc();
        self.cycle_duration.observe(seconds);
    }

    pub fn inc_cycle_failure(&self) {
        self.reconcile_failures.inc();
    }

    pub fn inc_rule_op(&self, op: &str, ok: bool) {
        let outcome = if ok { OUTCOME_OK } else { OUTCOME_ERROR };
        self.rule_operations.with_label_values(&[op, outcome]).inc();
    }

    pub fn inc_classified(&self, severity: &str) {
        self.flows_classified.with_label_values(&[severity]).inc();
    }

    pub fn inc_rejected(&self) {
        self.flows_rejected.inc();
    }

    pub fn inc_capture_dropped(&self) {
        self.capture_dropped.inc();
    }

    pub fn rule_op_count(&self, op: &str, ok: bool) -> u64 {
        let outcome = if ok { OUTCOME_OK } else { OUTCOME_ERROR };
        self.rule_operations.with_label_values(&[op, outcome]).get()
    }

    pub fn classified_count(&self, severity: &str) -> u64 {
        self.flows_classified.with_label_values(&[severity]).get()
    }
}
