//! Reconciliation control loop.
//!
//! Each cycle loads the policy snapshot, mints a new generation, applies the
//! desired rules tagged with it, then sweeps every managed rule carrying any
//! other generation. Apply is fully awaited before the sweep starts, so a
//! rule re-added this cycle is never mistaken for stale.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn, Instrument};
use vaktpost_core::store::PolicyStore;
use vaktpost_prevention::{FirewallBackend, FirewallRule, Generation, ListedRule};
use vaktpost_telemetry::MetricsRecorder;

use crate::error::with_timeout;
use crate::locks::ChainLocks;
use crate::mode::RuleAction;
use crate::plan::{plan, DesiredRule, PlanOptions};
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    pub max_concurrency: usize,
    pub operation_timeout: Duration,
    pub cycle_deadline: Duration,
    pub plan: PlanOptions,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_concurrency: 16,
            operation_timeout: Duration::from_secs(5),
            cycle_deadline: Duration::from_secs(60),
            plan: PlanOptions::default(),
        }
    }
}

/// Outcome counts of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub generation: Generation,
    pub desired: usize,
    pub applied: usize,
    pub removed: usize,
    pub swept: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration: Duration,
}

pub struct Reconciler {
    store: Arc<dyn PolicyStore>,
    backend: Arc<dyn FirewallBackend>,
    locks: Arc<ChainLocks>,
    settings: ReconcilerSettings,
    metrics: Option<MetricsRecorder>,
    last_generation: Mutex<u64>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        backend: Arc<dyn FirewallBackend>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            backend,
            locks: Arc::new(ChainLocks::new()),
            settings,
            metrics: None,
            last_generation: Mutex::new(0),
        }
    }

    /// Share chain locks with other writers of the same firewall.
    pub fn with_locks(mut self, locks: Arc<ChainLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn locks(&self) -> Arc<ChainLocks> {
        Arc::clone(&self.locks)
    }

    /// Unix seconds, bumped past the previous generation when the clock has
    /// not advanced (or went backwards).
    pub fn next_generation(&self) -> Generation {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut last = self.last_generation.lock();
        let next = now.max(*last + 1);
        *last = next;
        Generation(next)
    }

    /// Tick every `interval` until `shutdown` resolves. Cycles never overlap;
    /// a slow cycle delays the next tick instead of bursting.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(
            interval = ?self.settings.interval,
            mode = %self.settings.plan.mode,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Reconciliation cycle failed");
                    }
                }
            }
        }
        info!("Reconciler stopped");
    }

    /// One full load → apply → sweep pass, bounded by the cycle deadline.
    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        let result = with_timeout(
            "reconciliation cycle",
            self.settings.cycle_deadline,
            self.cycle(),
        )
        .await;
        match &result {
            Ok(report) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_cycle(report.duration.as_secs_f64());
                }
            }
            Err(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_cycle_failure();
                }
            }
        }
        result
    }

    #[instrument(name = "reconcile_cycle", skip(self), fields(generation))]
    async fn cycle(&self) -> Result<CycleReport, EngineError> {
        let started = Instant::now();

        let policies = self.store.list_policies().await?;
        let generation = self.next_generation();
        tracing::Span::current().record("generation", generation.0);

        let plan = plan(&policies, &self.settings.plan);
        let mut report = CycleReport {
            generation,
            desired: plan.rules.len(),
            skipped: plan.skipped,
            ..Default::default()
        };
        debug!(
            policies = policies.len(),
            desired = report.desired,
            "Loaded policy snapshot"
        );

        self.apply(plan.rules, generation, &mut report).await?;
        self.sweep(generation, &mut report).await;

        report.duration = started.elapsed();
        info!(
            generation = generation.0,
            desired = report.desired,
            applied = report.applied,
            removed = report.removed,
            swept = report.swept,
            skipped = report.skipped,
            errors = report.errors,
            duration_ms = report.duration.as_millis() as u64,
            "Reconciliation cycle complete"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        rules: Vec<DesiredRule>,
        generation: Generation,
        report: &mut CycleReport,
    ) -> Result<(), EngineError> {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for desired in rules {
            let permit = Arc::clone(&permits).acquire_owned().await?;
            let backend = Arc::clone(&self.backend);
            let locks = Arc::clone(&self.locks);
            let timeout = self.settings.operation_timeout;
            let span = tracing::debug_span!("apply_rule", policy = desired.policy_id);
            workers.spawn(
                async move {
                    let _permit = permit;
                    let outcome = apply_one(&*backend, &locks, timeout, &desired, generation).await;
                    (desired, outcome)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            let (desired, outcome) = joined?;
            let op = desired.action.to_string();
            match outcome {
                Ok(()) => {
                    debug!(rule = %desired.matcher, action = %desired.action, "Rule converged");
                    match desired.action {
                        RuleAction::Add => report.applied += 1,
                        RuleAction::Remove => report.removed += 1,
                    }
                    self.count(&op, true);
                }
                Err(e) => {
                    warn!(
                        policy = desired.policy_id,
                        name = %desired.policy_name,
                        rule = %desired.matcher,
                        action = %desired.action,
                        error = %e,
                        "Failed to apply rule"
                    );
                    report.errors += 1;
                    self.count(&op, false);
                }
            }
        }
        Ok(())
    }

    /// A chain that cannot be listed is counted as an error and left for the
    /// next cycle; the other chain is still swept.
    async fn sweep(&self, current: Generation, report: &mut CycleReport) {
        let layout = self.backend.layout().clone();
        for chain in layout.chains() {
            let _guard = self.locks.lock(chain).await;
            let listed = with_timeout(
                format!("listing {chain}"),
                self.settings.operation_timeout,
                self.backend.list_rules(chain),
            )
            .await;
            let listed = match listed {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(chain, error = %e, "Failed to list chain, sweep skipped");
                    report.errors += 1;
                    self.count("list", false);
                    continue;
                }
            };

            for stale in listed.iter().filter(|l| is_stale(l, current)) {
                let Some(rule) = &stale.rule else {
                    warn!(chain, rule = %stale.raw, "Managed tag on an unrecognized rule, skipped");
                    continue;
                };
                let removed = with_timeout(
                    format!("sweeping {rule}"),
                    self.settings.operation_timeout,
                    self.backend.remove_rule(rule),
                )
                .await;
                match removed {
                    Ok(()) => {
                        debug!(chain, %rule, "Swept stale rule");
                        report.swept += 1;
                        self.count("sweep", true);
                    }
                    Err(e) => {
                        warn!(chain, %rule, error = %e, "Failed to sweep stale rule");
                        report.errors += 1;
                        self.count("sweep", false);
                    }
                }
            }
        }
    }

    /// Remove every managed rule regardless of generation. Foreign rules are
    /// left alone. With `dry_run` nothing is removed.
    pub async fn purge(&self, dry_run: bool) -> Result<Vec<ListedRule>, EngineError> {
        let layout = self.backend.layout().clone();
        let mut purged = Vec::new();
        for chain in layout.chains() {
            let _guard = self.locks.lock(chain).await;
            let listed = with_timeout(
                format!("listing {chain}"),
                self.settings.operation_timeout,
                self.backend.list_rules(chain),
            )
            .await?;

            for managed in listed.into_iter().filter(ListedRule::is_managed) {
                let Some(rule) = &managed.rule else {
                    warn!(chain, rule = %managed.raw, "Managed tag on an unrecognized rule, skipped");
                    continue;
                };
                if !dry_run {
                    with_timeout(
                        format!("purging {rule}"),
                        self.settings.operation_timeout,
                        self.backend.remove_rule(rule),
                    )
                    .await?;
                }
                info!(chain, %rule, dry_run, "Purged managed rule");
                purged.push(managed);
            }
        }
        Ok(purged)
    }

    fn count(&self, op: &str, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_rule_op(op, ok);
        }
    }
}

fn is_stale(listed: &ListedRule, current: Generation) -> bool {
    matches!(listed.generation(), Some(g) if g != current)
}

async fn apply_one(
    backend: &dyn FirewallBackend,
    locks: &ChainLocks,
    timeout: Duration,
    desired: &DesiredRule,
    generation: Generation,
) -> Result<(), EngineError> {
    let chain = backend.layout().chain_for(desired.matcher.direction).to_string();
    let _guard = locks.lock(&chain).await;
    match desired.action {
        RuleAction::Add => {
            let rule = FirewallRule::tagged(desired.matcher, generation);
            with_timeout(format!("adding {rule}"), timeout, backend.add_rule(&rule)).await
        }
        RuleAction::Remove => {
            let rule = FirewallRule::untagged(desired.matcher);
            with_timeout(format!("removing {rule}"), timeout, backend.remove_rule(&rule)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaktpost_core::store::MemoryPolicyStore;
    use vaktpost_prevention::MemoryFirewall;

    fn reconciler() -> Reconciler {
        Reconciler::new(
            Arc::new(MemoryPolicyStore::new(Vec::new())),
            Arc::new(MemoryFirewall::default()),
            ReconcilerSettings::default(),
        )
    }

    #[test]
    fn generations_strictly_increase() {
        let r = reconciler();
        let a = r.next_generation();
        let b = r.next_generation();
        let c = r.next_generation();
        assert!(a < b && b < c);
    }

    #[test]
    fn generation_survives_clock_going_backwards() {
        let r = reconciler();
        *r.last_generation.lock() = u64::MAX / 2;
        assert_eq!(r.next_generation(), Generation(u64::MAX / 2 + 1));
    }

    #[tokio::test]
    async fn empty_store_is_a_clean_cycle() {
        let report = reconciler().run_cycle().await.unwrap();
        assert_eq!(report.desired, 0);
        assert_eq!(report.errors, 0);
        assert_eq!(report.swept, 0);
    }
}
