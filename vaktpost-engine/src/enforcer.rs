//! Standalone enforcement of a single policy.
//!
//! Installs or deletes one policy's rules immediately instead of waiting for
//! the next reconciliation cycle. Rules are untagged, so the reconciler's
//! sweep never touches them; a `deforce` policy in toggle mode removes them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vaktpost_core::store::PolicyStore;
use vaktpost_prevention::{FirewallBackend, FirewallRule};

use crate::error::with_timeout;
use crate::locks::ChainLocks;
use crate::mode::RuleAction;
use crate::plan::{plan, PlanOptions};
use crate::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnforceReport {
    pub added: usize,
    pub removed: usize,
    pub errors: usize,
}

pub struct Enforcer {
    store: Arc<dyn PolicyStore>,
    backend: Arc<dyn FirewallBackend>,
    locks: Arc<ChainLocks>,
    options: PlanOptions,
    operation_timeout: Duration,
}

impl Enforcer {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        backend: Arc<dyn FirewallBackend>,
        locks: Arc<ChainLocks>,
        options: PlanOptions,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            locks,
            options,
            operation_timeout,
        }
    }

    /// Apply policy `id`, narrowed to `app_port` as source port when given.
    /// With `remove` every rule the policy would install is deleted instead.
    pub async fn enforce(
        &self,
        id: u64,
        app_port: Option<u16>,
        remove: bool,
    ) -> Result<EnforceReport, EngineError> {
        let policies = self.store.list_policies().await?;
        let policy = policies
            .into_iter()
            .find(|p| p.id == id)
            .ok_or(EngineError::PolicyNotFound(id))?;

        let options = PlanOptions {
            src_port: app_port,
            ..self.options.clone()
        };
        let plan = plan(std::slice::from_ref(&policy), &options);
        let mut report = EnforceReport::default();

        for desired in plan.rules {
            let action = if remove {
                RuleAction::Remove
            } else {
                desired.action
            };
            let rule = FirewallRule::untagged(desired.matcher);
            let chain = self
                .backend
                .layout()
                .chain_for(rule.matcher.direction)
                .to_string();
            let _guard = self.locks.lock(&chain).await;

            let outcome = match action {
                RuleAction::Add => {
                    with_timeout(
                        format!("adding {rule}"),
                        self.operation_timeout,
                        self.backend.add_rule(&rule),
                    )
                    .await
                }
                RuleAction::Remove => {
                    with_timeout(
                        format!("removing {rule}"),
                        self.operation_timeout,
                        self.backend.remove_rule(&rule),
                    )
                    .await
                }
            };

            match (outcome, action) {
                (Ok(()), RuleAction::Add) => report.added += 1,
                (Ok(()), RuleAction::Remove) => report.removed += 1,
                (Err(e), _) => {
                    warn!(policy = id, %rule, %action, error = %e, "Enforcement failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            policy = id,
            name = %policy.name,
            added = report.added,
            removed = report.removed,
            errors = report.errors,
            "Policy enforcement complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::EnforcementMode;
    use vaktpost_core::policy::{Policy, PolicyDirection};
    use vaktpost_core::store::MemoryPolicyStore;
    use vaktpost_prevention::{MemoryFirewall, RuleDirection, RuleMatch};

    fn setup(mode: EnforcementMode, policies: Vec<Policy>) -> (Enforcer, Arc<MemoryFirewall>) {
        let firewall = Arc::new(MemoryFirewall::default());
        let enforcer = Enforcer::new(
            Arc::new(MemoryPolicyStore::new(policies)),
            firewall.clone(),
            Arc::new(ChainLocks::new()),
            PlanOptions {
                mode,
                ..Default::default()
            },
            Duration::from_secs(1),
        );
        (enforcer, firewall)
    }

    #[tokio::test]
    async fn installs_untagged_rules_with_app_port() {
        let policy = Policy::new(7, "ssh", PolicyDirection::Ingress)
            .with_ip("10.0.0.5")
            .with_port("22");
        let (enforcer, firewall) = setup(EnforcementMode::Directional, vec![policy]);

        let report = enforcer.enforce(7, Some(5051), false).await.unwrap();
        assert_eq!(report.added, 1);

        let rules = firewall.rules("INPUT");
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].is_managed());
        let expected = RuleMatch::new(RuleDirection::Ingress, "10.0.0.5".parse().unwrap(), 22)
            .with_src_port(Some(5051));
        assert_eq!(rules[0].rule.as_ref().unwrap().matcher, expected);
    }

    #[tokio::test]
    async fn remove_flag_deletes_what_enforce_added() {
        let policy = Policy::new(7, "ssh", PolicyDirection::Ingress)
            .with_ip("10.0.0.5")
            .with_port("22");
        let (enforcer, firewall) = setup(EnforcementMode::Directional, vec![policy]);

        enforcer.enforce(7, None, false).await.unwrap();
        let report = enforcer.enforce(7, None, true).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(firewall.rules("INPUT").is_empty());
    }

    #[tokio::test]
    async fn deforce_removes_enforced_rule_in_toggle_mode() {
        let enforce = Policy::new(1, "on", PolicyDirection::Enforce)
            .with_ip("10.0.0.9")
            .with_port("80");
        let deforce = Policy::new(2, "off", PolicyDirection::Deforce)
            .with_ip("10.0.0.9")
            .with_port("80");
        let (enforcer, firewall) = setup(EnforcementMode::Toggle, vec![enforce, deforce]);

        enforcer.enforce(1, None, false).await.unwrap();
        assert_eq!(firewall.rules("INPUT").len(), 1);
        let report = enforcer.enforce(2, None, false).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(firewall.rules("INPUT").is_empty());
    }

    #[tokio::test]
    async fn waits_for_a_chain_held_by_a_shared_lock_owner() {
        let policy = Policy::new(7, "ssh", PolicyDirection::Ingress)
            .with_ip("10.0.0.5")
            .with_port("22");
        let firewall = Arc::new(MemoryFirewall::default());
        let locks = Arc::new(ChainLocks::new());
        let enforcer = Enforcer::new(
            Arc::new(MemoryPolicyStore::new(vec![policy])),
            firewall.clone(),
            Arc::clone(&locks),
            PlanOptions::default(),
            Duration::from_secs(1),
        );

        let held = locks.lock("INPUT").await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), enforcer.enforce(7, None, false)).await;
        assert!(blocked.is_err());
        assert!(firewall.rules("INPUT").is_empty());

        drop(held);
        let report = enforcer.enforce(7, None, false).await.unwrap();
        assert_eq!(report.added, 1);
    }

    #[tokio::test]
    async fn unknown_policy_is_an_error() {
        let (enforcer, _) = setup(EnforcementMode::Directional, vec![]);
        assert!(matches!(
            enforcer.enforce(42, None, false).await,
            Err(EngineError::PolicyNotFound(42))
        ));
    }
}
