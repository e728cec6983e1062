use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vaktpost_core::policy::{Policy, PolicyDirection};
use vaktpost_core::store::MemoryPolicyStore;
use vaktpost_engine::{EngineError, EnforcementMode, PlanOptions, Reconciler, ReconcilerSettings};
use vaktpost_prevention::{
    ChainLayout, FirewallBackend, FirewallError, FirewallRule, Generation, ListedRule,
    MemoryFirewall, RuleDirection, RuleMatch,
};

fn ssh_block() -> Policy {
    Policy::new(1, "block-ssh", PolicyDirection::Ingress)
        .with_ip("10.0.0.5/32")
        .with_port("22")
}

fn setup(policies: Vec<Policy>, plan: PlanOptions) -> (Reconciler, Arc<MemoryFirewall>) {
    let firewall = Arc::new(MemoryFirewall::default());
    let reconciler = Reconciler::new(
        Arc::new(MemoryPolicyStore::new(policies)),
        firewall.clone(),
        ReconcilerSettings {
            plan,
            ..Default::default()
        },
    );
    (reconciler, firewall)
}

fn ingress(peer: &str, port: u16) -> RuleMatch {
    RuleMatch::new(RuleDirection::Ingress, peer.parse().unwrap(), port)
}

fn egress(peer: &str, port: u16) -> RuleMatch {
    RuleMatch::new(RuleDirection::Egress, peer.parse().unwrap(), port)
}

/// Operations of a [`FaultyFirewall`] that fail or stall.
#[derive(Default)]
struct Faults {
    failing_peer: Option<IpAddr>,
    slow_peer: Option<IpAddr>,
    failing_chain: Option<&'static str>,
    slow_chain: Option<&'static str>,
    delay: Duration,
}

/// In-memory firewall with injected failures and delays.
struct FaultyFirewall {
    inner: Arc<MemoryFirewall>,
    faults: Faults,
}

fn command_failure() -> FirewallError {
    FirewallError::Command {
        binary: "iptables".into(),
        exit_code: Some(4),
        stderr: "Resource temporarily unavailable".into(),
    }
}

#[async_trait]
impl FirewallBackend for FaultyFirewall {
    fn layout(&self) -> &ChainLayout {
        self.inner.layout()
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        let peer = Some(rule.matcher.peer);
        if peer == self.faults.failing_peer {
            return Err(command_failure());
        }
        if peer == self.faults.slow_peer {
            tokio::time::sleep(self.faults.delay).await;
        }
        self.inner.add_rule(rule).await
    }

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        self.inner.remove_rule(rule).await
    }

    async fn list_rules(&self, chain: &str) -> Result<Vec<ListedRule>, FirewallError> {
        if Some(chain) == self.faults.failing_chain {
            return Err(command_failure());
        }
        if Some(chain) == self.faults.slow_chain {
            tokio::time::sleep(self.faults.delay).await;
        }
        self.inner.list_rules(chain).await
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool, FirewallError> {
        self.inner.rule_exists(rule).await
    }
}

fn faulty_setup(
    policies: Vec<Policy>,
    faults: Faults,
    settings: ReconcilerSettings,
) -> (Reconciler, Arc<MemoryFirewall>) {
    let firewall = Arc::new(MemoryFirewall::default());
    let backend = FaultyFirewall {
        inner: firewall.clone(),
        faults,
    };
    let reconciler = Reconciler::new(
        Arc::new(MemoryPolicyStore::new(policies)),
        Arc::new(backend),
        settings,
    );
    (reconciler, firewall)
}

#[tokio::test]
async fn converges_to_one_rule_per_pair() {
    let (reconciler, firewall) = setup(vec![ssh_block()], PlanOptions::default());

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.errors, 0);

    let rule = FirewallRule::tagged(ingress("10.0.0.5", 22), report.generation);
    assert_eq!(firewall.count(&rule), 1);
    assert_eq!(firewall.rules("INPUT").len(), 1);
    assert!(firewall.rules("OUTPUT").is_empty());
}

#[tokio::test]
async fn repeated_cycles_keep_a_single_current_rule() {
    let (reconciler, firewall) = setup(vec![ssh_block()], PlanOptions::default());

    let first = reconciler.run_cycle().await.unwrap();
    let second = reconciler.run_cycle().await.unwrap();
    assert!(second.generation > first.generation);
    assert_eq!(second.swept, 1);

    let listed = firewall.rules("INPUT");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].generation(), Some(second.generation));
}

#[tokio::test]
async fn stale_generation_is_swept() {
    let (reconciler, firewall) = setup(vec![ssh_block()], PlanOptions::default());
    firewall.push_rule(FirewallRule::tagged(ingress("10.0.0.9", 80), Generation(42)));

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.swept, 1);

    let listed = firewall.rules("INPUT");
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].rule.as_ref().map(|r| r.matcher),
        Some(ingress("10.0.0.5", 22))
    );
}

#[tokio::test]
async fn foreign_and_untagged_rules_are_untouched() {
    let (reconciler, firewall) = setup(Vec::new(), PlanOptions::default());
    firewall.push_raw("-A INPUT -i lo -j ACCEPT").unwrap();
    firewall
        .push_raw("-A INPUT -s 10.0.0.1/32 -p tcp -m tcp --dport 22 -m comment --comment \"ops: keep\" -j DROP")
        .unwrap();
    firewall
        .push_raw("-A INPUT -s 10.0.0.2/32 -p udp -m comment --comment reconcile-7 -j ACCEPT")
        .unwrap();
    firewall.push_rule(FirewallRule::untagged(ingress("10.0.0.3", 443)));

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.swept, 0);
    assert_eq!(firewall.rules("INPUT").len(), 4);

    let purged = reconciler.purge(false).await.unwrap();
    assert!(purged.is_empty());
    assert_eq!(firewall.rules("INPUT").len(), 4);
}

#[tokio::test]
async fn removed_policy_is_garbage_collected() {
    let store = Arc::new(MemoryPolicyStore::new(vec![ssh_block()]));
    let firewall = Arc::new(MemoryFirewall::default());
    let reconciler = Reconciler::new(store.clone(), firewall.clone(), ReconcilerSettings::default());

    reconciler.run_cycle().await.unwrap();
    assert_eq!(firewall.rules("INPUT").len(), 1);

    store.replace(Vec::new());
    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.desired, 0);
    assert_eq!(report.swept, 1);
    assert!(firewall.rules("INPUT").is_empty());
}

#[tokio::test]
async fn egress_policies_land_in_the_egress_chain() {
    let policy = Policy::new(2, "no-exfil", PolicyDirection::Egress)
        .with_ip("203.0.113.7")
        .with_port("443");
    let (reconciler, firewall) = setup(vec![policy], PlanOptions::default());

    reconciler.run_cycle().await.unwrap();
    assert!(firewall.rules("INPUT").is_empty());
    let listed = firewall.rules("OUTPUT");
    assert_eq!(listed.len(), 1);
    assert!(listed[0].raw.contains("-d 203.0.113.7"));
}

#[tokio::test]
async fn whitelisted_peers_are_never_blocked() {
    let policy = Policy::new(3, "office", PolicyDirection::Ingress)
        .with_ip("10.1.2.3")
        .with_ip("198.51.100.4")
        .with_port("22");
    let (reconciler, firewall) = setup(
        vec![policy],
        PlanOptions {
            whitelist: vec!["10.0.0.0/8".parse().unwrap()],
            ..Default::default()
        },
    );

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 1);
    let listed = firewall.rules("INPUT");
    assert_eq!(listed.len(), 1);
    assert!(listed[0].raw.contains("198.51.100.4"));
}

#[tokio::test]
async fn toggle_mode_deforce_removes_the_inbound_block() {
    let firewall = Arc::new(MemoryFirewall::default());
    firewall.push_rule(FirewallRule::untagged(ingress("10.0.0.9", 80)));
    let policies = vec![
        Policy::new(1, "on", PolicyDirection::Enforce)
            .with_ip("10.0.0.5")
            .with_port("22"),
        Policy::new(2, "off", PolicyDirection::Deforce)
            .with_ip("10.0.0.9")
            .with_port("80"),
        Policy::new(3, "wrong-vocabulary", PolicyDirection::Egress)
            .with_ip("10.0.0.7")
            .with_port("25"),
    ];
    let reconciler = Reconciler::new(
        Arc::new(MemoryPolicyStore::new(policies)),
        firewall.clone(),
        ReconcilerSettings {
            plan: PlanOptions {
                mode: EnforcementMode::Toggle,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.skipped, 1);

    let listed = firewall.rules("INPUT");
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].rule.as_ref().map(|r| r.matcher),
        Some(ingress("10.0.0.5", 22))
    );
}

#[tokio::test]
async fn purge_removes_every_managed_rule() {
    let (reconciler, firewall) = setup(vec![ssh_block()], PlanOptions::default());
    reconciler.run_cycle().await.unwrap();
    firewall.push_rule(FirewallRule::tagged(ingress("10.0.0.9", 80), Generation(1)));
    firewall.push_raw("-A INPUT -i lo -j ACCEPT").unwrap();

    let listed = reconciler.purge(true).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(firewall.rules("INPUT").len(), 3);

    let purged = reconciler.purge(false).await.unwrap();
    assert_eq!(purged.len(), 2);
    let left = firewall.rules("INPUT");
    assert_eq!(left.len(), 1);
    assert!(!left[0].is_managed());
}

#[tokio::test]
async fn listing_is_consistent_with_the_backend_trait() {
    let (reconciler, firewall) = setup(vec![ssh_block()], PlanOptions::default());
    let report = reconciler.run_cycle().await.unwrap();

    let listed = firewall.list_rules("INPUT").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].raw.contains(&report.generation.tag()));
}

#[tokio::test]
async fn failed_add_does_not_stop_siblings_or_the_sweep() {
    let policy = Policy::new(1, "block-ssh", PolicyDirection::Ingress)
        .with_ip("10.0.0.5")
        .with_ip("10.0.0.6")
        .with_port("22");
    let (reconciler, firewall) = faulty_setup(
        vec![policy],
        Faults {
            failing_peer: Some("10.0.0.6".parse().unwrap()),
            ..Default::default()
        },
        ReconcilerSettings::default(),
    );
    firewall.push_rule(FirewallRule::tagged(ingress("10.0.0.9", 80), Generation(42)));

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.desired, 2);
    assert_eq!(report.applied, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.swept, 1);

    let listed = firewall.rules("INPUT");
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].rule.as_ref().map(|r| r.matcher),
        Some(ingress("10.0.0.5", 22))
    );
}

#[tokio::test]
async fn unlistable_chain_does_not_block_sweeping_the_other() {
    let (reconciler, firewall) = faulty_setup(
        Vec::new(),
        Faults {
            failing_chain: Some("INPUT"),
            ..Default::default()
        },
        ReconcilerSettings::default(),
    );
    firewall.push_rule(FirewallRule::tagged(ingress("10.0.0.9", 80), Generation(42)));
    firewall.push_rule(FirewallRule::tagged(egress("203.0.113.7", 443), Generation(42)));

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.swept, 1);
    assert!(firewall.rules("OUTPUT").is_empty());
    assert_eq!(firewall.rules("INPUT").len(), 1);
}

#[tokio::test]
async fn slow_rule_operation_times_out_as_an_error() {
    let policy = Policy::new(1, "block-ssh", PolicyDirection::Ingress)
        .with_ip("10.0.0.5")
        .with_ip("10.0.0.6")
        .with_port("22");
    let (reconciler, firewall) = faulty_setup(
        vec![policy],
        Faults {
            slow_peer: Some("10.0.0.6".parse().unwrap()),
            delay: Duration::from_secs(2),
            ..Default::default()
        },
        ReconcilerSettings {
            operation_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.errors, 1);
    assert!(report.duration < Duration::from_secs(2));

    let slow = FirewallRule::tagged(ingress("10.0.0.6", 22), report.generation);
    assert_eq!(firewall.count(&slow), 0);
}

#[tokio::test]
async fn cycle_deadline_bounds_the_whole_pass() {
    let (reconciler, _firewall) = faulty_setup(
        vec![ssh_block()],
        Faults {
            slow_chain: Some("INPUT"),
            delay: Duration::from_secs(2),
            ..Default::default()
        },
        ReconcilerSettings {
            operation_timeout: Duration::from_secs(5),
            cycle_deadline: Duration::from_millis(100),
            ..Default::default()
        },
    );

    let started = std::time::Instant::now();
    let err = reconciler.run_cycle().await.unwrap_err();
    assert!(
        matches!(err, EngineError::Timeout { ref operation, .. } if operation == "reconciliation cycle")
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}
