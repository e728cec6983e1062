//! Desired rule computation.
//!
//! Expands every policy into one rule per (ip, port) pair. Recomputed from
//! scratch each cycle; nothing here remembers previous cycles.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{debug, warn};
use vaktpost_core::policy::Policy;
use vaktpost_prevention::{RuleDirection, RuleMatch};

use crate::mode::{EnforcementMode, RuleAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRule {
    pub policy_id: u64,
    pub policy_name: String,
    pub action: RuleAction,
    pub matcher: RuleMatch,
}

#[derive(Debug, Default, Clone)]
pub struct Plan {
    pub rules: Vec<DesiredRule>,
    /// Pairs dropped for bad literals, mode mismatch or the whitelist.
    pub skipped: usize,
    /// (peer, port) pairs declared with more than one action or direction.
    pub conflicts: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Settings that shape the expansion.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub mode: EnforcementMode,
    pub whitelist: Vec<IpNetwork>,
    /// Narrows every rule to this source port (standalone enforcement).
    pub src_port: Option<u16>,
}

pub fn plan(policies: &[Policy], options: &PlanOptions) -> Plan {
    let mut out = Plan::default();
    let mut seen = BTreeSet::new();
    let mut intents: BTreeMap<(IpAddr, u16), BTreeSet<(RuleAction, RuleDirection)>> =
        BTreeMap::new();

    for policy in policies {
        let Some((action, direction)) = options.mode.resolve(policy.direction) else {
            warn!(
                policy = policy.id,
                direction = %policy.direction,
                mode = %options.mode,
                "Policy direction not used by the enforcement mode, skipped"
            );
            out.skipped += 1;
            continue;
        };

        let ips = policy.normalized_ips();
        let ports = policy.normalized_ports();
        if ips.is_empty() || ports.is_empty() {
            debug!(policy = policy.id, "Policy has no IPs or no ports");
            continue;
        }

        for ip in &ips {
            let Ok(peer) = ip.parse::<IpAddr>() else {
                warn!(policy = policy.id, ip = %ip, "Invalid IP literal, skipped");
                out.skipped += ports.len();
                continue;
            };
            if action == RuleAction::Add && options.whitelist.iter().any(|n| n.contains(peer)) {
                debug!(policy = policy.id, %peer, "Peer is whitelisted, not blocking");
                out.skipped += ports.len();
                continue;
            }
            for port in &ports {
                let Some(dst_port) = port.parse::<u16>().ok().filter(|p| *p != 0) else {
                    warn!(policy = policy.id, port = %port, "Invalid port literal, skipped");
                    out.skipped += 1;
                    continue;
                };
                let matcher =
                    RuleMatch::new(direction, peer, dst_port).with_src_port(options.src_port);
                intents
                    .entry((peer, dst_port))
                    .or_default()
                    .insert((action, direction));
                if seen.insert((action, matcher)) {
                    out.rules.push(DesiredRule {
                        policy_id: policy.id,
                        policy_name: policy.name.clone(),
                        action,
                        matcher,
                    });
                }
            }
        }
    }

    for ((peer, port), declared) in intents {
        if declared.len() > 1 {
            warn!(
                %peer,
                port,
                declared = ?declared,
                "Conflicting policies for the same peer and port, each is applied independently"
            );
            out.conflicts += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaktpost_core::policy::PolicyDirection;

    fn policy(id: u64, direction: PolicyDirection, ips: &[&str], ports: &[&str]) -> Policy {
        let mut p = Policy::new(id, format!("pol-{id}"), direction);
        p.ips = ips.iter().map(|s| s.to_string()).collect();
        p.ports = ports.iter().map(|s| s.to_string()).collect();
        p
    }

    #[test]
    fn cross_product_of_ips_and_ports() {
        let policies = [policy(
            1,
            PolicyDirection::Ingress,
            &["10.0.0.5/32", "10.0.0.6"],
            &["22", ":80"],
        )];
        let plan = plan(&policies, &PlanOptions::default());
        assert_eq!(plan.rules.len(), 4);
        assert!(plan
            .rules
            .iter()
            .all(|r| r.action == RuleAction::Add && r.matcher.direction == RuleDirection::Ingress));
        assert!(plan
            .rules
            .iter()
            .any(|r| r.matcher.peer.to_string() == "10.0.0.5" && r.matcher.dst_port == 80));
    }

    #[test]
    fn empty_factor_contributes_nothing() {
        let policies = [
            policy(1, PolicyDirection::Ingress, &[], &["22"]),
            policy(2, PolicyDirection::Egress, &["10.0.0.5"], &[]),
        ];
        let plan = plan(&policies, &PlanOptions::default());
        assert!(plan.is_empty());
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn invalid_literals_and_foreign_vocabulary_are_skipped() {
        let policies = [
            policy(1, PolicyDirection::Ingress, &["not-an-ip", "10.0.0.5"], &["22", "http", "0"]),
            policy(2, PolicyDirection::Enforce, &["10.0.0.7"], &["22"]),
        ];
        let plan = plan(&policies, &PlanOptions::default());
        assert_eq!(plan.rules.len(), 1);
        assert_eq!(plan.skipped, 3 + 2 + 1);
    }

    #[test]
    fn whitelist_protects_peers_from_blocks() {
        let options = PlanOptions {
            whitelist: vec!["10.0.0.0/24".parse().unwrap()],
            ..Default::default()
        };
        let policies = [policy(1, PolicyDirection::Ingress, &["10.0.0.5", "10.0.1.5"], &["22"])];
        let plan = plan(&policies, &options);
        assert_eq!(plan.rules.len(), 1);
        assert_eq!(plan.rules[0].matcher.peer.to_string(), "10.0.1.5");
    }

    #[test]
    fn duplicates_collapse_and_conflicts_are_counted() {
        let options = PlanOptions {
            mode: EnforcementMode::Toggle,
            ..Default::default()
        };
        let policies = [
            policy(1, PolicyDirection::Enforce, &["10.0.0.5"], &["22"]),
            policy(2, PolicyDirection::Enforce, &["10.0.0.5/32"], &["22"]),
            policy(3, PolicyDirection::Deforce, &["10.0.0.5"], &["22"]),
        ];
        let plan = plan(&policies, &options);
        assert_eq!(plan.rules.len(), 2);
        assert_eq!(plan.conflicts, 1);
    }

    #[test]
    fn source_port_is_carried() {
        let options = PlanOptions {
            src_port: Some(8080),
            ..Default::default()
        };
        let policies = [policy(1, PolicyDirection::Egress, &["10.0.0.5"], &["443"])];
        let plan = plan(&policies, &options);
        assert_eq!(plan.rules[0].matcher.src_port, Some(8080));
        assert_eq!(plan.rules[0].matcher.direction, RuleDirection::Egress);
    }
}
