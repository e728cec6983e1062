//! Enforcement configuration.
//!
//! Parameters for the firewall backend and the reconciliation loop that
//! drives it.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Firewall backend configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validation::validate_distinct_chains))]
pub struct FirewallConfig {
    /// iptables binary used for IPv4 rules.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// ip6tables binary; IPv6 policy addresses are rejected when unset.
    #[serde(default)]
    pub ipv6_binary: Option<String>,

    /// Table holding the managed chains.
    #[validate(custom(function = validation::validate_chain))]
    #[serde(default = "default_table")]
    pub table: String,

    /// Chain enforcing ingress blocks.
    #[validate(custom(function = validation::validate_chain))]
    #[serde(default = "default_ingress_chain")]
    pub ingress_chain: String,

    /// Chain enforcing egress blocks. Must differ from `ingress_chain`, since
    /// the chain a listed rule comes from decides how it is parsed.
    #[validate(custom(function = validation::validate_chain))]
    #[serde(default = "default_egress_chain")]
    pub egress_chain: String,

    /// Policy direction vocabulary: `directional` (ingress/egress) or
    /// `toggle` (enforce/deforce).
    #[validate(custom(function = validation::validate_enforcement_mode))]
    #[serde(default = "default_enforcement_mode")]
    pub enforcement_mode: String,

    /// Peers that are never blocked, whatever the policies say.
    #[validate(custom(function = validation::validate_cidr_list))]
    #[serde(default)]
    pub whitelist: Vec<IpNetwork>,
}

fn default_binary() -> String {
    "iptables".into()
}
fn default_table() -> String {
    "filter".into()
}
fn default_ingress_chain() -> String {
    "INPUT".into()
}
fn default_egress_chain() -> String {
    "OUTPUT".into()
}
fn default_enforcement_mode() -> String {
    "directional".into()
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            ipv6_binary: None,
            table: default_table(),
            ingress_chain: default_ingress_chain(),
            egress_chain: default_egress_chain(),
            enforcement_mode: default_enforcement_mode(),
            whitelist: Vec::new(),
        }
    }
}

/// Reconciliation loop configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ReconcilerConfig {
    /// Tick interval (milliseconds).
    #[validate(range(min = 100, max = 3_600_000))]
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Rule operations in flight at once within a cycle.
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a single backend call (milliseconds).
    #[validate(range(min = 10, max = 600_000))]
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Deadline for a whole cycle (milliseconds).
    #[validate(range(min = 100, max = 3_600_000))]
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_ms: u64,
}

fn default_interval() -> u64 {
    5_000
}
fn default_max_concurrency() -> usize {
    16
}
fn default_operation_timeout() -> u64 {
    5_000
}
fn default_cycle_deadline() -> u64 {
    60_000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            max_concurrency: default_max_concurrency(),
            operation_timeout_ms: default_operation_timeout(),
            cycle_deadline_ms: default_cycle_deadline(),
        }
    }
}
