//! ## vaktpost-prevention::firewall
//! **Backend contract for the host firewall**
//!
//! ### Expectations:
//! - `add_rule` is idempotent: an identical rule already present is a no-op
//! - `remove_rule` of an absent rule succeeds; a present one loses exactly one instance
//! - `list_rules` returns every rule in the chain, foreign ones included
//! - No state is cached between calls; every call hits the live firewall

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FirewallError;
use crate::rule::{FirewallRule, ListedRule, RuleDirection};

/// Which chain enforces which direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLayout {
    pub ingress: String,
    pub egress: String,
}

impl Default for ChainLayout {
    fn default() -> Self {
        Self {
            ingress: "INPUT".into(),
            egress: "OUTPUT".into(),
        }
    }
}

impl ChainLayout {
    pub fn new(ingress: impl Into<String>, egress: impl Into<String>) -> Self {
        Self {
            ingress: ingress.into(),
            egress: egress.into(),
        }
    }

    pub fn chain_for(&self, direction: RuleDirection) -> &str {
        match direction {
            RuleDirection::Ingress => &self.ingress,
            RuleDirection::Egress => &self.egress,
        }
    }

    pub fn direction_of(&self, chain: &str) -> Option<RuleDirection> {
        if chain == self.ingress {
            Some(RuleDirection::Ingress)
        } else if chain == self.egress {
            Some(RuleDirection::Egress)
        } else {
            None
        }
    }

    pub fn chains(&self) -> [&str; 2] {
        [&self.ingress, &self.egress]
    }
}

#[async_trait]
pub trait FirewallBackend: Send + Sync {
    fn layout(&self) -> &ChainLayout;

    async fn add_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError>;

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError>;

    async fn list_rules(&self, chain: &str) -> Result<Vec<ListedRule>, FirewallError>;

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool, FirewallError>;
}

#[async_trait]
impl<T: FirewallBackend + ?Sized> FirewallBackend for Arc<T> {
    fn layout(&self) -> &ChainLayout {
        (**self).layout()
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        (**self).add_rule(rule).await
    }

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        (**self).remove_rule(rule).await
    }

    async fn list_rules(&self, chain: &str) -> Result<Vec<ListedRule>, FirewallError> {
        (**self).list_rules(chain).await
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool, FirewallError> {
        (**self).rule_exists(rule).await
    }
}
