//! In-process firewall with iptables semantics.
//!
//! Backs `--dry-run` and tests. Rules are stored exactly as `iptables -S`
//! would list them, so foreign lines can be seeded verbatim.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::FirewallError;
use crate::firewall::{ChainLayout, FirewallBackend};
use crate::rule::{FirewallRule, ListedRule};

#[derive(Debug, Default)]
pub struct MemoryFirewall {
    layout: ChainLayout,
    chains: Mutex<HashMap<String, Vec<ListedRule>>>,
}

impl MemoryFirewall {
    pub fn new(layout: ChainLayout) -> Self {
        Self {
            layout,
            chains: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a raw listing line, e.g. a rule owned by another tool.
    pub fn push_raw(&self, line: &str) -> Result<(), FirewallError> {
        let chain = line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| FirewallError::Unsupported(line.to_string()))?;
        let direction = self
            .layout
            .direction_of(chain)
            .ok_or_else(|| FirewallError::UnknownChain(chain.to_string()))?;
        let listed = ListedRule::parse(line, direction)
            .ok_or_else(|| FirewallError::Unsupported(line.to_string()))?;
        self.chains
            .lock()
            .entry(listed.chain.clone())
            .or_default()
            .push(listed);
        Ok(())
    }

    /// Appends `rule` without the duplicate check `add_rule` performs.
    pub fn push_rule(&self, rule: FirewallRule) {
        let chain = self.layout.chain_for(rule.matcher.direction).to_string();
        let listed = ListedRule::from_rule(&chain, rule);
        self.chains.lock().entry(chain).or_default().push(listed);
    }

    /// Snapshot of a chain.
    pub fn rules(&self, chain: &str) -> Vec<ListedRule> {
        self.chains.lock().get(chain).cloned().unwrap_or_default()
    }

    /// Number of instances of `rule` currently installed.
    pub fn count(&self, rule: &FirewallRule) -> usize {
        let chain = self.layout.chain_for(rule.matcher.direction);
        self.chains
            .lock()
            .get(chain)
            .map_or(0, |rules| rules.iter().filter(|l| l.rule.as_ref() == Some(rule)).count())
    }
}

#[async_trait]
impl FirewallBackend for MemoryFirewall {
    fn layout(&self) -> &ChainLayout {
        &self.layout
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        let chain = self.layout.chain_for(rule.matcher.direction).to_string();
        let mut chains = self.chains.lock();
        let rules = chains.entry(chain.clone()).or_default();
        if rules.iter().any(|l| l.rule.as_ref() == Some(rule)) {
            return Ok(());
        }
        debug!("Appended rule: {rule}");
        rules.push(ListedRule::from_rule(&chain, *rule));
        Ok(())
    }

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        let chain = self.layout.chain_for(rule.matcher.direction);
        let mut chains = self.chains.lock();
        if let Some(rules) = chains.get_mut(chain) {
            if let Some(idx) = rules.iter().position(|l| l.rule.as_ref() == Some(rule)) {
                rules.remove(idx);
                debug!("Deleted rule: {rule}");
            }
        }
        Ok(())
    }

    async fn list_rules(&self, chain: &str) -> Result<Vec<ListedRule>, FirewallError> {
        if self.layout.direction_of(chain).is_none() {
            return Err(FirewallError::UnknownChain(chain.to_string()));
        }
        Ok(self.rules(chain))
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool, FirewallError> {
        Ok(self.count(rule) > 0)
    }
}
