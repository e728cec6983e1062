//! `iptables` backend.
//!
//! Every operation spawns the binary; nothing is cached. `-w` makes each
//! call wait for the xtables lock instead of failing when another process
//! holds it. IPv6 peers go through `ip6tables` when it is configured.

use std::net::IpAddr;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, trace};

use crate::error::FirewallError;
use crate::firewall::{ChainLayout, FirewallBackend};
use crate::rule::{FirewallRule, ListedRule};

/// iptables exit status for "no matching rule".
const EXIT_NO_MATCH: i32 = 1;

#[derive(Debug, Clone)]
pub struct IptablesBackend {
    v4_binary: String,
    v6_binary: Option<String>,
    table: String,
    layout: ChainLayout,
}

impl IptablesBackend {
    pub fn new(binary: impl Into<String>, table: impl Into<String>, layout: ChainLayout) -> Self {
        Self {
            v4_binary: binary.into(),
            v6_binary: None,
            table: table.into(),
            layout,
        }
    }

    pub fn with_ipv6(mut self, binary: impl Into<String>) -> Self {
        self.v6_binary = Some(binary.into());
        self
    }

    /// Checks that the configured binaries can be executed.
    pub async fn probe(&self) -> Result<(), FirewallError> {
        for binary in self.binaries() {
            let output = self
                .run(binary, &["--version".to_string()])
                .await
                .map_err(|e| FirewallError::NotAvailable(e.to_string()))?;
            if !output.status.success() {
                return Err(FirewallError::NotAvailable(format!(
                    "{binary} --version exited with {:?}",
                    output.status.code()
                )));
            }
            info!(
                "Using {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        Ok(())
    }

    fn binaries(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.v4_binary.as_str()).chain(self.v6_binary.as_deref())
    }

    fn binary_for(&self, rule: &FirewallRule) -> Result<&str, FirewallError> {
        match rule.matcher.peer {
            IpAddr::V4(_) => Ok(&self.v4_binary),
            IpAddr::V6(_) => self.v6_binary.as_deref().ok_or_else(|| {
                FirewallError::Unsupported(format!("IPv6 rule {rule} without ip6tables"))
            }),
        }
    }

    /// Full argument vector for `op` (`-A`, `-D`, `-C`) on `rule`.
    pub fn command_args(&self, op: &str, rule: &FirewallRule) -> Vec<String> {
        let chain = self.layout.chain_for(rule.matcher.direction);
        let mut args = vec![
            "-w".to_string(),
            "-t".to_string(),
            self.table.clone(),
            op.to_string(),
            chain.to_string(),
        ];
        args.extend(rule.to_args());
        args
    }

    async fn run(&self, binary: &str, args: &[String]) -> Result<Output, FirewallError> {
        trace!("Executing: {binary} {}", args.join(" "));
        Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FirewallError::Spawn {
                binary: binary.to_string(),
                source,
            })
    }

    fn failure(binary: &str, output: &Output) -> FirewallError {
        FirewallError::Command {
            binary: binary.to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

#[async_trait]
impl FirewallBackend for IptablesBackend {
    fn layout(&self) -> &ChainLayout {
        &self.layout
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        if self.rule_exists(rule).await? {
            debug!("Rule already present: {rule}");
            return Ok(());
        }
        let binary = self.binary_for(rule)?;
        let output = self.run(binary, &self.command_args("-A", rule)).await?;
        if !output.status.success() {
            return Err(Self::failure(binary, &output));
        }
        debug!("Appended rule: {rule}");
        Ok(())
    }

    async fn remove_rule(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        if !self.rule_exists(rule).await? {
            debug!("Rule already absent: {rule}");
            return Ok(());
        }
        let binary = self.binary_for(rule)?;
        let output = self.run(binary, &self.command_args("-D", rule)).await?;
        match output.status.code() {
            Some(0) => {
                debug!("Deleted rule: {rule}");
                Ok(())
            }
            // Removed by someone else between the check and the delete.
            Some(EXIT_NO_MATCH) => {
                debug!("Rule vanished before delete: {rule}");
                Ok(())
            }
            _ => Err(Self::failure(binary, &output)),
        }
    }

    async fn list_rules(&self, chain: &str) -> Result<Vec<ListedRule>, FirewallError> {
        let direction = self
            .layout
            .direction_of(chain)
            .ok_or_else(|| FirewallError::UnknownChain(chain.to_string()))?;
        let args = vec![
            "-w".to_string(),
            "-t".to_string(),
            self.table.clone(),
            "-S".to_string(),
            chain.to_string(),
        ];

        let mut rules = Vec::new();
        for binary in self.binaries() {
            let output = self.run(binary, &args).await?;
            if !output.status.success() {
                return Err(Self::failure(binary, &output));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            rules.extend(
                stdout
                    .lines()
                    .filter_map(|line| ListedRule::parse(line, direction)),
            );
        }
        Ok(rules)
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool, FirewallError> {
        let binary = self.binary_for(rule)?;
        let output = self.run(binary, &self.command_args("-C", rule)).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(EXIT_NO_MATCH) => Ok(false),
            _ => Err(Self::failure(binary, &output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Generation, RuleDirection, RuleMatch};

    fn backend() -> IptablesBackend {
        IptablesBackend::new("iptables", "filter", ChainLayout::default())
    }

    #[test]
    fn command_args_target_the_direction_chain() {
        let rule = FirewallRule::tagged(
            RuleMatch::new(RuleDirection::Egress, "1.1.1.1".parse().unwrap(), 53),
            Generation(5),
        );
        assert_eq!(
            backend().command_args("-A", &rule).join(" "),
            "-w -t filter -A OUTPUT -d 1.1.1.1 -p tcp --dport 53 -m comment --comment reconcile-5 -j DROP"
        );
    }

    #[test]
    fn ipv6_requires_ip6tables() {
        let rule = FirewallRule::untagged(RuleMatch::new(
            RuleDirection::Ingress,
            "2001:db8::1".parse().unwrap(),
            22,
        ));
        assert!(matches!(
            backend().binary_for(&rule),
            Err(FirewallError::Unsupported(_))
        ));
        assert_eq!(
            backend().with_ipv6("ip6tables").binary_for(&rule).unwrap(),
            "ip6tables"
        );
    }

    #[tokio::test]
    async fn missing_binary_fails_probe() {
        let backend = IptablesBackend::new(
            "/nonexistent/vaktpost-iptables",
            "filter",
            ChainLayout::default(),
        );
        assert!(matches!(
            backend.probe().await,
            Err(FirewallError::NotAvailable(_))
        ));
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() {
        assert!(matches!(
            backend().list_rules("FORWARD").await,
            Err(FirewallError::UnknownChain(_))
        ));
    }
}
