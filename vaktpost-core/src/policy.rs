//! ## vaktpost-core::policy
//! **Declared access policies**
//!
//! A policy groups a direction with a set of IP literals and a set of port
//! literals. The reconciler expands it into one desired rule per (ip, port)
//! pair; the verdict service matches flows against the same sets.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction vocabulary of a policy.
///
/// Two vocabularies exist for the same field: `ingress`/`egress` describe
/// which side of the host a block applies to, `enforce`/`deforce` describe
/// whether an inbound block should be present at all. Which one is honored
/// is decided by the configured enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PolicyDirection {
    Ingress,
    Egress,
    Enforce,
    Deforce,
}

impl PolicyDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDirection::Ingress => "ingress",
            PolicyDirection::Egress => "egress",
            PolicyDirection::Enforce => "enforce",
            PolicyDirection::Deforce => "deforce",
        }
    }
}

impl fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingress" => Ok(PolicyDirection::Ingress),
            "egress" => Ok(PolicyDirection::Egress),
            "enforce" | "enforcer" => Ok(PolicyDirection::Enforce),
            "deforce" | "deforcer" => Ok(PolicyDirection::Deforce),
            other => Err(format!("unknown policy direction '{other}'")),
        }
    }
}

impl TryFrom<String> for PolicyDirection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PolicyDirection> for String {
    fn from(direction: PolicyDirection) -> Self {
        direction.as_str().to_string()
    }
}

/// A named access policy as held by the Policy Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub direction: PolicyDirection,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
}

impl Policy {
    pub fn new(id: u64, name: impl Into<String>, direction: PolicyDirection) -> Self {
        Self {
            id,
            name: name.into(),
            direction,
            ips: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ips.push(ip.into());
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.ports.push(port.into());
        self
    }

    /// Distinct, normalized IP literals. Empty literals are dropped.
    pub fn normalized_ips(&self) -> BTreeSet<String> {
        self.ips
            .iter()
            .map(|ip| normalize_ip(ip))
            .filter(|ip| !ip.is_empty())
            .collect()
    }

    /// Distinct, normalized port literals. Empty literals are dropped.
    pub fn normalized_ports(&self) -> BTreeSet<String> {
        self.ports
            .iter()
            .map(|port| normalize_port(port))
            .filter(|port| !port.is_empty())
            .collect()
    }

    /// True when `source` is one of this policy's IPs and `port` one of its ports.
    pub fn matches(&self, source: &str, port: &str) -> bool {
        let source = normalize_ip(source);
        let port = normalize_port(port);
        if source.is_empty() || port.is_empty() {
            return false;
        }
        self.ips.iter().any(|ip| normalize_ip(ip) == source)
            && self.ports.iter().any(|p| normalize_port(p) == port)
    }
}

/// First policy matching the given flow source and destination port.
pub fn find_match<'a>(policies: &'a [Policy], source: &str, port: &str) -> Option<&'a Policy> {
    policies.iter().find(|policy| policy.matches(source, port))
}

/// Strips single-host prefix suffixes and canonicalizes parseable addresses.
///
/// `10.0.0.5/32` and `10.0.0.5` normalize to the same literal; literals that
/// are not plain addresses are returned trimmed but otherwise untouched.
pub fn normalize_ip(literal: &str) -> String {
    let trimmed = literal.trim();
    let host = trimmed
        .strip_suffix("/32")
        .or_else(|| trimmed.strip_suffix("/128"))
        .unwrap_or(trimmed);

    match host.parse::<IpAddr>() {
        Ok(addr) => addr.to_string(),
        Err(_) => host.to_string(),
    }
}

/// Trims whitespace and a leading `:` (as in `:80`) from a port literal.
pub fn normalize_port(literal: &str) -> String {
    literal.trim().trim_start_matches(':').to_string()
}
