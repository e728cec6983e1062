//! Rule model shared by every backend.
//!
//! Only one rule shape is managed: a TCP drop keyed on a peer address and a
//! destination port, optionally narrowed to a source port, optionally tagged
//! with a reconciliation generation. Listed rules of any other shape are kept
//! as raw text and never interpreted.

use std::fmt;
use std::net::IpAddr;

/// Comment prefix identifying rules owned by the reconciler.
pub const TAG_PREFIX: &str = "reconcile-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleDirection {
    /// Block traffic arriving from the peer (`-s <ip>`).
    Ingress,
    /// Block traffic leaving towards the peer (`-d <ip>`).
    Egress,
}

impl fmt::Display for RuleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleDirection::Ingress => f.write_str("ingress"),
            RuleDirection::Egress => f.write_str("egress"),
        }
    }
}

/// One reconciliation generation. Rendered as `reconcile-<n>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl Generation {
    pub fn tag(&self) -> String {
        format!("{TAG_PREFIX}{}", self.0)
    }

    /// Strict inverse of [`Generation::tag`]: exact prefix followed by ASCII
    /// digits only. Anything else is a foreign comment.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let digits = tag.strip_prefix(TAG_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(Generation)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Match part of a managed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleMatch {
    pub direction: RuleDirection,
    pub peer: IpAddr,
    pub src_port: Option<u16>,
    pub dst_port: u16,
}

impl RuleMatch {
    pub fn new(direction: RuleDirection, peer: IpAddr, dst_port: u16) -> Self {
        Self {
            direction,
            peer,
            src_port: None,
            dst_port,
        }
    }

    pub fn with_src_port(mut self, src_port: Option<u16>) -> Self {
        self.src_port = src_port;
        self
    }
}

impl fmt::Display for RuleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.peer)?;
        if let Some(sport) = self.src_port {
            write!(f, " sport {sport}")?;
        }
        write!(f, " dport {}", self.dst_port)
    }
}

/// A rule as added to or removed from a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FirewallRule {
    pub matcher: RuleMatch,
    pub generation: Option<Generation>,
}

impl FirewallRule {
    pub fn untagged(matcher: RuleMatch) -> Self {
        Self {
            matcher,
            generation: None,
        }
    }

    pub fn tagged(matcher: RuleMatch, generation: Generation) -> Self {
        Self {
            matcher,
            generation: Some(generation),
        }
    }

    /// Match arguments in iptables syntax, without table or chain.
    pub fn to_args(&self) -> Vec<String> {
        let m = &self.matcher;
        let addr_flag = match m.direction {
            RuleDirection::Ingress => "-s",
            RuleDirection::Egress => "-d",
        };
        let mut args = vec![
            addr_flag.to_string(),
            m.peer.to_string(),
            "-p".into(),
            "tcp".into(),
        ];
        if let Some(sport) = m.src_port {
            args.extend(["--sport".into(), sport.to_string()]);
        }
        args.extend(["--dport".into(), m.dst_port.to_string()]);
        if let Some(generation) = self.generation {
            args.extend([
                "-m".into(),
                "comment".into(),
                "--comment".into(),
                generation.tag(),
            ]);
        }
        args.extend(["-j".into(), "DROP".into()]);
        args
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation {
            Some(generation) => write!(f, "{} [{generation}]", self.matcher),
            None => write!(f, "{}", self.matcher),
        }
    }
}

/// A rule as reported by a chain listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedRule {
    pub chain: String,
    /// Rule text as listed (`-A <chain> ...`).
    pub raw: String,
    /// Trailing comment, managed or not.
    pub comment: Option<String>,
    /// Parsed rule when it has the managed shape.
    pub rule: Option<FirewallRule>,
}

impl ListedRule {
    /// Generation of a managed rule; `None` for foreign or untagged rules.
    pub fn generation(&self) -> Option<Generation> {
        self.comment.as_deref().and_then(Generation::from_tag)
    }

    pub fn is_managed(&self) -> bool {
        self.generation().is_some()
    }

    /// Renders `rule` the way `iptables -S` lists it.
    pub fn from_rule(chain: &str, rule: FirewallRule) -> Self {
        let mut raw = format!("-A {chain}");
        for arg in rule.to_args() {
            raw.push(' ');
            raw.push_str(&arg);
        }
        Self {
            chain: chain.to_string(),
            raw,
            comment: rule.generation.map(|g| g.tag()),
            rule: Some(rule),
        }
    }

    /// Parses one line of `iptables -S <chain>` output.
    ///
    /// Returns `None` for lines that are not rule appends (e.g. `-P`, `-N`).
    /// `direction` is the direction the listed chain enforces; rules whose
    /// shape does not fit it are returned with `rule: None`.
    pub fn parse(line: &str, direction: RuleDirection) -> Option<Self> {
        let tokens = tokenize(line);
        if tokens.len() < 2 || tokens[0] != "-A" {
            return None;
        }
        let chain = tokens[1].clone();
        let comment = find_value(&tokens, "--comment");
        let rule = parse_shape(&tokens[2..], direction);

        Some(Self {
            chain,
            raw: line.trim().to_string(),
            comment,
            rule,
        })
    }
}

fn find_value(tokens: &[String], flag: &str) -> Option<String> {
    tokens
        .iter()
        .position(|t| t == flag)
        .and_then(|idx| tokens.get(idx + 1))
        .cloned()
}

fn parse_shape(tokens: &[String], direction: RuleDirection) -> Option<FirewallRule> {
    let mut peer = None;
    let mut src_port = None;
    let mut dst_port = None;
    let mut proto_tcp = false;
    let mut target_drop = false;
    let mut comment = None;

    let mut iter = tokens.iter();
    while let Some(flag) = iter.next() {
        let value = iter.next()?;
        match (flag.as_str(), direction) {
            ("-s", RuleDirection::Ingress) | ("-d", RuleDirection::Egress) => {
                peer = Some(parse_host(value)?);
            }
            ("-p", _) => proto_tcp = value == "tcp",
            ("-m", _) => {
                if value != "tcp" && value != "comment" {
                    return None;
                }
            }
            ("--sport", _) => src_port = Some(value.parse().ok()?),
            ("--dport", _) => dst_port = Some(value.parse().ok()?),
            ("--comment", _) => comment = Some(value.as_str()),
            ("-j", _) => target_drop = value == "DROP",
            _ => return None,
        }
    }

    if !proto_tcp || !target_drop {
        return None;
    }
    let generation = match comment {
        Some(c) => Some(Generation::from_tag(c)?),
        None => None,
    };

    Some(FirewallRule {
        matcher: RuleMatch {
            direction,
            peer: peer?,
            src_port,
            dst_port: dst_port?,
        },
        generation,
    })
}

/// Parses `10.0.0.5` or `10.0.0.5/32`; wider prefixes are not single hosts.
fn parse_host(value: &str) -> Option<IpAddr> {
    let (addr, prefix) = match value.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (value, None),
    };
    let ip: IpAddr = addr.parse().ok()?;
    match (prefix, ip) {
        (None, _) => Some(ip),
        (Some("32"), IpAddr::V4(_)) | (Some("128"), IpAddr::V6(_)) => Some(ip),
        _ => None,
    }
}

/// Splits a listing line on whitespace, honoring double quotes and
/// backslash escapes inside them.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}
