//! # Vaktpost Prevention
//!
//! Firewall backend adapter: the only place that talks to the host firewall.
//! The reconciler and the standalone enforcer drive it through the
//! [`FirewallBackend`] trait.

pub mod error;
pub mod firewall;
pub mod iptables;
pub mod memory;
pub mod rule;

pub use error::FirewallError;
pub use firewall::{ChainLayout, FirewallBackend};
pub use iptables::IptablesBackend;
pub use memory::MemoryFirewall;
pub use rule::{FirewallRule, Generation, ListedRule, RuleDirection, RuleMatch, TAG_PREFIX};
