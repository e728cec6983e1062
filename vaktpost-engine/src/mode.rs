//! Interpretation of policy directions.

use std::fmt;
use std::str::FromStr;

use vaktpost_core::policy::PolicyDirection;
use vaktpost_prevention::RuleDirection;

use crate::EngineError;

/// Which direction vocabulary the deployment honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforcementMode {
    /// `ingress` blocks the peer as a source, `egress` as a destination.
    #[default]
    Directional,
    /// `enforce` installs an ingress block, `deforce` removes it.
    Toggle,
}

/// What to do with one desired rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleAction {
    Add,
    Remove,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Add => f.write_str("add"),
            RuleAction::Remove => f.write_str("remove"),
        }
    }
}

impl EnforcementMode {
    /// Action and chain direction for a policy, or `None` when the policy
    /// uses the other vocabulary.
    pub fn resolve(&self, direction: PolicyDirection) -> Option<(RuleAction, RuleDirection)> {
        match (self, direction) {
            (EnforcementMode::Directional, PolicyDirection::Ingress) => {
                Some((RuleAction::Add, RuleDirection::Ingress))
            }
            (EnforcementMode::Directional, PolicyDirection::Egress) => {
                Some((RuleAction::Add, RuleDirection::Egress))
            }
            (EnforcementMode::Toggle, PolicyDirection::Enforce) => {
                Some((RuleAction::Add, RuleDirection::Ingress))
            }
            (EnforcementMode::Toggle, PolicyDirection::Deforce) => {
                Some((RuleAction::Remove, RuleDirection::Ingress))
            }
            _ => None,
        }
    }
}

impl FromStr for EnforcementMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directional" => Ok(EnforcementMode::Directional),
            "toggle" => Ok(EnforcementMode::Toggle),
            other => Err(EngineError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementMode::Directional => f.write_str("directional"),
            EnforcementMode::Toggle => f.write_str("toggle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directional_vocabulary() {
        let mode = EnforcementMode::Directional;
        assert_eq!(
            mode.resolve(PolicyDirection::Egress),
            Some((RuleAction::Add, RuleDirection::Egress))
        );
        assert_eq!(mode.resolve(PolicyDirection::Enforce), None);
    }

    #[test]
    fn toggle_vocabulary() {
        let mode: EnforcementMode = "Toggle".parse().unwrap();
        assert_eq!(
            mode.resolve(PolicyDirection::Deforce),
            Some((RuleAction::Remove, RuleDirection::Ingress))
        );
        assert_eq!(mode.resolve(PolicyDirection::Ingress), None);
        assert!("both".parse::<EnforcementMode>().is_err());
    }
}
