// vaktpost-config/src/validation.rs
//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use std::net::SocketAddr;

use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

use crate::prevention::FirewallConfig;

lazy_static! {
    static ref INTERFACE: Regex = Regex::new(r"^[a-zA-Z0-9_.\-]+$").expect("valid pattern");
    static ref CHAIN: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid pattern");
}

/// Capture filter presets understood by the capture crate.
pub const CAPTURE_FILTERS: [&str; 6] = ["http", "tcp", "udp", "icmp", "scans", "all"];

/// Policy direction vocabularies understood by the reconciler.
pub const ENFORCEMENT_MODES: [&str; 2] = ["directional", "toggle"];

/// Validate that the provided CIDR list does not contain any invalid ranges.
pub fn validate_cidr_list(cidrs: &[IpNetwork]) -> Result<(), ValidationError> {
    if cidrs.iter().any(|n| match n {
        IpNetwork::V4(net) => net.ip().octets() == [0, 0, 0, 0],
        IpNetwork::V6(_) => false,
    }) {
        return Err(ValidationError::new("invalid_cidr"));
    }
    Ok(())
}

/// Validate that an interface name follows Linux naming conventions.
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    if !name.is_empty() && name.len() <= 15 && INTERFACE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

/// Validate an iptables chain name (at most 28 characters, no whitespace).
pub fn validate_chain(name: &str) -> Result<(), ValidationError> {
    if !name.is_empty() && name.len() <= 28 && CHAIN.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_chain"))
    }
}

/// Validate that ingress and egress rules live in separate chains.
pub fn validate_distinct_chains(firewall: &FirewallConfig) -> Result<(), ValidationError> {
    if firewall.ingress_chain == firewall.egress_chain {
        let mut err = ValidationError::new("duplicate_chain");
        err.message = Some("ingress_chain and egress_chain must differ".into());
        return Err(err);
    }
    Ok(())
}

/// Validate capture filter preset.
pub fn validate_filter(filter: &str) -> Result<(), ValidationError> {
    if CAPTURE_FILTERS.contains(&filter.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_capture_filter"))
    }
}

/// Validate enforcement mode.
pub fn validate_enforcement_mode(mode: &str) -> Result<(), ValidationError> {
    if ENFORCEMENT_MODES.contains(&mode.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_enforcement_mode"))
    }
}

/// Validate a `host:port` socket address.
pub fn validate_socket_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_socket_addr"))
}

/// Validate a tracing level name.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"].contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}
