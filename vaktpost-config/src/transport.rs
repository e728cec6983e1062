//! Streaming transport and verdict service configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Streaming transport endpoints.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TransportConfig {
    /// Address the verdict service listens on.
    #[validate(custom(function = validation::validate_socket_addr))]
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Address capture clients connect to.
    #[validate(custom(function = validation::validate_socket_addr))]
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Connect timeout for capture clients (milliseconds).
    #[validate(range(min = 10, max = 60_000))]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How long a capture client waits for each verdict (milliseconds).
    #[validate(range(min = 10, max = 60_000))]
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Longest flow record line the verdict service accepts.
    #[validate(range(min = 256, max = 16_777_216))]
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:50051".into()
}
fn default_server_addr() -> String {
    "127.0.0.1:50051".into()
}
fn default_connect_timeout() -> u64 {
    3_000
}
fn default_reply_timeout() -> u64 {
    5_000
}
fn default_max_line_bytes() -> usize {
    64 * 1024
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
            connect_timeout_ms: default_connect_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

/// Verdict service parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ClassifierConfig {
    /// chrono layout of the datetime part of wire timestamps.
    #[validate(length(min = 1))]
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// How long a policy snapshot is reused (milliseconds, 0 disables).
    #[validate(range(max = 600_000))]
    #[serde(default = "default_policy_cache_ttl")]
    pub policy_cache_ttl_ms: u64,

    /// Convert wire times to UTC using their offset. When false the
    /// datetime is stored as written and the offset only validated.
    #[serde(default = "default_apply_offset")]
    pub apply_offset: bool,
}

fn default_time_format() -> String {
    "%Y-%m-%d %H:%M:%S%.f".into()
}
fn default_policy_cache_ttl() -> u64 {
    1_000
}
fn default_apply_offset() -> bool {
    true
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            policy_cache_ttl_ms: default_policy_cache_ttl(),
            apply_offset: default_apply_offset(),
        }
    }
}

/// Locations of the Policy Store and Log Sink.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct StoreConfig {
    /// YAML or JSON policy file.
    #[serde(default = "default_policies_path")]
    pub policies_path: PathBuf,

    /// Directory of day-partitioned flow logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_policies_path() -> PathBuf {
    PathBuf::from("config/policies.yaml")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("data/flows")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            policies_path: default_policies_path(),
            log_dir: default_log_dir(),
        }
    }
}
