// vaktpost-config/src/capture.rs
//! Packet capture configuration for the flow classification client.
//!
//! Defines which traffic is observed and how captured flows are handed to
//! the forwarding pool.

use serde::{Deserialize, Deserializer, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Packet capture configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CaptureConfig {
    /// Network interface for live capture.
    #[validate(custom(function = validation::validate_interface))]
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Filter preset (http, tcp, udp, icmp, scans, all).
    #[validate(custom(function = validation::validate_filter))]
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Run in promiscuous mode?
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Bytes captured per packet. Headers are all that is needed.
    #[validate(range(min = 64, max = 65535))]
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,

    /// Kernel capture buffer size in bytes.
    #[validate(range(min = 4096, max = 1073741824))]
    #[serde(default = "default_buffer_size", deserialize_with = "deserialize_size")]
    pub buffer_size: usize,

    /// Ports never captured, on top of the transport port.
    #[serde(default = "default_excluded_ports")]
    pub excluded_ports: Vec<u16>,

    /// Forwarding workers, each holding one transport connection.
    #[validate(range(min = 1, max = 256))]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Records buffered ahead of the workers before new ones are dropped.
    #[validate(range(min = 1, max = 1048576))]
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_interface() -> String {
    "eth0".into()
}

fn default_filter() -> String {
    "all".into()
}

fn default_promiscuous() -> bool {
    true
}

fn default_snaplen() -> i32 {
    1600
}

fn default_buffer_size() -> usize {
    1048576
}

fn default_excluded_ports() -> Vec<u16> {
    vec![22]
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn default_queue_depth() -> usize {
    4096
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

/// Custom deserializer to allow human‑friendly sizes (e.g. "1MiB") or direct numbers.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let sv = SizeValue::deserialize(deserializer)?;
    match sv {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => {
            let s = s.trim();
            let split = s
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(s.len());
            let (num_part, unit_part) = s.split_at(split);
            let number: f64 = num_part.parse().map_err(serde::de::Error::custom)?;
            let multiplier = match unit_part.trim().to_lowercase().as_str() {
                "kb" | "kib" => 1024.0,
                "mb" | "mib" => 1024.0 * 1024.0,
                "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
                "" => 1.0,
                _ => return Err(serde::de::Error::custom("Unknown size unit")),
            };
            Ok((number * multiplier) as usize)
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            filter: default_filter(),
            promiscuous: default_promiscuous(),
            snaplen: default_snaplen(),
            buffer_size: default_buffer_size(),
            excluded_ports: default_excluded_ports(),
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}
