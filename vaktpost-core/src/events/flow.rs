use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a flow relative to the capturing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Unknown,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Outgoing => "Outgoing",
            Direction::Incoming => "Incoming",
            Direction::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Transport protocol of a forwarded flow. Other protocols never leave capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => f.write_str("LOW"),
            Severity::High => f.write_str("HIGH"),
        }
    }
}

/// One observed network flow as it travels over the streaming transport.
///
/// `time` stays in its wire representation until the verdict service
/// normalizes it; `severity` is only set once the record is classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub time: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub source: String,
    pub destination: String,
    pub port: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl FlowRecord {
    pub fn new(
        time: impl Into<String>,
        direction: Direction,
        source: impl Into<String>,
        destination: impl Into<String>,
        port: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            time: time.into(),
            direction,
            source: source.into(),
            destination: destination.into(),
            port: port.into(),
            protocol,
            severity: None,
            pid: None,
            path: None,
        }
    }

    /// Attaches process attribution to the record.
    pub fn with_process(mut self, pid: i32, path: impl Into<String>) -> Self {
        self.pid = Some(pid);
        self.path = Some(path.into());
        self
    }
}

/// A classified flow record echoed back to its submitter.
///
/// Only constructible through [`Verdict::new`], so the wrapped record always
/// carries a severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verdict(FlowRecord);

impl Verdict {
    pub fn new(mut record: FlowRecord, severity: Severity) -> Self {
        record.severity = Some(severity);
        Self(record)
    }

    pub fn severity(&self) -> Severity {
        self.0.severity.unwrap_or(Severity::Low)
    }

    pub fn record(&self) -> &FlowRecord {
        &self.0
    }

    pub fn into_record(self) -> FlowRecord {
        self.0
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.0;
        write!(
            f,
            "Time: {} | Source: {} | Destination: {} | Type: {} | Port: {} | Protocol: {} | Severity: {}",
            r.time,
            r.source,
            r.destination,
            r.direction,
            r.port,
            r.protocol,
            self.severity()
        )
    }
}
