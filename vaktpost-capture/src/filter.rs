//! BPF filter presets.

use std::fmt;
use std::str::FromStr;

use crate::CaptureError;

/// Traffic selection presets offered to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFilter {
    /// Web traffic, TCP 80 and 443.
    Http,
    Tcp,
    Udp,
    Icmp,
    /// TCP segments carrying any of SYN, FIN, RST or ACK.
    Scans,
    All,
}

impl CaptureFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureFilter::Http => "http",
            CaptureFilter::Tcp => "tcp",
            CaptureFilter::Udp => "udp",
            CaptureFilter::Icmp => "icmp",
            CaptureFilter::Scans => "scans",
            CaptureFilter::All => "all",
        }
    }

    /// Render the BPF expression, excluding `excluded_ports` so the client
    /// never captures its own control-plane traffic. ICMP has no ports and
    /// is left unrestricted.
    pub fn bpf(&self, excluded_ports: &[u16]) -> String {
        let base = match self {
            CaptureFilter::Http => Some("(tcp port 80 or tcp port 443)"),
            CaptureFilter::Tcp => Some("tcp"),
            CaptureFilter::Udp => Some("udp"),
            CaptureFilter::Icmp => return "icmp".to_string(),
            CaptureFilter::Scans => Some("tcp[tcpflags] & (tcp-syn|tcp-fin|tcp-rst|tcp-ack) != 0"),
            CaptureFilter::All => None,
        };

        let mut ports: Vec<u16> = excluded_ports.to_vec();
        ports.sort_unstable();
        ports.dedup();
        let exclusion = ports
            .iter()
            .map(|p| format!("not port {p}"))
            .collect::<Vec<_>>()
            .join(" and ");

        match (base, exclusion.is_empty()) {
            (Some(base), true) => base.to_string(),
            (Some(base), false) => format!("{base} and {exclusion}"),
            (None, true) => String::new(),
            (None, false) => exclusion,
        }
    }
}

impl FromStr for CaptureFilter {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(CaptureFilter::Http),
            "tcp" => Ok(CaptureFilter::Tcp),
            "udp" => Ok(CaptureFilter::Udp),
            "icmp" => Ok(CaptureFilter::Icmp),
            "scans" | "all-scans" => Ok(CaptureFilter::Scans),
            "all" => Ok(CaptureFilter::All),
            other => Err(CaptureError::UnknownFilter(other.to_string())),
        }
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_exclude_control_ports() {
        let excluded = [50051, 22];
        assert_eq!(
            CaptureFilter::Http.bpf(&excluded),
            "(tcp port 80 or tcp port 443) and not port 22 and not port 50051"
        );
        assert_eq!(
            CaptureFilter::Udp.bpf(&excluded),
            "udp and not port 22 and not port 50051"
        );
        assert_eq!(
            CaptureFilter::All.bpf(&excluded),
            "not port 22 and not port 50051"
        );
        assert!(CaptureFilter::Scans
            .bpf(&excluded)
            .starts_with("tcp[tcpflags] & (tcp-syn|tcp-fin|tcp-rst|tcp-ack) != 0 and "));
    }

    #[test]
    fn icmp_ignores_ports() {
        assert_eq!(CaptureFilter::Icmp.bpf(&[22]), "icmp");
    }

    #[test]
    fn all_without_exclusions_captures_everything() {
        assert_eq!(CaptureFilter::All.bpf(&[]), "");
        assert_eq!(CaptureFilter::Tcp.bpf(&[]), "tcp");
    }

    #[test]
    fn parses_presets() {
        assert_eq!("HTTP".parse::<CaptureFilter>().unwrap(), CaptureFilter::Http);
        assert_eq!("all-scans".parse::<CaptureFilter>().unwrap(), CaptureFilter::Scans);
        assert!(matches!(
            "arp".parse::<CaptureFilter>(),
            Err(CaptureError::UnknownFilter(_))
        ));
    }
}
