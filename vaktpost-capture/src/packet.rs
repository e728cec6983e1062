//! Flow derivation from captured frames.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
use pcap::Linktype;
use tracing::trace;
use vaktpost_core::events::{FlowRecord, Protocol};
use vaktpost_core::time::format_wire;

use crate::{CaptureError, LocalAddrs};

/// Framing of the bytes handed back by the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    /// Bare IPv4/IPv6 packets (tun devices, `DLT_RAW`).
    RawIp,
}

impl TryFrom<Linktype> for LinkKind {
    type Error = CaptureError;

    fn try_from(link: Linktype) -> Result<Self, Self::Error> {
        match link {
            Linktype::ETHERNET => Ok(LinkKind::Ethernet),
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Ok(LinkKind::RawIp),
            other => Err(CaptureError::UnsupportedLink(
                other.get_name().unwrap_or_else(|_| other.0.to_string()),
            )),
        }
    }
}

/// Build a flow record from one frame, or `None` when the frame has no IP
/// layer or its transport is neither TCP nor UDP.
pub fn derive_flow(
    frame: &[u8],
    link: LinkKind,
    local: &LocalAddrs,
    seen_at: DateTime<Utc>,
) -> Option<FlowRecord> {
    let parsed = match link {
        LinkKind::Ethernet => PacketHeaders::from_ethernet_slice(frame).map_err(|e| e.to_string()),
        LinkKind::RawIp => PacketHeaders::from_ip_slice(frame).map_err(|e| e.to_string()),
    };
    let headers = match parsed {
        Ok(headers) => headers,
        Err(e) => {
            trace!(error = %e, "Undecodable frame");
            return None;
        }
    };

    let (source, destination) = match headers.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => (
            IpAddr::V4(Ipv4Addr::from(ipv4.source)),
            IpAddr::V4(Ipv4Addr::from(ipv4.destination)),
        ),
        Some(NetHeaders::Ipv6(ipv6, _)) => (
            IpAddr::V6(Ipv6Addr::from(ipv6.source)),
            IpAddr::V6(Ipv6Addr::from(ipv6.destination)),
        ),
        _ => return None,
    };

    let (protocol, port) = match headers.transport {
        Some(TransportHeader::Tcp(tcp)) => (Protocol::Tcp, tcp.destination_port),
        Some(TransportHeader::Udp(udp)) => (Protocol::Udp, udp.destination_port),
        _ => return None,
    };

    Some(FlowRecord::new(
        format_wire(seen_at),
        local.direction(&source, &destination),
        source.to_string(),
        destination.to_string(),
        port.to_string(),
        protocol,
    ))
}
