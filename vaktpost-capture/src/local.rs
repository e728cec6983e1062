//! Host address set used to orient flows.

use std::collections::HashSet;
use std::net::IpAddr;

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use vaktpost_core::events::Direction;

use crate::CaptureError;

#[derive(Debug, Clone, Default)]
pub struct LocalAddrs {
    addrs: HashSet<IpAddr>,
}

impl LocalAddrs {
    /// Snapshot the addresses of every interface on this host.
    pub fn discover() -> Result<Self, CaptureError> {
        let interfaces =
            NetworkInterface::show().map_err(|e| CaptureError::Interfaces(e.to_string()))?;
        let addrs = interfaces
            .iter()
            .flat_map(|iface| iface.addr.iter())
            .map(|addr| match addr {
                Addr::V4(v4) => IpAddr::V4(v4.ip),
                Addr::V6(v6) => IpAddr::V6(v6.ip),
            })
            .collect();
        Ok(Self { addrs })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Source is checked first, so traffic between two local addresses is
    /// `Outgoing`.
    pub fn direction(&self, source: &IpAddr, destination: &IpAddr) -> Direction {
        if self.contains(source) {
            Direction::Outgoing
        } else if self.contains(destination) {
            Direction::Incoming
        } else {
            Direction::Unknown
        }
    }
}

impl FromIterator<IpAddr> for LocalAddrs {
    fn from_iter<I: IntoIterator<Item = IpAddr>>(iter: I) -> Self {
        Self {
            addrs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn orients_flows_against_local_set() {
        let local: LocalAddrs = [ip("192.168.1.10")].into_iter().collect();
        assert_eq!(
            local.direction(&ip("192.168.1.10"), &ip("8.8.8.8")),
            Direction::Outgoing
        );
        assert_eq!(
            local.direction(&ip("8.8.8.8"), &ip("192.168.1.10")),
            Direction::Incoming
        );
        assert_eq!(
            local.direction(&ip("8.8.8.8"), &ip("1.1.1.1")),
            Direction::Unknown
        );
    }

    proptest! {
        #[test]
        fn direction_depends_only_on_membership(
            local_octets in proptest::collection::hash_set(any::<[u8; 4]>(), 1..8),
            remote in any::<[u8; 4]>(),
        ) {
            let local: LocalAddrs = local_octets.iter().map(|o| IpAddr::from(*o)).collect();
            let remote = IpAddr::from(remote);
            prop_assume!(!local.contains(&remote));
            let some_local = IpAddr::from(*local_octets.iter().next().unwrap());

            prop_assert_eq!(local.direction(&some_local, &remote), Direction::Outgoing);
            prop_assert_eq!(local.direction(&remote, &some_local), Direction::Incoming);
            prop_assert_eq!(local.direction(&remote, &remote), Direction::Unknown);
            prop_assert_eq!(local.direction(&some_local, &some_local), Direction::Outgoing);
        }
    }
}
