//! Public endpoint selection.
//!
//! Decides which address the host advertises to peers, from the interface
//! list, an optional explicit override, and optional NAT traversal.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use crate::peer::is_private_address;

/// NAT traversal seam.
///
/// Consulted when no public interface address is available and traversal is
/// enabled in the preferences. Implementations map the listen port on the
/// gateway and report the resulting external endpoint.
pub trait NatTraversal: Send + Sync {
    /// Attempt to map `listen_port`; returns the external endpoint on
    /// success.
    fn traverse(&self, interface_addresses: &[IpAddr], listen_port: u16) -> Option<SocketAddr>;
}

/// Outcome of public-address selection.
pub(crate) struct PublicAddress {
    /// Addresses peers can know us by.
    pub peer_addresses: BTreeSet<IpAddr>,
    /// The advertised endpoint, unspecified when none could be determined.
    pub endpoint: Option<SocketAddr>,
}

/// Gather the addresses of all interfaces that are up.
pub(crate) fn interface_addresses() -> Vec<IpAddr> {
    let mut addrs = Vec::new();
    for iface in netdev::get_interfaces() {
        if !iface.is_up() {
            continue;
        }
        for net in &iface.ipv4 {
            addrs.push(IpAddr::V4(net.addr));
        }
        for net in &iface.ipv6 {
            addrs.push(IpAddr::V6(net.addr));
        }
    }
    addrs
}

/// Choose the advertised public endpoint.
///
/// In order: an explicit override that is public (or private while local
/// networking is on); the first public IPv4 interface address; a NAT
/// traversal result; the first private IPv4 interface address under local
/// networking; otherwise unspecified.
pub(crate) fn select_public_address(
    if_addrs: &[IpAddr],
    requested: Option<IpAddr>,
    listen_port: u16,
    local_networking: bool,
    nat: Option<&dyn NatTraversal>,
) -> PublicAddress {
    let mut peer_addresses: BTreeSet<IpAddr> = BTreeSet::new();
    for addr in if_addrs {
        if addr.is_loopback() {
            continue;
        }
        if local_networking || !is_private_address(*addr) {
            peer_addresses.insert(*addr);
        }
    }

    if let Some(req) = requested {
        let private = is_private_address(req);
        if !private || local_networking {
            peer_addresses.insert(req);
            return PublicAddress {
                peer_addresses,
                endpoint: Some(SocketAddr::new(req, listen_port)),
            };
        }
    }

    for addr in &peer_addresses {
        if addr.is_ipv4() && !is_private_address(*addr) {
            return PublicAddress {
                endpoint: Some(SocketAddr::new(*addr, listen_port)),
                peer_addresses,
            };
        }
    }

    if let Some(nat) = nat {
        if let Some(external) = nat.traverse(if_addrs, listen_port) {
            peer_addresses.insert(external.ip());
            return PublicAddress {
                peer_addresses,
                endpoint: Some(external),
            };
        }
    }

    if requested.is_none() && local_networking {
        for addr in &peer_addresses {
            if addr.is_ipv4() && is_private_address(*addr) {
                return PublicAddress {
                    endpoint: Some(SocketAddr::new(*addr, listen_port)),
                    peer_addresses,
                };
            }
        }
    }

    PublicAddress {
        peer_addresses,
        endpoint: None,
    }
}
