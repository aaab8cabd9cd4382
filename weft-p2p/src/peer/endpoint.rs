//! Node endpoints and address classification.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Advertised network location of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// IPv4 or IPv6 address.
    pub address: IpAddr,
    /// Discovery (UDP) port.
    pub udp_port: u16,
    /// Transport (TCP) port.
    pub tcp_port: u16,
}

impl NodeEndpoint {
    /// Create an endpoint.
    pub fn new(address: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self {
            address,
            udp_port,
            tcp_port,
        }
    }

    /// Endpoint synthesized from a TCP socket address; the UDP port is
    /// unknown and left clear.
    pub fn from_tcp(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip(),
            udp_port: 0,
            tcp_port: addr.port(),
        }
    }

    /// The TCP socket address of this endpoint.
    pub fn tcp(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.tcp_port)
    }

    /// Whether the address is in a reserved, loopback or link-local range.
    pub fn is_private(&self) -> bool {
        is_private_address(self.address)
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.tcp_port)
    }
}

/// Whether an address is in a reserved, loopback or link-local range and
/// therefore unusable as a public peer endpoint.
pub fn is_private_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_broadcast()
                || ip.is_unspecified()
                || is_documentation_v4(ip)
        }
        IpAddr::V6(ip) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || is_unicast_link_local_v6(ip)
                || is_unique_local_v6(ip)
        }
    }
}

/// Check if an IPv4 address is in a documentation range.
fn is_documentation_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    // 192.0.2.0/24
    (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
    // 198.51.100.0/24
    || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
    // 203.0.113.0/24
    || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

/// Check if an IPv6 address is link-local unicast (fe80::/10).
fn is_unicast_link_local_v6(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Check if an IPv6 address is unique local (fc00::/7).
fn is_unique_local_v6(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_ranges() {
        assert!(is_private_address(ip("10.0.0.1")));
        assert!(is_private_address(ip("172.16.0.1")));
        assert!(is_private_address(ip("192.168.1.1")));
        assert!(is_private_address(ip("127.0.0.1")));
        assert!(is_private_address(ip("169.254.1.1")));
        assert!(is_private_address(ip("0.0.0.0")));
        assert!(is_private_address(ip("::1")));
        assert!(is_private_address(ip("fe80::1")));
        assert!(is_private_address(ip("fc00::1")));
    }

    #[test]
    fn test_public_addresses() {
        assert!(!is_private_address(ip("8.8.8.8")));
        assert!(!is_private_address(ip("1.1.1.1")));
        assert!(!is_private_address(ip("2001:4860:4860::8888")));
    }

    #[test]
    fn test_endpoint_from_tcp() {
        let ep = NodeEndpoint::from_tcp("8.8.8.8:30303".parse().unwrap());
        assert_eq!(ep.address, ip("8.8.8.8"));
        assert_eq!(ep.tcp_port, 30303);
        assert_eq!(ep.udp_port, 0);
        assert_eq!(ep.tcp(), "8.8.8.8:30303".parse().unwrap());
        assert!(!ep.is_private());
    }
}
