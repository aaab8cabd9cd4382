//! Capability (sub-protocol) registration.
//!
//! A capability is a named, versioned sub-protocol multiplexed over a
//! session. Each registered capability claims a contiguous range of packet
//! ids per session, allocated in registration order starting at
//! [`USER_PACKET_BASE`](crate::config::USER_PACKET_BASE).
//!
//! Capabilities must be registered before the host starts; registration is
//! not thread-safe with respect to a running network.

use std::fmt;

use crate::session::Session;

/// Name + version pair uniquely identifying a sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapDesc {
    /// Short protocol name.
    pub name: &'static str,
    /// Protocol version.
    pub version: u8,
}

impl CapDesc {
    /// Create a capability descriptor.
    pub const fn new(name: &'static str, version: u8) -> Self {
        Self { name, version }
    }
}

impl fmt::Display for CapDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// A registered sub-protocol factory.
///
/// One instance exists per host; it produces a [`PeerCapability`] for every
/// session that negotiates the protocol.
pub trait Capability: Send + Sync {
    /// Short protocol name.
    fn name(&self) -> &'static str;

    /// Protocol version.
    fn version(&self) -> u8;

    /// Number of packet ids this capability claims per session.
    fn message_count(&self) -> u8;

    /// Called once when the host network comes up.
    fn on_starting(&self) {}

    /// Called once during shutdown, before sessions are torn down.
    fn on_stopping(&self) {}

    /// Instantiate the per-session side, claiming packet ids
    /// `[packet_offset, packet_offset + message_count)`.
    fn new_peer_capability(
        &self,
        session: &dyn Session,
        packet_offset: u8,
    ) -> Box<dyn PeerCapability>;

    /// The descriptor identifying this capability.
    fn descriptor(&self) -> CapDesc {
        CapDesc::new(self.name(), self.version())
    }
}

/// Per-session side of a capability.
pub trait PeerCapability: Send + Sync {
    /// First packet id assigned to this instance.
    fn packet_offset(&self) -> u8;

    /// Dispatch one inbound packet, with the id relative to
    /// [`packet_offset`](Self::packet_offset).
    fn on_packet(&self, _id: u8, _payload: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_desc_display() {
        assert_eq!(format!("{}", CapDesc::new("shh", 2)), "shh/2");
    }

    #[test]
    fn test_cap_desc_ordering() {
        // BTreeMap iteration over descriptors follows (name, version)
        let a = CapDesc::new("eth", 60);
        let b = CapDesc::new("eth", 61);
        let c = CapDesc::new("shh", 2);
        assert!(a < b);
        assert!(b < c);
    }
}
