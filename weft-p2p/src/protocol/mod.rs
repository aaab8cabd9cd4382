//! Wire protocol layer: packet framing and the base packet ids every
//! session understands.

pub mod framing;

pub use framing::{seal, PacketCodec};

/// Packet ids reserved for the base session protocol.
///
/// Capability packet ids start at [`crate::config::USER_PACKET_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BasePacket {
    /// Orderly teardown; payload carries the disconnect reason code.
    Disconnect = 0x01,
    /// Keep-alive probe.
    Ping = 0x02,
    /// Keep-alive reply.
    Pong = 0x03,
    /// Request for known node endpoints.
    GetPeers = 0x04,
    /// Response carrying known node endpoints.
    Peers = 0x05,
}

impl BasePacket {
    /// Decode a base packet id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(BasePacket::Disconnect),
            0x02 => Some(BasePacket::Ping),
            0x03 => Some(BasePacket::Pong),
            0x04 => Some(BasePacket::GetPeers),
            0x05 => Some(BasePacket::Peers),
            _ => None,
        }
    }
}
