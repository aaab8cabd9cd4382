//! The peer record: identity, endpoint, reputation and availability history.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use weft_core::PeerId;

use crate::peer::NodeEndpoint;
use crate::session::Session;

/// Reason attached to a session teardown.
///
/// Carried in peer metadata and on the wire; sub-protocols use the open
/// `Other` space above the reserved codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Peer asked for an orderly disconnect.
    Requested,
    /// Transport-level failure.
    TcpError,
    /// Peer violated the protocol.
    BadProtocol,
    /// Peer offers nothing we need.
    UselessPeer,
    /// Connection limit reached.
    TooManyPeers,
    /// Local client is shutting down.
    ClientQuit,
    /// Peer failed to answer a keep-alive ping in time.
    PingTimeout,
    /// Sub-protocol specific reason.
    Other(u8),
    /// No disconnect has happened.
    #[default]
    NoDisconnect,
}

impl DisconnectReason {
    /// Stable numeric code used in persisted records.
    pub fn code(self) -> u32 {
        match self {
            DisconnectReason::Requested => 0,
            DisconnectReason::TcpError => 1,
            DisconnectReason::BadProtocol => 2,
            DisconnectReason::UselessPeer => 3,
            DisconnectReason::TooManyPeers => 4,
            DisconnectReason::ClientQuit => 8,
            DisconnectReason::PingTimeout => 11,
            DisconnectReason::Other(code) => code as u32,
            DisconnectReason::NoDisconnect => 0xffff,
        }
    }

    /// Decode a persisted reason code; unrecognised codes map to `Other`.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => DisconnectReason::Requested,
            1 => DisconnectReason::TcpError,
            2 => DisconnectReason::BadProtocol,
            3 => DisconnectReason::UselessPeer,
            4 => DisconnectReason::TooManyPeers,
            8 => DisconnectReason::ClientQuit,
            11 => DisconnectReason::PingTimeout,
            0xffff => DisconnectReason::NoDisconnect,
            other => DisconnectReason::Other(other as u8),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::TcpError => write!(f, "tcp error"),
            DisconnectReason::BadProtocol => write!(f, "bad protocol"),
            DisconnectReason::UselessPeer => write!(f, "useless peer"),
            DisconnectReason::TooManyPeers => write!(f, "too many peers"),
            DisconnectReason::ClientQuit => write!(f, "client quit"),
            DisconnectReason::PingTimeout => write!(f, "ping timeout"),
            DisconnectReason::Other(code) => write!(f, "reason {code}"),
            DisconnectReason::NoDisconnect => write!(f, "no disconnect"),
        }
    }
}

/// Mutable portion of a peer record.
#[derive(Clone)]
struct PeerState {
    endpoint: NodeEndpoint,
    score: i32,
    rating: i32,
    last_connected: Option<SystemTime>,
    last_attempted: Option<SystemTime>,
    failed_attempts: u32,
    last_disconnect: DisconnectReason,
    session: Option<Weak<dyn Session>>,
}

/// Point-in-time copy of a peer's mutable state, without the session link.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    /// Advertised endpoint.
    pub endpoint: NodeEndpoint,
    /// All-time cumulative score.
    pub score: i32,
    /// Trending rating.
    pub rating: i32,
    /// Last successful connection, wall time.
    pub last_connected: Option<SystemTime>,
    /// Last connection attempt, wall time.
    pub last_attempted: Option<SystemTime>,
    /// Number of failed connection attempts.
    pub failed_attempts: u32,
    /// Reason for the most recent disconnect.
    pub last_disconnect: DisconnectReason,
}

/// A known remote node.
///
/// Peer records are owned by the host registry and live until explicit
/// removal or teardown; sessions hold a strong reference back to their peer
/// while the peer only links to the session weakly.
pub struct Peer {
    id: PeerId,
    state: Mutex<PeerState>,
}

impl Peer {
    /// Create a record for a node at a known endpoint.
    pub fn new(id: PeerId, endpoint: NodeEndpoint) -> Self {
        Self {
            id,
            state: Mutex::new(PeerState {
                endpoint,
                score: 0,
                rating: 0,
                last_connected: None,
                last_attempted: None,
                failed_attempts: 0,
                last_disconnect: DisconnectReason::NoDisconnect,
                session: None,
            }),
        }
    }

    /// The node's identity.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The advertised endpoint.
    pub fn endpoint(&self) -> NodeEndpoint {
        self.state.lock().endpoint
    }

    /// Update the advertised endpoint.
    pub fn set_endpoint(&self, endpoint: NodeEndpoint) {
        self.state.lock().endpoint = endpoint;
    }

    /// Whether no live session currently backs this peer.
    pub fn is_offline(&self) -> bool {
        match &self.state.lock().session {
            Some(weak) => weak.upgrade().is_none(),
            None => true,
        }
    }

    /// Point-in-time copy of the mutable state.
    pub fn snapshot(&self) -> PeerSnapshot {
        let state = self.state.lock();
        PeerSnapshot {
            endpoint: state.endpoint,
            score: state.score,
            rating: state.rating,
            last_connected: state.last_connected,
            last_attempted: state.last_attempted,
            failed_attempts: state.failed_attempts,
            last_disconnect: state.last_disconnect,
        }
    }

    /// Record a successful connection.
    pub fn note_connected(&self) {
        self.state.lock().last_connected = Some(SystemTime::now());
    }

    /// Record a failed connection attempt.
    pub fn note_failed_attempt(&self) {
        let mut state = self.state.lock();
        state.last_attempted = Some(SystemTime::now());
        state.failed_attempts += 1;
        state.last_disconnect = DisconnectReason::TcpError;
    }

    /// Record the reason for a disconnect.
    pub fn note_disconnect(&self, reason: DisconnectReason) {
        self.state.lock().last_disconnect = reason;
    }

    /// Adjust the cumulative score. Advisory; sessions may call this.
    pub fn adjust_score(&self, delta: i32) {
        let mut state = self.state.lock();
        state.score = state.score.saturating_add(delta);
    }

    /// Adjust the trending rating. Advisory; sessions may call this.
    pub fn adjust_rating(&self, delta: i32) {
        let mut state = self.state.lock();
        state.rating = state.rating.saturating_add(delta);
    }

    /// Link this record to its live session.
    pub(crate) fn attach_session(&self, session: Weak<dyn Session>) {
        self.state.lock().session = Some(session);
    }

    /// The live session backing this peer, if one is open.
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.state
            .lock()
            .session
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|s| s.is_open())
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("endpoint", &snapshot.endpoint)
            .field("last_disconnect", &snapshot.last_disconnect)
            .field("failed_attempts", &snapshot.failed_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn endpoint() -> NodeEndpoint {
        NodeEndpoint::new("8.8.8.8".parse::<IpAddr>().unwrap(), 30303, 30303)
    }

    #[test]
    fn test_new_peer_is_offline() {
        let peer = Peer::new(PeerId::ZERO, endpoint());
        assert!(peer.is_offline());
        assert!(peer.session().is_none());
        assert_eq!(peer.snapshot().last_disconnect, DisconnectReason::NoDisconnect);
    }

    #[test]
    fn test_failed_attempt_updates_record() {
        let peer = Peer::new(PeerId::ZERO, endpoint());
        peer.note_failed_attempt();

        let snapshot = peer.snapshot();
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.last_disconnect, DisconnectReason::TcpError);
        assert!(snapshot.last_attempted.is_some());
        assert!(snapshot.last_connected.is_none());
    }

    #[test]
    fn test_reputation_is_saturating() {
        let peer = Peer::new(PeerId::ZERO, endpoint());
        peer.adjust_score(i32::MAX);
        peer.adjust_score(1);
        assert_eq!(peer.snapshot().score, i32::MAX);

        peer.adjust_rating(-3);
        assert_eq!(peer.snapshot().rating, -3);
    }

    #[test]
    fn test_disconnect_reason_codes() {
        for reason in [
            DisconnectReason::Requested,
            DisconnectReason::TcpError,
            DisconnectReason::ClientQuit,
            DisconnectReason::PingTimeout,
            DisconnectReason::Other(0x20),
            DisconnectReason::NoDisconnect,
        ] {
            assert_eq!(DisconnectReason::from_code(reason.code()), reason);
        }
    }
}
