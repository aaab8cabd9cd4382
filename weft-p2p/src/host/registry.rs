//! Peer and session bookkeeping.
//!
//! The registry owns every [`Peer`] record strongly and links to sessions
//! weakly; a session is "live" exactly while its weak reference upgrades to
//! an open session. Dead weak entries are flushed opportunistically during
//! reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use weft_core::PeerId;

use crate::capability::{CapDesc, Capability};
use crate::config::USER_PACKET_BASE;
use crate::peer::{NodeEndpoint, Peer};
use crate::session::Session;

struct RegistryInner {
    peers: HashMap<PeerId, Arc<Peer>>,
    sessions: HashMap<PeerId, Weak<dyn Session>>,
}

/// Strong map of peer records plus weak map of live sessions.
pub(crate) struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                peers: HashMap::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Look up a peer record.
    pub fn peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.inner.lock().peers.get(id).cloned()
    }

    /// Fetch the record for a node, creating it on first sight.
    pub fn get_or_insert_peer(&self, id: PeerId, endpoint: NodeEndpoint) -> Arc<Peer> {
        self.inner
            .lock()
            .peers
            .entry(id)
            .or_insert_with(|| Arc::new(Peer::new(id, endpoint)))
            .clone()
    }

    /// Remove a peer record.
    pub fn remove_peer(&self, id: &PeerId) {
        let mut inner = self.inner.lock();
        inner.peers.remove(id);
        inner.sessions.remove(id);
    }

    /// All known peer records.
    pub fn known_peers(&self) -> Vec<Arc<Peer>> {
        self.inner.lock().peers.values().cloned().collect()
    }

    /// Number of known peers.
    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Whether an open session exists for the peer.
    ///
    /// A stale weak entry found here is flushed as a side effect.
    pub fn has_live_session(&self, id: &PeerId) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get(id) {
            Some(weak) => match weak.upgrade() {
                Some(session) => session.is_open(),
                None => {
                    inner.sessions.remove(id);
                    false
                }
            },
            None => false,
        }
    }

    /// All currently open sessions, flushing dead entries on the way.
    pub fn live_sessions(&self) -> Vec<Arc<dyn Session>> {
        let mut inner = self.inner.lock();
        let mut live = Vec::new();
        inner.sessions.retain(|_, weak| match weak.upgrade() {
            Some(session) => {
                if session.is_open() {
                    live.push(session);
                }
                true
            }
            None => false,
        });
        live
    }

    /// Number of currently open sessions.
    pub fn session_count(&self) -> usize {
        self.live_sessions().len()
    }

    /// Register a freshly started session and allocate its capabilities.
    ///
    /// The peer record is inserted if this is the first time the node is
    /// seen. Capability instances are allocated for every descriptor in
    /// `caps` the host knows, in list order, each claiming a contiguous
    /// packet-id range starting at `USER_PACKET_BASE`.
    pub fn register_session(
        &self,
        session: Arc<dyn Session>,
        caps: &[CapDesc],
        registered: &BTreeMap<CapDesc, Arc<dyn Capability>>,
    ) {
        let peer = session.peer();
        {
            let mut inner = self.inner.lock();
            inner.peers.entry(peer.id()).or_insert_with(|| peer.clone());
            inner.sessions.insert(peer.id(), Arc::downgrade(&session));
        }

        let mut offset = USER_PACKET_BASE;
        for desc in caps {
            if let Some(cap) = registered.get(desc) {
                let instance = cap.new_peer_capability(session.as_ref(), offset);
                session.install_capability(*desc, instance);
                offset += cap.message_count();
            }
        }
    }

    /// Drop every session entry. Peer records are kept.
    pub fn clear_sessions(&self) {
        self.inner.lock().sessions.clear();
    }
}
