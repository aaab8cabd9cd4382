//! The p2p host.
//!
//! Owns the listening socket, dials peers discovered through the node
//! table, schedules keep-alive and reaping, and keeps the peer/session
//! registry. One orchestrator task serialises accepts and scheduler ticks;
//! dial and session tasks run on the side and report back through shared,
//! lock-guarded state.

mod address;
mod persistence;
mod registry;
mod resolve;

pub use address::NatTraversal;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use weft_core::{KeyPair, PeerId};

use crate::capability::{CapDesc, Capability};
use crate::config::{
    sanitize_advertised_port, NetworkPreferences, DEFAULT_IDEAL_PEER_COUNT, KEEP_ALIVE_INTERVAL,
    KEEP_ALIVE_TIMEOUT, PROTOCOL_VERSION, TIMER_INTERVAL,
};
use crate::discovery::{MemoryNodeTable, Node, NodeTable, NodeTableEvent};
use crate::error::{HostError, HostResult};
use crate::host::registry::SessionRegistry;
use crate::identity;
use crate::peer::{is_private_address, DisconnectReason, NodeEndpoint, Peer};
use crate::session::{SessionFactory, TcpSessionFactory};

/// Snapshot of one live session for external reporting.
#[derive(Debug, Clone)]
pub struct PeerSessionInfo {
    /// Identity of the connected peer.
    pub id: PeerId,
    /// The peer's endpoint.
    pub endpoint: NodeEndpoint,
}

/// The peer-to-peer host.
///
/// Capabilities, a custom node table, session factory or NAT traversal must
/// be registered before [`start`](Host::start); the public API is otherwise
/// callable from any thread.
pub struct Host {
    inner: Arc<HostInner>,
    worker: TokioMutex<Option<JoinHandle<()>>>,
}

struct HostInner {
    prefs: Mutex<NetworkPreferences>,
    alias: RwLock<KeyPair>,

    running: AtomicBool,
    // Start/stop mutex: a concurrent stop() and a mid-initialisation
    // start() must not race on the running flag.
    run_lock: Mutex<()>,
    accepting: AtomicBool,

    listen_port: Mutex<Option<u16>>,
    public_endpoint: Mutex<Option<SocketAddr>>,
    peer_addresses: Mutex<BTreeSet<IpAddr>>,

    registry: SessionRegistry,
    pending_conns: Mutex<HashSet<PeerId>>,

    node_table: Mutex<Option<Arc<dyn NodeTable>>>,
    custom_table: Mutex<Option<Arc<dyn NodeTable>>>,

    capabilities: Mutex<BTreeMap<CapDesc, Arc<dyn Capability>>>,
    session_factory: Mutex<Arc<dyn SessionFactory>>,
    nat: Mutex<Option<Arc<dyn NatTraversal>>>,

    ideal_peer_count: AtomicUsize,
    last_ping: Mutex<Option<Instant>>,
}

impl Host {
    /// Create a host with the given preferences, loading or generating the
    /// host identity.
    pub fn new(prefs: NetworkPreferences) -> HostResult<Self> {
        let alias = identity::host_identity(&prefs.data_dir)?;

        for addr in address::interface_addresses() {
            tracing::debug!(
                addr = %addr,
                scope = if is_private_address(addr) { "local" } else { "peer" },
                "interface address"
            );
        }
        tracing::info!(id = %alias.peer_id(), client = %prefs.client_version, "host created");

        Ok(Self {
            inner: Arc::new(HostInner {
                prefs: Mutex::new(prefs),
                alias: RwLock::new(alias),
                running: AtomicBool::new(false),
                run_lock: Mutex::new(()),
                accepting: AtomicBool::new(false),
                listen_port: Mutex::new(None),
                public_endpoint: Mutex::new(None),
                peer_addresses: Mutex::new(BTreeSet::new()),
                registry: SessionRegistry::new(),
                pending_conns: Mutex::new(HashSet::new()),
                node_table: Mutex::new(None),
                custom_table: Mutex::new(None),
                capabilities: Mutex::new(BTreeMap::new()),
                session_factory: Mutex::new(Arc::new(TcpSessionFactory)),
                nat: Mutex::new(None),
                ideal_peer_count: AtomicUsize::new(DEFAULT_IDEAL_PEER_COUNT),
                last_ping: Mutex::new(None),
            }),
            worker: TokioMutex::new(None),
        })
    }

    /// The host's network identity.
    pub fn id(&self) -> PeerId {
        self.inner.id()
    }

    /// Basic peer network protocol version.
    pub fn protocol_version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    /// Whether the network is running.
    pub fn is_started(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the acceptor is armed.
    pub fn accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// The locally bound listen port, once the network has started.
    pub fn listen_port(&self) -> Option<u16> {
        *self.inner.listen_port.lock()
    }

    /// The advertised public address, if one was determined.
    pub fn listen_address(&self) -> Option<IpAddr> {
        self.inner.public_endpoint.lock().map(|ep| ep.ip())
    }

    /// The advertised public endpoint, if one was determined.
    pub fn public_endpoint(&self) -> Option<SocketAddr> {
        *self.inner.public_endpoint.lock()
    }

    /// Addresses peers can know this host by.
    pub fn peer_addresses(&self) -> Vec<IpAddr> {
        self.inner.peer_addresses.lock().iter().copied().collect()
    }

    /// Register a sub-protocol; every new session will be offered it.
    ///
    /// Must happen before [`start`](Host::start).
    pub fn register_capability(&self, capability: Arc<dyn Capability>) {
        if self.is_started() {
            tracing::warn!(
                cap = %capability.descriptor(),
                "capability registered while network is running"
            );
        }
        self.inner
            .capabilities
            .lock()
            .insert(capability.descriptor(), capability);
    }

    /// Whether a capability is registered.
    pub fn have_capability(&self, desc: &CapDesc) -> bool {
        self.inner.capabilities.lock().contains_key(desc)
    }

    /// Descriptors of all registered capabilities.
    pub fn caps(&self) -> Vec<CapDesc> {
        self.inner.capabilities.lock().keys().copied().collect()
    }

    /// Replace the session factory. Must happen before [`start`](Host::start).
    pub fn set_session_factory(&self, factory: Arc<dyn SessionFactory>) {
        *self.inner.session_factory.lock() = factory;
    }

    /// Install a discovery implementation to use instead of the built-in
    /// in-memory table. Must happen before [`start`](Host::start).
    pub fn set_node_table(&self, table: Arc<dyn NodeTable>) {
        *self.inner.custom_table.lock() = Some(table);
    }

    /// Install a NAT traversal implementation, consulted when the
    /// preferences enable it. Must happen before [`start`](Host::start).
    pub fn set_nat_traversal(&self, nat: Arc<dyn NatTraversal>) {
        *self.inner.nat.lock() = Some(nat);
    }

    /// Set the target number of simultaneously connected peers.
    pub fn set_ideal_peer_count(&self, count: usize) {
        self.inner.ideal_peer_count.store(count, Ordering::SeqCst);
    }

    /// Start the network. Returns once the listener is bound and the first
    /// scheduler tick is armed.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        {
            let _guard = self.inner.run_lock.lock();
            if self.inner.running.swap(true, Ordering::SeqCst) {
                return;
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move { inner.run_worker(ready_tx).await }));
        drop(worker);

        let _ = ready_rx.await;
    }

    /// Stop the network.
    ///
    /// Returns after the worker has acknowledged shutdown: the acceptor is
    /// closed, capabilities have observed `on_stopping`, every session has
    /// been disconnected with `ClientQuit`, and the session map is empty.
    pub async fn stop(&self) {
        {
            let _guard = self.inner.run_lock.lock();
            if !self.inner.running.swap(false, Ordering::SeqCst) {
                return;
            }
        }

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Swap network preferences, restarting the network if it was running.
    pub async fn set_network_preferences(&self, prefs: NetworkPreferences) {
        let had = self.is_started();
        if had {
            self.stop().await;
        }
        *self.inner.prefs.lock() = prefs;
        if had {
            self.start().await;
        }
    }

    /// Feed a node into the discovery layer.
    ///
    /// A literal IP address is forwarded synchronously; anything else is
    /// resolved asynchronously, and resolution failures are only logged.
    pub fn add_node(&self, id: PeerId, address: &str, tcp_port: u16, udp_port: u16) {
        let tcp_port = sanitize_advertised_port(tcp_port);

        match address.parse::<IpAddr>() {
            Ok(ip) => {
                self.inner
                    .add_discovered_node(Node::new(id, NodeEndpoint::new(ip, tcp_port, udp_port)));
            }
            Err(_) => {
                let inner = self.inner.clone();
                let host = address.to_string();
                tokio::spawn(async move {
                    if let Some(ip) = resolve::resolve_host(&host).await {
                        inner.add_discovered_node(Node::new(
                            id,
                            NodeEndpoint::new(ip, tcp_port, udp_port),
                        ));
                    }
                });
            }
        }
    }

    /// Info for every currently open session.
    pub fn peers(&self) -> Vec<PeerSessionInfo> {
        if !self.is_started() {
            return Vec::new();
        }
        self.inner
            .registry
            .live_sessions()
            .into_iter()
            .map(|session| {
                let peer = session.peer();
                PeerSessionInfo {
                    id: peer.id(),
                    endpoint: peer.endpoint(),
                }
            })
            .collect()
    }

    /// Number of known peers (connected or not).
    pub fn peer_count(&self) -> usize {
        self.inner.registry.peer_count()
    }

    /// Number of currently open sessions.
    pub fn session_count(&self) -> usize {
        self.inner.registry.session_count()
    }

    /// Whether an open session exists for the peer.
    pub fn has_live_session(&self, id: &PeerId) -> bool {
        self.inner.registry.has_live_session(id)
    }

    /// All known peer records.
    pub fn known_peers(&self) -> Vec<Arc<Peer>> {
        self.inner.registry.known_peers()
    }

    /// Serialise the persistent peer set, including the host secret.
    pub fn save_nodes(&self) -> HostResult<Vec<u8>> {
        let (secret, self_id) = {
            let alias = self.inner.alias.read();
            (*alias.secret_bytes(), alias.peer_id())
        };
        persistence::encode_nodes(secret, &self.inner.registry.known_peers(), self_id)
    }

    /// Restore a persisted peer set.
    ///
    /// A current-format blob restores the host secret and re-inserts the
    /// peers by identity and location; an unknown version is ignored; bytes
    /// matching no known layout are rejected.
    pub fn restore_nodes(&self, blob: &[u8]) -> HostResult<()> {
        let Some(restored) = persistence::decode_nodes(blob)? else {
            return Ok(());
        };

        *self.inner.alias.write() = KeyPair::from_secret_bytes(&restored.secret);
        tracing::info!(id = %self.id(), count = restored.nodes.len(), "restored node records");

        for (id, endpoint) in restored.nodes {
            // Location only; historical statistics stay at their defaults.
            self.inner.registry.get_or_insert_peer(id, endpoint);
        }
        Ok(())
    }
}

async fn accept_next(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

impl HostInner {
    fn id(&self) -> PeerId {
        self.alias.read().peer_id()
    }

    async fn run_worker(self: Arc<Self>, ready: oneshot::Sender<()>) {
        let prefs = self.prefs.lock().clone();

        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, prefs.listen_port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::warn!(port = prefs.listen_port, error = %e, "failed to bind listener");
                None
            }
        };
        let bound_port = listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|addr| addr.port());
        *self.listen_port.lock() = bound_port;

        let capabilities: Vec<Arc<dyn Capability>> =
            self.capabilities.lock().values().cloned().collect();
        for cap in &capabilities {
            cap.on_starting();
        }

        if let Some(port) = bound_port {
            let requested = prefs
                .public_ip
                .as_deref()
                .and_then(|raw| match raw.parse::<IpAddr>() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        tracing::warn!(address = raw, "ignoring unparseable public address override");
                        None
                    }
                });
            let nat = if prefs.upnp { self.nat.lock().clone() } else { None };

            let selection = address::select_public_address(
                &address::interface_addresses(),
                requested,
                port,
                prefs.local_networking,
                nat.as_deref(),
            );
            match selection.endpoint {
                Some(endpoint) => tracing::info!(%endpoint, "advertising public endpoint"),
                None => tracing::info!("no public endpoint available"),
            }
            *self.peer_addresses.lock() = selection.peer_addresses;
            *self.public_endpoint.lock() = selection.endpoint;

            let table = self
                .custom_table
                .lock()
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryNodeTable::new()));
            *self.node_table.lock() = Some(table);

            tracing::info!(id = %self.id(), port, "p2p started");
        } else {
            tracing::warn!(id = %self.id(), "invalid listen port, node table disabled");
        }

        self.accepting.store(listener.is_some(), Ordering::SeqCst);
        let _ = ready.send(());

        let mut ticker = interval(TIMER_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = accept_next(listener.as_ref()) => match result {
                    Ok((stream, addr)) => {
                        tracing::debug!(addr = %addr, "accepted inbound connection");
                        if let Err(e) = self.start_session(stream, None) {
                            // Dropping the stream closes the socket
                            tracing::warn!(addr = %addr, error = %e, "inbound session setup failed");
                        }
                    }
                    Err(e) => {
                        // Per-connection failure; the acceptor stays armed
                        tracing::warn!(error = %e, "accept error");
                    }
                },
                _ = ticker.tick() => {
                    if !self.scheduler_tick() {
                        break;
                    }
                }
            }
        }

        self.accepting.store(false, Ordering::SeqCst);
        drop(listener);
        self.done_working(&capabilities).await;
        tracing::info!("p2p stopped");
    }

    /// Wrap a socket and a peer record into a started, registered session.
    ///
    /// For inbound connections (`known` absent) a peer record is synthesized
    /// from the socket's remote address with an unknown identity.
    fn start_session(&self, stream: TcpStream, known: Option<Arc<Peer>>) -> HostResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(HostError::NotRunning);
        }

        let peer = match known {
            Some(peer) => peer,
            None => {
                let remote = stream.peer_addr()?;
                Arc::new(Peer::new(PeerId::ZERO, NodeEndpoint::from_tcp(remote)))
            }
        };

        let factory = self.session_factory.lock().clone();
        let session = factory.open(stream, peer)?;

        let registered = self.capabilities.lock().clone();
        let offered: Vec<CapDesc> = registered.keys().copied().collect();
        self.registry.register_session(session, &offered, &registered);
        Ok(())
    }

    /// One scheduler pass. Returns false when the network is shutting down.
    fn scheduler_tick(self: &Arc<Self>) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            // Shutdown breadcrumb: discovery goes away first so nothing new
            // resolves while sessions are being torn down.
            *self.node_table.lock() = None;
            return false;
        }

        let table = self.node_table.lock().clone();
        if let Some(table) = table {
            for event in table.process_events() {
                self.on_node_table_event(table.as_ref(), event);
            }
        }

        for session in self.registry.live_sessions() {
            session.service_nodes_request();
        }

        self.keep_alive_peers();
        self.disconnect_late_peers();
        true
    }

    fn on_node_table_event(self: &Arc<Self>, table: &dyn NodeTable, event: NodeTableEvent) {
        match event {
            NodeTableEvent::NodeEntryAdded(id) => {
                tracing::debug!(node = %id, "node table event: entry added");
                let Some(node) = table.node(&id) else {
                    return;
                };
                let peer = self.registry.get_or_insert_peer(node.id, node.endpoint);
                peer.set_endpoint(node.endpoint);

                let live = self.registry.session_count();
                let pending = self.pending_conns.lock().len();
                if live + pending < self.ideal_peer_count.load(Ordering::SeqCst) {
                    self.schedule_connect(&peer);
                }
            }
            NodeTableEvent::NodeEntryRemoved(id) => {
                tracing::debug!(node = %id, "node table event: entry removed");
                self.registry.remove_peer(&id);
            }
        }
    }

    /// Begin an outbound connection attempt unless one is already pending
    /// or pointless.
    fn schedule_connect(self: &Arc<Self>, peer: &Arc<Peer>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.registry.has_live_session(&peer.id()) {
            tracing::warn!(node = %peer.id(), "aborted connect, node already connected");
            return;
        }
        let known = self
            .node_table
            .lock()
            .clone()
            .map(|table| table.have_node(&peer.id()))
            .unwrap_or(false);
        if !known {
            tracing::warn!(node = %peer.id(), "aborted connect, node not in node table");
            return;
        }

        // One outstanding attempt per peer
        if !self.pending_conns.lock().insert(peer.id()) {
            return;
        }

        let inner = self.clone();
        let peer = peer.clone();
        tokio::spawn(async move { inner.dial(peer).await });
    }

    async fn dial(self: Arc<Self>, peer: Arc<Peer>) {
        let endpoint = peer.endpoint().tcp();
        tracing::debug!(node = %peer.id(), addr = %endpoint, "attempting connection");

        // No explicit timeout; the OS connect timeout applies
        match TcpStream::connect(endpoint).await {
            Ok(stream) => {
                tracing::debug!(node = %peer.id(), addr = %endpoint, "connected");
                peer.note_connected();
                if let Err(e) = self.start_session(stream, Some(peer.clone())) {
                    tracing::warn!(node = %peer.id(), error = %e, "outbound session setup failed");
                    peer.note_failed_attempt();
                }
            }
            Err(e) => {
                tracing::debug!(node = %peer.id(), addr = %endpoint, error = %e, "connection failed");
                peer.note_failed_attempt();
            }
        }

        self.pending_conns.lock().remove(&peer.id());
    }

    /// Ping every live session once per keep-alive interval.
    fn keep_alive_peers(&self) {
        let now = Instant::now();
        if let Some(last) = *self.last_ping.lock() {
            if now.duration_since(last) < KEEP_ALIVE_INTERVAL {
                return;
            }
        }

        for session in self.registry.live_sessions() {
            session.ping();
        }
        *self.last_ping.lock() = Some(now);
    }

    /// Disconnect sessions that stayed silent through the grace period
    /// after the last ping.
    fn disconnect_late_peers(&self) {
        let Some(last_ping) = *self.last_ping.lock() else {
            return;
        };
        if Instant::now().duration_since(last_ping) < KEEP_ALIVE_TIMEOUT {
            return;
        }

        for session in self.registry.live_sessions() {
            if session.last_received() < last_ping {
                session.disconnect(DisconnectReason::PingTimeout);
            }
        }
    }

    fn add_discovered_node(&self, node: Node) {
        if let Some(table) = self.node_table.lock().clone() {
            table.add_node(node);
        }
    }

    /// Ordered teardown, run on the worker after the loop exits.
    async fn done_working(&self, capabilities: &[Arc<dyn Capability>]) {
        for cap in capabilities {
            cap.on_stopping();
        }

        // Disconnect peers, polling until every session has observed it
        loop {
            let open = self.registry.live_sessions();
            if open.is_empty() {
                break;
            }
            for session in open {
                session.disconnect(DisconnectReason::ClientQuit);
            }
            // Session tasks need a moment to flush their disconnect packets
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.registry.clear_sessions();
    }
}
