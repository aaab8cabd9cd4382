//! Live peer sessions.
//!
//! A [`Session`] represents a post-handshake connection to a peer. The host
//! registry only holds weak references; the strong references live in the
//! session's own read and write tasks, so a session dies exactly when its
//! socket does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::capability::{CapDesc, PeerCapability};
use crate::config::USER_PACKET_BASE;
use crate::error::HostResult;
use crate::peer::{DisconnectReason, Peer};
use crate::protocol::{BasePacket, PacketCodec};

/// A live, post-handshake connection to a peer.
pub trait Session: Send + Sync {
    /// The peer record this session is attached to.
    fn peer(&self) -> Arc<Peer>;

    /// Whether the underlying transport is still open.
    fn is_open(&self) -> bool;

    /// When a packet was last received from the remote.
    fn last_received(&self) -> Instant;

    /// Send a keep-alive probe.
    fn ping(&self);

    /// Tear the session down, recording the reason on the peer.
    fn disconnect(&self, reason: DisconnectReason);

    /// Give the session a chance to request or push node information.
    fn service_nodes_request(&self);

    /// Attach a per-session capability instance.
    fn install_capability(&self, desc: CapDesc, cap: Box<dyn PeerCapability>);
}

/// Builds a session from an owned socket and a peer record.
///
/// This is the handshake seam: implementations take ownership of the socket
/// and return a started session, or an error in which case the socket is
/// dropped (closed) by the caller side.
pub trait SessionFactory: Send + Sync {
    /// Wrap and start a session over the given socket.
    fn open(&self, stream: TcpStream, peer: Arc<Peer>) -> HostResult<Arc<dyn Session>>;
}

/// Default factory producing [`TcpSession`]s.
#[derive(Debug, Default)]
pub struct TcpSessionFactory;

impl SessionFactory for TcpSessionFactory {
    fn open(&self, stream: TcpStream, peer: Arc<Peer>) -> HostResult<Arc<dyn Session>> {
        TcpSession::spawn(stream, peer)
    }
}

enum SessionCommand {
    Send(Vec<u8>),
    Close,
}

/// Session over a plain TCP socket with sealed packet framing.
///
/// The read task answers pings, tracks receive times and dispatches
/// capability packets by id range; the write task drains a command channel.
pub struct TcpSession {
    peer: Arc<Peer>,
    open: AtomicBool,
    last_received: Mutex<Instant>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    // Wakes the read task when the session is torn down locally
    closed: Notify,
    capabilities: Mutex<Vec<(CapDesc, Box<dyn PeerCapability>)>>,
    nodes_requested: AtomicBool,
}

impl TcpSession {
    /// Take ownership of a connected socket and start the session tasks.
    pub fn spawn(stream: TcpStream, peer: Arc<Peer>) -> HostResult<Arc<dyn Session>> {
        let remote = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %remote, error = %e, "failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session = Arc::new(TcpSession {
            peer: peer.clone(),
            open: AtomicBool::new(true),
            last_received: Mutex::new(Instant::now()),
            command_tx,
            closed: Notify::new(),
            capabilities: Mutex::new(Vec::new()),
            nodes_requested: AtomicBool::new(false),
        });

        let as_dyn: Arc<dyn Session> = session.clone();
        peer.attach_session(Arc::downgrade(&as_dyn));

        tokio::spawn(session.clone().write_loop(write_half, command_rx));
        tokio::spawn(session.clone().read_loop(read_half));

        tracing::debug!(peer = %peer.id(), addr = %remote, "session started");
        Ok(as_dyn)
    }

    async fn write_loop(
        self: Arc<Self>,
        write_half: OwnedWriteHalf,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let mut framed = FramedWrite::new(write_half, PacketCodec::new());

        while let Some(command) = command_rx.recv().await {
            match command {
                SessionCommand::Send(packet) => {
                    if let Err(e) = framed.send(packet).await {
                        tracing::debug!(peer = %self.peer.id(), error = %e, "send failed");
                        break;
                    }
                }
                SessionCommand::Close => {
                    let _ = framed.close().await;
                    break;
                }
            }
        }

        self.open.store(false, Ordering::SeqCst);
        self.closed.notify_one();
    }

    async fn read_loop(self: Arc<Self>, read_half: OwnedReadHalf) {
        let mut framed = FramedRead::new(read_half, PacketCodec::new());

        loop {
            let item = tokio::select! {
                _ = self.closed.notified() => break,
                item = framed.next() => item,
            };

            match item {
                Some(Ok(payload)) => {
                    *self.last_received.lock() = Instant::now();
                    self.handle_packet(&payload);
                    if !self.is_open() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(peer = %self.peer.id(), error = %e, "read failed");
                    self.peer.note_disconnect(DisconnectReason::TcpError);
                    break;
                }
                None => break,
            }
        }

        self.open.store(false, Ordering::SeqCst);
        // Unblock the write task so neither task outlives the socket
        let _ = self.command_tx.send(SessionCommand::Close);
        tracing::debug!(peer = %self.peer.id(), "session closed");
    }

    fn handle_packet(&self, payload: &[u8]) {
        let Some((&id, body)) = payload.split_first() else {
            return;
        };

        if id >= USER_PACKET_BASE {
            self.dispatch_capability_packet(id, body);
            return;
        }

        match BasePacket::from_id(id) {
            Some(BasePacket::Ping) => self.send_packet(vec![BasePacket::Pong as u8]),
            Some(BasePacket::Pong) => {}
            Some(BasePacket::Disconnect) => {
                let reason = body
                    .first()
                    .map(|&code| DisconnectReason::from_code(code as u32))
                    .unwrap_or(DisconnectReason::Requested);
                self.peer.note_disconnect(reason);
                self.open.store(false, Ordering::SeqCst);
                let _ = self.command_tx.send(SessionCommand::Close);
            }
            Some(BasePacket::GetPeers) => {
                // Node exchange is serviced by the discovery layer; answer
                // with an empty set so the remote is not left waiting.
                self.send_packet(vec![BasePacket::Peers as u8]);
            }
            Some(BasePacket::Peers) => {}
            None => {
                tracing::debug!(peer = %self.peer.id(), id, "unknown base packet");
            }
        }
    }

    fn dispatch_capability_packet(&self, id: u8, body: &[u8]) {
        // Ranges are contiguous and ascend in registration order, so the
        // owner is the last capability whose offset is at or below the id.
        let capabilities = self.capabilities.lock();
        for (_, cap) in capabilities.iter().rev() {
            let offset = cap.packet_offset();
            if id >= offset {
                cap.on_packet(id - offset, body);
                return;
            }
        }
        tracing::debug!(peer = %self.peer.id(), id, "packet for unregistered capability");
    }

    fn send_packet(&self, payload: Vec<u8>) {
        let _ = self.command_tx.send(SessionCommand::Send(payload));
    }
}

impl Session for TcpSession {
    fn peer(&self) -> Arc<Peer> {
        self.peer.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn last_received(&self) -> Instant {
        *self.last_received.lock()
    }

    fn ping(&self) {
        self.send_packet(vec![BasePacket::Ping as u8]);
    }

    fn disconnect(&self, reason: DisconnectReason) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(peer = %self.peer.id(), %reason, "disconnecting session");
        self.peer.note_disconnect(reason);
        self.send_packet(vec![BasePacket::Disconnect as u8, reason.code() as u8]);
        let _ = self.command_tx.send(SessionCommand::Close);
    }

    fn service_nodes_request(&self) {
        if !self.nodes_requested.swap(true, Ordering::SeqCst) {
            self.send_packet(vec![BasePacket::GetPeers as u8]);
        }
    }

    fn install_capability(&self, desc: CapDesc, cap: Box<dyn PeerCapability>) {
        self.capabilities.lock().push((desc, cap));
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Scriptable session stub used by registry and scheduler tests.

    use std::sync::atomic::AtomicUsize;

    use super::*;

    pub(crate) struct StubSession {
        peer: Arc<Peer>,
        open: AtomicBool,
        last_received: Mutex<Instant>,
        pub pings: AtomicUsize,
        pub disconnects: Mutex<Vec<DisconnectReason>>,
        pub installed: Mutex<Vec<(CapDesc, u8)>>,
    }

    impl StubSession {
        pub fn new(peer: Arc<Peer>) -> Arc<Self> {
            Arc::new(Self {
                peer,
                open: AtomicBool::new(true),
                last_received: Mutex::new(Instant::now()),
                pings: AtomicUsize::new(0),
                disconnects: Mutex::new(Vec::new()),
                installed: Mutex::new(Vec::new()),
            })
        }

        pub fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        pub fn set_last_received(&self, at: Instant) {
            *self.last_received.lock() = at;
        }
    }

    impl Session for StubSession {
        fn peer(&self) -> Arc<Peer> {
            self.peer.clone()
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn last_received(&self) -> Instant {
            *self.last_received.lock()
        }

        fn ping(&self) {
            self.pings.fetch_add(1, Ordering::SeqCst);
        }

        fn disconnect(&self, reason: DisconnectReason) {
            self.disconnects.lock().push(reason);
            self.open.store(false, Ordering::SeqCst);
        }

        fn service_nodes_request(&self) {}

        fn install_capability(&self, desc: CapDesc, cap: Box<dyn PeerCapability>) {
            self.installed.lock().push((desc, cap.packet_offset()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use weft_core::PeerId;

    use crate::peer::NodeEndpoint;
    use crate::protocol::framing::frame;

    fn test_peer(addr: std::net::SocketAddr) -> Arc<Peer> {
        Arc::new(Peer::new(PeerId::ZERO, NodeEndpoint::from_tcp(addr)))
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    #[tokio::test]
    async fn test_ping_is_sealed_on_the_wire() {
        let (mut client, server) = socket_pair().await;
        let peer = test_peer(server.peer_addr().unwrap());
        let session = TcpSession::spawn(server, peer).unwrap();

        session.ping();
        let payload = read_frame(&mut client).await;
        assert_eq!(payload, vec![BasePacket::Ping as u8]);
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (mut client, server) = socket_pair().await;
        let peer = test_peer(server.peer_addr().unwrap());
        let before = Instant::now();
        let session = TcpSession::spawn(server, peer).unwrap();

        client
            .write_all(&frame(&[BasePacket::Ping as u8]))
            .await
            .unwrap();

        let payload = read_frame(&mut client).await;
        assert_eq!(payload, vec![BasePacket::Pong as u8]);
        assert!(session.last_received() >= before);
    }

    #[tokio::test]
    async fn test_remote_close_ends_session() {
        let (client, server) = socket_pair().await;
        let peer = test_peer(server.peer_addr().unwrap());
        let session = TcpSession::spawn(server, peer.clone()).unwrap();
        assert!(session.is_open());

        drop(client);
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.is_open() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should observe the close");
    }

    #[tokio::test]
    async fn test_disconnect_sends_reason_and_closes() {
        let (mut client, server) = socket_pair().await;
        let peer = test_peer(server.peer_addr().unwrap());
        let session = TcpSession::spawn(server, peer.clone()).unwrap();

        session.disconnect(DisconnectReason::PingTimeout);
        assert!(!session.is_open());
        assert_eq!(
            peer.snapshot().last_disconnect,
            DisconnectReason::PingTimeout
        );

        let payload = read_frame(&mut client).await;
        assert_eq!(payload[0], BasePacket::Disconnect as u8);
        assert_eq!(
            DisconnectReason::from_code(payload[1] as u32),
            DisconnectReason::PingTimeout
        );

        // Remote observes EOF after the disconnect packet
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_service_nodes_request_sends_once() {
        let (mut client, server) = socket_pair().await;
        let peer = test_peer(server.peer_addr().unwrap());
        let session = TcpSession::spawn(server, peer).unwrap();

        session.service_nodes_request();
        session.service_nodes_request();
        session.ping();

        // Exactly one GetPeers, then the ping
        assert_eq!(read_frame(&mut client).await, vec![BasePacket::GetPeers as u8]);
        assert_eq!(read_frame(&mut client).await, vec![BasePacket::Ping as u8]);
    }
}
