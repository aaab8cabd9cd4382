//! Peer-to-peer networking host.
//!
//! This crate maintains outbound and inbound TCP connections to a dynamic
//! set of remote nodes, negotiates a per-connection set of capabilities
//! (sub-protocols), and exposes a multiplexed packet transport between the
//! local process and its peers. Discovery events from a node table are
//! translated into connection attempts that keep the live peer count close
//! to a configured ideal.
//!
//! # Architecture
//!
//! The host runs one orchestrator task; each live session runs its own
//! read and write tasks. Shared state lives behind locks whose critical
//! sections never call out.
//!
//! ```text
//! Orchestrator (Host::start)
//! ├── accept branch   (inbound connections → sessions)
//! ├── scheduler tick  (discovery events, keep-alive, reaping; every 100 ms)
//! ├── Dial Task 1..n  (outbound connects, deduplicated per peer)
//! ├── Session Task 1..n (per-peer read/write loops)
//! └── Resolver Task   (hostname → endpoint for add_node)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use weft_p2p::{Host, NetworkPreferences};
//!
//! let prefs = NetworkPreferences::default().with_listen_port(30303);
//! let host = Host::new(prefs)?;
//! host.start().await;
//! host.add_node(id, "10.0.0.7", 30303, 30303);
//! // ...
//! host.stop().await;
//! ```

pub mod capability;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod identity;
pub mod peer;
pub mod protocol;
pub mod session;

// Re-export main types
pub use capability::{CapDesc, Capability, PeerCapability};
pub use config::{poc_host, NetworkPreferences, PROTOCOL_VERSION, USER_PACKET_BASE};
pub use discovery::{MemoryNodeTable, Node, NodeTable, NodeTableEvent};
pub use error::{HostError, HostResult};
pub use host::{Host, NatTraversal, PeerSessionInfo};
pub use peer::{DisconnectReason, NodeEndpoint, Peer};
pub use protocol::{seal, PacketCodec};
pub use session::{Session, SessionFactory, TcpSession};
pub use weft_core::{KeyPair, PeerId};
