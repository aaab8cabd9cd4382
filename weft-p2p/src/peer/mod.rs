//! Peer records and endpoints.
//!
//! A [`Peer`] is a passive record of a known remote node — identity,
//! advertised endpoint, reputation and availability history — plus a weak
//! link to its live session when one exists.

pub mod endpoint;
pub mod record;

pub use endpoint::{is_private_address, NodeEndpoint};
pub use record::{DisconnectReason, Peer, PeerSnapshot};
