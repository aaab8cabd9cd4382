//! Saved-nodes blob encoding.
//!
//! The persistent peer set is a versioned binary blob: a version tag, the
//! host secret, and the eligible peer records. Version 0 is the only
//! current format; blobs with an unknown version decode but are ignored,
//! and blobs that do not decode at all are rejected.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use weft_core::{serialization, PeerId};

use crate::config::{PRIVATE_PORT_THRESHOLD, RECENT_PEER_WINDOW};
use crate::error::{HostError, HostResult};
use crate::peer::{NodeEndpoint, Peer};

/// Current blob format version.
const NODES_BLOB_VERSION: u32 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct NodesBlob {
    version: u32,
    secret: [u8; 32],
    nodes: Vec<SavedNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedNode {
    address: IpAddr,
    tcp_port: u16,
    id: PeerId,
    // Trust state placeholder; always written as zero for now.
    trust: u32,
    last_connected: u64,
    last_attempted: u64,
    failed_attempts: u32,
    last_disconnect: u32,
    score: i32,
    rating: i32,
}

/// Contents of a successfully decoded current-format blob.
pub(crate) struct RestoredNodes {
    pub secret: [u8; 32],
    pub nodes: Vec<(PeerId, NodeEndpoint)>,
}

fn unix_seconds(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Whether a peer qualifies for persistence: connected recently, with a
/// sane advertised port and a public address, and not the host itself.
fn eligible(peer: &Peer, self_id: PeerId, now: SystemTime) -> bool {
    let snapshot = peer.snapshot();
    let Some(connected) = snapshot.last_connected else {
        return false;
    };
    let recent = now
        .duration_since(connected)
        .map(|age| age < RECENT_PEER_WINDOW)
        .unwrap_or(true);

    recent
        && snapshot.endpoint.tcp_port > 0
        && snapshot.endpoint.tcp_port < PRIVATE_PORT_THRESHOLD
        && peer.id() != self_id
        && !snapshot.endpoint.is_private()
}

/// Encode the persistent peer set.
pub(crate) fn encode_nodes(
    secret: [u8; 32],
    peers: &[Arc<Peer>],
    self_id: PeerId,
) -> HostResult<Vec<u8>> {
    let now = SystemTime::now();
    let mut nodes = Vec::new();

    for peer in peers {
        if !eligible(peer, self_id, now) {
            continue;
        }
        let snapshot = peer.snapshot();
        nodes.push(SavedNode {
            address: snapshot.endpoint.address,
            tcp_port: snapshot.endpoint.tcp_port,
            id: peer.id(),
            trust: 0,
            last_connected: unix_seconds(snapshot.last_connected),
            last_attempted: unix_seconds(snapshot.last_attempted),
            failed_attempts: snapshot.failed_attempts,
            last_disconnect: snapshot.last_disconnect.code(),
            score: snapshot.score,
            rating: snapshot.rating,
        });
    }

    tracing::debug!(count = nodes.len(), "encoded node records");

    let blob = NodesBlob {
        version: NODES_BLOB_VERSION,
        secret,
        nodes,
    };
    Ok(serialization::serialize(&blob)?)
}

/// Decode a nodes blob.
///
/// Returns `Ok(None)` for a well-formed blob of an unknown version, and
/// `Err(MalformedNodesBlob)` when the bytes match no known layout. Entries
/// with a cleared port or identity are skipped silently.
pub(crate) fn decode_nodes(blob: &[u8]) -> HostResult<Option<RestoredNodes>> {
    let decoded: NodesBlob =
        serialization::deserialize(blob).map_err(|_| HostError::MalformedNodesBlob)?;

    if decoded.version != NODES_BLOB_VERSION {
        tracing::warn!(version = decoded.version, "ignoring nodes blob of unknown version");
        return Ok(None);
    }

    let nodes = decoded
        .nodes
        .into_iter()
        .filter(|node| !node.id.is_zero() && node.tcp_port != 0)
        .map(|node| {
            (
                node.id,
                NodeEndpoint::new(node.address, node.tcp_port, node.tcp_port),
            )
        })
        .collect();

    Ok(Some(RestoredNodes {
        secret: decoded.secret,
        nodes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::KeyPair;

    use crate::peer::DisconnectReason;

    fn peer_at(addr: &str, port: u16, connected: bool) -> Arc<Peer> {
        let peer = Arc::new(Peer::new(
            KeyPair::generate().peer_id(),
            NodeEndpoint::new(addr.parse().unwrap(), port, port),
        ));
        if connected {
            peer.note_connected();
        }
        peer
    }

    #[test]
    fn test_filter_and_roundtrip() {
        let self_id = KeyPair::generate().peer_id();
        let secret = [0x11u8; 32];

        let eligible: Vec<_> = (0..5)
            .map(|i| peer_at(&format!("8.8.8.{i}"), 30303, true))
            .collect();

        let mut peers = eligible.clone();
        peers.push(peer_at("192.168.1.40", 30303, true)); // private address
        peers.push(peer_at("8.8.4.4", 0, true)); // cleared port
        peers.push(peer_at("1.1.1.1", 30303, false)); // never connected

        let blob = encode_nodes(secret, &peers, self_id).unwrap();
        let restored = decode_nodes(&blob).unwrap().expect("current version");

        assert_eq!(restored.secret, secret);
        assert_eq!(restored.nodes.len(), 5);

        let mut expected: Vec<_> = eligible.iter().map(|p| p.id()).collect();
        let mut actual: Vec<_> = restored.nodes.iter().map(|(id, _)| *id).collect();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_self_is_not_persisted() {
        let keypair = KeyPair::generate();
        let me = Arc::new(Peer::new(
            keypair.peer_id(),
            NodeEndpoint::new("8.8.8.8".parse().unwrap(), 30303, 30303),
        ));
        me.note_connected();

        let blob = encode_nodes([0u8; 32], &[me], keypair.peer_id()).unwrap();
        let restored = decode_nodes(&blob).unwrap().unwrap();
        assert!(restored.nodes.is_empty());
    }

    #[test]
    fn test_ephemeral_port_not_persisted() {
        let peer = peer_at("8.8.8.8", PRIVATE_PORT_THRESHOLD, true);
        let blob = encode_nodes([0u8; 32], &[peer], KeyPair::generate().peer_id()).unwrap();
        let restored = decode_nodes(&blob).unwrap().unwrap();
        assert!(restored.nodes.is_empty());
    }

    #[test]
    fn test_unknown_version_is_ignored() {
        let blob = serialization::serialize(&NodesBlob {
            version: 7,
            secret: [1u8; 32],
            nodes: Vec::new(),
        })
        .unwrap();

        assert!(decode_nodes(&blob).unwrap().is_none());
    }

    #[test]
    fn test_unrecognised_blob_is_rejected() {
        let result = decode_nodes(&[0xde, 0xad, 0xbe]);
        assert!(matches!(result, Err(HostError::MalformedNodesBlob)));
    }

    #[test]
    fn test_malformed_entries_skip_silently() {
        let blob = serialization::serialize(&NodesBlob {
            version: 0,
            secret: [2u8; 32],
            nodes: vec![
                SavedNode {
                    address: "8.8.8.8".parse().unwrap(),
                    tcp_port: 30303,
                    id: KeyPair::generate().peer_id(),
                    trust: 0,
                    last_connected: 0,
                    last_attempted: 0,
                    failed_attempts: 0,
                    last_disconnect: DisconnectReason::NoDisconnect.code(),
                    score: 0,
                    rating: 0,
                },
                // Cleared identity: skipped
                SavedNode {
                    address: "8.8.8.8".parse().unwrap(),
                    tcp_port: 30303,
                    id: PeerId::ZERO,
                    trust: 0,
                    last_connected: 0,
                    last_attempted: 0,
                    failed_attempts: 0,
                    last_disconnect: 0,
                    score: 0,
                    rating: 0,
                },
            ],
        })
        .unwrap();

        let restored = decode_nodes(&blob).unwrap().unwrap();
        assert_eq!(restored.nodes.len(), 1);
    }
}
