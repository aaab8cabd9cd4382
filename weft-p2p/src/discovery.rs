//! Discovery-layer contract consumed by the host.
//!
//! The discovery implementation itself (a Kademlia-style table) lives
//! outside this crate; the host only needs to feed it nodes, look them up,
//! and drain its event queue from the scheduler tick. [`MemoryNodeTable`]
//! is a minimal in-process implementation of that contract.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use weft_core::PeerId;

use crate::peer::NodeEndpoint;

/// A node known to the discovery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    /// The node's identity.
    pub id: PeerId,
    /// Where the node can be reached.
    pub endpoint: NodeEndpoint,
}

impl Node {
    /// Create a node entry.
    pub fn new(id: PeerId, endpoint: NodeEndpoint) -> Self {
        Self { id, endpoint }
    }
}

/// Event emitted by the discovery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTableEvent {
    /// A node entered the table.
    NodeEntryAdded(PeerId),
    /// A node left the table.
    NodeEntryRemoved(PeerId),
}

/// The discovery surface the host depends on.
pub trait NodeTable: Send + Sync {
    /// Feed a node into the table.
    fn add_node(&self, node: Node);

    /// Whether the table currently knows the node.
    fn have_node(&self, id: &PeerId) -> bool;

    /// Look up a node entry.
    fn node(&self, id: &PeerId) -> Option<Node>;

    /// Drain queued events for delivery to the host scheduler.
    fn process_events(&self) -> Vec<NodeTableEvent>;
}

struct TableInner {
    nodes: HashMap<PeerId, Node>,
    events: VecDeque<NodeTableEvent>,
}

/// In-memory node table.
///
/// Stands in for a full Kademlia implementation: every `add_node` queues an
/// entry-added event, and [`evict`](MemoryNodeTable::evict) queues the
/// corresponding removal.
pub struct MemoryNodeTable {
    inner: Mutex<TableInner>,
}

impl MemoryNodeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                nodes: HashMap::new(),
                events: VecDeque::new(),
            }),
        }
    }

    /// Remove a node, queueing the removal event.
    pub fn evict(&self, id: &PeerId) {
        let mut inner = self.inner.lock();
        if inner.nodes.remove(id).is_some() {
            inner.events.push_back(NodeTableEvent::NodeEntryRemoved(*id));
        }
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }
}

impl Default for MemoryNodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable for MemoryNodeTable {
    fn add_node(&self, node: Node) {
        if node.id.is_zero() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.nodes.insert(node.id, node);
        inner.events.push_back(NodeTableEvent::NodeEntryAdded(node.id));
    }

    fn have_node(&self, id: &PeerId) -> bool {
        self.inner.lock().nodes.contains_key(id)
    }

    fn node(&self, id: &PeerId) -> Option<Node> {
        self.inner.lock().nodes.get(id).copied()
    }

    fn process_events(&self) -> Vec<NodeTableEvent> {
        self.inner.lock().events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::KeyPair;

    fn node(port: u16) -> Node {
        Node::new(
            KeyPair::generate().peer_id(),
            NodeEndpoint::new("8.8.8.8".parse().unwrap(), port, port),
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let table = MemoryNodeTable::new();
        let n = node(30303);

        table.add_node(n);
        assert!(table.have_node(&n.id));
        assert_eq!(table.node(&n.id), Some(n));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_events_drain_once() {
        let table = MemoryNodeTable::new();
        let n = node(30303);

        table.add_node(n);
        table.evict(&n.id);

        let events = table.process_events();
        assert_eq!(
            events,
            vec![
                NodeTableEvent::NodeEntryAdded(n.id),
                NodeTableEvent::NodeEntryRemoved(n.id),
            ]
        );
        assert!(table.process_events().is_empty());
    }

    #[test]
    fn test_zero_id_rejected() {
        let table = MemoryNodeTable::new();
        table.add_node(Node::new(
            PeerId::ZERO,
            NodeEndpoint::new("8.8.8.8".parse().unwrap(), 30303, 30303),
        ));
        assert!(table.is_empty());
        assert!(table.process_events().is_empty());
    }

    #[test]
    fn test_evict_unknown_is_silent() {
        let table = MemoryNodeTable::new();
        table.evict(&KeyPair::generate().peer_id());
        assert!(table.process_events().is_empty());
    }
}
