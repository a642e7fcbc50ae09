//! Edges between node buses.

use crate::node::{Node, NodeId};
use pullgraph_core::{Bus, Format};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a connection, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

/// Directed edge from a source node's output bus to a destination node's
/// input bus, carrying audio in one fixed format.
///
/// A connection does not keep either endpoint alive. Endpoints are detached
/// on the control thread when the connection is removed from the graph; the
/// render thread may still hold the connection through an old kernel and
/// will then find no node to render.
pub struct Connection {
    id: ConnectionId,
    format: Format,

    source: Weak<Node>,
    source_id: NodeId,
    source_bus: Bus,
    source_attached: AtomicBool,

    destination: Weak<Node>,
    destination_id: NodeId,
    destination_bus: Bus,
    destination_attached: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        source: &Arc<Node>,
        source_bus: Bus,
        destination: &Arc<Node>,
        destination_bus: Bus,
        format: Format,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            format,
            source: Arc::downgrade(source),
            source_id: source.id(),
            source_bus,
            source_attached: AtomicBool::new(true),
            destination: Arc::downgrade(destination),
            destination_id: destination.id(),
            destination_bus,
            destination_attached: AtomicBool::new(true),
        })
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    #[must_use]
    pub const fn source_id(&self) -> NodeId {
        self.source_id
    }

    #[must_use]
    pub const fn source_bus(&self) -> Bus {
        self.source_bus
    }

    #[must_use]
    pub const fn destination_id(&self) -> NodeId {
        self.destination_id
    }

    #[must_use]
    pub const fn destination_bus(&self) -> Bus {
        self.destination_bus
    }

    /// The source node, or `None` once detached or dropped
    #[must_use]
    pub fn source_node(&self) -> Option<Arc<Node>> {
        if self.source_attached.load(Ordering::Acquire) {
            self.source.upgrade()
        } else {
            None
        }
    }

    /// The destination node, or `None` once detached or dropped
    #[must_use]
    pub fn destination_node(&self) -> Option<Arc<Node>> {
        if self.destination_attached.load(Ordering::Acquire) {
            self.destination.upgrade()
        } else {
            None
        }
    }

    /// Whether both endpoints are still attached and alive
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.source_node().is_some() && self.destination_node().is_some()
    }

    pub(crate) fn remove_source_node(&self) {
        self.source_attached.store(false, Ordering::Release);
    }

    pub(crate) fn remove_destination_node(&self) {
        self.destination_attached.store(false, Ordering::Release);
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl PartialOrd for Connection {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Connection {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Connection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("source", &(self.source_id, self.source_bus))
            .field("destination", &(self.destination_id, self.destination_bus))
            .field("format", &self.format)
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bus {} -> {} bus {} ({})",
            self.source_id, self.source_bus, self.destination_id, self.destination_bus, self.format
        )
    }
}
