//! Immutable per-node render snapshots.

use crate::connection::Connection;
use crate::node::NodeId;
use pullgraph_core::Bus;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Snapshot of a node's connections that the render thread reads.
///
/// Kernels are built on the control thread and published atomically; the
/// render thread never observes a kernel being modified. A node kind that
/// needs extra render state (a routing table, for example) attaches it as
/// the decorator while the kernel is being prepared.
pub struct Kernel {
    node_id: NodeId,
    generation: u64,
    input_connections: BTreeMap<Bus, Arc<Connection>>,
    output_connections: BTreeMap<Bus, Arc<Connection>>,
    decorator: Option<Box<dyn Any + Send + Sync>>,
}

impl Kernel {
    pub(crate) fn new(
        node_id: NodeId,
        generation: u64,
        input_connections: BTreeMap<Bus, Arc<Connection>>,
        output_connections: BTreeMap<Bus, Arc<Connection>>,
    ) -> Self {
        Self {
            node_id,
            generation,
            input_connections,
            output_connections,
            decorator: None,
        }
    }

    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Monotonic counter, bumped each time the owning node publishes a kernel
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn input_connection(&self, bus: Bus) -> Option<&Arc<Connection>> {
        self.input_connections.get(&bus)
    }

    #[must_use]
    pub fn output_connection(&self, bus: Bus) -> Option<&Arc<Connection>> {
        self.output_connections.get(&bus)
    }

    #[must_use]
    pub const fn input_connections(&self) -> &BTreeMap<Bus, Arc<Connection>> {
        &self.input_connections
    }

    #[must_use]
    pub const fn output_connections(&self) -> &BTreeMap<Bus, Arc<Connection>> {
        &self.output_connections
    }

    /// Attach node-kind specific render state
    pub fn set_decorator<T: Any + Send + Sync>(&mut self, decorator: T) {
        self.decorator = Some(Box::new(decorator));
    }

    /// Decorator of type `T`, if one was attached
    #[must_use]
    pub fn decorator<T: Any>(&self) -> Option<&T> {
        self.decorator.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("node_id", &self.node_id)
            .field("generation", &self.generation)
            .field("inputs", &self.input_connections.keys().collect::<Vec<_>>())
            .field("outputs", &self.output_connections.keys().collect::<Vec<_>>())
            .field("decorated", &self.decorator.is_some())
            .finish()
    }
}
