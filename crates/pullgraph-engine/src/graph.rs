//! The graph: owner of nodes and connections, and the control-domain entry
//! point for every topology edit.
//!
//! All edits are serialized through one mutex. Nodes only learn about an
//! edit through [`Node::update_connections`], which runs after the graph
//! lock is released so that observers are free to query the graph.

use crate::connection::{Connection, ConnectionId};
use crate::node::{Node, NodeId};
use crate::nodes::{DeviceIoNode, OfflineAction, OfflineCompletion, OfflineOutputNode};
use parking_lot::Mutex;
use pullgraph_core::{Bus, Format, PcmBuffer, Time};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Side of a node a bus belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Topology errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// `bus` is `None` when no free bus was left to pick
    #[error("No available {direction} bus on {node} (requested {bus:?})")]
    BusUnavailable {
        node: NodeId,
        direction: Direction,
        bus: Option<Bus>,
    },

    #[error("Connecting {from} to {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors starting a render
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("Graph is already rendering")]
    AlreadyRunning,

    #[error("Device I/O node is missing or has no connection")]
    ConnectionNotFound,

    #[error("Offline output is missing or has no input connection")]
    OfflineOutputNotFound,

    #[error("Offline output failed to start: {0}")]
    OfflineOutputStartingFailure(String),

    #[error("Device rejected the graph: {0}")]
    PrepareFailure(String),
}

/// Which kind of render is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Realtime,
    Offline,
}

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, Arc<Node>>,
    connections: BTreeMap<ConnectionId, Arc<Connection>>,
    device_io: Option<Arc<DeviceIoNode>>,
    offline_output: Option<Arc<OfflineOutputNode>>,
    running: Option<RenderMode>,
}

impl GraphState {
    fn register(&mut self, node: &Arc<Node>) {
        self.nodes
            .entry(node.id())
            .or_insert_with(|| Arc::clone(node));
    }

    fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.values().cloned().collect()
    }
}

/// Audio graph.
///
/// The graph keeps nodes and connections alive; nodes refer to their
/// connections weakly, and connections refer to their endpoints weakly.
pub struct Graph {
    state: Arc<Mutex<GraphState>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GraphState::default())),
        }
    }

    /// Take ownership of `node` and publish its first kernel
    pub fn add_node(&self, node: &Arc<Node>) {
        self.state.lock().register(node);
        node.update_kernel();
    }

    /// Disconnect `node` and drop the graph's reference to it
    pub fn remove_node(&self, node: &Arc<Node>) {
        self.disconnect_node(node);
        if self.state.lock().nodes.remove(&node.id()).is_some() {
            tracing::debug!("Removed {}", node.id());
        }
    }

    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.state.lock().nodes.contains_key(&id)
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.state.lock().all_nodes()
    }

    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.state.lock().connections.values().cloned().collect()
    }

    /// Connect the first free output bus of `source` to the first free
    /// input bus of `destination`
    pub fn connect(
        &self,
        source: &Arc<Node>,
        destination: &Arc<Node>,
        format: Format,
    ) -> Result<Arc<Connection>, GraphError> {
        let source_bus = source
            .next_available_output_bus()
            .ok_or(GraphError::BusUnavailable {
                node: source.id(),
                direction: Direction::Output,
                bus: None,
            })?;
        let destination_bus =
            destination
                .next_available_input_bus()
                .ok_or(GraphError::BusUnavailable {
                    node: destination.id(),
                    direction: Direction::Input,
                    bus: None,
                })?;
        self.connect_buses(source, source_bus, destination, destination_bus, format)
    }

    /// Connect output bus `source_bus` of `source` to input bus
    /// `destination_bus` of `destination`.
    ///
    /// Both buses must exist and be free, and the new edge must not close a
    /// cycle.
    pub fn connect_buses(
        &self,
        source: &Arc<Node>,
        source_bus: Bus,
        destination: &Arc<Node>,
        destination_bus: Bus,
        format: Format,
    ) -> Result<Arc<Connection>, GraphError> {
        if source.id() == destination.id() {
            return Err(GraphError::InvalidArgument(format!(
                "cannot connect {} to itself",
                source.id()
            )));
        }

        let connection = {
            let mut state = self.state.lock();

            if !source.is_available_output_bus(source_bus) {
                return Err(GraphError::BusUnavailable {
                    node: source.id(),
                    direction: Direction::Output,
                    bus: Some(source_bus),
                });
            }
            if !destination.is_available_input_bus(destination_bus) {
                return Err(GraphError::BusUnavailable {
                    node: destination.id(),
                    direction: Direction::Input,
                    bus: Some(destination_bus),
                });
            }
            if reaches(destination, source.id()) {
                return Err(GraphError::CycleDetected {
                    from: source.id(),
                    to: destination.id(),
                });
            }

            let connection =
                Connection::new(source, source_bus, destination, destination_bus, format);
            source.add_output_connection(&connection);
            destination.add_input_connection(&connection);

            state.register(source);
            state.register(destination);
            state
                .connections
                .insert(connection.id(), Arc::clone(&connection));
            connection
        };

        source.update_connections();
        destination.update_connections();
        tracing::debug!("Connected {}", connection);
        Ok(connection)
    }

    pub fn disconnect(&self, connection: &Connection) -> Result<(), GraphError> {
        let id = connection.id();
        if self.remove_where(|c| c.id() == id) == 0 {
            return Err(GraphError::ConnectionNotFound(id));
        }
        Ok(())
    }

    /// Remove every connection touching `node`; returns how many went
    pub fn disconnect_node(&self, node: &Node) -> usize {
        let id = node.id();
        let removed = self.remove_where(|c| c.source_id() == id || c.destination_id() == id);

        let mut state = self.state.lock();
        if state
            .device_io
            .as_ref()
            .is_some_and(|io| io.node().id() == id)
        {
            state.device_io = None;
        }
        if state
            .offline_output
            .as_ref()
            .is_some_and(|offline| offline.node().id() == id)
        {
            state.offline_output = None;
        }
        removed
    }

    /// Remove the connection on input `bus` of `node`, or on all its inputs
    pub fn disconnect_input(&self, node: &Node, bus: Option<Bus>) -> usize {
        let id = node.id();
        self.remove_where(|c| {
            c.destination_id() == id && bus.is_none_or(|bus| c.destination_bus() == bus)
        })
    }

    /// Remove the connection on output `bus` of `node`, or on all its outputs
    pub fn disconnect_output(&self, node: &Node, bus: Option<Bus>) -> usize {
        let id = node.id();
        self.remove_where(|c| c.source_id() == id && bus.is_none_or(|bus| c.source_bus() == bus))
    }

    fn remove_where(&self, predicate: impl Fn(&Connection) -> bool) -> usize {
        let removed: Vec<Arc<Connection>> = {
            let mut state = self.state.lock();
            let ids: Vec<ConnectionId> = state
                .connections
                .values()
                .filter(|c| predicate(c.as_ref()))
                .map(|c| c.id())
                .collect();
            ids.iter()
                .filter_map(|id| state.connections.remove(id))
                .collect()
        };

        let mut touched: BTreeMap<NodeId, Arc<Node>> = BTreeMap::new();
        for connection in &removed {
            if let Some(source) = connection.source_node() {
                source.remove_output_connection(connection);
                touched.insert(source.id(), source);
            }
            if let Some(destination) = connection.destination_node() {
                destination.remove_input_connection(connection);
                touched.insert(destination.id(), destination);
            }
            connection.remove_source_node();
            connection.remove_destination_node();
            tracing::debug!("Disconnected {}", connection);
        }

        for node in touched.values() {
            node.update_connections();
        }
        removed.len()
    }

    /// Designate the node realtime rendering is driven through
    pub fn set_device_io(&self, io: &Arc<DeviceIoNode>) {
        let mut state = self.state.lock();
        state.register(io.node());
        state.device_io = Some(Arc::clone(io));
    }

    #[must_use]
    pub fn device_io(&self) -> Option<Arc<DeviceIoNode>> {
        self.state.lock().device_io.clone()
    }

    /// Designate the node offline rendering is driven through
    pub fn set_offline_output(&self, offline: &Arc<OfflineOutputNode>) {
        let mut state = self.state.lock();
        state.register(offline.node());
        state.offline_output = Some(Arc::clone(offline));
    }

    #[must_use]
    pub fn offline_output(&self) -> Option<Arc<OfflineOutputNode>> {
        self.state.lock().offline_output.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running.is_some()
    }

    #[must_use]
    pub fn render_mode(&self) -> Option<RenderMode> {
        self.state.lock().running
    }

    /// Start the device behind the device I/O node.
    ///
    /// Every node republishes its kernel first so the device sees the
    /// current topology.
    pub fn start_render(&self) -> Result<(), StartError> {
        let (io, nodes) = {
            let mut state = self.state.lock();
            if state.running.is_some() {
                return Err(StartError::AlreadyRunning);
            }
            let io = state
                .device_io
                .clone()
                .filter(|io| {
                    io.node().input_connection(0).is_some()
                        || io.node().output_connection(0).is_some()
                })
                .ok_or(StartError::ConnectionNotFound)?;
            state.running = Some(RenderMode::Realtime);
            (io, state.all_nodes())
        };

        for node in &nodes {
            node.update_connections();
        }

        if let Err(e) = io.start() {
            tracing::error!("Failed to start realtime render: {}", e);
            self.state.lock().running = None;
            return Err(StartError::PrepareFailure(e.to_string()));
        }

        tracing::info!("Realtime render started ({} nodes)", nodes.len());
        Ok(())
    }

    /// Run the offline output's pull loop on its own thread.
    ///
    /// `render` sees every rendered slice; `completion` is called exactly
    /// once, after the graph has left the running state. Topology must not
    /// change while the render runs.
    pub fn start_offline_render<R, C>(&self, render: R, completion: C) -> Result<(), StartError>
    where
        R: FnMut(&mut PcmBuffer<'_>, &Time) -> OfflineAction + Send + 'static,
        C: FnOnce(OfflineCompletion) + Send + 'static,
    {
        let (offline, nodes) = {
            let mut state = self.state.lock();
            if state.running.is_some() {
                return Err(StartError::AlreadyRunning);
            }
            let offline = state
                .offline_output
                .clone()
                .filter(|offline| offline.node().input_connection(0).is_some())
                .ok_or(StartError::OfflineOutputNotFound)?;
            state.running = Some(RenderMode::Offline);
            (offline, state.all_nodes())
        };

        for node in &nodes {
            node.update_connections();
        }

        let state = Arc::downgrade(&self.state);
        let finish = move |outcome: OfflineCompletion| {
            if let Some(state) = state.upgrade() {
                let mut state = state.lock();
                if state.running == Some(RenderMode::Offline) {
                    state.running = None;
                }
            }
            tracing::info!("Offline render finished: {:?}", outcome);
            completion(outcome);
        };

        if let Err(e) = offline.start(render, finish) {
            tracing::error!("Failed to start offline render: {}", e);
            self.state.lock().running = None;
            return Err(StartError::OfflineOutputStartingFailure(e.to_string()));
        }

        tracing::info!("Offline render started ({} nodes)", nodes.len());
        Ok(())
    }

    /// Stop whichever render is active; topology is left intact
    pub fn stop(&self) {
        let (mode, io, offline) = {
            let mut state = self.state.lock();
            let Some(mode) = state.running.take() else {
                return;
            };
            (mode, state.device_io.clone(), state.offline_output.clone())
        };

        match mode {
            RenderMode::Realtime => {
                if let Some(io) = io {
                    io.stop();
                }
            }
            RenderMode::Offline => {
                if let Some(offline) = offline {
                    offline.stop();
                }
            }
        }
        tracing::info!("{:?} render stopped", mode);
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether `target` is downstream of (or is) `start`
fn reaches(start: &Arc<Node>, target: NodeId) -> bool {
    let mut visited = BTreeSet::new();
    let mut pending = vec![Arc::clone(start)];

    while let Some(node) = pending.pop() {
        if node.id() == target {
            return true;
        }
        if !visited.insert(node.id()) {
            continue;
        }
        pending.extend(
            node.output_connections()
                .iter()
                .filter_map(|c| c.destination_node()),
        );
    }
    false
}
