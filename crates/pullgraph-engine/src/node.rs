//! Graph vertices.
//!
//! A [`Node`] owns its bus bookkeeping (control domain) and publishes an
//! immutable [`Kernel`] for the render domain. Behavior is supplied by a
//! render handler; the node kinds in [`crate::nodes`] install theirs when
//! they are constructed.

use crate::connection::Connection;
use crate::kernel::Kernel;
use crate::render;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use pullgraph_comms::{Observer, Subject};
use pullgraph_core::{Bus, Format, PcmBuffer, Time};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a node, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Notifications a node emits to its observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMethod {
    /// Emitted by [`Node::reset`] before the kernel is rebuilt
    WillReset,
    /// Emitted by [`Node::update_connections`] after the kernel is rebuilt
    UpdateConnections,
}

/// What a node is, for logging and introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Generic,
    Tap,
    InputTap,
    Route,
    Unit,
    DeviceIo,
    OfflineOutput,
}

/// Construction parameters for [`Node::new`]
#[derive(Debug, Clone, Copy)]
pub struct NodeArgs {
    pub input_bus_count: u32,
    pub output_bus_count: u32,
    pub kind: NodeKind,
    /// Rendered with input buses (device input taps) instead of output buses
    pub input_renderable: bool,
}

impl NodeArgs {
    #[must_use]
    pub const fn new(input_bus_count: u32, output_bus_count: u32) -> Self {
        Self {
            input_bus_count,
            output_bus_count,
            kind: NodeKind::Generic,
            input_renderable: false,
        }
    }

    #[must_use]
    pub const fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub const fn input_renderable(mut self) -> Self {
        self.input_renderable = true;
        self
    }
}

/// Arguments handed to a render handler
pub struct RenderArgs<'r, 'b> {
    pub buffer: &'r mut PcmBuffer<'b>,
    pub bus: Bus,
    pub when: &'r Time,
}

type RenderFn = dyn Fn(RenderArgs<'_, '_>) + Send + Sync;
type PrepareKernelFn = dyn Fn(&mut Kernel) + Send + Sync;

struct RenderHandler(Box<RenderFn>);

#[derive(Default)]
struct BusConnections {
    inputs: BTreeMap<Bus, Weak<Connection>>,
    outputs: BTreeMap<Bus, Weak<Connection>>,
}

const CLOCK_RENDERED: u8 = 1;
const CLOCK_HOST_VALID: u8 = 1 << 1;
const CLOCK_SAMPLE_VALID: u8 = 1 << 2;

/// Timestamp of the most recent render, stored without locking.
///
/// Fields are written independently, so a reader racing a render may see a
/// mix of two timestamps.
#[derive(Default)]
struct RenderClock {
    host_time: AtomicU64,
    sample_time: AtomicI64,
    sample_rate: AtomicU64,
    flags: AtomicU8,
}

impl RenderClock {
    fn store(&self, when: &Time) {
        let mut flags = CLOCK_RENDERED;
        if let Some(host_time) = when.host_time() {
            self.host_time.store(host_time, Ordering::Relaxed);
            flags |= CLOCK_HOST_VALID;
        }
        if let Some(sample_time) = when.sample_time() {
            self.sample_time.store(sample_time, Ordering::Relaxed);
            flags |= CLOCK_SAMPLE_VALID;
        }
        self.sample_rate
            .store(when.sample_rate().to_bits(), Ordering::Relaxed);
        self.flags.store(flags, Ordering::Release);
    }

    fn load(&self) -> Option<Time> {
        let flags = self.flags.load(Ordering::Acquire);
        if flags & CLOCK_RENDERED == 0 {
            return None;
        }

        let host_time = self.host_time.load(Ordering::Relaxed);
        let sample_time = self.sample_time.load(Ordering::Relaxed);
        let sample_rate = f64::from_bits(self.sample_rate.load(Ordering::Relaxed));
        Some(
            match (
                flags & CLOCK_HOST_VALID != 0,
                flags & CLOCK_SAMPLE_VALID != 0,
            ) {
                (true, true) => Time::new(host_time, sample_time, sample_rate),
                (true, false) => Time::from_host_time(host_time),
                (false, true) => Time::from_sample_time(sample_time, sample_rate),
                (false, false) => Time::default(),
            },
        )
    }

    fn clear(&self) {
        self.flags.store(0, Ordering::Release);
    }
}

/// Vertex of the audio graph
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    input_bus_count: u32,
    output_bus_count: u32,
    input_renderable: bool,

    // Control domain
    connections: Mutex<BusConnections>,
    prepare_kernel: Mutex<Option<Arc<PrepareKernelFn>>>,
    kernel_update: Mutex<()>,
    generation: AtomicU64,
    subject: Subject<NodeMethod, NodeId>,

    // Shared with the render domain
    render_handler: ArcSwapOption<RenderHandler>,
    kernel: ArcSwapOption<Kernel>,
    clock: RenderClock,
}

impl Node {
    #[must_use]
    pub fn new(args: NodeArgs) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            kind: args.kind,
            input_bus_count: args.input_bus_count,
            output_bus_count: args.output_bus_count,
            input_renderable: args.input_renderable,
            connections: Mutex::new(BusConnections::default()),
            prepare_kernel: Mutex::new(None),
            kernel_update: Mutex::new(()),
            generation: AtomicU64::new(0),
            subject: Subject::new(),
            render_handler: ArcSwapOption::empty(),
            kernel: ArcSwapOption::empty(),
            clock: RenderClock::default(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub const fn input_bus_count(&self) -> u32 {
        self.input_bus_count
    }

    #[must_use]
    pub const fn output_bus_count(&self) -> u32 {
        self.output_bus_count
    }

    #[must_use]
    pub const fn is_input_renderable(&self) -> bool {
        self.input_renderable
    }

    /// Lowest input bus with no connection
    #[must_use]
    pub fn next_available_input_bus(&self) -> Option<Bus> {
        let mut connections = self.connections.lock();
        first_free_bus(&mut connections.inputs, self.input_bus_count)
    }

    /// Lowest output bus with no connection
    #[must_use]
    pub fn next_available_output_bus(&self) -> Option<Bus> {
        let mut connections = self.connections.lock();
        first_free_bus(&mut connections.outputs, self.output_bus_count)
    }

    #[must_use]
    pub fn is_available_input_bus(&self, bus: Bus) -> bool {
        bus < self.input_bus_count && self.input_connection(bus).is_none()
    }

    #[must_use]
    pub fn is_available_output_bus(&self, bus: Bus) -> bool {
        bus < self.output_bus_count && self.output_connection(bus).is_none()
    }

    #[must_use]
    pub fn input_connection(&self, bus: Bus) -> Option<Arc<Connection>> {
        self.connections.lock().inputs.get(&bus)?.upgrade()
    }

    #[must_use]
    pub fn output_connection(&self, bus: Bus) -> Option<Arc<Connection>> {
        self.connections.lock().outputs.get(&bus)?.upgrade()
    }

    #[must_use]
    pub fn input_connections(&self) -> Vec<Arc<Connection>> {
        live(&self.connections.lock().inputs).into_values().collect()
    }

    #[must_use]
    pub fn output_connections(&self) -> Vec<Arc<Connection>> {
        live(&self.connections.lock().outputs).into_values().collect()
    }

    /// Format of the connection on input bus `bus`
    #[must_use]
    pub fn input_format(&self, bus: Bus) -> Option<Format> {
        self.input_connection(bus).map(|c| c.format())
    }

    /// Format of the connection on output bus `bus`
    #[must_use]
    pub fn output_format(&self, bus: Bus) -> Option<Format> {
        self.output_connection(bus).map(|c| c.format())
    }

    pub(crate) fn add_input_connection(&self, connection: &Arc<Connection>) {
        self.connections
            .lock()
            .inputs
            .insert(connection.destination_bus(), Arc::downgrade(connection));
    }

    pub(crate) fn add_output_connection(&self, connection: &Arc<Connection>) {
        self.connections
            .lock()
            .outputs
            .insert(connection.source_bus(), Arc::downgrade(connection));
    }

    pub(crate) fn remove_input_connection(&self, connection: &Connection) {
        remove_entry(
            &mut self.connections.lock().inputs,
            connection.destination_bus(),
            connection,
        );
    }

    pub(crate) fn remove_output_connection(&self, connection: &Connection) {
        remove_entry(
            &mut self.connections.lock().outputs,
            connection.source_bus(),
            connection,
        );
    }

    /// Install the render behavior.
    ///
    /// The handler runs on the render thread: it must not block, allocate
    /// or log.
    pub fn set_render_handler<F>(&self, handler: F)
    where
        F: Fn(RenderArgs<'_, '_>) + Send + Sync + 'static,
    {
        self.render_handler
            .store(Some(Arc::new(RenderHandler(Box::new(handler)))));
    }

    pub fn clear_render_handler(&self) {
        self.render_handler.store(None);
    }

    /// Install a hook that decorates each kernel before it is published
    pub fn set_prepare_kernel_handler<F>(&self, handler: F)
    where
        F: Fn(&mut Kernel) + Send + Sync + 'static,
    {
        *self.prepare_kernel.lock() = Some(Arc::new(handler));
    }

    pub fn clear_prepare_kernel_handler(&self) {
        *self.prepare_kernel.lock() = None;
    }

    /// The currently published kernel
    #[must_use]
    pub fn kernel(&self) -> Option<Arc<Kernel>> {
        self.kernel.load_full()
    }

    /// Build a kernel from the current connections and publish it
    pub fn update_kernel(&self) {
        let _publishing = self.kernel_update.lock();

        let (inputs, outputs) = {
            let connections = self.connections.lock();
            (live(&connections.inputs), live(&connections.outputs))
        };
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut kernel = Kernel::new(self.id, generation, inputs, outputs);

        let prepare = self.prepare_kernel.lock().clone();
        if let Some(prepare) = prepare {
            prepare(&mut kernel);
        }

        self.kernel.store(Some(Arc::new(kernel)));
    }

    /// Republish the kernel and notify [`NodeMethod::UpdateConnections`]
    pub fn update_connections(&self) {
        self.update_kernel();
        self.subject.notify(&NodeMethod::UpdateConnections, &self.id);
    }

    /// Notify [`NodeMethod::WillReset`], forget render history and republish
    pub fn reset(&self) {
        self.subject.notify(&NodeMethod::WillReset, &self.id);
        self.clock.clear();
        self.update_kernel();
    }

    /// Register a handler for one of this node's notifications
    pub fn observe<F>(&self, method: NodeMethod, handler: F) -> Observer
    where
        F: Fn(&NodeMethod, &NodeId) + Send + Sync + 'static,
    {
        self.subject.observe(method, handler)
    }

    /// Render bus `bus` into `buffer`.
    ///
    /// Input-renderable nodes are addressed by input bus, all others by
    /// output bus. Without a render handler the buffer is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `bus` is out of range; that is a wiring bug, not a runtime
    /// condition.
    pub fn render(&self, buffer: &mut PcmBuffer<'_>, bus: Bus, when: &Time) {
        let bus_count = if self.input_renderable {
            self.input_bus_count
        } else {
            self.output_bus_count
        };
        assert!(
            bus < bus_count,
            "render bus {bus} out of range for {} ({bus_count} buses)",
            self.id
        );

        self.clock.store(when);
        if let Some(handler) = &*self.render_handler.load() {
            (handler.0)(RenderArgs { buffer, bus, when });
        }
    }

    /// Render whatever feeds input bus `bus` into `buffer`.
    ///
    /// Returns `false` and silences `buffer` when nothing renderable is
    /// connected.
    pub fn pull_input(&self, bus: Bus, buffer: &mut PcmBuffer<'_>, when: &Time) -> bool {
        match &*self.kernel.load() {
            Some(kernel) => render::pull(kernel, bus, buffer, when),
            None => {
                buffer.clear();
                false
            }
        }
    }

    /// Timestamp of the most recent render of this node
    #[must_use]
    pub fn last_render_time(&self) -> Option<Time> {
        self.clock.load()
    }

    pub(crate) fn mark_rendered(&self, when: &Time) {
        self.clock.store(when);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("input_bus_count", &self.input_bus_count)
            .field("output_bus_count", &self.output_bus_count)
            .finish_non_exhaustive()
    }
}

fn live(map: &BTreeMap<Bus, Weak<Connection>>) -> BTreeMap<Bus, Arc<Connection>> {
    map.iter()
        .filter_map(|(bus, connection)| connection.upgrade().map(|c| (*bus, c)))
        .collect()
}

fn first_free_bus(map: &mut BTreeMap<Bus, Weak<Connection>>, bus_count: u32) -> Option<Bus> {
    map.retain(|_, connection| connection.strong_count() > 0);

    let mut candidate: Bus = 0;
    for &bus in map.keys() {
        if bus != candidate {
            break;
        }
        candidate = candidate.checked_add(1)?;
    }
    (candidate < bus_count).then_some(candidate)
}

fn remove_entry(map: &mut BTreeMap<Bus, Weak<Connection>>, bus: Bus, connection: &Connection) {
    let occupied_by_connection = map
        .get(&bus)
        .and_then(Weak::upgrade)
        .is_none_or(|current| current.id() == connection.id());
    if occupied_by_connection {
        map.remove(&bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn stereo() -> Format {
        Format::standard(48000.0, 2).unwrap()
    }

    #[test]
    fn test_next_available_bus_skips_occupied() {
        let source = Node::new(NodeArgs::new(0, 1));
        let mixer = Node::new(NodeArgs::new(3, 1));
        assert_eq!(mixer.next_available_input_bus(), Some(0));

        let connection = Connection::new(&source, 0, &mixer, 0, stereo());
        mixer.add_input_connection(&connection);
        assert_eq!(mixer.next_available_input_bus(), Some(1));
        assert!(!mixer.is_available_input_bus(0));
        assert!(mixer.is_available_input_bus(2));
        assert!(!mixer.is_available_input_bus(3));

        mixer.remove_input_connection(&connection);
        assert_eq!(mixer.next_available_input_bus(), Some(0));
    }

    #[test]
    fn test_no_bus_available_when_full() {
        let source = Node::new(NodeArgs::new(0, 1));
        let sink = Node::new(NodeArgs::new(1, 0));
        assert_eq!(sink.next_available_output_bus(), None);

        let connection = Connection::new(&source, 0, &sink, 0, stereo());
        source.add_output_connection(&connection);
        assert_eq!(source.next_available_output_bus(), None);
        assert_eq!(source.output_format(0), Some(stereo()));
    }

    #[test]
    fn test_dropped_connection_frees_bus() {
        let source = Node::new(NodeArgs::new(0, 1));
        let sink = Node::new(NodeArgs::new(1, 0));
        let connection = Connection::new(&source, 0, &sink, 0, stereo());
        sink.add_input_connection(&connection);

        drop(connection);
        assert_eq!(sink.next_available_input_bus(), Some(0));
        assert!(sink.input_connections().is_empty());
    }

    #[test]
    fn test_update_kernel_bumps_generation() {
        let node = Node::new(NodeArgs::new(1, 1));
        assert!(node.kernel().is_none());

        node.update_kernel();
        let first = node.kernel().unwrap().generation();
        node.update_kernel();
        let second = node.kernel().unwrap().generation();
        assert!(second > first);
    }

    #[test]
    fn test_prepare_handler_decorates_kernel() {
        let node = Node::new(NodeArgs::new(1, 1));
        node.set_prepare_kernel_handler(|kernel| kernel.set_decorator(7_u32));
        node.update_kernel();
        assert_eq!(node.kernel().unwrap().decorator::<u32>(), Some(&7));

        node.clear_prepare_kernel_handler();
        node.update_kernel();
        assert!(node.kernel().unwrap().decorator::<u32>().is_none());
    }

    #[test]
    fn test_notifications() {
        let node = Node::new(NodeArgs::new(1, 1));
        let updates = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));

        let u = Arc::clone(&updates);
        let _on_update = node.observe(NodeMethod::UpdateConnections, move |_, _| {
            u.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&resets);
        let _on_reset = node.observe(NodeMethod::WillReset, move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        node.update_connections();
        node.update_connections();
        node.reset();

        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_invokes_handler_and_records_time() {
        let node = Node::new(NodeArgs::new(0, 1));
        node.set_render_handler(|args: RenderArgs<'_, '_>| {
            let value = args.bus as f32 + 0.25;
            for ch in 0..args.buffer.format().buffer_count() {
                if let Some(data) = args.buffer.data_mut::<f32>(ch) {
                    data.fill(value);
                }
            }
        });

        let mut buffer = PcmBuffer::new(stereo(), 32).unwrap();
        let when = Time::from_sample_time(64, 48000.0);
        node.render(&mut buffer, 0, &when);

        assert!(buffer.data::<f32>(1).unwrap().iter().all(|s| *s == 0.25));
        assert_eq!(node.last_render_time(), Some(when));

        node.reset();
        assert_eq!(node.last_render_time(), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_render_rejects_bad_bus() {
        let node = Node::new(NodeArgs::new(2, 1));
        let mut buffer = PcmBuffer::new(stereo(), 16).unwrap();
        node.render(&mut buffer, 1, &Time::default());
    }

    #[test]
    fn test_input_renderable_uses_input_bus_count() {
        let node = Node::new(NodeArgs::new(2, 0).input_renderable());
        let mut buffer = PcmBuffer::new(stereo(), 16).unwrap();
        node.render(&mut buffer, 1, &Time::default());
        assert!(node.last_render_time().is_some());
    }

    #[test]
    fn test_pull_input_without_kernel_is_silent() {
        let node = Node::new(NodeArgs::new(1, 1));
        let mut buffer = PcmBuffer::new(stereo(), 16).unwrap();
        buffer.data_mut::<f32>(0).unwrap().fill(1.0);

        assert!(!node.pull_input(0, &mut buffer, &Time::default()));
        assert!(buffer.data::<f32>(0).unwrap().iter().all(|s| *s == 0.0));
    }
}
