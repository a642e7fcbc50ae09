//! Nodes that host a processing [`Unit`].

use crate::node::{Node, NodeArgs, NodeId, NodeKind, NodeMethod, RenderArgs};
use crate::render::KernelInput;
use parking_lot::Mutex;
use pullgraph_comms::Observer;
use pullgraph_core::{Format, Frames};
use pullgraph_unit::{ParameterInfo, Unit, UnitError, UnitInfo, UnitParameters};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Largest slice a hosted unit is prepared for
pub const DEFAULT_MAXIMUM_FRAMES: Frames = 4096;

struct UnitCore {
    unit: Mutex<Box<dyn Unit>>,
    parameters: Arc<dyn UnitParameters>,
    info: UnitInfo,
    maximum_frames: Frames,
    prepared_format: Mutex<Option<Format>>,
    render_errors: AtomicU64,
}

impl UnitCore {
    /// Initialize the unit for the format on its first connected bus
    fn prepare(&self, node: &Node) {
        let format = node.output_format(0).or_else(|| node.input_format(0));
        let Some(format) = format else {
            return;
        };

        let mut prepared = self.prepared_format.lock();
        if *prepared == Some(format) {
            return;
        }

        match self.unit.lock().initialize(&format, self.maximum_frames) {
            Ok(()) => {
                tracing::debug!("Initialized unit {} for {}", self.info.name, format);
                *prepared = Some(format);
            }
            Err(e) => {
                tracing::error!("Failed to initialize unit {}: {}", self.info.name, e);
                *prepared = None;
            }
        }
    }
}

/// Node wrapping a [`Unit`].
///
/// The unit is initialized on the control thread whenever the node's
/// connections change. On the render thread the unit is only ever
/// try-locked; a render that finds it busy (being initialized or reset)
/// outputs silence for that cycle. Parameter edits go through the unit's
/// parameter handle and never take the unit lock.
pub struct UnitNode {
    node: Arc<Node>,
    core: Arc<UnitCore>,
    _observers: [Observer; 2],
}

impl UnitNode {
    #[must_use]
    pub fn new(unit: Box<dyn Unit>) -> Arc<Self> {
        Self::with_maximum_frames(unit, DEFAULT_MAXIMUM_FRAMES)
    }

    #[must_use]
    pub fn with_maximum_frames(unit: Box<dyn Unit>, maximum_frames: Frames) -> Arc<Self> {
        let node = Node::new(
            NodeArgs::new(unit.input_bus_count(), unit.output_bus_count()).kind(NodeKind::Unit),
        );
        let core = Arc::new(UnitCore {
            info: unit.info().clone(),
            parameters: unit.parameter_handle(),
            unit: Mutex::new(unit),
            maximum_frames,
            prepared_format: Mutex::new(None),
            render_errors: AtomicU64::new(0),
        });

        let weak_node = Arc::downgrade(&node);
        let weak_core = Arc::downgrade(&core);
        node.set_render_handler(move |args: RenderArgs<'_, '_>| {
            let (Some(node), Some(core)) = (weak_node.upgrade(), weak_core.upgrade()) else {
                args.buffer.clear();
                return;
            };
            let Some(kernel) = node.kernel() else {
                args.buffer.clear();
                return;
            };
            let Some(mut unit) = core.unit.try_lock() else {
                args.buffer.clear();
                return;
            };

            let mut input = KernelInput {
                kernel: &kernel,
                when: args.when,
            };
            if unit
                .render(args.buffer, args.bus, args.when, &mut input)
                .is_err()
            {
                core.render_errors.fetch_add(1, Ordering::Relaxed);
                args.buffer.clear();
            }
        });

        let on_update = {
            let weak_node = Arc::downgrade(&node);
            let weak_core = Arc::downgrade(&core);
            move |_: &NodeMethod, _: &NodeId| {
                if let (Some(node), Some(core)) = (weak_node.upgrade(), weak_core.upgrade()) {
                    core.prepare(&node);
                }
            }
        };
        let on_reset = {
            let weak_core = Arc::downgrade(&core);
            move |_: &NodeMethod, _: &NodeId| {
                if let Some(core) = weak_core.upgrade() {
                    core.unit.lock().reset();
                }
            }
        };
        let observers = [
            node.observe(NodeMethod::UpdateConnections, on_update),
            node.observe(NodeMethod::WillReset, on_reset),
        ];

        Arc::new(Self {
            node,
            core,
            _observers: observers,
        })
    }

    #[must_use]
    pub const fn node(&self) -> &Arc<Node> {
        &self.node
    }

    #[must_use]
    pub fn info(&self) -> &UnitInfo {
        &self.core.info
    }

    /// Format the unit was last initialized with
    #[must_use]
    pub fn prepared_format(&self) -> Option<Format> {
        *self.core.prepared_format.lock()
    }

    /// Number of render cycles the unit failed, since creation
    #[must_use]
    pub fn render_error_count(&self) -> u64 {
        self.core.render_errors.load(Ordering::Relaxed)
    }

    pub fn set_parameter(&self, id: u32, element: u32, value: f32) -> Result<(), UnitError> {
        self.core.parameters.set_parameter(id, element, value)
    }

    pub fn parameter(&self, id: u32, element: u32) -> Result<f32, UnitError> {
        self.core.parameters.parameter(id, element)
    }

    #[must_use]
    pub fn parameters(&self) -> Vec<ParameterInfo> {
        self.core.parameters.parameters()
    }

    /// Run `f` with exclusive access to the unit
    pub fn with_unit<R>(&self, f: impl FnOnce(&mut dyn Unit) -> R) -> R {
        let mut unit = self.core.unit.lock();
        f(unit.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::GainUnit;
    use crate::graph::Graph;
    use pullgraph_core::{PcmBuffer, Time};

    fn constant(value: f32) -> Arc<Node> {
        let node = Node::new(NodeArgs::new(0, 1));
        node.set_render_handler(move |args: RenderArgs<'_, '_>| {
            for ch in 0..args.buffer.format().buffer_count() {
                if let Some(data) = args.buffer.data_mut::<f32>(ch) {
                    data.fill(value);
                }
            }
        });
        node
    }

    #[test]
    fn test_connecting_initializes_unit() {
        let format = Format::standard(44100.0, 2).unwrap();
        let graph = Graph::new();
        let source = constant(0.5);
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        assert_eq!(gain.prepared_format(), None);

        graph.connect(&source, gain.node(), format).unwrap();
        assert_eq!(gain.prepared_format(), Some(format));
    }

    #[test]
    fn test_unit_renders_through_kernel() {
        let format = Format::standard(48000.0, 2).unwrap();
        let graph = Graph::new();
        let source = constant(0.5);
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        graph.connect(&source, gain.node(), format).unwrap();
        gain.set_parameter(GainUnit::GAIN, 0, 1.5).unwrap();

        let mut buffer = PcmBuffer::new(format, 64).unwrap();
        gain.node().render(&mut buffer, 0, &Time::default());

        assert!(buffer.data::<f32>(1).unwrap().iter().all(|s| *s == 0.75));
        assert_eq!(gain.render_error_count(), 0);
        assert_eq!(gain.parameter(GainUnit::GAIN, 0).unwrap(), 1.5);
    }

    #[test]
    fn test_unsupported_format_leaves_unit_unprepared() {
        let format = Format::new(48000.0, 2, pullgraph_core::PcmFormat::Int16, false).unwrap();
        let graph = Graph::new();
        let source = Node::new(NodeArgs::new(0, 1));
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        graph.connect(&source, gain.node(), format).unwrap();

        assert_eq!(gain.prepared_format(), None);
    }

    #[test]
    fn test_parameter_edits_do_not_lock_the_unit() {
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        let value = gain.with_unit(|_| {
            gain.set_parameter(GainUnit::GAIN, 0, 0.25).unwrap();
            gain.parameter(GainUnit::GAIN, 0).unwrap()
        });
        assert_eq!(value, 0.25);
    }

    #[test]
    fn test_parameter_edits_during_render_keep_audio() {
        let format = Format::standard(48000.0, 2).unwrap();
        let graph = Graph::new();
        let source = constant(0.5);
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        graph.connect(&source, gain.node(), format).unwrap();

        let editor = {
            let gain = Arc::clone(&gain);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    let value = if i % 2 == 0 { 1.0 } else { 1.5 };
                    gain.set_parameter(GainUnit::GAIN, 0, value).unwrap();
                }
            })
        };

        let mut buffer = PcmBuffer::new(format, 64).unwrap();
        for _ in 0..500 {
            gain.node().render(&mut buffer, 0, &Time::default());
            let data = buffer.data::<f32>(0).unwrap();
            assert!(data.iter().all(|s| *s == 0.5 || *s == 0.75));
        }
        editor.join().unwrap();
        assert_eq!(gain.render_error_count(), 0);
    }

    #[test]
    fn test_with_unit_gives_exclusive_access() {
        let gain = UnitNode::new(Box::new(GainUnit::default()));
        let name = gain.with_unit(|unit| unit.info().name.clone());
        assert_eq!(name, "Gain");
        assert_eq!(gain.info().name, "Gain");
        assert_eq!(gain.parameters().len(), 1);
    }
}
