//! Bridge between a hardware [`Device`] and the graph.
//!
//! The node's input bus 0 is what the device plays; its output bus 0 is
//! what the device captures. Each device cycle the node:
//!
//! 1. stashes the captured input so that pulls of output bus 0 can read it,
//! 2. pulls input bus 0 into the device's output buffer,
//! 3. renders the input-renderable node connected to output bus 0 (an input
//!    tap) with the captured input.

use crate::device::{
    Device, DeviceError, DeviceMethod, DeviceRegistry, DeviceRenderArgs, DeviceRenderCallback,
};
use crate::node::{Node, NodeArgs, NodeId, NodeKind, NodeMethod, RenderArgs};
use crate::render;
use parking_lot::Mutex;
use pullgraph_comms::Observer;
use pullgraph_core::{Frames, PcmBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Largest device cycle the input stash can hold
pub const MAXIMUM_DEVICE_FRAMES: Frames = 4096;

struct DeviceIoCore {
    node: Weak<Node>,
    device: Mutex<Option<Arc<dyn Device>>>,
    input_on_render: Mutex<Option<PcmBuffer<'static>>>,
    armed: AtomicBool,
}

impl DeviceIoCore {
    /// Check connection formats against the device and (re)install or
    /// remove its render callback
    fn update_device_connections(self: &Arc<Self>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let device = self.device.lock().clone();
        let Some(device) = device else {
            self.armed.store(false, Ordering::Release);
            return;
        };

        let mut valid = true;
        if let Some(connection) = node.input_connection(0) {
            if device.output_format() != Some(connection.format()) {
                tracing::warn!(
                    "Device {} cannot play {}: connection format {} differs from {:?}",
                    device.name(),
                    node.id(),
                    connection.format(),
                    device.output_format()
                );
                valid = false;
            }
        }
        if let Some(connection) = node.output_connection(0) {
            if device.input_format() != Some(connection.format()) {
                tracing::warn!(
                    "Device {} cannot capture into {}: connection format {} differs from {:?}",
                    device.name(),
                    node.id(),
                    connection.format(),
                    device.input_format()
                );
                valid = false;
            }
        }

        *self.input_on_render.lock() = device
            .input_format()
            .and_then(|format| PcmBuffer::new(format, MAXIMUM_DEVICE_FRAMES).ok());

        if valid {
            let core = Arc::downgrade(self);
            let callback: DeviceRenderCallback = Arc::new(move |args: DeviceRenderArgs<'_, '_>| {
                if let Some(core) = core.upgrade() {
                    core.render_device(args);
                }
            });
            device.set_render_callback(Some(callback));
            self.armed.store(true, Ordering::Release);
            tracing::debug!("Armed device {} for {}", device.name(), node.id());
        } else {
            device.set_render_callback(None);
            self.armed.store(false, Ordering::Release);
        }
    }

    /// Device render thread entry
    fn render_device(&self, args: DeviceRenderArgs<'_, '_>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let kernel = node.kernel();
        node.mark_rendered(args.when);

        if let Some(input) = args.input.as_deref() {
            if let Some(mut slot) = self.input_on_render.try_lock() {
                if let Some(stash) = slot.as_mut() {
                    let stashed = stash.format() == input.format()
                        && stash.set_frame_length(input.frame_length()).is_ok()
                        && stash.copy_from(input, 0, 0, input.frame_length()).is_ok();
                    if !stashed {
                        stash.clear();
                    }
                }
            }
        }

        if let Some(output) = args.output {
            match kernel.as_deref() {
                Some(kernel) => {
                    render::pull(kernel, 0, output, args.when);
                }
                None => output.clear(),
            }
        }

        if let (Some(kernel), Some(input)) = (kernel.as_deref(), args.input) {
            if let Some(connection) = kernel.output_connection(0) {
                if let Some(destination) = connection.destination_node() {
                    if destination.is_input_renderable() && connection.format() == *input.format()
                    {
                        destination.render(input, connection.destination_bus(), args.when);
                    }
                }
            }
        }
    }

    /// Render handler for output bus 0: hands out the stashed device input
    fn render_input(&self, args: RenderArgs<'_, '_>) {
        let Some(slot) = self.input_on_render.try_lock() else {
            args.buffer.clear();
            return;
        };
        let copied = slot.as_ref().is_some_and(|input| {
            input.format() == args.buffer.format()
                && args
                    .buffer
                    .copy_from(input, 0, 0, args.buffer.frame_length())
                    .is_ok()
        });
        if !copied {
            args.buffer.clear();
        }
    }
}

/// Node connecting the graph to a hardware device
pub struct DeviceIoNode {
    node: Arc<Node>,
    core: Arc<DeviceIoCore>,
    _update_observer: Observer,
    registry_observer: Mutex<Option<Observer>>,
}

impl DeviceIoNode {
    #[must_use]
    pub fn new(device: Option<Arc<dyn Device>>) -> Arc<Self> {
        let node = Node::new(NodeArgs::new(1, 1).kind(NodeKind::DeviceIo));
        let core = Arc::new(DeviceIoCore {
            node: Arc::downgrade(&node),
            device: Mutex::new(device),
            input_on_render: Mutex::new(None),
            armed: AtomicBool::new(false),
        });

        let weak_core = Arc::downgrade(&core);
        node.set_render_handler(move |args: RenderArgs<'_, '_>| match weak_core.upgrade() {
            Some(core) => core.render_input(args),
            None => args.buffer.clear(),
        });

        let weak_core = Arc::downgrade(&core);
        let update_observer = node.observe(
            NodeMethod::UpdateConnections,
            move |_: &NodeMethod, _: &NodeId| {
                if let Some(core) = weak_core.upgrade() {
                    core.update_device_connections();
                }
            },
        );

        Arc::new(Self {
            node,
            core,
            _update_observer: update_observer,
            registry_observer: Mutex::new(None),
        })
    }

    #[must_use]
    pub const fn node(&self) -> &Arc<Node> {
        &self.node
    }

    #[must_use]
    pub fn device(&self) -> Option<Arc<dyn Device>> {
        self.core.device.lock().clone()
    }

    /// Swap the device; the previous one loses its render callback
    pub fn set_device(&self, device: Option<Arc<dyn Device>>) {
        let previous = std::mem::replace(&mut *self.core.device.lock(), device);
        if let Some(previous) = previous {
            previous.stop();
            previous.set_render_callback(None);
        }
        self.node.update_connections();
    }

    /// Whether the current device has a render callback installed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.core.armed.load(Ordering::Acquire)
    }

    /// Revalidate against the device whenever `registry` reports a hardware change
    pub fn follow(&self, registry: &DeviceRegistry) {
        let weak_core = Arc::downgrade(&self.core);
        let observer = registry.observe(DeviceMethod::HardwareDidChange, move |_, ()| {
            if let Some(core) = weak_core.upgrade() {
                core.update_device_connections();
            }
        });
        *self.registry_observer.lock() = Some(observer);
    }

    pub(crate) fn start(&self) -> Result<(), DeviceError> {
        let device = self
            .device()
            .ok_or_else(|| DeviceError::NotFound("no device assigned".to_string()))?;
        if !self.is_armed() {
            return Err(DeviceError::NotArmed);
        }
        device.start()
    }

    pub(crate) fn stop(&self) {
        if let Some(device) = self.device() {
            device.stop();
        }
    }
}

impl Drop for DeviceIoNode {
    fn drop(&mut self) {
        if let Some(device) = self.core.device.lock().take() {
            device.stop();
            device.set_render_callback(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ManualDevice;
    use crate::graph::Graph;
    use crate::nodes::TapNode;
    use pullgraph_core::{Format, Time};

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
    fn test_device_plays_connected_source() {
        let format = Format::standard(48000.0, 2).unwrap();
        let device = ManualDevice::new("speakers", None, Some(format));
        let io = DeviceIoNode::new(Some(device.clone()));
        let graph = Graph::new();
        let source = constant(0.25);

        graph.connect(&source, io.node(), format).unwrap();
        assert!(io.is_armed());
        assert!(device.has_render_callback());

        device.start().unwrap();
        let mut output = PcmBuffer::new(format, 128).unwrap();
        assert!(device.render_cycle(Some(&mut output), None, &Time::default()));
        assert!(output.data::<f32>(0).unwrap().iter().all(|s| *s == 0.25));
        assert!(io.node().last_render_time().is_some());
    }

    #[test]
    fn test_format_mismatch_disarms_device() {
        let device_format = Format::standard(48000.0, 2).unwrap();
        let other = Format::standard(44100.0, 2).unwrap();
        let device = ManualDevice::new("speakers", None, Some(device_format));
        let io = DeviceIoNode::new(Some(device.clone()));
        let graph = Graph::new();
        let source = constant(0.25);

        graph.connect(&source, io.node(), other).unwrap();
        assert!(!io.is_armed());
        assert!(!device.has_render_callback());
        assert!(matches!(io.start(), Err(DeviceError::NotArmed)));
    }

    #[test]
    fn test_input_reaches_input_tap_and_pulls() {
        let format = Format::standard(48000.0, 1).unwrap();
        let device = ManualDevice::new("duplex", Some(format), Some(format));
        let io = DeviceIoNode::new(Some(device.clone()));
        let graph = Graph::new();

        let tap = TapNode::input();
        let seen = Arc::new(Mutex::new(0.0_f32));
        let s = Arc::clone(&seen);
        tap.set_render_handler(move |render| {
            if let Some(data) = render.buffer.data::<f32>(0) {
                *s.lock() = data[0];
            }
        });

        // Loop device input straight back to its output through a pass-through tap
        let thru = TapNode::new();
        graph.connect(io.node(), tap.node(), format).unwrap();
        graph.connect(thru.node(), io.node(), format).unwrap();
        device.start().unwrap();

        let mut input = PcmBuffer::new(format, 64).unwrap();
        input.data_mut::<f32>(0).unwrap().fill(0.5);
        let mut output = PcmBuffer::new(format, 64).unwrap();
        assert!(device.render_cycle(Some(&mut output), Some(&mut input), &Time::default()));

        assert_eq!(*seen.lock(), 0.5);
        // thru has no source, so the device plays silence
        assert!(output.data::<f32>(0).unwrap().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_set_device_rearms() {
        let format = Format::standard(48000.0, 2).unwrap();
        let first = ManualDevice::new("first", None, Some(format));
        let second = ManualDevice::new("second", None, Some(format));
        let io = DeviceIoNode::new(Some(first.clone()));
        let graph = Graph::new();
        let source = constant(0.1);
        graph.connect(&source, io.node(), format).unwrap();
        assert!(first.has_render_callback());

        io.set_device(Some(second.clone()));
        assert!(!first.has_render_callback());
        assert!(second.has_render_callback());
        assert_eq!(io.device().unwrap().name(), "second");
    }
}
