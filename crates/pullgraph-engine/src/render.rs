//! The pull step shared by every node kind.
//!
//! A node renders an input bus by following the kernel's connection on that
//! bus to the source node and asking the source to render into the caller's
//! buffer. Anything that would make that unsafe to attempt (no connection,
//! a detached source, a format disagreement) yields silence instead.
//!
//! These functions run on the render thread.

use crate::connection::Connection;
use crate::kernel::Kernel;
use pullgraph_core::{Bus, PcmBuffer, Time};
use pullgraph_unit::UnitInput;

/// Render input bus `bus` of `kernel` into `buffer`.
///
/// Returns `true` if a source node was rendered; otherwise `buffer` is
/// silenced and `false` is returned.
pub fn pull(kernel: &Kernel, bus: Bus, buffer: &mut PcmBuffer<'_>, when: &Time) -> bool {
    match kernel.input_connection(bus) {
        Some(connection) => pull_connection(connection, buffer, when),
        None => {
            buffer.clear();
            false
        }
    }
}

/// Render the source end of `connection` into `buffer`.
///
/// The buffer must carry the connection's format, and the source's own
/// published kernel must still route this connection with the same format
/// on its output bus.
pub fn pull_connection(connection: &Connection, buffer: &mut PcmBuffer<'_>, when: &Time) -> bool {
    let Some(source) = connection.source_node() else {
        buffer.clear();
        return false;
    };
    if connection.format() != *buffer.format() {
        buffer.clear();
        return false;
    }

    let routed = source.kernel().is_some_and(|kernel| {
        kernel
            .output_connection(connection.source_bus())
            .is_some_and(|output| output.format() == connection.format())
    });
    if !routed {
        buffer.clear();
        return false;
    }

    source.render(buffer, connection.source_bus(), when);
    true
}

/// [`UnitInput`] that pulls through a node's kernel
pub(crate) struct KernelInput<'k> {
    pub kernel: &'k Kernel,
    pub when: &'k Time,
}

impl UnitInput for KernelInput<'_> {
    fn pull(&mut self, bus: Bus, buffer: &mut PcmBuffer<'_>) -> bool {
        pull(self.kernel, bus, buffer, self.when)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeArgs, RenderArgs};
    use pullgraph_core::Format;
    use std::sync::Arc;

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

    fn link(source: &Arc<Node>, destination: &Arc<Node>, format: Format) -> Arc<Connection> {
        let connection = Connection::new(source, 0, destination, 0, format);
        source.add_output_connection(&connection);
        destination.add_input_connection(&connection);
        source.update_kernel();
        destination.update_kernel();
        connection
    }

    fn dirty(format: Format) -> PcmBuffer<'static> {
        let mut buffer = PcmBuffer::new(format, 64).unwrap();
        for ch in 0..format.buffer_count() {
            buffer.data_mut::<f32>(ch).unwrap().fill(9.0);
        }
        buffer
    }

    fn is_silent(buffer: &PcmBuffer<'_>) -> bool {
        (0..buffer.format().buffer_count())
            .all(|ch| buffer.data::<f32>(ch).unwrap().iter().all(|s| *s == 0.0))
    }

    #[test]
    fn test_pull_renders_source() {
        let format = Format::standard(48000.0, 2).unwrap();
        let source = constant(0.5);
        let sink = Node::new(NodeArgs::new(1, 0));
        let _connection = link(&source, &sink, format);

        let mut buffer = dirty(format);
        let kernel = sink.kernel().unwrap();
        assert!(pull(&kernel, 0, &mut buffer, &Time::default()));
        assert!(buffer.data::<f32>(0).unwrap().iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_pull_unconnected_bus_is_silent() {
        let format = Format::standard(48000.0, 2).unwrap();
        let sink = Node::new(NodeArgs::new(2, 0));
        sink.update_kernel();

        let mut buffer = dirty(format);
        assert!(!pull(&sink.kernel().unwrap(), 1, &mut buffer, &Time::default()));
        assert!(is_silent(&buffer));
    }

    #[test]
    fn test_buffer_format_mismatch_is_silent() {
        let format = Format::standard(48000.0, 2).unwrap();
        let source = constant(0.5);
        let sink = Node::new(NodeArgs::new(1, 0));
        let _connection = link(&source, &sink, format);

        let other = Format::standard(44100.0, 2).unwrap();
        let mut buffer = dirty(other);
        assert!(!pull(&sink.kernel().unwrap(), 0, &mut buffer, &Time::default()));
        assert!(is_silent(&buffer));
    }

    #[test]
    fn test_source_without_kernel_is_silent() {
        let format = Format::standard(48000.0, 1).unwrap();
        let source = constant(0.5);
        let sink = Node::new(NodeArgs::new(1, 0));
        let connection = Connection::new(&source, 0, &sink, 0, format);
        sink.add_input_connection(&connection);
        source.add_output_connection(&connection);
        sink.update_kernel();

        let mut buffer = dirty(format);
        assert!(!pull(&sink.kernel().unwrap(), 0, &mut buffer, &Time::default()));
        assert!(is_silent(&buffer));
    }

    #[test]
    fn test_detached_source_is_silent() {
        let format = Format::standard(48000.0, 2).unwrap();
        let source = constant(0.5);
        let sink = Node::new(NodeArgs::new(1, 0));
        let connection = link(&source, &sink, format);
        let stale = sink.kernel().unwrap();

        connection.remove_source_node();
        let mut buffer = dirty(format);
        assert!(!pull(&stale, 0, &mut buffer, &Time::default()));
        assert!(is_silent(&buffer));
    }

    #[test]
    fn test_kernel_input_pulls_for_units() {
        let format = Format::standard(48000.0, 2).unwrap();
        let source = constant(-0.25);
        let sink = Node::new(NodeArgs::new(1, 1));
        let _connection = link(&source, &sink, format);

        let kernel = sink.kernel().unwrap();
        let when = Time::default();
        let mut input = KernelInput {
            kernel: &kernel,
            when: &when,
        };
        let mut buffer = dirty(format);
        assert!(input.pull(0, &mut buffer));
        assert!(buffer.data::<f32>(1).unwrap().iter().all(|s| *s == -0.25));
    }
}
