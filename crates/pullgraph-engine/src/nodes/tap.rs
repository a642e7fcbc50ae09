//! Tap nodes: pass-through points where callers observe or rewrite audio.

use crate::connection::Connection;
use crate::kernel::Kernel;
use crate::node::{Node, NodeArgs, NodeKind, RenderArgs};
use crate::render;
use arc_swap::ArcSwapOption;
use pullgraph_core::{Bus, PcmBuffer, Time};
use std::sync::Arc;

/// View of one tap render cycle
pub struct TapRender<'r, 'b> {
    pub buffer: &'r mut PcmBuffer<'b>,
    pub bus: Bus,
    pub when: &'r Time,
    kernel: Option<&'r Kernel>,
}

impl TapRender<'_, '_> {
    /// Render the tap's source into the buffer.
    ///
    /// Returns `false` and silences the buffer when nothing is connected.
    pub fn render_source(&mut self) -> bool {
        match self.kernel {
            Some(kernel) => render::pull(kernel, self.bus, self.buffer, self.when),
            None => {
                self.buffer.clear();
                false
            }
        }
    }

    #[must_use]
    pub fn input_connection(&self, bus: Bus) -> Option<&Arc<Connection>> {
        self.kernel?.input_connection(bus)
    }

    #[must_use]
    pub fn output_connection(&self, bus: Bus) -> Option<&Arc<Connection>> {
        self.kernel?.output_connection(bus)
    }
}

type TapFn = dyn Fn(&mut TapRender<'_, '_>) + Send + Sync;

struct TapHandler(Box<TapFn>);

/// Node with one input and one output whose render is a user handler.
///
/// Without a handler a tap passes its source through; an input tap leaves
/// the device input it was handed as is.
pub struct TapNode {
    node: Arc<Node>,
    handler: Arc<ArcSwapOption<TapHandler>>,
}

impl TapNode {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(NodeArgs::new(1, 1).kind(NodeKind::Tap))
    }

    /// Tap that receives device input.
    ///
    /// Connect the device I/O node's output to it; each device cycle renders
    /// the tap with the captured input.
    #[must_use]
    pub fn input() -> Arc<Self> {
        Self::build(
            NodeArgs::new(1, 0)
                .kind(NodeKind::InputTap)
                .input_renderable(),
        )
    }

    fn build(args: NodeArgs) -> Arc<Self> {
        let node = Node::new(args);
        let handler: Arc<ArcSwapOption<TapHandler>> = Arc::new(ArcSwapOption::empty());

        let weak_node = Arc::downgrade(&node);
        let slot = Arc::clone(&handler);
        let passthrough = !args.input_renderable;
        node.set_render_handler(move |args: RenderArgs<'_, '_>| {
            let Some(node) = weak_node.upgrade() else {
                return;
            };
            let kernel = node.kernel();
            let mut render = TapRender {
                buffer: args.buffer,
                bus: args.bus,
                when: args.when,
                kernel: kernel.as_deref(),
            };

            match &*slot.load() {
                Some(handler) => (handler.0)(&mut render),
                None if passthrough => {
                    render.render_source();
                }
                None => {}
            }
        });

        Arc::new(Self { node, handler })
    }

    #[must_use]
    pub const fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Install the tap handler; it runs on the render thread
    pub fn set_render_handler<F>(&self, handler: F)
    where
        F: Fn(&mut TapRender<'_, '_>) + Send + Sync + 'static,
    {
        self.handler
            .store(Some(Arc::new(TapHandler(Box::new(handler)))));
    }

    pub fn clear_render_handler(&self) {
        self.handler.store(None);
    }
}
