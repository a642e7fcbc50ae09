//! Channel routing between arbitrary buses.
//!
//! A route node has an unbounded number of input and output buses. Each
//! [`Route`] maps one source channel on one input bus to one destination
//! channel on one output bus. Rendering an output bus clears it, then for
//! every input bus with routes onto it builds a remapped view over the
//! output buffer and pulls the source straight into that view.

use crate::kernel::Kernel;
use crate::node::{Node, NodeArgs, NodeKind, NodeMethod, RenderArgs};
use crate::render;
use parking_lot::Mutex;
use pullgraph_comms::Observer;
use pullgraph_core::{Bus, ChannelMap, PcmBuffer};
use smallvec::smallvec;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One channel on one bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutePoint {
    pub bus: Bus,
    pub channel: u32,
}

impl RoutePoint {
    #[must_use]
    pub const fn new(bus: Bus, channel: u32) -> Self {
        Self { bus, channel }
    }
}

/// Mapping of a source channel onto a destination channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub source: RoutePoint,
    pub destination: RoutePoint,
}

impl Route {
    #[must_use]
    pub const fn new(
        source_bus: Bus,
        source_channel: u32,
        destination_bus: Bus,
        destination_channel: u32,
    ) -> Self {
        Self {
            source: RoutePoint::new(source_bus, source_channel),
            destination: RoutePoint::new(destination_bus, destination_channel),
        }
    }
}

/// Routes captured in a kernel
#[derive(Debug, Clone, Default)]
struct RouteTable(Vec<Route>);

/// Build the channel map that places source channels of `source_bus` onto a
/// view of `destination_bus`.
///
/// Entry `i` of the result names the destination channel that source
/// channel `i` lands on. Routes naming channels outside either channel
/// count are ignored. Returns `None` if no route connects the two buses.
pub fn channel_map_from_routes<'a>(
    routes: impl IntoIterator<Item = &'a Route>,
    source_bus: Bus,
    source_channel_count: u32,
    destination_bus: Bus,
    destination_channel_count: u32,
) -> Option<ChannelMap> {
    let mut map: ChannelMap = smallvec![None; source_channel_count as usize];
    let mut routed = false;

    for route in routes {
        if route.source.bus == source_bus
            && route.destination.bus == destination_bus
            && route.source.channel < source_channel_count
            && route.destination.channel < destination_channel_count
        {
            map[route.source.channel as usize] = Some(route.destination.channel);
            routed = true;
        }
    }

    routed.then_some(map)
}

/// Node that routes channels between buses
pub struct RouteNode {
    node: Arc<Node>,
    routes: Arc<Mutex<BTreeSet<Route>>>,
    _reset_observer: Observer,
}

impl RouteNode {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let node = Node::new(NodeArgs::new(u32::MAX, u32::MAX).kind(NodeKind::Route));
        let routes: Arc<Mutex<BTreeSet<Route>>> = Arc::new(Mutex::new(BTreeSet::new()));

        let captured = Arc::clone(&routes);
        node.set_prepare_kernel_handler(move |kernel: &mut Kernel| {
            let table = RouteTable(captured.lock().iter().copied().collect());
            kernel.set_decorator(table);
        });

        let weak_node = Arc::downgrade(&node);
        node.set_render_handler(move |args: RenderArgs<'_, '_>| {
            args.buffer.clear();
            let Some(node) = weak_node.upgrade() else {
                return;
            };
            let Some(kernel) = node.kernel() else {
                return;
            };
            let Some(table) = kernel.decorator::<RouteTable>() else {
                return;
            };

            let destination_channels = args.buffer.format().channel_count();
            for (&source_bus, connection) in kernel.input_connections() {
                let format = connection.format();
                let Some(map) = channel_map_from_routes(
                    &table.0,
                    source_bus,
                    format.channel_count(),
                    args.bus,
                    destination_channels,
                ) else {
                    continue;
                };
                if let Ok(mut view) = PcmBuffer::remap(format, args.buffer, &map) {
                    render::pull_connection(connection, &mut view, args.when);
                }
            }
        });

        let cleared = Arc::clone(&routes);
        let reset_observer = node.observe(NodeMethod::WillReset, move |_, _| {
            cleared.lock().clear();
        });

        Arc::new(Self {
            node,
            routes,
            _reset_observer: reset_observer,
        })
    }

    #[must_use]
    pub const fn node(&self) -> &Arc<Node> {
        &self.node
    }

    #[must_use]
    pub fn routes(&self) -> BTreeSet<Route> {
        self.routes.lock().clone()
    }

    /// Add a route, replacing any route from the same source point or onto
    /// the same destination point
    pub fn add_route(&self, route: Route) {
        self.edit(|routes| {
            routes.retain(|r| r.source != route.source && r.destination != route.destination);
            routes.insert(route);
        });
    }

    pub fn remove_route(&self, route: &Route) {
        self.edit(|routes| {
            routes.remove(route);
        });
    }

    pub fn remove_route_for_source(&self, source: RoutePoint) {
        self.edit(|routes| routes.retain(|r| r.source != source));
    }

    pub fn remove_route_for_destination(&self, destination: RoutePoint) {
        self.edit(|routes| routes.retain(|r| r.destination != destination));
    }

    /// Replace every route
    pub fn set_routes(&self, new_routes: impl IntoIterator<Item = Route>) {
        let new_routes: BTreeSet<Route> = new_routes.into_iter().collect();
        self.edit(move |routes| *routes = new_routes);
    }

    pub fn clear_routes(&self) {
        self.edit(BTreeSet::clear);
    }

    fn edit(&self, change: impl FnOnce(&mut BTreeSet<Route>)) {
        change(&mut self.routes.lock());
        self.node.update_kernel();
    }
}
