//! Pull-model audio graph engine.
//!
//! Nodes are wired by a [`Graph`] on the control thread. Every topology edit
//! publishes an immutable [`Kernel`] per affected node; render threads read
//! only kernels, so they never wait on the control thread. A render starts
//! at a sink (a device I/O node or an offline output) and pulls recursively
//! through input connections, each node processing the buffer in place.

pub mod builtin;
pub mod config;
pub mod connection;
#[cfg(feature = "cpal")]
pub mod cpal_device;
pub mod device;
pub mod graph;
pub mod kernel;
pub mod node;
pub mod nodes;
pub mod render;

pub use config::{ConfigError, EngineConfig};
pub use connection::{Connection, ConnectionId};
#[cfg(feature = "cpal")]
pub use cpal_device::{CpalDevice, CpalProvider};
pub use device::{
    Device, DeviceError, DeviceMethod, DeviceProvider, DeviceRegistry, DeviceRenderArgs,
    DeviceRenderCallback, ManualDevice,
};
pub use graph::{Direction, Graph, GraphError, RenderMode, StartError};
pub use kernel::Kernel;
pub use node::{Node, NodeArgs, NodeId, NodeKind, NodeMethod, RenderArgs};
pub use nodes::{
    DeviceIoNode, OfflineAction, OfflineCompletion, OfflineError, OfflineOutputNode, Route,
    RouteNode, RoutePoint, TapNode, TapRender, UnitNode,
};

#[cfg(test)]
mod tests {
    use super::*;
    use pullgraph_core::{Format, PcmBuffer, Time};

    #[test]
    fn test_tone_through_route_and_tap() {
        let mono = Format::standard(48000.0, 1).unwrap();
        let stereo = Format::standard(48000.0, 2).unwrap();
        let graph = Graph::new();

        let tone = UnitNode::new(Box::new(builtin::ToneUnit::default()));
        let route = RouteNode::new();
        let tap = TapNode::new();
        let sink = Node::new(NodeArgs::new(1, 0));

        graph.connect(tone.node(), route.node(), mono).unwrap();
        graph.connect(route.node(), tap.node(), stereo).unwrap();
        graph.connect(tap.node(), &sink, stereo).unwrap();
        route.add_route(Route::new(0, 0, 0, 1));

        let mut buffer = PcmBuffer::new(stereo, 256).unwrap();
        assert!(sink.pull_input(0, &mut buffer, &Time::from_sample_time(0, 48000.0)));

        let left = buffer.data::<f32>(0).unwrap();
        let right = buffer.data::<f32>(1).unwrap();
        assert!(left.iter().all(|s| *s == 0.0));
        assert!(right.iter().any(|s| s.abs() > 0.1));
        assert!(right.iter().all(|s| s.abs() <= 0.5 + f32::EPSILON));
    }
}
