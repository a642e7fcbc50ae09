//! Node kinds built on [`crate::node::Node`].

pub mod device_io;
pub mod offline;
pub mod route;
pub mod tap;
pub mod unit;

pub use device_io::DeviceIoNode;
pub use offline::{OfflineAction, OfflineCompletion, OfflineError, OfflineOutputNode};
pub use route::{Route, RouteNode, RoutePoint, channel_map_from_routes};
pub use tap::{TapNode, TapRender};
pub use unit::UnitNode;
