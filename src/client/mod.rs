//! Client connection layer

pub mod address;
pub mod connection;
pub mod control_plane;
#[cfg(test)]
pub(crate) mod mock;
pub mod pool;
pub mod raw_connection;

pub use address::Endpoint;
pub use connection::{Connection, Connector};
pub use control_plane::{ControlPlane, ControlPlaneExt, RoleReply, SentinelMaster, SentinelSlave};
pub use pool::ConnectionPool;
pub use raw_connection::{ConnectionFactory, RawConnection};
