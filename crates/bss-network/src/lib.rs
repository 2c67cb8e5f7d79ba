//! Networking layer: the single backend connection and the REST collaborators.

mod api;
mod connection;
mod local;
mod socketio;
mod transport;

pub use api::{DashboardApi, EventPage, HttpApi, MemoryApi};
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState, Subscription};
pub use local::LocalConnector;
pub use transport::{Connector, Link, SocketIoConnector};
