//! Connection management for the Geode client.

mod connection;
mod locator;
mod manager;

pub use connection::{jittered, ChunkedReply, ConnectOptions, Connection, ConnectionId};
pub use locator::{merge_locators, LocatorClient};
pub use manager::{
    ConnectionEvent, ConnectionManager, EndpointSource, ExpiryJitter, PoolStats, PooledConnection,
};
