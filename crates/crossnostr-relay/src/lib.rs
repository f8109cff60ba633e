//! Relay connectivity for the crossnostr bridge.
//!
//! [`RelayPool`] fans one signed event out to every connected relay and heals
//! broken connections in the background. The network sits behind the
//! [`RelayConnector`] and [`RelayLink`] traits; [`WsConnector`] is the
//! WebSocket implementation used in production.

mod connection;
mod error;
mod message;
mod pool;
mod websocket;

pub use connection::{PublishAck, RelayConnector, RelayLink};
pub use error::RelayError;
pub use message::{event_frame, RelayMessage};
pub use pool::{EndpointHealth, EndpointStatus, PoolConfig, RelayPool};
pub use websocket::{validate_url, WsConnector, WsLink};
