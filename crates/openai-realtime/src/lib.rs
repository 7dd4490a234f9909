//! Client transport for the realtime conversation protocol.

pub mod channel;
pub mod transport;
pub mod websocket;

pub use openai_realtime_types as types;
pub use secrecy::{ExposeSecret, SecretString};
pub use transport::{Connection, Connector, Inbound, Transport, TransportError};
pub use websocket::{Intent, WebSocketConnector};
