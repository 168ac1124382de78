//! The `transport` module is responsible for handling network communication
//! with clients via WebSockets.
//!
//! It defines the wire envelope shared by the data and control channels,
//! the handshake and socket loop that feed frames into a `Connection`, and a
//! small relay that lets clients subscribe and publish over the data channel.

pub mod message;
pub mod relay;
pub mod websocket;

pub use websocket::start_websocket_server;
