//! # Stockings
//!
//! `stockings` is a session layer for WebSocket publish/subscribe messaging
//! that survives client reconnection. Clients subscribe to topics grouped
//! into transactions, the server fans data out to every subscriber of a
//! topic, and a signed token lets a client that reconnects on a new socket
//! adopt the subscriptions of its previous connection.
//!
//! ## Core Modules
//!
//! - `broker`: the topic → connections index used for broadcast, plus the
//!   id → connection map used to resolve transfers.
//! - `connection`: one logical session and its subscription bookkeeping.
//! - `protocol`: keepalive, heartbeat, token issuance, transfer and
//!   unsubscribe behaviours wired onto every connection.
//! - `server`: ties the above together and implements broadcast.
//! - `token`: signs and verifies transfer tokens.
//! - `transport`: wire envelope, WebSocket handshake and socket loop.
//! - `config` / `utils`: settings loading, errors and logging.

pub mod broker;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod token;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use connection::{Connection, MergeStrategy};
pub use server::{ServerOptions, SessionServer};
pub use utils::error::SessionError;
