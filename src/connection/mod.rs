//! The `connection` module defines the representation of one logical session
//! in the Pub/Sub system.
//!
//! It provides the [`Connection`] struct, which owns the subscription and
//! transaction bookkeeping for a single socket, and the per-connection event
//! multiplexer that fans inbound frames out to typed listeners.

pub mod hub;
pub mod session;

pub use hub::Listener;
pub use session::{
    Connection, ConnectionState, MergeStrategy, SubscriptionTracker, Transaction,
    TransactionSubscription,
};
