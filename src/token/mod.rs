//! The `token` module signs and verifies the compact credential that lets a
//! reconnecting client adopt the subscriptions of its previous connection.
//!
//! A token binds a connection id to the network address it was issued to.

pub mod codec;

pub use codec::{TokenCodec, TokenPayload};
