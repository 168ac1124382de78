//! The `error` module defines the error type used within the `stockings` crate.
//!
//! Malformed wire frames are not errors (the codec returns `None` for them).
//! Everything here is either a credential failure, which force-closes the
//! offending connection, or a configuration failure, which is fatal at server
//! construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Signature, subject or encoding check failed while verifying a token.
    #[error("invalid client token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token verified but its payload lacks a required field.
    #[error("malformed client token: missing {0}")]
    MalformedToken(&'static str),

    #[error("IP address mismatch: token bound to {expected}, presented from {actual}")]
    AddressMismatch { expected: String, actual: String },

    #[error("no connection registered with id {0}")]
    UnknownConnection(String),

    /// A control message carried a payload of the wrong shape.
    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
