//! Control protocol
//!
//! Five independent behaviours wired onto every connection when it is
//! created:
//! - `keepalive`: closes connections that go quiet for too long
//! - `heartbeat`: periodic server pings so intermediaries keep the socket
//! - `token`: issues the transfer token and waits for the client's echo
//! - `transfer`: adopts a previous connection's subscriptions on request
//! - `unsubscribe`: drops a transaction and acknowledges it
//!
//! Each extension returns the task handles it spawned. All of them are
//! aborted together, once, when the connection's close event fires.

pub mod heartbeat;
pub mod keepalive;
pub mod token;
pub mod transfer;
pub mod unsubscribe;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::Connection;
use crate::token::TokenCodec;

pub use transfer::ConnectionResolver;

pub struct ProtocolOptions {
    pub connection: Arc<Connection>,
    pub tokens: Arc<TokenCodec>,
    pub resolver: Arc<dyn ConnectionResolver>,
}

/// Per-connection task handles torn down as one unit.
#[derive(Default)]
pub struct Disposables {
    handles: Vec<JoinHandle<()>>,
}

impl Disposables {
    pub fn extend(&mut self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.handles.extend(handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Aborting an already finished or aborted task is a no-op.
    pub fn dispose(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Disposables {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Wires every extension onto `options.connection` and schedules their
/// teardown for the connection's close event.
pub fn apply_protocol(options: ProtocolOptions) -> JoinHandle<()> {
    let ProtocolOptions {
        connection,
        tokens,
        resolver,
    } = options;

    let mut overhead = Disposables::default();
    overhead.extend(keepalive::apply_keepalive(&connection));
    overhead.extend(heartbeat::apply_heartbeat(&connection));
    overhead.extend(token::apply_token(&connection, tokens));
    overhead.extend(transfer::apply_transfer(&connection, resolver));
    overhead.extend(unsubscribe::apply_unsubscribe(&connection));

    tokio::spawn(async move {
        connection.closed().await;
        debug!(connection_id = %connection.id(), tasks = overhead.len(), "disposing control protocol");
        overhead.dispose();
    })
}
