use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::connection::Connection;
use crate::utils::error::{Result, SessionError};

pub const TRANSFER_TYPE: &str = "client-change";

/// Resolves a transfer token presented from `address` to the connection it
/// was issued for.
pub trait ConnectionResolver: Send + Sync {
    fn get_connection(&self, token: &str, address: &str) -> Result<Arc<Connection>>;
}

/// Listens for `client-change` requests and merges the referenced
/// connection's transactions into this one. Any failure to resolve the token
/// closes this connection.
pub fn apply_transfer(
    connection: &Arc<Connection>,
    resolver: Arc<dyn ConnectionResolver>,
) -> Vec<JoinHandle<()>> {
    let mut requests = connection.listen_control(TRANSFER_TYPE);
    let connection = connection.clone();

    let handle = tokio::spawn(async move {
        while let Some(payload) = requests.recv().await {
            let resolved = match payload {
                Value::String(token) => resolver.get_connection(&token, connection.remote_address()),
                _ => Err(SessionError::MalformedPayload(TRANSFER_TYPE)),
            };
            match resolved {
                Ok(previous) => connection.add_subscriptions_from(&previous),
                Err(e) => {
                    warn!(
                        connection_id = %connection.id(),
                        address = %connection.remote_address(),
                        error = %e,
                        "transfer refused, closing connection"
                    );
                    connection.close();
                    break;
                }
            }
        }
    });
    vec![handle]
}
