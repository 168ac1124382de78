use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::Connection;

pub const UNSUBSCRIBE_TYPE: &str = "unsubscribe";

/// Removes the named transaction and echoes its id back as the ack. Unknown
/// transactions are acknowledged too.
pub fn apply_unsubscribe(connection: &Arc<Connection>) -> Vec<JoinHandle<()>> {
    let mut requests = connection.listen_control(UNSUBSCRIBE_TYPE);
    let connection = connection.clone();

    let handle = tokio::spawn(async move {
        while let Some(payload) = requests.recv().await {
            let Value::String(transaction_id) = payload else {
                debug!(connection_id = %connection.id(), "ignoring malformed unsubscribe");
                continue;
            };
            connection.remove_subscriptions(&transaction_id);
            connection.send_control(UNSUBSCRIBE_TYPE, Value::String(transaction_id));
        }
    });
    vec![handle]
}
