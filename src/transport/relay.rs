//! Data-channel relay
//!
//! A minimal application layer over the session core, used by the binary:
//! - `subscribe` `{transactionId, subscriptions: [{type, mergeStrategy?, upsertKey?}]}`
//!   adds each subscription and answers with `subscribed` carrying the
//!   transaction header
//! - `publish` `{topic, payload}` broadcasts `payload` to `topic`
//!
//! Malformed requests are dropped.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{Connection, TransactionSubscription};
use crate::server::SessionServer;

pub const SUBSCRIBE_TYPE: &str = "subscribe";
pub const SUBSCRIBED_TYPE: &str = "subscribed";
pub const PUBLISH_TYPE: &str = "publish";

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    pub subscriptions: Vec<TransactionSubscription>,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

/// Starts the relay for one connection. The tasks end on their own when the
/// connection closes.
pub fn attach_relay(server: &Arc<SessionServer>, connection: &Arc<Connection>) -> Vec<JoinHandle<()>> {
    let mut subscribes = connection.listen_data(SUBSCRIBE_TYPE);
    let mut publishes = connection.listen_data(PUBLISH_TYPE);

    let subscriber = {
        let connection = connection.clone();
        tokio::spawn(async move {
            while let Some(payload) = subscribes.recv().await {
                let request: SubscribeRequest = match serde_json::from_value(payload) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!(connection_id = %connection.id(), "Invalid subscribe request: {e}");
                        continue;
                    }
                };
                for sub in request.subscriptions {
                    connection.add_subscription(
                        &sub.topic,
                        &request.transaction_id,
                        sub.merge_strategy,
                        sub.upsert_key,
                    );
                }
                if let Some(header) = connection.transaction(&request.transaction_id) {
                    if let Ok(header) = serde_json::to_value(header) {
                        connection.send_data(SUBSCRIBED_TYPE, header);
                    }
                }
            }
        })
    };

    let publisher = {
        let server = server.clone();
        let connection_id = connection.id().to_string();
        tokio::spawn(async move {
            while let Some(payload) = publishes.recv().await {
                match serde_json::from_value::<PublishRequest>(payload) {
                    Ok(request) => {
                        server.send_data(&request.topic, request.payload);
                        debug!(connection_id = %connection_id, topic = %request.topic, "published");
                    }
                    Err(e) => {
                        debug!(connection_id = %connection_id, "Invalid publish request: {e}");
                    }
                }
            }
        })
    };

    vec![subscriber, publisher]
}
