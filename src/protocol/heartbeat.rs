use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

use crate::connection::Connection;

pub const PING_TYPE: &str = "ping";
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Sends `ping:<n>` on the control channel every [`PING_INTERVAL`], starting
/// one interval after the connection opens. One-directional; no reply is
/// expected.
pub fn apply_heartbeat(connection: &Arc<Connection>) -> Vec<JoinHandle<()>> {
    let connection = connection.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
        let mut sequence: u64 = 0;
        loop {
            ticker.tick().await;
            connection.send_control(PING_TYPE, Value::String(format!("ping:{sequence}")));
            sequence += 1;
        }
    });
    vec![handle]
}
