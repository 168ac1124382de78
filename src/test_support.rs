//! Shared doubles for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tungstenite::protocol::Message as WsMessage;

use crate::connection::{Connection, SubscriptionTracker};

/// Records tracker callbacks as a topic → connection ids index.
#[derive(Default)]
pub struct RecordingTracker {
    pub index: Mutex<HashMap<String, HashSet<String>>>,
    pub registrations: Mutex<Vec<(String, String)>>,
    pub unregistrations: Mutex<Vec<(String, String)>>,
}

impl RecordingTracker {
    pub fn holds(&self, connection: &Connection, topic: &str) -> bool {
        self.index
            .lock()
            .get(topic)
            .is_some_and(|ids| ids.contains(connection.id()))
    }
}

impl SubscriptionTracker for RecordingTracker {
    fn register_subscription(&self, connection: &Arc<Connection>, topic: &str) {
        self.index
            .lock()
            .entry(topic.to_string())
            .or_default()
            .insert(connection.id().to_string());
        self.registrations
            .lock()
            .push((connection.id().to_string(), topic.to_string()));
    }

    fn unregister_subscription(&self, connection: &Arc<Connection>, topic: &str) {
        if let Some(ids) = self.index.lock().get_mut(topic) {
            ids.remove(connection.id());
        }
        self.unregistrations
            .lock()
            .push((connection.id().to_string(), topic.to_string()));
    }
}

pub fn tracked_connection(
    tracker: &Arc<RecordingTracker>,
    address: &str,
) -> (Arc<Connection>, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = unbounded_channel();
    let weak: Weak<dyn SubscriptionTracker> = Arc::downgrade(tracker) as Weak<dyn SubscriptionTracker>;
    (Connection::new(address, tx, weak), rx)
}

/// Drains every queued text frame.
pub fn drain_frames(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let WsMessage::Text(text) = msg {
            frames.push(text.as_str().to_owned());
        }
    }
    frames
}

/// Stands in for the socket task: once `close` is requested, report the
/// transport as gone.
pub fn spawn_fake_transport(connection: &Arc<Connection>) {
    let connection = connection.clone();
    tokio::spawn(async move {
        connection.shutdown_requested().await;
        connection.mark_closed();
    });
}
