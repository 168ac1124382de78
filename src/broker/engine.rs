//! Subscription registry
//!
//! Owns the two pieces of cross-connection state:
//! - `connections`: id → connection, used to resolve transfer tokens. Closed
//!   connections stay here until their grace period ends.
//! - `topics`: topic → subscribed connections, used for broadcast. Only open
//!   connections are indexed; a connection leaves every topic as soon as it
//!   closes.
//!
//! Both live behind one lock. Broadcast takes a snapshot of a topic's
//! subscribers and releases the lock before sending anything.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::broker::topic::{SubscriberId, Topic};
use crate::connection::Connection;

#[derive(Debug, Default)]
struct RegistryState {
    topics: HashMap<String, Topic>,
    connections: HashMap<SubscriberId, Arc<Connection>>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connection(&self, connection: Arc<Connection>) {
        let mut state = self.state.lock();
        state
            .connections
            .insert(connection.id().to_string(), connection);
    }

    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.state.lock().connections.get(id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Indexes `connection` under `topic`. Closed connections are never
    /// indexed.
    pub fn subscribe(&self, topic: &str, connection: &Arc<Connection>) {
        let mut state = self.state.lock();
        // checked under the lock so a concurrent detach can't be overtaken
        if connection.is_closed() {
            return;
        }
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(connection.clone());
        debug!(connection_id = %connection.id(), topic, "registered subscription");
    }

    /// Removes `id` from `topic`, dropping the topic once it has no
    /// subscribers.
    pub fn unsubscribe(&self, topic: &str, id: &str) {
        let mut state = self.state.lock();
        let now_empty = match state.topics.get_mut(topic) {
            Some(t) => {
                t.unsubscribe(id);
                t.is_empty()
            }
            None => return,
        };
        if now_empty {
            state.topics.remove(topic);
        }
        debug!(connection_id = %id, topic, "unregistered subscription");
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.state.lock().topics.contains_key(topic)
    }

    /// Connections subscribed to `topic` right now.
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(Topic::snapshot)
            .unwrap_or_default()
    }

    /// Removes the connection from every topic but keeps it resolvable by id.
    pub fn detach_connection(&self, id: &str) {
        let mut state = self.state.lock();
        state.topics.retain(|_, topic| {
            topic.unsubscribe(id);
            !topic.is_empty()
        });
    }

    /// Forgets the connection entirely.
    pub fn cleanup_connection(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = {
            let mut state = self.state.lock();
            state.topics.retain(|_, topic| {
                topic.unsubscribe(id);
                !topic.is_empty()
            });
            state.connections.remove(id)
        };
        info!(connection_id = %id, "cleaned up connection");
        removed
    }
}
