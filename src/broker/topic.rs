use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::Connection;

pub type SubscriberId = String;

/// The connections currently subscribed to one topic, keyed by connection id.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<SubscriberId, Arc<Connection>>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Subscribing twice has no further effect.
    pub fn subscribe(&mut self, connection: Arc<Connection>) {
        self.subscribers
            .insert(connection.id().to_string(), connection);
    }

    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.subscribers.values().cloned().collect()
    }
}
