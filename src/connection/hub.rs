//! Per-connection event multiplexer.
//!
//! A hub maps a message type to the listeners currently interested in it.
//! Registering returns a [`Listener`] whose drop removes the registration.
//! There is no replay: a listener only sees messages published after it was
//! registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::transport::message::SocketMessage;

type ListenerId = u64;

#[derive(Default)]
struct Registrations {
    by_type: HashMap<String, HashMap<ListenerId, UnboundedSender<SocketMessage>>>,
    any: HashMap<ListenerId, UnboundedSender<SocketMessage>>,
    completed: bool,
}

#[derive(Default)]
pub struct Hub {
    next_id: AtomicU64,
    inner: Mutex<Registrations>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Listens for messages whose type equals `kind`.
    pub fn listen(self: &Arc<Self>, kind: &str) -> Listener {
        self.register(Some(kind))
    }

    /// Listens for every message regardless of type.
    pub fn listen_all(self: &Arc<Self>) -> Listener {
        self.register(None)
    }

    fn register(self: &Arc<Self>, kind: Option<&str>) -> Listener {
        let (tx, rx) = unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        // Registering on a completed hub yields an already-finished listener.
        if !inner.completed {
            match kind {
                Some(kind) => {
                    inner
                        .by_type
                        .entry(kind.to_string())
                        .or_default()
                        .insert(id, tx);
                }
                None => {
                    inner.any.insert(id, tx);
                }
            }
        }
        Listener {
            id,
            kind: kind.map(str::to_string),
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Delivers `message` to every listener registered for its type and to
    /// every catch-all listener. Returns how many listeners received it.
    pub fn publish(&self, message: &SocketMessage) -> usize {
        let inner = self.inner.lock();
        let typed = inner.by_type.get(&message.kind).into_iter().flat_map(|m| m.values());
        typed
            .chain(inner.any.values())
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count()
    }

    /// Drops every sender so all listeners observe end-of-stream.
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        inner.completed = true;
        inner.by_type.clear();
        inner.any.clear();
    }

    pub fn listener_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.any.len() + inner.by_type.values().map(HashMap::len).sum::<usize>()
    }

    fn remove(&self, id: ListenerId, kind: Option<&str>) {
        let mut inner = self.inner.lock();
        match kind {
            Some(kind) => {
                if let Some(listeners) = inner.by_type.get_mut(kind) {
                    listeners.remove(&id);
                    if listeners.is_empty() {
                        inner.by_type.remove(kind);
                    }
                }
            }
            None => {
                inner.any.remove(&id);
            }
        }
    }
}

/// A live, unbounded stream of messages from a [`Hub`].
pub struct Listener {
    id: ListenerId,
    kind: Option<String>,
    rx: UnboundedReceiver<SocketMessage>,
    hub: Weak<Hub>,
}

impl Listener {
    /// Next message, or `None` once the connection has closed.
    pub async fn recv_message(&mut self) -> Option<SocketMessage> {
        self.rx.recv().await
    }

    /// Next payload, or `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await.map(|message| message.payload)
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok().map(|message| message.payload)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id, self.kind.as_deref());
        }
    }
}
