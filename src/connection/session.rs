//! Session state for one live socket.
//!
//! A `Connection` demultiplexes inbound frames into a data hub and a control
//! hub, owns the transaction/subscription book, and reports 0→1 and 1→0
//! refcount transitions to its [`SubscriptionTracker`].
//!
//! Lifecycle: `Open` → `Closing` (after [`Connection::close`]) → `Closed`
//! (after the transport reports the socket gone). A connection never reopens;
//! a reconnecting client gets a new `Connection` that pulls state from the old
//! one with [`Connection::add_subscriptions_from`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tungstenite::protocol::Message as WsMessage;

use super::hub::{Hub, Listener};
use crate::transport::message::{self, Channel};

/// Receives refcount transitions from every connection it tracks.
pub trait SubscriptionTracker: Send + Sync {
    fn register_subscription(&self, connection: &Arc<Connection>, topic: &str);
    fn unregister_subscription(&self, connection: &Arc<Connection>, topic: &str);
}

/// How a client folds newly pushed data into what it already holds.
/// Carried through unchanged; never interpreted here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Replace,
    Upsert,
    Append,
    Prepend,
}

/// One topic inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSubscription {
    #[serde(rename = "type")]
    pub topic: String,
    #[serde(rename = "mergeStrategy", default)]
    pub merge_strategy: MergeStrategy,
    #[serde(rename = "upsertKey", default, skip_serializing_if = "Option::is_none")]
    pub upsert_key: Option<String>,
}

/// The header a client keeps so it can resubscribe after reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    pub subscriptions: Vec<TransactionSubscription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// `counts[topic]` always equals the number of transactions listing `topic`.
#[derive(Debug, Default)]
struct SubscriptionBook {
    counts: HashMap<String, usize>,
    transactions: HashMap<String, Vec<TransactionSubscription>>,
}

pub struct Connection {
    id: String,
    remote_address: String,
    state: Mutex<ConnectionState>,
    outbound: Mutex<Option<UnboundedSender<WsMessage>>>,
    book: Mutex<SubscriptionBook>,
    data: Arc<Hub>,
    control: Arc<Hub>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    tracker: Weak<dyn SubscriptionTracker>,
}

pub fn generate_random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Connection {
    pub fn new(
        remote_address: impl Into<String>,
        outbound: UnboundedSender<WsMessage>,
        tracker: Weak<dyn SubscriptionTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: generate_random_id(),
            remote_address: remote_address.into(),
            state: Mutex::new(ConnectionState::Open),
            outbound: Mutex::new(Some(outbound)),
            book: Mutex::new(SubscriptionBook::default()),
            data: Hub::new(),
            control: Hub::new(),
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
            tracker,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn generate_transaction_id(&self) -> String {
        generate_random_id()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn send_data(&self, kind: &str, payload: Value) -> bool {
        self.send(Channel::Data, kind, &payload)
    }

    pub fn send_control(&self, kind: &str, payload: Value) -> bool {
        self.send(Channel::Control, kind, &payload)
    }

    /// Queues a pre-framed text frame. Used by broadcast so a payload is
    /// serialized once for all subscribers.
    pub fn send_frame(&self, frame: &str) -> bool {
        if self.state() != ConnectionState::Open {
            return false;
        }
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(WsMessage::text(frame.to_string())).is_ok(),
            None => false,
        }
    }

    fn send(&self, channel: Channel, kind: &str, payload: &Value) -> bool {
        self.send_frame(&message::serialize(channel, kind, payload))
    }

    pub fn listen_data(&self, kind: &str) -> Listener {
        self.data.listen(kind)
    }

    pub fn listen_control(&self, kind: &str) -> Listener {
        self.control.listen(kind)
    }

    pub fn listen_all_data(&self) -> Listener {
        self.data.listen_all()
    }

    pub fn listen_all_control(&self) -> Listener {
        self.control.listen_all()
    }

    /// Routes one inbound text frame to the matching hub. Frames that are not
    /// well-formed envelopes are dropped. Returns whether the frame was routed.
    pub fn receive(&self, text: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        match message::classify(text) {
            Some((Channel::Data, message)) => {
                self.data.publish(&message);
                true
            }
            Some((Channel::Control, message)) => {
                self.control.publish(&message);
                true
            }
            None => {
                debug!(connection_id = %self.id, "dropping malformed frame");
                false
            }
        }
    }

    /// Adds `topic` to `transaction_id` and returns the topic's refcount.
    /// Re-adding a topic the transaction already holds changes nothing.
    pub fn add_subscription(
        self: &Arc<Self>,
        topic: &str,
        transaction_id: &str,
        merge_strategy: MergeStrategy,
        upsert_key: Option<String>,
    ) -> usize {
        let mut book = self.book.lock();
        let current = book.counts.get(topic).copied().unwrap_or(0);

        let transaction = book
            .transactions
            .entry(transaction_id.to_string())
            .or_default();
        if transaction.iter().any(|sub| sub.topic == topic) {
            return current;
        }
        transaction.push(TransactionSubscription {
            topic: topic.to_string(),
            merge_strategy,
            upsert_key,
        });

        if current == 0 {
            if let Some(tracker) = self.tracker.upgrade() {
                tracker.register_subscription(self, topic);
            }
        }
        book.counts.insert(topic.to_string(), current + 1);
        current + 1
    }

    /// Drops a whole transaction. Returns `false` if it was unknown.
    pub fn remove_subscriptions(self: &Arc<Self>, transaction_id: &str) -> bool {
        let mut book = self.book.lock();
        let Some(subscriptions) = book.transactions.remove(transaction_id) else {
            return false;
        };
        for sub in subscriptions {
            let remaining = match book.counts.get_mut(&sub.topic) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => continue,
            };
            if remaining == 0 {
                book.counts.remove(&sub.topic);
                if let Some(tracker) = self.tracker.upgrade() {
                    tracker.unregister_subscription(self, &sub.topic);
                }
            }
        }
        true
    }

    pub fn transaction(&self, transaction_id: &str) -> Option<Transaction> {
        let book = self.book.lock();
        book.transactions
            .get(transaction_id)
            .map(|subscriptions| Transaction {
                transaction_id: transaction_id.to_string(),
                subscriptions: subscriptions.clone(),
            })
    }

    /// JSON header describing a transaction, for client-side bookkeeping.
    pub fn get_subscription_header(&self, transaction_id: &str) -> Option<String> {
        self.transaction(transaction_id)
            .and_then(|transaction| serde_json::to_string(&transaction).ok())
    }

    pub fn get_subscriptions(&self, transaction_id: &str) -> Option<Vec<String>> {
        let book = self.book.lock();
        book.transactions
            .get(transaction_id)
            .map(|subs| subs.iter().map(|sub| sub.topic.clone()).collect())
    }

    /// Every topic held at a refcount above zero, across all transactions.
    pub fn get_all_subscriptions(&self) -> Vec<String> {
        let book = self.book.lock();
        book.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        self.book.lock().counts.get(topic).copied().unwrap_or(0)
    }

    pub fn transaction_ids(&self) -> Vec<String> {
        self.book.lock().transactions.keys().cloned().collect()
    }

    /// Copies every transaction of `other` onto this connection, recomputing
    /// refcounts and registry registration for this side.
    pub fn add_subscriptions_from(self: &Arc<Self>, other: &Connection) {
        if std::ptr::eq(self.as_ref(), other) {
            return;
        }
        let transactions: Vec<(String, Vec<TransactionSubscription>)> = other
            .book
            .lock()
            .transactions
            .iter()
            .map(|(id, subs)| (id.clone(), subs.clone()))
            .collect();

        for (transaction_id, subscriptions) in transactions {
            for sub in subscriptions {
                self.add_subscription(
                    &sub.topic,
                    &transaction_id,
                    sub.merge_strategy,
                    sub.upsert_key,
                );
            }
        }
        info!(connection_id = %self.id, from = %other.id, "transferred subscriptions");
    }

    /// Starts transport teardown. Safe to call repeatedly.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Open {
                return;
            }
            *state = ConnectionState::Closing;
        }
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(WsMessage::Close(None));
        }
        self.shutdown.cancel();
        debug!(connection_id = %self.id, "closing connection");
    }

    /// Called by the transport once the socket is gone. Completes every
    /// listener and fires the close event exactly once.
    pub fn mark_closed(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.outbound.lock().take();
        self.shutdown.cancel();
        self.data.complete();
        self.control.complete();
        self.closed.cancel();
        info!(connection_id = %self.id, address = %self.remote_address, "connection closed");
    }

    /// Resolves once `close` has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    /// Resolves once the transport has closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("state", &self.state())
            .finish()
    }
}
