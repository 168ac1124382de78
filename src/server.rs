//! Session server
//!
//! Builds a [`Connection`] for every accepted socket, wires the control
//! protocol onto it and keeps it registered. The server is the
//! [`SubscriptionTracker`] for every connection it creates and the
//! [`ConnectionResolver`] behind transfer requests.
//!
//! When a connection closes it leaves the topic index at once, so broadcasts
//! stop targeting the dead socket. It stays resolvable by id for
//! `dispose_meta_after` so a reconnecting client can still transfer from it,
//! and is then forgotten.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::Request;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::SubscriptionRegistry;
use crate::config::SessionSettings;
use crate::connection::{Connection, SubscriptionTracker};
use crate::protocol::{self, ConnectionResolver, ProtocolOptions};
use crate::token::TokenCodec;
use crate::transport::message::{self, Channel};
use crate::utils::error::{Result, SessionError};

pub const DEFAULT_ALGORITHM: &str = "HS256";
pub const DEFAULT_DISPOSE_META_AFTER: Duration = Duration::from_secs(30 * 60);

/// Extra admission check run on every handshake request.
pub type RequestFilter = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Called with every newly registered connection.
pub type ConnectionHook = Arc<dyn Fn(&Arc<SessionServer>, &Arc<Connection>) + Send + Sync>;

#[derive(Clone)]
pub struct ServerOptions {
    pub private_key: String,
    pub public_key: Option<String>,
    pub algorithm: String,
    pub request_filter: Option<RequestFilter>,
    pub dispose_meta_after: Duration,
    pub on_connection: Option<ConnectionHook>,
}

impl ServerOptions {
    pub fn new(private_key: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            public_key: None,
            algorithm: DEFAULT_ALGORITHM.to_string(),
            request_filter: None,
            dispose_meta_after: DEFAULT_DISPOSE_META_AFTER,
            on_connection: None,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            private_key: settings.private_key.clone().unwrap_or_default(),
            public_key: settings.public_key.clone(),
            algorithm: settings.algorithm.clone(),
            request_filter: None,
            dispose_meta_after: Duration::from_secs(settings.dispose_meta_after_secs),
            on_connection: None,
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn with_request_filter(
        mut self,
        filter: impl Fn(&Request) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.request_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_dispose_meta_after(mut self, after: Duration) -> Self {
        self.dispose_meta_after = after;
        self
    }

    pub fn with_on_connection(
        mut self,
        hook: impl Fn(&Arc<SessionServer>, &Arc<Connection>) + Send + Sync + 'static,
    ) -> Self {
        self.on_connection = Some(Arc::new(hook));
        self
    }
}

pub struct SessionServer {
    registry: SubscriptionRegistry,
    tokens: Arc<TokenCodec>,
    request_filter: Option<RequestFilter>,
    on_connection: Option<ConnectionHook>,
    dispose_meta_after: Duration,
}

impl SessionServer {
    /// Fails when the keys don't suit the configured algorithm.
    pub fn new(options: ServerOptions) -> Result<Arc<Self>> {
        let tokens = TokenCodec::new(
            &options.algorithm,
            &options.private_key,
            options.public_key.as_deref(),
        )?;
        Ok(Arc::new(Self {
            registry: SubscriptionRegistry::new(),
            tokens: Arc::new(tokens),
            request_filter: options.request_filter,
            on_connection: options.on_connection,
            dispose_meta_after: options.dispose_meta_after,
        }))
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub fn request_filter(&self) -> Option<RequestFilter> {
        self.request_filter.clone()
    }

    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.registry.connection(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn subscribers(&self, topic: &str) -> Vec<Arc<Connection>> {
        self.registry.subscribers(topic)
    }

    /// Creates a connection for an accepted socket, wires the control
    /// protocol onto it and registers it.
    pub fn attach(
        self: &Arc<Self>,
        remote_address: impl Into<String>,
        outbound: UnboundedSender<WsMessage>,
    ) -> Arc<Connection> {
        let tracker: Weak<dyn SubscriptionTracker> = Arc::downgrade(self) as Weak<dyn SubscriptionTracker>;
        let connection = Connection::new(remote_address, outbound, tracker);

        protocol::apply_protocol(ProtocolOptions {
            connection: connection.clone(),
            tokens: self.tokens.clone(),
            resolver: self.clone(),
        });
        self.registry.register_connection(connection.clone());
        self.spawn_disposal(&connection);

        info!(
            connection_id = %connection.id(),
            address = %connection.remote_address(),
            "connection registered"
        );

        if let Some(hook) = &self.on_connection {
            hook(self, &connection);
        }
        connection
    }

    fn spawn_disposal(self: &Arc<Self>, connection: &Arc<Connection>) {
        let server = Arc::downgrade(self);
        let connection = connection.clone();
        let grace = self.dispose_meta_after;
        tokio::spawn(async move {
            connection.closed().await;
            match server.upgrade() {
                Some(server) => server.registry.detach_connection(connection.id()),
                None => return,
            }
            tokio::time::sleep(grace).await;
            if let Some(server) = server.upgrade() {
                server.registry.cleanup_connection(connection.id());
            }
        });
    }

    /// Broadcasts `payload` to every connection subscribed to `topic`.
    ///
    /// Returns `None` straight away when nobody is subscribed. Otherwise the
    /// sends happen on a later scheduling turn and the handle resolves to the
    /// number of connections the frame was queued for.
    pub fn send_data(self: &Arc<Self>, topic: &str, payload: Value) -> Option<JoinHandle<usize>> {
        if !self.registry.has_subscribers(topic) {
            return None;
        }
        let frame = message::serialize(Channel::Data, topic, &payload);
        let server = self.clone();
        let topic = topic.to_string();
        Some(tokio::spawn(async move {
            let subscribers = server.registry.subscribers(&topic);
            let sent = subscribers
                .iter()
                .filter(|connection| connection.send_frame(&frame))
                .count();
            debug!(topic = %topic, sent, "broadcast");
            sent
        }))
    }

    /// Callback form of [`send_data`](Self::send_data). The callback runs once
    /// all sends have been issued; it does not run when nobody is subscribed.
    pub fn send_data_with(
        self: &Arc<Self>,
        topic: &str,
        payload: Value,
        callback: impl FnOnce(usize) + Send + 'static,
    ) {
        if let Some(handle) = self.send_data(topic, payload) {
            tokio::spawn(async move {
                match handle.await {
                    Ok(sent) => callback(sent),
                    Err(e) => warn!(error = %e, "broadcast task failed"),
                }
            });
        }
    }
}

impl SubscriptionTracker for SessionServer {
    fn register_subscription(&self, connection: &Arc<Connection>, topic: &str) {
        self.registry.subscribe(topic, connection);
    }

    fn unregister_subscription(&self, connection: &Arc<Connection>, topic: &str) {
        self.registry.unsubscribe(topic, connection.id());
    }
}

impl ConnectionResolver for SessionServer {
    /// A token presented from an address other than the one it was issued to
    /// is treated as stolen: the connection it names is closed and the lookup
    /// fails.
    fn get_connection(&self, token: &str, address: &str) -> Result<Arc<Connection>> {
        let payload = self.tokens.verify(token)?;
        let connection = self.registry.connection(&payload.client_id);
        if payload.address != address {
            if let Some(connection) = connection {
                warn!(
                    connection_id = %connection.id(),
                    expected = %payload.address,
                    actual = %address,
                    "token presented from a different address, closing its connection"
                );
                connection.close();
            }
            return Err(SessionError::AddressMismatch {
                expected: payload.address,
                actual: address.to_string(),
            });
        }
        connection.ok_or(SessionError::UnknownConnection(payload.client_id))
    }
}

#[cfg(test)]
mod tests;
