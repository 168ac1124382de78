use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::sleep;
use tungstenite::protocol::Message as WsMessage;

use super::{ServerOptions, SessionServer};
use crate::connection::{Connection, ConnectionState, MergeStrategy};
use crate::protocol::ConnectionResolver;
use crate::protocol::token::CLIENT_TOKEN_TYPE;
use crate::test_support::{drain_frames, spawn_fake_transport};
use crate::transport::message::{Channel, deserialize};
use crate::utils::error::SessionError;

const RSA_PRIVATE: &str = include_str!("../../tests/fixtures/rsa_private.pem");
const RSA_PUBLIC: &str = include_str!("../../tests/fixtures/rsa_public.pem");

fn server() -> Arc<SessionServer> {
    SessionServer::new(ServerOptions::new("secret")).unwrap()
}

fn attach(server: &Arc<SessionServer>, address: &str) -> (Arc<Connection>, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = unbounded_channel();
    let connection = server.attach(address, tx);
    spawn_fake_transport(&connection);
    (connection, rx)
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[test]
fn test_construction_requires_private_key() {
    assert!(matches!(
        SessionServer::new(ServerOptions::new("")),
        Err(SessionError::Configuration(_))
    ));
}

#[test]
fn test_asymmetric_construction_requires_public_key() {
    let options = ServerOptions::new(RSA_PRIVATE).with_algorithm("RS256");
    assert!(matches!(
        SessionServer::new(options),
        Err(SessionError::Configuration(_))
    ));

    let options = ServerOptions::new(RSA_PRIVATE)
        .with_algorithm("RS256")
        .with_public_key(RSA_PUBLIC);
    assert!(SessionServer::new(options).is_ok());
}

#[tokio::test]
async fn test_attach_registers_and_issues_token() {
    let server = server();
    let (conn, mut rx) = attach(&server, "1.2.3.4");
    assert_eq!(server.connection_count(), 1);
    assert!(server.connection(conn.id()).is_some());

    let mut frames = Vec::new();
    wait_for(|| {
        frames.extend(drain_frames(&mut rx));
        !frames.is_empty()
    })
    .await;
    let message = deserialize(Channel::Control, &frames[0]).unwrap();
    assert_eq!(message.kind, CLIENT_TOKEN_TYPE);
    let payload = server
        .tokens()
        .verify(message.payload.as_str().unwrap())
        .unwrap();
    assert_eq!(payload.client_id, conn.id());
    assert_eq!(payload.address, "1.2.3.4");
}

#[tokio::test]
async fn test_on_connection_hook_runs() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let options = ServerOptions::new("secret").with_on_connection(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let server = SessionServer::new(options).unwrap();
    let _a = attach(&server, "1.2.3.4");
    let _b = attach(&server, "1.2.3.4");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_send_data_to_unknown_topic_is_noop() {
    let server = server();
    assert!(server.send_data("nobody", json!({"price": 1})).is_none());

    let called = Arc::new(AtomicUsize::new(0));
    let flag = called.clone();
    server.send_data_with("nobody", json!(1), move |_| {
        flag.fetch_add(1, Ordering::SeqCst);
    });
    sleep(Duration::from_millis(10)).await;
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_data_is_deferred_and_reaches_subscribers() {
    let server = server();
    let (a, mut a_rx) = attach(&server, "1.2.3.4");
    let (b, mut b_rx) = attach(&server, "1.2.3.4");
    let (_c, mut c_rx) = attach(&server, "1.2.3.4");
    a.add_subscription("quotes", "tx1", MergeStrategy::Replace, None);
    b.add_subscription("quotes", "tx9", MergeStrategy::Append, None);

    // let token issuance settle, then discard it
    sleep(Duration::from_millis(10)).await;
    drain_frames(&mut a_rx);
    drain_frames(&mut b_rx);
    drain_frames(&mut c_rx);

    let first = server.send_data("quotes", json!({"price": 1})).unwrap();
    let second = server.send_data("quotes", json!({"price": 2})).unwrap();
    // nothing is delivered within the caller's turn
    assert!(drain_frames(&mut a_rx).is_empty());

    assert_eq!(first.await.unwrap(), 2);
    assert_eq!(second.await.unwrap(), 2);

    let expected = vec![
        r#"m:{"type":"quotes","payload":{"price":1}}"#.to_string(),
        r#"m:{"type":"quotes","payload":{"price":2}}"#.to_string(),
    ];
    assert_eq!(drain_frames(&mut a_rx), expected);
    assert_eq!(drain_frames(&mut b_rx), expected);
    assert!(drain_frames(&mut c_rx).is_empty());
}

#[tokio::test]
async fn test_send_data_with_reports_sends() {
    let server = server();
    let (a, _a_rx) = attach(&server, "1.2.3.4");
    a.add_subscription("quotes", "tx1", MergeStrategy::Replace, None);

    let sent = Arc::new(AtomicUsize::new(usize::MAX));
    let out = sent.clone();
    server.send_data_with("quotes", json!(1), move |n| {
        out.store(n, Ordering::SeqCst);
    });
    wait_for(|| sent.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_registry_tracks_refcount_transitions() {
    let server = server();
    let (a, _rx) = attach(&server, "1.2.3.4");

    a.add_subscription("quotes", "tx1", MergeStrategy::Replace, None);
    a.add_subscription("quotes", "tx2", MergeStrategy::Replace, None);
    assert_eq!(server.subscribers("quotes").len(), 1);

    a.remove_subscriptions("tx1");
    assert_eq!(server.subscribers("quotes").len(), 1);
    a.remove_subscriptions("tx2");
    assert!(server.subscribers("quotes").is_empty());
    assert!(server.send_data("quotes", json!(1)).is_none());
}

#[tokio::test]
async fn test_transfer_requires_matching_address() {
    let server = server();

    // A holds tx1/quotes, then its socket goes away
    let (a, _a_rx) = attach(&server, "1.2.3.4");
    a.add_subscription("quotes", "tx1", MergeStrategy::Replace, None);
    let token = server.tokens().sign(a.id(), "1.2.3.4").unwrap();
    a.close();
    a.closed().await;

    // B reconnects from the same address and adopts A's transactions
    let (b, _b_rx) = attach(&server, "1.2.3.4");
    assert!(b.receive(&format!(
        r#"c:{{"type":"client-change","payload":"{token}"}}"#
    )));
    wait_for(|| b.subscription_count("quotes") == 1).await;
    assert_eq!(b.transaction("tx1"), a.transaction("tx1"));
    assert_eq!(b.transaction_ids(), vec!["tx1".to_string()]);
    assert_eq!(b.state(), ConnectionState::Open);

    // C presents the same token from elsewhere and is thrown out
    let (c, _c_rx) = attach(&server, "5.6.7.8");
    assert!(c.receive(&format!(
        r#"c:{{"type":"client-change","payload":"{token}"}}"#
    )));
    c.closed().await;
    assert!(c.get_all_subscriptions().is_empty());
    assert_eq!(b.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_address_mismatch_closes_referenced_live_connection() {
    let server = server();
    let (victim, _rx) = attach(&server, "1.2.3.4");
    let token = server.tokens().sign(victim.id(), "1.2.3.4").unwrap();

    let result = server.get_connection(&token, "5.6.7.8");
    assert!(matches!(result, Err(SessionError::AddressMismatch { .. })));
    victim.closed().await;
}

#[tokio::test]
async fn test_get_connection_failures() {
    let server = server();
    let (a, _rx) = attach(&server, "1.2.3.4");

    let other = SessionServer::new(ServerOptions::new("other-secret")).unwrap();
    let forged = other.tokens().sign(a.id(), "1.2.3.4").unwrap();
    assert!(matches!(
        server.get_connection(&forged, "1.2.3.4"),
        Err(SessionError::InvalidToken(_))
    ));

    let unknown = server.tokens().sign("feedface", "1.2.3.4").unwrap();
    assert!(matches!(
        server.get_connection(&unknown, "1.2.3.4"),
        Err(SessionError::UnknownConnection(_))
    ));

    let valid = server.tokens().sign(a.id(), "1.2.3.4").unwrap();
    assert_eq!(server.get_connection(&valid, "1.2.3.4").unwrap().id(), a.id());
    assert_eq!(a.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_closed_connection_leaves_topics_but_stays_resolvable_for_grace_period() {
    let server = SessionServer::new(
        ServerOptions::new("secret").with_dispose_meta_after(Duration::from_secs(600)),
    )
    .unwrap();
    let (a, _a_rx) = attach(&server, "1.2.3.4");
    let (b, _b_rx) = attach(&server, "1.2.3.4");
    a.add_subscription("quotes", "tx1", MergeStrategy::Replace, None);
    b.add_subscription("quotes", "tx1", MergeStrategy::Replace, None);
    let token = server.tokens().sign(a.id(), "1.2.3.4").unwrap();

    a.close();
    a.closed().await;
    sleep(Duration::from_millis(1)).await;

    // out of the broadcast index at once
    let subscribers = server.subscribers("quotes");
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0].id(), b.id());
    assert_eq!(server.send_data("quotes", json!(1)).unwrap().await.unwrap(), 1);

    // still resolvable, with its book intact, until the grace period ends
    sleep(Duration::from_secs(599)).await;
    let resolved = server.get_connection(&token, "1.2.3.4").unwrap();
    assert_eq!(resolved.get_all_subscriptions(), vec!["quotes".to_string()]);

    sleep(Duration::from_secs(2)).await;
    assert!(server.connection(a.id()).is_none());
    assert!(matches!(
        server.get_connection(&token, "1.2.3.4"),
        Err(SessionError::UnknownConnection(_))
    ));
    assert_eq!(server.connection_count(), 1);
}
