use std::sync::Arc;

use super::SubscriptionRegistry;
use super::topic::Topic;
use crate::test_support::{RecordingTracker, tracked_connection};

#[test]
fn test_topic_new() {
    let topic = Topic::new("test_topic");
    assert_eq!(topic.name, "test_topic");
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let tracker = Arc::new(RecordingTracker::default());
    let (conn, _rx) = tracked_connection(&tracker, "1.2.3.4");
    let mut topic = Topic::new("test_topic");

    topic.subscribe(conn.clone());
    topic.subscribe(conn.clone());
    assert_eq!(topic.subscribers.len(), 1);
    assert!(topic.subscribers.contains_key(conn.id()));

    assert!(topic.unsubscribe(conn.id()));
    assert!(!topic.unsubscribe(conn.id()));
    assert!(topic.is_empty());
}

#[test]
fn test_registry_register_and_cleanup_connection() {
    let registry = SubscriptionRegistry::new();
    let tracker = Arc::new(RecordingTracker::default());
    let (conn, _rx) = tracked_connection(&tracker, "1.2.3.4");

    registry.register_connection(conn.clone());
    assert_eq!(registry.connection_count(), 1);
    assert!(registry.connection(conn.id()).is_some());

    registry.subscribe("quotes", &conn);
    let removed = registry.cleanup_connection(conn.id()).unwrap();
    assert_eq!(removed.id(), conn.id());
    assert_eq!(registry.connection_count(), 0);
    assert!(!registry.has_subscribers("quotes"));
}

#[test]
fn test_registry_subscribe_and_unsubscribe() {
    let registry = SubscriptionRegistry::new();
    let tracker = Arc::new(RecordingTracker::default());
    let (a, _a_rx) = tracked_connection(&tracker, "1.2.3.4");
    let (b, _b_rx) = tracked_connection(&tracker, "1.2.3.4");

    registry.subscribe("quotes", &a);
    registry.subscribe("quotes", &b);
    assert_eq!(registry.subscribers("quotes").len(), 2);

    registry.unsubscribe("quotes", a.id());
    let remaining = registry.subscribers("quotes");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), b.id());

    // last subscriber leaving drops the topic
    registry.unsubscribe("quotes", b.id());
    assert!(!registry.has_subscribers("quotes"));
    assert!(registry.subscribers("quotes").is_empty());

    // unknown topic is a no-op
    registry.unsubscribe("missing", a.id());
}

#[test]
fn test_closed_connection_is_never_indexed() {
    let registry = SubscriptionRegistry::new();
    let tracker = Arc::new(RecordingTracker::default());
    let (conn, _rx) = tracked_connection(&tracker, "1.2.3.4");
    conn.mark_closed();

    registry.subscribe("quotes", &conn);
    assert!(!registry.has_subscribers("quotes"));
}

#[test]
fn test_subscribe_racing_close_leaves_nothing_indexed() {
    for _ in 0..50 {
        let registry = Arc::new(SubscriptionRegistry::new());
        let tracker = Arc::new(RecordingTracker::default());
        let (conn, _rx) = tracked_connection(&tracker, "1.2.3.4");
        registry.register_connection(conn.clone());

        let subscriber = {
            let registry = registry.clone();
            let conn = conn.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    registry.subscribe(&format!("topic-{}", i % 7), &conn);
                }
            })
        };
        conn.mark_closed();
        registry.detach_connection(conn.id());
        subscriber.join().unwrap();

        for i in 0..7 {
            assert!(!registry.has_subscribers(&format!("topic-{i}")));
        }
        assert!(registry.connection(conn.id()).is_some());
    }
}

#[test]
fn test_detach_keeps_connection_resolvable() {
    let registry = SubscriptionRegistry::new();
    let tracker = Arc::new(RecordingTracker::default());
    let (a, _a_rx) = tracked_connection(&tracker, "1.2.3.4");
    let (b, _b_rx) = tracked_connection(&tracker, "1.2.3.4");
    registry.register_connection(a.clone());
    registry.register_connection(b.clone());
    registry.subscribe("quotes", &a);
    registry.subscribe("news", &a);
    registry.subscribe("quotes", &b);

    registry.detach_connection(a.id());

    assert!(registry.connection(a.id()).is_some());
    assert!(!registry.has_subscribers("news"));
    let quotes = registry.subscribers("quotes");
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].id(), b.id());
}

#[test]
fn test_cleanup_unknown_connection() {
    let registry = SubscriptionRegistry::new();
    assert!(registry.cleanup_connection("nobody").is_none());
}
