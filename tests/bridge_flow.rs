use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;

use chatrelay::{
    bridge::{BridgeErrorKind, BridgeRouter},
    broker::{BrokerError, BrokerPort, PulledMessage, publish_failure},
    chat::{ChatClientError, ChatClientPort},
    config::RouteConfig,
    ingress::EventIngress,
    message::{InboundEvent, OutboundRecord},
    publish::Publisher,
};

#[derive(Default)]
struct RecordingBroker {
    fail_publishes: bool,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBroker {
    fn failing() -> Self {
        Self {
            fail_publishes: true,
            ..Self::default()
        }
    }

    fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().expect("lock").clone()
    }
}

#[async_trait]
impl BrokerPort for RecordingBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError> {
        if self.fail_publishes {
            return Err(publish_failure("broker unreachable"));
        }
        self.published
            .lock()
            .expect("lock")
            .push((subject.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn fetch(
        &self,
        _max_messages: usize,
        _wait: Duration,
    ) -> Result<Vec<PulledMessage>, BrokerError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingChatClient {
    registered: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatClientPort for RecordingChatClient {
    async fn register_listener(
        &self,
        conversation: &str,
        _ingress: EventIngress,
    ) -> Result<(), ChatClientError> {
        self.registered
            .lock()
            .expect("lock")
            .push(conversation.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), ChatClientError> {
        Ok(())
    }
}

fn routes() -> Vec<RouteConfig> {
    vec![RouteConfig {
        chat: "Friends".to_string(),
        subject: "topic.x".to_string(),
    }]
}

fn friend_event(id: &str) -> InboundEvent {
    InboundEvent {
        kind: "text".to_string(),
        attr: "friend".to_string(),
        id: id.to_string(),
        content: "hello".to_string(),
        sender: Some("u1".to_string()),
        sender_remark: Some("Bob".to_string()),
        tickle_list: Vec::new(),
        time: None,
        info: json!({"chat": "Friends"}),
    }
}

fn event_with_attr(attr: &str) -> InboundEvent {
    InboundEvent {
        attr: attr.to_string(),
        ..friend_event("m1")
    }
}

async fn drive_bridge(
    broker: Arc<RecordingBroker>,
    dedup_capacity: usize,
    events: Vec<(&str, InboundEvent)>,
) {
    let broker_port: Arc<dyn BrokerPort> = broker;
    let bridge = BridgeRouter::new(&routes(), Publisher::new(broker_port), dedup_capacity)
        .expect("routing table should build");

    let (event_tx, event_rx) = mpsc::channel(16);
    let ingress = EventIngress::new(event_tx);
    let bridge_task = tokio::spawn(bridge.run(event_rx));

    for (chat, event) in events {
        ingress
            .send(chat.to_string(), event)
            .await
            .expect("ingress should accept events");
    }
    ingress
        .send_shutdown()
        .await
        .expect("sentinel should be accepted");
    bridge_task.await.expect("bridge task should join");
}

#[tokio::test]
async fn friend_event_is_published_with_stable_schema() {
    let broker = Arc::new(RecordingBroker::default());
    drive_bridge(Arc::clone(&broker), 8, vec![("Friends", friend_event("m1"))]).await;

    let published = broker.published();
    assert_eq!(published.len(), 1);
    let (subject, payload) = &published[0];
    assert_eq!(subject, "topic.x");

    let value: serde_json::Value =
        serde_json::from_slice(payload).expect("payload should be JSON");
    assert_eq!(
        value,
        json!({
            "type": "text",
            "attr": "friend",
            "id": "m1",
            "content": "hello",
            "sender": "u1",
            "sender_remark": "Bob",
            "info": {"chat": "Friends"},
        })
    );

    // Round-trip reproduces the same field values.
    let record: OutboundRecord =
        serde_json::from_slice(payload).expect("payload should deserialize");
    assert_eq!(record.content, "hello");
    assert_eq!(record.sender.as_deref(), Some("u1"));
    assert_eq!(record.sender_remark.as_deref(), Some("Bob"));
    assert_eq!(
        serde_json::to_value(&record).expect("record should serialize"),
        value
    );
}

#[tokio::test]
async fn non_friend_variants_are_dropped_at_the_publish_boundary() {
    let broker = Arc::new(RecordingBroker::default());
    drive_bridge(
        Arc::clone(&broker),
        8,
        vec![
            ("Friends", event_with_attr("system")),
            ("Friends", event_with_attr("self")),
            ("Friends", event_with_attr("tickle")),
            ("Friends", event_with_attr("time")),
            ("Friends", event_with_attr("voice_call")),
        ],
    )
    .await;

    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn duplicate_message_ids_are_published_once() {
    let broker = Arc::new(RecordingBroker::default());
    drive_bridge(
        Arc::clone(&broker),
        8,
        vec![
            ("Friends", friend_event("m1")),
            ("Friends", friend_event("m1")),
            ("Friends", friend_event("m2")),
        ],
    )
    .await;

    let subjects: Vec<String> = broker
        .published()
        .iter()
        .map(|(subject, _)| subject.clone())
        .collect();
    assert_eq!(subjects.len(), 2);
}

#[tokio::test]
async fn dedup_disabled_forwards_every_event() {
    let broker = Arc::new(RecordingBroker::default());
    drive_bridge(
        Arc::clone(&broker),
        0,
        vec![
            ("Friends", friend_event("m1")),
            ("Friends", friend_event("m1")),
        ],
    )
    .await;

    assert_eq!(broker.published().len(), 2);
}

#[tokio::test]
async fn events_for_unrouted_chats_are_ignored() {
    let broker = Arc::new(RecordingBroker::default());
    drive_bridge(Arc::clone(&broker), 8, vec![("Strangers", friend_event("m1"))]).await;

    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn publish_failures_do_not_stop_the_bridge() {
    let broker = Arc::new(RecordingBroker::failing());
    // Two events plus the sentinel: the loop must survive both faults
    // and still terminate cleanly on the sentinel.
    drive_bridge(
        Arc::clone(&broker),
        8,
        vec![
            ("Friends", friend_event("m1")),
            ("Friends", friend_event("m2")),
        ],
    )
    .await;

    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn duplicate_route_conversations_are_rejected_at_construction() {
    let broker: Arc<dyn BrokerPort> = Arc::new(RecordingBroker::default());
    let duplicated = vec![
        RouteConfig {
            chat: "Friends".to_string(),
            subject: "topic.x".to_string(),
        },
        RouteConfig {
            chat: "Friends".to_string(),
            subject: "topic.y".to_string(),
        },
    ];

    let err = BridgeRouter::new(&duplicated, Publisher::new(broker), 8)
        .expect_err("duplicate conversations must be rejected");
    assert_eq!(err.kind, BridgeErrorKind::DuplicateRoute);
}

#[tokio::test]
async fn routes_are_registered_in_configuration_order() {
    let broker: Arc<dyn BrokerPort> = Arc::new(RecordingBroker::default());
    let ordered = vec![
        RouteConfig {
            chat: "Friends".to_string(),
            subject: "topic.x".to_string(),
        },
        RouteConfig {
            chat: "Work".to_string(),
            subject: "topic.y".to_string(),
        },
    ];
    let bridge =
        BridgeRouter::new(&ordered, Publisher::new(broker), 8).expect("routes should build");

    let chat_client = RecordingChatClient::default();
    let (event_tx, _event_rx) = mpsc::channel(4);
    bridge
        .register_routes(&chat_client, &EventIngress::new(event_tx))
        .await
        .expect("registration should succeed");

    let registered = chat_client.registered.lock().expect("lock").clone();
    assert_eq!(registered, vec!["Friends".to_string(), "Work".to_string()]);
}
