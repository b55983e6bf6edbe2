//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Keyed publish/subscribe round-trip with delivery metadata
//! - Same key lands on the same partition
//! - Unacknowledged deliveries are redelivered to the next subscriber
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take 15-60 seconds each:
//! ```bash
//! cargo test -p book-sync-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use book_sync_core::event_bus::{EventBus, OutboundMessage};
use book_sync_redpanda::RedpandaEventBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn message(key: &str, body: &str) -> OutboundMessage {
    OutboundMessage::new(key, body.as_bytes().to_vec())
}

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn bus(brokers: &str, group: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus")
}

/// Publish a warmup message until the topic exists and metadata propagated.
async fn ensure_topic_exists(event_bus: &RedpandaEventBus, topic: &str) {
    for attempt in 1..=60 {
        if event_bus.publish(topic, &message("warmup", "warmup")).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

#[tokio::test]
#[ignore]
async fn keyed_round_trip_with_metadata() {
    let (_kafka, brokers) = start_kafka().await;
    let event_bus = bus(&brokers, "round-trip-group");
    ensure_topic_exists(&event_bus, "book-notifications").await;

    let first = event_bus
        .publish("book-notifications", &message("978-1", r#"{"stock":3}"#))
        .await
        .expect("Failed to publish first");
    let second = event_bus
        .publish("book-notifications", &message("978-1", r#"{"stock":7}"#))
        .await
        .expect("Failed to publish second");
    assert_eq!(first.partition, second.partition);
    assert!(second.offset > first.offset);

    let mut stream = event_bus
        .subscribe(&["book-notifications"])
        .await
        .expect("Failed to subscribe");

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while received.len() < 2 {
            let delivery = stream
                .next()
                .await
                .expect("stream ended")
                .expect("receive failed");
            let inbound = delivery.message().clone();
            delivery.ack();
            if inbound.key.as_deref() == Some("978-1") {
                received.push(inbound);
            }
        }
    })
    .await
    .expect("Timeout waiting for messages");

    assert_eq!(received[0].payload.as_deref(), Some(br#"{"stock":3}"#.as_slice()));
    assert_eq!(received[1].payload.as_deref(), Some(br#"{"stock":7}"#.as_slice()));
    assert_eq!(received[0].metadata, first);
    assert_eq!(received[1].metadata, second);
}

#[tokio::test]
#[ignore]
async fn unacknowledged_delivery_is_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let event_bus = bus(&brokers, "redelivery-group");
    ensure_topic_exists(&event_bus, "book-stock-updates").await;

    let published = event_bus
        .publish("book-stock-updates", &message("978-2", "payload"))
        .await
        .expect("Failed to publish");

    let first_seen = {
        let mut stream = event_bus
            .subscribe(&["book-stock-updates"])
            .await
            .expect("Failed to subscribe");
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let delivery = stream
                    .next()
                    .await
                    .expect("stream ended")
                    .expect("receive failed");
                if delivery.message().key.as_deref() == Some("978-2") {
                    // Dropped without ack.
                    break delivery.message().metadata.clone();
                }
                delivery.ack();
            }
        })
        .await
        .expect("Timeout waiting for first delivery")
    };
    assert_eq!(first_seen, published);

    // Let the dropped consumer leave the group.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let mut stream = event_bus
        .subscribe(&["book-stock-updates"])
        .await
        .expect("Failed to resubscribe");
    let redelivered = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let delivery = stream
                .next()
                .await
                .expect("stream ended")
                .expect("receive failed");
            let metadata = delivery.message().metadata.clone();
            let key = delivery.message().key.clone();
            delivery.ack();
            if key.as_deref() == Some("978-2") {
                break metadata;
            }
        }
    })
    .await
    .expect("Timeout waiting for redelivery");

    assert_eq!(redelivered, published);
}
