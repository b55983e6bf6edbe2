//! Event bus abstraction for keyed notification channels.
//!
//! This module provides the [`EventBus`] trait for publishing messages to named
//! channels (topics) and consuming them through consumer-group subscriptions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Producer     │
//! └────────┬────────┘
//!          │ publish(topic, key = isbn)
//!          ▼
//! ┌─────────────────┐
//! │    Event Bus    │◄─── Same key ⇒ same partition ⇒ ordered
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     │         │
//!     ▼         ▼
//! ┌───────┐ ┌───────┐
//! │Worker1│ │Worker2│  (one consumer group, partitions split between them)
//! └───────┘ └───────┘
//! ```
//!
//! # Key Principles
//!
//! - **Keyed publish**: Messages with the same key land on the same partition
//! - **At-least-once delivery**: Messages may be delivered multiple times
//! - **Commit after acknowledgement**: A [`Delivery`] must be acknowledged
//!   with [`Delivery::ack`] before its offset is committed
//! - **One in flight**: A subscription hands out its next delivery only after
//!   the current one was acknowledged
//!
//! # Unacknowledged Deliveries
//!
//! Dropping a [`Delivery`] without acknowledging it ends the subscription and
//! leaves the offset uncommitted, so the message is redelivered to the next
//! subscriber of the consumer group.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`book-sync-testing`) - For testing
//! - `RedpandaEventBus` (`book-sync-redpanda`) - For production (Kafka-compatible)
//!
//! # Example
//!
//! ```rust,ignore
//! use book_sync_core::event_bus::{EventBus, OutboundMessage};
//! use futures::StreamExt;
//!
//! async fn example(event_bus: impl EventBus) {
//!     let message = OutboundMessage::new("978-1", br#"{"isbn":"978-1"}"#.to_vec());
//!     event_bus.publish("book-notifications", &message).await?;
//!
//!     let mut stream = event_bus.subscribe(&["book-notifications"]).await?;
//!     while let Some(Ok(delivery)) = stream.next().await {
//!         println!("Received at {}", delivery.message().metadata);
//!         delivery.ack();
//!     }
//! }
//! ```

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message about to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Partitioning key (the book's ISBN)
    pub key: String,
    /// Encoded payload
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// Encode `value` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if `value` cannot be serialized.
    pub fn json<T: serde::Serialize>(
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(key, serde_json::to_vec(value)?))
    }
}

/// Where a message was written or read.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryMetadata {
    /// Topic name
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl fmt::Display for DeliveryMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A message received from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic, partition and offset of the message
    pub metadata: DeliveryMetadata,
    /// Partitioning key, if the producer set one
    pub key: Option<String>,
    /// Raw payload, if any
    pub payload: Option<Vec<u8>>,
}

/// A received message awaiting acknowledgement.
///
/// Acknowledging tells the subscription that processing is finished and the
/// offset may be committed. See the module docs for what dropping a delivery
/// unacknowledged means.
#[derive(Debug)]
pub struct Delivery {
    message: InboundMessage,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// Create a delivery and the receiver its acknowledgement arrives on.
    ///
    /// The receiver resolves with `Ok(())` on [`Delivery::ack`] and with an
    /// error if the delivery is dropped unacknowledged.
    #[must_use]
    pub fn new(message: InboundMessage) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                ack: Some(tx),
            },
            rx,
        )
    }

    /// The received message.
    #[must_use]
    pub const fn message(&self) -> &InboundMessage {
        &self.message
    }

    /// Mark processing as finished so the offset can be committed.
    pub fn ack(mut self) {
        if let Some(tx) = self.ack.take() {
            // Subscription may already be gone; nothing left to commit then.
            tx.send(()).ok();
        }
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so a single bus can be shared
/// by the publisher and every listener worker.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn EventBus>`).
pub trait EventBus: Send + Sync {
    /// Publish a keyed message to a topic.
    ///
    /// Resolves once the broker acknowledged the write.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryMetadata, EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics as a member of the bus's consumer group.
    ///
    /// Every call creates a new group member; partitions are split between
    /// the members that are subscribed at the same time.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message() -> InboundMessage {
        InboundMessage {
            metadata: DeliveryMetadata {
                topic: "book-notifications".to_string(),
                partition: 2,
                offset: 17,
            },
            key: Some("978-1".to_string()),
            payload: Some(b"{}".to_vec()),
        }
    }

    #[test]
    fn metadata_display() {
        assert_eq!(message().metadata.to_string(), "book-notifications[2]@17");
    }

    #[tokio::test]
    async fn ack_resolves_receiver() {
        let (delivery, rx) = Delivery::new(message());
        assert_eq!(delivery.message().key.as_deref(), Some("978-1"));
        delivery.ack();
        tokio_test::assert_ok!(rx.await);
    }

    #[tokio::test]
    async fn dropping_delivery_signals_nack() {
        let (delivery, rx) = Delivery::new(message());
        drop(delivery);
        tokio_test::assert_err!(rx.await);
    }

    #[test]
    fn json_message_encodes_payload() {
        let msg = OutboundMessage::json("k", &serde_json::json!({ "a": 1 })).unwrap();
        assert_eq!(msg.key, "k");
        assert_eq!(msg.payload, br#"{"a":1}"#);
    }
}
