//! Publishing of book notifications and book events.
//!
//! Every message is keyed by the book's ISBN so all messages about one book
//! land on the same partition and are consumed in publish order.
//!
//! Publishing never blocks the caller: each send runs on its own task and the
//! returned [`PublishHandle`] resolves once with the broker's answer. Dropping
//! the handle is fine; outcomes are logged either way.

use crate::config::Topics;
use book_sync_core::book::BookRecord;
use book_sync_core::environment::Clock;
use book_sync_core::event_bus::{DeliveryMetadata, EventBus, EventBusError, OutboundMessage};
use book_sync_core::notification::{Notification, NotificationType, timestamp_format};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Why a publish failed.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    /// The message could not be encoded; the bus was not touched
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The bus rejected or lost the message
    #[error("transport failed: {0}")]
    Transport(#[from] EventBusError),
}

/// Informational event about a book, published on the book-events channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEvent {
    /// Free-form event name, e.g. `BOOK_CREATED`
    pub event_type: String,
    /// Natural key of the book
    pub isbn: String,
    /// Store identifier of the book
    pub book_id: u64,
    /// When the event was produced
    #[serde(with = "timestamp_format::required")]
    pub timestamp: NaiveDateTime,
    /// Optional extra payload
    #[serde(default)]
    pub additional_data: Option<String>,
}

/// Completion handle of one publish.
///
/// Resolves exactly once with where the message was written or why it was not.
#[must_use = "dropping the handle detaches the publish; use it to observe the outcome"]
#[derive(Debug)]
pub struct PublishHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(Option<Result<DeliveryMetadata, PublishError>>),
    Sending(JoinHandle<Result<DeliveryMetadata, PublishError>>),
}

impl PublishHandle {
    const fn ready(result: Result<DeliveryMetadata, PublishError>) -> Self {
        Self {
            state: HandleState::Ready(Some(result)),
        }
    }
}

impl Future for PublishHandle {
    type Output = Result<DeliveryMetadata, PublishError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match &mut self.state {
            HandleState::Ready(result) => result.take().unwrap_or_else(|| {
                Err(PublishError::Transport(EventBusError::TransportError(
                    "publish handle polled after completion".to_string(),
                )))
            }),
            HandleState::Sending(task) => match Pin::new(task).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(joined) => joined.unwrap_or_else(|e| {
                    Err(PublishError::Transport(EventBusError::TransportError(
                        format!("publish task failed: {e}"),
                    )))
                }),
            },
        };
        // The task is finished; later polls must not touch its JoinHandle
        self.state = HandleState::Ready(None);
        Poll::Ready(result)
    }
}

/// Publishes notifications and book events to their channels.
///
/// | Operation               | Type           | Channel            |
/// |-------------------------|----------------|--------------------|
/// | `publish_new_book`      | `NEW_BOOK`     | book notifications |
/// | `publish_stock_update`  | `STOCK_UPDATE` | stock updates      |
/// | `publish_book_update`   | `BOOK_UPDATE`  | book notifications |
/// | `publish_custom`        | as given       | book notifications |
/// | `publish_event`         | `BookEvent`    | book events        |
///
/// Must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct NotificationPublisher {
    bus: Arc<dyn EventBus>,
    topics: Topics,
    clock: Arc<dyn Clock>,
}

impl NotificationPublisher {
    /// Create a publisher writing to `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topics: Topics, clock: Arc<dyn Clock>) -> Self {
        Self { bus, topics, clock }
    }

    /// Channel names in use.
    #[must_use]
    pub const fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Serialize `notification` and publish it to `channel` under `key`.
    pub fn publish(&self, notification: &Notification, channel: &str, key: &str) -> PublishHandle {
        match OutboundMessage::json(key, notification) {
            Ok(message) => self.send(channel, message),
            Err(e) => {
                tracing::error!(
                    topic = %channel,
                    key = %key,
                    error = %e,
                    "Failed to serialize notification"
                );
                PublishHandle::ready(Err(PublishError::Serialization(e.to_string())))
            },
        }
    }

    /// Announce a newly created book.
    pub fn publish_new_book(&self, record: &BookRecord) -> PublishHandle {
        self.publish_record(record, NotificationType::NewBook, &self.topics.book_notifications)
    }

    /// Announce a stock change.
    pub fn publish_stock_update(&self, record: &BookRecord) -> PublishHandle {
        self.publish_record(record, NotificationType::StockUpdate, &self.topics.stock_updates)
    }

    /// Announce a change of the book's descriptive fields.
    pub fn publish_book_update(&self, record: &BookRecord) -> PublishHandle {
        self.publish_record(record, NotificationType::BookUpdate, &self.topics.book_notifications)
    }

    /// Publish `notification` as given, keyed by its ISBN (empty when absent).
    pub fn publish_custom(&self, notification: Notification) -> PublishHandle {
        let key = notification.isbn.clone().unwrap_or_default();
        self.publish(&notification, &self.topics.book_notifications, &key)
    }

    /// Publish an informational [`BookEvent`] about `record`.
    pub fn publish_event(
        &self,
        event_type: impl Into<String>,
        record: &BookRecord,
        additional_data: Option<String>,
    ) -> PublishHandle {
        let event = BookEvent {
            event_type: event_type.into(),
            isbn: record.isbn().to_string(),
            book_id: record.id.get(),
            timestamp: self.clock.now().naive_utc(),
            additional_data,
        };
        match OutboundMessage::json(&event.isbn, &event) {
            Ok(message) => self.send(&self.topics.book_events, message),
            Err(e) => {
                tracing::error!(
                    isbn = %event.isbn,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to serialize book event"
                );
                PublishHandle::ready(Err(PublishError::Serialization(e.to_string())))
            },
        }
    }

    fn publish_record(
        &self,
        record: &BookRecord,
        kind: NotificationType,
        channel: &str,
    ) -> PublishHandle {
        match Notification::from_record(record, kind, self.clock.now().naive_utc()) {
            Ok(notification) => self.publish(&notification, channel, record.isbn()),
            Err(e) => {
                tracing::error!(
                    topic = %channel,
                    isbn = %record.isbn(),
                    error = %e,
                    "Book record cannot be expressed as a notification"
                );
                PublishHandle::ready(Err(PublishError::Serialization(e.to_string())))
            },
        }
    }

    fn send(&self, channel: &str, message: OutboundMessage) -> PublishHandle {
        let bus = Arc::clone(&self.bus);
        let topic = channel.to_string();

        let task = tokio::spawn(async move {
            match bus.publish(&topic, &message).await {
                Ok(metadata) => {
                    tracing::info!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        key = %message.key,
                        "Message sent"
                    );
                    Ok(metadata)
                },
                Err(e) => {
                    tracing::error!(
                        topic = %topic,
                        key = %message.key,
                        error = %e,
                        "Failed to send message"
                    );
                    Err(PublishError::Transport(e))
                },
            }
        });

        PublishHandle {
            state: HandleState::Sending(task),
        }
    }
}
