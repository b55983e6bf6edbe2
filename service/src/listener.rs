//! Listener adapter and worker pool.
//!
//! [`NotificationListener`] turns one received message into a reconciliation:
//!
//! ```text
//! InboundMessage ─► route by topic ─► decode JSON ─► Reconciler (with retry)
//!                        │                 │                │
//!                   not reconciled     malformed      retries exhausted
//!                        │                 │                │
//!                        ▼                 ▼                ▼
//!                       Ack               Ack        dead letter ─► Ack
//!                                                         │
//!                                                    publish failed
//!                                                         ▼
//!                                                     Redeliver
//! ```
//!
//! [`ListenerPool`] runs `concurrency` workers, each with its own subscription
//! in the shared consumer group. A worker handles its deliveries one at a time
//! and acknowledges each before pulling the next.

use crate::config::{ListenerConfig, Topics};
use crate::reconciler::{ReconcileError, ReconcileOutcome, Reconciler};
use crate::retry::{RetryPolicy, retry_with_predicate};
use book_sync_core::event_bus::{EventBus, EventBusError, InboundMessage, OutboundMessage};
use book_sync_core::notification::{Notification, NotificationType};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

/// What to do with a delivery once the listener is done with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the offset
    Ack,
    /// Leave the offset uncommitted so the message is delivered again
    Redeliver,
}

/// Deserializes received messages and hands them to the [`Reconciler`].
pub struct NotificationListener {
    reconciler: Reconciler,
    bus: Arc<dyn EventBus>,
    topics: Topics,
    retry: RetryPolicy,
}

impl NotificationListener {
    /// Create a listener. `bus` is used for dead-lettering only.
    #[must_use]
    pub fn new(
        reconciler: Reconciler,
        bus: Arc<dyn EventBus>,
        topics: Topics,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reconciler,
            bus,
            topics,
            retry,
        }
    }

    /// Process one message and decide whether it may be committed.
    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        let span = tracing::info_span!(
            "notification",
            topic = %message.metadata.topic,
            partition = message.metadata.partition,
            offset = message.metadata.offset,
            key = message.key.as_deref().unwrap_or_default(),
        );
        self.process(message).instrument(span).await
    }

    async fn process(&self, message: &InboundMessage) -> Disposition {
        let topic = message.metadata.topic.as_str();
        let on_stock_channel = topic == self.topics.stock_updates;
        if !on_stock_channel && topic != self.topics.book_notifications {
            tracing::info!("Message on a channel that is not reconciled, skipping");
            return Disposition::Ack;
        }

        let Some(payload) = message.payload.as_deref() else {
            tracing::error!("Message without payload, dropping");
            return Disposition::Ack;
        };

        let mut notification: Notification = match serde_json::from_slice(payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::error!(error = %e, "Failed to deserialize notification, dropping");
                return Disposition::Ack;
            },
        };

        if on_stock_channel && notification.notification_type.is_some() {
            notification.notification_type = Some(NotificationType::StockUpdate);
        }

        tracing::debug!(%notification, "Received notification");

        let result = retry_with_predicate(
            &self.retry,
            || self.reconciler.reconcile(&notification),
            |_: &ReconcileError| true,
        )
        .await;

        match result {
            Ok(ReconcileOutcome::Rejected(reason)) => {
                tracing::warn!(%reason, "Notification dropped");
                Disposition::Ack
            },
            Ok(outcome) => {
                tracing::debug!(
                    book_id = outcome.record().map(|record| record.id.get()),
                    redirected_from = outcome.redirected_from().map(|t| t.as_str()),
                    "Notification reconciled"
                );
                Disposition::Ack
            },
            Err(e) => self.dead_letter(message, payload, &e).await,
        }
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        payload: &[u8],
        error: &ReconcileError,
    ) -> Disposition {
        let key = message.key.clone().unwrap_or_default();
        let dead = OutboundMessage::new(key, payload.to_vec());

        match self.bus.publish(&self.topics.dead_letter, &dead).await {
            Ok(metadata) => {
                tracing::error!(
                    error = %error,
                    dead_letter = %metadata,
                    "Reconciliation failed after retries, message dead-lettered"
                );
                Disposition::Ack
            },
            Err(e) => {
                tracing::error!(
                    error = %error,
                    dead_letter_error = %e,
                    "Reconciliation failed and dead-lettering failed, leaving for redelivery"
                );
                Disposition::Redeliver
            },
        }
    }
}

/// Runs listener workers in one consumer group until shut down.
///
/// # Example
///
/// ```ignore
/// let (pool, shutdown) = ListenerPool::new(listener, bus, &config.topics, &config.listener);
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.send(true).ok();
/// });
///
/// pool.run().await;
/// ```
pub struct ListenerPool {
    listener: Arc<NotificationListener>,
    bus: Arc<dyn EventBus>,
    topics: Vec<String>,
    concurrency: usize,
    resubscribe_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ListenerPool {
    /// Create a pool and the sender that stops it.
    ///
    /// Send `true` to stop every worker once its current message is handled.
    #[must_use]
    pub fn new(
        listener: NotificationListener,
        bus: Arc<dyn EventBus>,
        topics: &Topics,
        config: &ListenerConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pool = Self {
            listener: Arc::new(listener),
            bus,
            topics: topics.subscribed().iter().map(|t| (*t).to_string()).collect(),
            concurrency: config.concurrency.max(1),
            resubscribe_delay: config.resubscribe_delay(),
            shutdown: shutdown_rx,
        };

        (pool, shutdown_tx)
    }

    /// Run all workers until shutdown.
    pub async fn run(self) {
        tracing::info!(
            concurrency = self.concurrency,
            topics = ?self.topics,
            "Starting listener pool"
        );

        let workers: Vec<_> = (0..self.concurrency)
            .map(|worker| {
                let worker = Worker {
                    id: worker,
                    listener: Arc::clone(&self.listener),
                    bus: Arc::clone(&self.bus),
                    topics: self.topics.clone(),
                    resubscribe_delay: self.resubscribe_delay,
                    shutdown: self.shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Listener worker panicked");
            }
        }

        tracing::info!("Listener pool stopped");
    }
}

struct Worker {
    id: usize,
    listener: Arc<NotificationListener>,
    bus: Arc<dyn EventBus>,
    topics: Vec<String>,
    resubscribe_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        while !*self.shutdown.borrow() {
            if let Err(e) = self.consume().await {
                tracing::error!(worker = self.id, error = %e, "Subscription failed");
            }
            if *self.shutdown.borrow() {
                break;
            }

            tracing::info!(
                worker = self.id,
                delay_ms = self.resubscribe_delay.as_millis(),
                "Resubscribing"
            );
            tokio::select! {
                () = tokio::time::sleep(self.resubscribe_delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker = self.id, "Listener worker stopped");
    }

    /// Consume one subscription until it ends or shutdown is signalled.
    async fn consume(&mut self) -> Result<(), EventBusError> {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        let mut stream = self.bus.subscribe(&topics).await?;
        tracing::debug!(worker = self.id, "Subscribed");

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        match self.listener.handle(delivery.message()).await {
                            Disposition::Ack => delivery.ack(),
                            Disposition::Redeliver => {
                                tracing::warn!(
                                    worker = self.id,
                                    at = %delivery.message().metadata,
                                    "Releasing delivery without ack"
                                );
                                return Ok(());
                            },
                        }
                    },
                    Some(Err(e)) => {
                        tracing::error!(worker = self.id, error = %e, "Error receiving message");
                    },
                    None => {
                        tracing::warn!(worker = self.id, "Subscription ended");
                        return Ok(());
                    },
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!(worker = self.id, "Shutdown signal received");
                        return Ok(());
                    }
                }
            }
        }
    }
}
