//! In-memory event bus with partitions and a single consumer group.
//!
//! Mirrors the delivery contract of the Kafka-backed bus closely enough to
//! test ordering and redelivery without a broker:
//!
//! - Each topic has a fixed number of partitions; a message's partition is
//!   derived from its key, so equal keys share a partition.
//! - Every [`EventBus::subscribe`] call joins the bus's consumer group.
//!   Partition `p` belongs to the member at index `p % members` (in join
//!   order), recomputed whenever a member joins or leaves.
//! - A partition has at most one delivery in flight. Acknowledging it
//!   commits the offset, even when the stream is dropped before it is polled
//!   again; dropping it unacknowledged releases the partition for
//!   redelivery and ends that subscription.

use book_sync_core::event_bus::{
    Delivery, DeliveryMetadata, DeliveryStream, EventBus, EventBusError, InboundMessage,
    OutboundMessage,
};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, oneshot};

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: u32 = 4;

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<OutboundMessage>,
    committed: usize,
    claimed: bool,
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<PartitionLog>>,
    members: Vec<u64>,
    next_member: u64,
    failing_publishes: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<BusState>,
    notify: Notify,
    partitions: u32,
}

/// A claimed record, not yet acknowledged.
struct Claim {
    topic: String,
    partition: usize,
    message: InboundMessage,
}

impl Inner {
    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as usize
    }

    fn logs<'a>(&self, state: &'a mut BusState, topic: &str) -> &'a mut Vec<PartitionLog> {
        state.topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.partitions).map(|_| PartitionLog::default()).collect()
        })
    }

    fn claim(&self, member: u64, topics: &[String]) -> Option<Claim> {
        let mut state = self.state.lock().unwrap();
        let index = state.members.iter().position(|m| *m == member)?;
        let members = state.members.len();

        for topic in topics {
            let logs = self.logs(&mut state, topic);
            for (partition, log) in logs.iter_mut().enumerate() {
                if partition % members != index || log.claimed {
                    continue;
                }
                let Some(record) = log.records.get(log.committed) else {
                    continue;
                };
                log.claimed = true;
                return Some(Claim {
                    topic: topic.clone(),
                    partition,
                    message: InboundMessage {
                        metadata: DeliveryMetadata {
                            topic: topic.clone(),
                            partition: i32::try_from(partition).unwrap_or(i32::MAX),
                            offset: i64::try_from(log.committed).unwrap_or(i64::MAX),
                        },
                        key: Some(record.key.clone()),
                        payload: Some(record.payload.clone()),
                    },
                });
            }
        }
        None
    }

    fn settle(&self, topic: &str, partition: usize, commit: bool) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(log) = state
                .topics
                .get_mut(topic)
                .and_then(|logs| logs.get_mut(partition))
            {
                if commit {
                    log.committed += 1;
                }
                log.claimed = false;
            }
        }
        self.notify.notify_waiters();
    }

    fn leave(&self, member: u64) {
        self.state.lock().unwrap().members.retain(|m| *m != member);
        self.notify.notify_waiters();
    }
}

/// The delivery a member handed out and has not settled yet.
struct InFlight {
    topic: String,
    partition: usize,
    ack: oneshot::Receiver<()>,
}

/// Group membership of one subscription; settles its claim and leaves on drop.
struct Member {
    inner: Arc<Inner>,
    id: u64,
    in_flight: Option<InFlight>,
}

impl Member {
    fn settle(&mut self, acked: bool) {
        if let Some(in_flight) = self.in_flight.take() {
            self.inner.settle(&in_flight.topic, in_flight.partition, acked);
        }
    }
}

impl Drop for Member {
    fn drop(&mut self) {
        let acked = self
            .in_flight
            .as_mut()
            .is_some_and(|in_flight| in_flight.ack.try_recv().is_ok());
        self.settle(acked);
        self.inner.leave(self.id);
    }
}

/// In-memory [`EventBus`] for tests.
///
/// Clones share the same topics and consumer group.
///
/// # Example
///
/// ```
/// use book_sync_core::event_bus::{EventBus, OutboundMessage};
/// use book_sync_testing::InMemoryEventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("book-notifications", &OutboundMessage::new("978-1", b"{}".to_vec()))
///     .await?;
///
/// assert_eq!(bus.published("book-notifications").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    /// Create a bus with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a bus with the given number of partitions per topic (at least 1).
    #[must_use]
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BusState::default()),
                notify: Notify::new(),
                partitions: partitions.max(1),
            }),
        }
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> usize {
        self.inner.partition_for(key)
    }

    /// Every message published to `topic`, in partition then offset order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<OutboundMessage> {
        let state = self.inner.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .map(|logs| {
                logs.iter()
                    .flat_map(|log| log.records.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of messages on `topic` whose offsets are not yet committed.
    #[must_use]
    pub fn uncommitted(&self, topic: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .map(|logs| {
                logs.iter()
                    .map(|log| log.records.len() - log.committed)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Number of members currently subscribed.
    #[must_use]
    pub fn members(&self) -> usize {
        self.inner.state.lock().unwrap().members.len()
    }

    /// Make every publish fail with `reason` until [`Self::restore_publishes`].
    pub fn fail_publishes(&self, reason: impl Into<String>) {
        self.inner.state.lock().unwrap().failing_publishes = Some(reason.into());
    }

    /// Undo [`Self::fail_publishes`].
    pub fn restore_publishes(&self) {
        self.inner.state.lock().unwrap().failing_publishes = None;
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryMetadata, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();

        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic("empty topic name".to_string()));
            }

            let partition = self.inner.partition_for(&message.key);
            let offset = {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(reason) = state.failing_publishes.clone() {
                    return Err(EventBusError::PublishFailed { topic, reason });
                }
                let log = &mut self.inner.logs(&mut state, &topic)[partition];
                log.records.push(message);
                log.records.len() - 1
            };
            self.inner.notify.notify_waiters();

            Ok(DeliveryMetadata {
                topic,
                partition: i32::try_from(partition).unwrap_or(i32::MAX),
                offset: i64::try_from(offset).unwrap_or(i64::MAX),
            })
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            if topics.iter().any(String::is_empty) {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "empty topic name".to_string(),
                });
            }

            let id = {
                let mut state = inner.state.lock().unwrap();
                let id = state.next_member;
                state.next_member += 1;
                state.members.push(id);
                id
            };
            inner.notify.notify_waiters();

            // Built outside the stream so an unpolled subscription still leaves the group
            let member = Member { inner, id, in_flight: None };
            let stream = async_stream::stream! {
                let mut member = member;
                let notify_inner = Arc::clone(&member.inner);

                loop {
                    let notified = notify_inner.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let Some(claim) = member.inner.claim(member.id, &topics) else {
                        notified.await;
                        continue;
                    };

                    let (delivery, ack) = Delivery::new(claim.message);
                    member.in_flight = Some(InFlight {
                        topic: claim.topic,
                        partition: claim.partition,
                        ack,
                    });
                    yield Ok(delivery);

                    let acked = match member.in_flight.as_mut() {
                        Some(in_flight) => (&mut in_flight.ack).await.is_ok(),
                        None => false,
                    };
                    member.settle(acked);
                    if !acked {
                        break;
                    }
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
