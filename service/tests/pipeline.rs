//! End-to-end tests: publisher ─► in-memory bus ─► listener pool ─► store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use book_sync_core::book::{BookId, StoreError};
use book_sync_core::notification::{BookCategory, Notification};
use book_sync_service::{
    ListenerConfig, ListenerPool, NotificationListener, NotificationPublisher, Reconciler,
    RetryPolicy, Topics,
};
use book_sync_testing::{
    InMemoryBookStore, InMemoryEventBus, NotificationBuilder, StoreOp, init_tracing, test_clock,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Harness {
    bus: InMemoryEventBus,
    store: InMemoryBookStore,
    publisher: NotificationPublisher,
    shutdown: watch::Sender<bool>,
    pool: JoinHandle<()>,
}

impl Harness {
    fn start(concurrency: usize, retry: RetryPolicy) -> Self {
        init_tracing();
        let bus = InMemoryEventBus::new();
        let store = InMemoryBookStore::with_call_log();
        let topics = Topics::default();

        let publisher = NotificationPublisher::new(
            Arc::new(bus.clone()),
            topics.clone(),
            Arc::new(test_clock()),
        );
        let listener = NotificationListener::new(
            Reconciler::new(Arc::new(store.clone())),
            Arc::new(bus.clone()),
            topics.clone(),
            retry,
        );
        let config = ListenerConfig {
            concurrency,
            resubscribe_delay_ms: 10,
            ..ListenerConfig::default()
        };
        let (pool, shutdown) = ListenerPool::new(listener, Arc::new(bus.clone()), &topics, &config);

        Self {
            bus,
            store,
            publisher,
            shutdown,
            pool: tokio::spawn(pool.run()),
        }
    }

    async fn send(&self, notification: &Notification, topic: &str) {
        let key = notification.isbn.clone().unwrap_or_default();
        self.publisher
            .publish(notification, topic, &key)
            .await
            .expect("publish failed");
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.pool)
            .await
            .expect("pool did not stop")
            .unwrap();
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn new_book_then_stock_update() {
    let h = Harness::start(3, RetryPolicy::default());

    h.send(
        &NotificationBuilder::new_book("978-1")
            .title("Go")
            .author("A")
            .price(dec!(9.99))
            .stock(3)
            .category(BookCategory::Technology)
            .build(),
        "book-notifications",
    )
    .await;
    eventually("book created", || h.store.len() == 1).await;
    let created = h.store.get(BookId::new(1)).unwrap();
    assert_eq!(created.fields.stock, 3);

    h.send(
        &NotificationBuilder::stock_update("978-1").stock(7).build(),
        "book-stock-updates",
    )
    .await;
    eventually("stock updated", || {
        h.store.get(BookId::new(1)).is_some_and(|b| b.fields.stock == 7)
    })
    .await;

    let book = h.store.get(BookId::new(1)).unwrap();
    assert_eq!(book.fields.title, "Go");
    assert_eq!(book.fields.price, dec!(9.99));
    assert_eq!(h.store.len(), 1);
    eventually("offsets committed", || {
        h.bus.uncommitted("book-notifications") == 0 && h.bus.uncommitted("book-stock-updates") == 0
    })
    .await;

    h.stop().await;
}

#[tokio::test]
async fn same_isbn_is_applied_in_publish_order() {
    let h = Harness::start(3, RetryPolicy::default());

    for stock in 1..=30 {
        h.send(
            &NotificationBuilder::stock_update("978-1").stock(stock).build(),
            "book-stock-updates",
        )
        .await;
        h.send(
            &NotificationBuilder::new_book(format!("978-{}", stock + 100)).build(),
            "book-notifications",
        )
        .await;
    }

    eventually("all messages committed", || {
        h.bus.uncommitted("book-stock-updates") == 0 && h.bus.uncommitted("book-notifications") == 0
    })
    .await;

    assert_eq!(h.store.len(), 31);
    assert_eq!(h.store.get_by_isbn("978-1").unwrap().fields.stock, 30);

    h.stop().await;
}

#[tokio::test]
async fn malformed_and_invalid_messages_are_committed() {
    let h = Harness::start(2, RetryPolicy::default());

    h.send(
        &NotificationBuilder::new_book("978-1").stock(-1).build(),
        "book-notifications",
    )
    .await;
    h.publisher
        .publish(&Notification::default(), "book-notifications", "978-2")
        .await
        .unwrap();

    eventually("rejections committed", || h.bus.uncommitted("book-notifications") == 0).await;
    assert!(h.store.is_empty());

    h.stop().await;
}

#[tokio::test]
async fn persistent_store_failure_is_dead_lettered() {
    let h = Harness::start(1, RetryPolicy::fixed(1, Duration::from_millis(10)));
    h.store
        .fail(StoreOp::ExistsByIsbn, StoreError::Unavailable("db down".into()));

    h.send(&NotificationBuilder::new_book("978-1").build(), "book-notifications")
        .await;

    eventually("dead letter published", || {
        h.bus.published("book-notifications.DLT").len() == 1
    })
    .await;
    eventually("original committed", || h.bus.uncommitted("book-notifications") == 0).await;
    assert!(h.store.is_empty());

    h.stop().await;
}

#[tokio::test]
async fn failed_dead_letter_is_redelivered() {
    let h = Harness::start(2, RetryPolicy::fixed(1, Duration::from_millis(50)));
    h.store
        .fail(StoreOp::ExistsByIsbn, StoreError::Unavailable("db down".into()));

    h.send(&NotificationBuilder::new_book("978-1").build(), "book-notifications")
        .await;
    h.bus.fail_publishes("broker unreachable");

    // Two attempts per delivery: a fifth call means the message came back.
    eventually("redelivery", || h.store.calls().len() >= 5).await;
    assert_eq!(h.bus.uncommitted("book-notifications"), 1);

    h.bus.restore_publishes();
    h.store.clear_failures();

    eventually("book created after recovery", || h.store.len() == 1).await;
    eventually("offset committed", || h.bus.uncommitted("book-notifications") == 0).await;

    h.stop().await;
}
