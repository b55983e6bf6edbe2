//! `book-sync`: runs the notification listener pool against Redpanda.
//!
//! Books are kept in an in-memory store, so state lives as long as the process.

use book_sync_redpanda::RedpandaEventBus;
use book_sync_service::{
    ListenerPool, NotificationListener, Reconciler, RetryPolicy, ServiceConfig,
};
use book_sync_testing::InMemoryBookStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "book_sync=info,book_sync_service=info,book_sync_redpanda=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        brokers = %config.kafka.bootstrap_servers,
        consumer_group = %config.kafka.consumer_group_id,
        concurrency = config.listener.concurrency,
        "Starting book-sync"
    );

    let bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.kafka.bootstrap_servers)
            .consumer_group(&config.kafka.consumer_group_id)
            .auto_offset_reset(&config.kafka.auto_offset_reset)
            .producer_acks(&config.kafka.producer_acks)
            .compression(&config.kafka.compression)
            .session_timeout(Duration::from_millis(config.kafka.session_timeout_ms))
            .build()?,
    );

    let store = Arc::new(InMemoryBookStore::new());
    let listener = NotificationListener::new(
        Reconciler::new(store),
        bus.clone(),
        config.topics.clone(),
        RetryPolicy::fixed(config.listener.max_retries, config.listener.retry_backoff()),
    );
    let (pool, shutdown) = ListenerPool::new(listener, bus, &config.topics, &config.listener);

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.send(true).ok();
    });

    pool.run().await;

    info!("book-sync stopped");
    Ok(())
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
