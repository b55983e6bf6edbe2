//! # Book Sync Testing
//!
//! Testing utilities for the book-sync workspace.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: partitioned, consumer-group aware bus with
//!   commit-after-ack semantics
//! - [`InMemoryBookStore`]: `BookStore` with an opt-in call log and failure injection
//! - [`NotificationBuilder`]: concise construction of notifications
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use book_sync_testing::{InMemoryBookStore, NotificationBuilder};
//!
//! #[tokio::test]
//! async fn creates_book() {
//!     let store = Arc::new(InMemoryBookStore::new());
//!     let reconciler = Reconciler::new(store.clone());
//!
//!     reconciler.reconcile(&NotificationBuilder::new_book("978-1").build()).await?;
//!
//!     assert_eq!(store.len(), 1);
//! }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

pub mod book_store;
pub mod event_bus;
pub mod fixtures;

use book_sync_core::environment::Clock;
use chrono::{DateTime, Utc};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use book_sync_testing::mocks::FixedClock;
    /// use book_sync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

// Re-export commonly used items
pub use book_store::{InMemoryBookStore, StoreCall, StoreOp};
pub use event_bus::InMemoryEventBus;
pub use fixtures::NotificationBuilder;
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
