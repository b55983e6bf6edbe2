//! # Book Sync Core
//!
//! Core traits and types for reconciling book lifecycle notifications.
//!
//! This crate provides the abstractions shared by the producer, the
//! reconciler and the transport implementations:
//!
//! - **Notification**: the wire-level message describing a book change,
//!   together with its validity predicate ([`notification`])
//! - **Book store**: the persistence collaborator the reconciler writes to
//!   ([`book`])
//! - **Event bus**: keyed publish and consumer-group subscriptions over named
//!   channels ([`event_bus`])
//! - **Environment**: injected capabilities such as the [`environment::Clock`]
//!
//! ## Data Flow
//!
//! ```text
//! domain event ──► NotificationPublisher ──► EventBus ──► NotificationListener
//!                                                                │
//!                                                                ▼
//!                                             BookStore ◄── Reconciler
//! ```
//!
//! ## Example
//!
//! ```
//! use book_sync_core::notification::{BookCategory, Notification, NotificationType};
//! use rust_decimal::Decimal;
//!
//! let notification = Notification {
//!     isbn: Some("978-1".to_string()),
//!     title: Some("Go".to_string()),
//!     author: Some("A".to_string()),
//!     price: Some(Decimal::new(999, 2)),
//!     stock: Some(3),
//!     category: Some(BookCategory::Technology),
//!     notification_type: Some(NotificationType::NewBook),
//!     ..Notification::default()
//! };
//!
//! assert!(notification.is_valid());
//! ```

pub mod book;
pub mod event_bus;
pub mod notification;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDateTime, Utc};
pub use rust_decimal::Decimal;

/// Environment module - Injected capabilities
///
/// External dependencies that are not part of the domain model are
/// abstracted behind traits and passed to components at construction.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use book_sync_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time from the operating system.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
