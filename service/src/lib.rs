//! # Book Sync Service
//!
//! Message-driven reconciliation of book state.
//!
//! A producer publishes book lifecycle notifications (new book, stock update,
//! book update) keyed by ISBN. A pool of listeners in one consumer group
//! receives them, validates them and reconciles them against the book store,
//! redirecting between the create and update paths when the store disagrees
//! with the notification type.
//!
//! ```text
//! domain change ─► NotificationPublisher ─► channel ─► ListenerPool
//!                                                          │
//!                                                NotificationListener
//!                                                          │
//!                                                     Reconciler ─► BookStore
//! ```
//!
//! The reconciler never publishes: applying a notification does not trigger
//! further notifications.
//!
//! ## Modules
//!
//! - [`config`]: environment configuration
//! - [`producer`]: [`NotificationPublisher`] and [`PublishHandle`]
//! - [`reconciler`]: [`Reconciler`] and its outcomes
//! - [`listener`]: [`NotificationListener`] and [`ListenerPool`]
//! - [`retry`]: retry policy used before dead-lettering

pub mod config;
pub mod listener;
pub mod producer;
pub mod reconciler;
pub mod retry;

pub use config::{ConfigError, ListenerConfig, ServiceConfig, Topics};
pub use listener::{Disposition, ListenerPool, NotificationListener};
pub use producer::{BookEvent, NotificationPublisher, PublishError, PublishHandle};
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler, UpdateScope};
pub use retry::RetryPolicy;
