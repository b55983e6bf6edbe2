//! Reconciliation of book notifications against the book store.
//!
//! A notification moves through
//!
//! ```text
//! RECEIVED ─► VALIDATED ─► DISPATCHED ─► CREATED | UPDATED | REDIRECTED ─► DONE
//!     │
//!     └─► REJECTED
//! ```
//!
//! Dispatch by notification type:
//!
//! | Type           | Store precondition   | Holds            | Violated                 |
//! |----------------|----------------------|------------------|--------------------------|
//! | `NEW_BOOK`     | isbn absent          | create           | redirect to stock update |
//! | `STOCK_UPDATE` | isbn present         | replace stock    | redirect to new book     |
//! | `BOOK_UPDATE`  | isbn present         | replace all data | redirect to new book     |
//!
//! A reconciliation takes at most one redirect. When the redirected path
//! finds its own precondition violated (a concurrent writer created or
//! removed the book between two store calls) the reconciler gives up with
//! [`ReconcileError::ConcurrentModification`] and leaves the retry to the caller.

use book_sync_core::book::{BookFields, BookRecord, BookStore, StoreError};
use book_sync_core::notification::{
    Notification, NotificationType, RejectReason, ValidNotification,
};
use std::sync::Arc;
use thiserror::Error;

/// Which fields an update replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateScope {
    /// Only the stock level
    Stock,
    /// Title, author, description, price, stock and category
    Full,
}

/// Result of reconciling one notification.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// The notification failed validation; the store was not touched.
    Rejected(RejectReason),
    /// A record was created.
    Created {
        /// The stored record
        record: BookRecord,
        /// Original type when this was reached through a redirect
        redirected_from: Option<NotificationType>,
    },
    /// An existing record was updated.
    Updated {
        /// The stored record
        record: BookRecord,
        /// Which fields were replaced
        scope: UpdateScope,
        /// Original type when this was reached through a redirect
        redirected_from: Option<NotificationType>,
    },
}

impl ReconcileOutcome {
    /// The stored record, unless the notification was rejected.
    #[must_use]
    pub const fn record(&self) -> Option<&BookRecord> {
        match self {
            Self::Rejected(_) => None,
            Self::Created { record, .. } | Self::Updated { record, .. } => Some(record),
        }
    }

    /// Original type when a redirect was taken.
    #[must_use]
    pub const fn redirected_from(&self) -> Option<NotificationType> {
        match self {
            Self::Rejected(_) => None,
            Self::Created {
                redirected_from, ..
            }
            | Self::Updated {
                redirected_from, ..
            } => *redirected_from,
        }
    }
}

/// Reconciliation failures. All of them are worth retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The book store failed
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// The record appeared or vanished again after a redirect
    #[error("concurrent modification of isbn {isbn}")]
    ConcurrentModification {
        /// Affected book
        isbn: String,
    },
}

/// Applies notifications to a [`BookStore`].
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn BookStore>,
}

impl Reconciler {
    /// Create a reconciler writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    /// Validate `notification` and apply it to the store.
    ///
    /// Rejections are reported as [`ReconcileOutcome::Rejected`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] if a store call fails and
    /// [`ReconcileError::ConcurrentModification`] if a redirected path finds its
    /// precondition violated.
    pub async fn reconcile(
        &self,
        notification: &Notification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let valid = match notification.validate() {
            Ok(valid) => valid,
            Err(reason) => {
                tracing::warn!(
                    isbn = notification.isbn.as_deref().unwrap_or_default(),
                    notification_type = notification.notification_type.map(|t| t.as_str()),
                    %reason,
                    "Invalid notification rejected"
                );
                return Ok(ReconcileOutcome::Rejected(reason));
            },
        };

        match valid.notification_type {
            NotificationType::NewBook => self.new_book(&valid).await,
            NotificationType::StockUpdate => self.stock_update(&valid).await,
            NotificationType::BookUpdate => self.book_update(&valid).await,
        }
    }

    async fn new_book(
        &self,
        valid: &ValidNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !self.store.exists_by_isbn(&valid.isbn).await? {
            return self.create(valid, None).await;
        }

        tracing::info!(
            isbn = %valid.isbn,
            "Book already exists, redirecting NEW_BOOK to stock update"
        );
        match self.find(&valid.isbn).await? {
            Some(existing) => {
                self.replace_stock(valid, existing, Some(NotificationType::NewBook))
                    .await
            },
            None => Err(Self::concurrent(valid)),
        }
    }

    async fn stock_update(
        &self,
        valid: &ValidNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self.find(&valid.isbn).await? {
            Some(existing) => self.replace_stock(valid, existing, None).await,
            None => self.redirect_to_create(valid).await,
        }
    }

    async fn book_update(
        &self,
        valid: &ValidNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(existing) = self.find(&valid.isbn).await? else {
            return self.redirect_to_create(valid).await;
        };

        let fields = BookFields {
            isbn: existing.fields.isbn,
            ..valid.to_fields()
        };
        let record = self.store.update(existing.id, fields).await?;
        tracing::info!(
            isbn = %valid.isbn,
            book_id = %record.id,
            "Book updated"
        );
        Ok(ReconcileOutcome::Updated {
            record,
            scope: UpdateScope::Full,
            redirected_from: None,
        })
    }

    /// New-book path for an update whose book was not found.
    async fn redirect_to_create(
        &self,
        valid: &ValidNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        tracing::info!(
            isbn = %valid.isbn,
            notification_type = %valid.notification_type,
            "Book not found, redirecting to new book"
        );
        if self.store.exists_by_isbn(&valid.isbn).await? {
            return Err(Self::concurrent(valid));
        }
        self.create(valid, Some(valid.notification_type)).await
    }

    async fn create(
        &self,
        valid: &ValidNotification,
        redirected_from: Option<NotificationType>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let record = self.store.create(valid.to_fields()).await?;
        tracing::info!(
            isbn = %valid.isbn,
            book_id = %record.id,
            stock = record.fields.stock,
            redirected_from = redirected_from.map(|t| t.as_str()),
            "Book created"
        );
        Ok(ReconcileOutcome::Created {
            record,
            redirected_from,
        })
    }

    async fn replace_stock(
        &self,
        valid: &ValidNotification,
        existing: BookRecord,
        redirected_from: Option<NotificationType>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let previous = existing.fields.stock;
        let record = self
            .store
            .update(existing.id, existing.fields.with_stock(valid.stock))
            .await?;
        tracing::info!(
            isbn = %valid.isbn,
            book_id = %record.id,
            previous,
            stock = record.fields.stock,
            redirected_from = redirected_from.map(|t| t.as_str()),
            "Stock updated"
        );
        Ok(ReconcileOutcome::Updated {
            record,
            scope: UpdateScope::Stock,
            redirected_from,
        })
    }

    /// `find_by_isbn`, with [`StoreError::NotFound`] read as absence.
    async fn find(&self, isbn: &str) -> Result<Option<BookRecord>, StoreError> {
        match self.store.find_by_isbn(isbn).await {
            Err(StoreError::NotFound(_)) => Ok(None),
            other => other,
        }
    }

    fn concurrent(valid: &ValidNotification) -> ReconcileError {
        tracing::warn!(
            isbn = %valid.isbn,
            notification_type = %valid.notification_type,
            "Book changed between store calls, giving up after one redirect"
        );
        ReconcileError::ConcurrentModification {
            isbn: valid.isbn.clone(),
        }
    }
}
