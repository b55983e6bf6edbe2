//! Book records and the store they live in.
//!
//! The [`BookStore`] trait is the persistence collaborator the reconciler
//! writes to. It is addressed both by internal identifier ([`BookId`]) and by
//! natural key (ISBN). Implementations must make each `create` and `update`
//! atomic for a single record; the reconciler performs no locking of its own.
//!
//! # Not-found Semantics
//!
//! `find_by_isbn` reports absence as `Ok(None)`. Implementations that can only
//! signal absence through an error should return [`StoreError::NotFound`],
//! which callers treat the same way. Every other error is a failure.

use crate::notification::BookCategory;
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Identifier assigned by the store when a record is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookId(u64);

impl BookId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mutable fields of a book record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookFields {
    /// Book title
    pub title: String,
    /// Book author
    pub author: String,
    /// Natural key
    pub isbn: String,
    /// Free-form description
    pub description: Option<String>,
    /// Unit price
    pub price: Decimal,
    /// Units in stock
    pub stock: u32,
    /// Catalogue category
    pub category: BookCategory,
}

impl BookFields {
    /// Same fields with only the stock replaced.
    #[must_use]
    pub fn with_stock(mut self, stock: u32) -> Self {
        self.stock = stock;
        self
    }
}

/// A persisted book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookRecord {
    /// Store-assigned identifier
    pub id: BookId,
    /// Current field values
    pub fields: BookFields,
}

impl BookRecord {
    /// Natural key of the record.
    #[must_use]
    pub fn isbn(&self) -> &str {
        &self.fields.isbn
    }
}

impl fmt::Display for BookRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Book {{ id: {}, isbn: {}, title: {}, stock: {} }}",
            self.id, self.fields.isbn, self.fields.title, self.fields.stock
        )
    }
}

/// Errors returned by [`BookStore`] implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed record does not exist
    #[error("Book not found: {0}")]
    NotFound(String),

    /// A record with this ISBN already exists
    #[error("Book with ISBN '{0}' already exists")]
    DuplicateIsbn(String),

    /// The backend could not be reached or timed out
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure
    #[error("Store error: {0}")]
    Other(String),
}

/// Boxed future returned by [`BookStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence collaborator for book records.
///
/// # Dyn Compatibility
///
/// Operations return boxed futures so the store can be shared as
/// `Arc<dyn BookStore>` between the reconciler and concurrent listener
/// workers.
pub trait BookStore: Send + Sync {
    /// Whether a record with this ISBN exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn exists_by_isbn<'a>(&'a self, isbn: &'a str) -> StoreFuture<'a, bool>;

    /// Look up a record by ISBN.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails. Absence is `Ok(None)`.
    fn find_by_isbn<'a>(&'a self, isbn: &'a str) -> StoreFuture<'a, Option<BookRecord>>;

    /// Create a record and assign it an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateIsbn`] if the ISBN is taken, or another
    /// [`StoreError`] if the backend fails.
    fn create(&self, fields: BookFields) -> StoreFuture<'_, BookRecord>;

    /// Replace all fields of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no record has this id, or another
    /// [`StoreError`] if the backend fails.
    fn update(&self, id: BookId, fields: BookFields) -> StoreFuture<'_, BookRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fields() -> BookFields {
        BookFields {
            title: "Go".to_string(),
            author: "A".to_string(),
            isbn: "978-1".to_string(),
            description: None,
            price: dec!(9.99),
            stock: 3,
            category: BookCategory::Technology,
        }
    }

    #[test]
    fn with_stock_only_touches_stock() {
        let updated = fields().with_stock(42);
        assert_eq!(updated.stock, 42);
        assert_eq!(BookFields { stock: 3, ..updated }, fields());
    }

    #[test]
    fn record_display() {
        let record = BookRecord {
            id: BookId::new(1),
            fields: fields(),
        };
        let display = record.to_string();
        assert!(display.contains("id: 1"));
        assert!(display.contains("978-1"));
    }

    #[test]
    fn book_store_is_dyn_compatible() {
        fn assert_dyn(_: Option<&dyn BookStore>) {}
        assert_dyn(None);
    }
}
