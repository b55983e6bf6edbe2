//! In-memory book store with an optional call log and failure injection.

use book_sync_core::book::{BookFields, BookId, BookRecord, BookStore, StoreError, StoreFuture};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Store operations, used to target injected failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `exists_by_isbn`
    ExistsByIsbn,
    /// `find_by_isbn`
    FindByIsbn,
    /// `create`
    Create,
    /// `update`
    Update,
}

/// A recorded store call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    /// `exists_by_isbn(isbn)`
    ExistsByIsbn(String),
    /// `find_by_isbn(isbn)`
    FindByIsbn(String),
    /// `create` for this ISBN
    Create(String),
    /// `update` of this id
    Update(BookId),
}

#[derive(Debug)]
struct Failure {
    error: StoreError,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct StoreState {
    books: BTreeMap<BookId, BookFields>,
    next_id: u64,
    /// `None` unless the store was built with [`InMemoryBookStore::with_call_log`]
    calls: Option<Vec<StoreCall>>,
    failures: HashMap<StoreOp, Failure>,
}

impl StoreState {
    fn record(&mut self, op: StoreOp, call: StoreCall) -> Result<(), StoreError> {
        if let Some(calls) = self.calls.as_mut() {
            calls.push(call);
        }

        let Some(failure) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        let error = failure.error.clone();
        match failure.remaining.as_mut() {
            None => Err(error),
            Some(0) => {
                self.failures.remove(&op);
                Ok(())
            },
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    self.failures.remove(&op);
                }
                Err(error)
            },
        }
    }

    fn find(&self, isbn: &str) -> Option<BookRecord> {
        self.books
            .iter()
            .find(|(_, fields)| fields.isbn == isbn)
            .map(|(id, fields)| BookRecord {
                id: *id,
                fields: fields.clone(),
            })
    }
}

/// In-memory [`BookStore`].
///
/// Identifiers are assigned sequentially starting at 1. Clones share state.
/// Memory grows with the number of books only; the call log used by tests is
/// opt-in through [`Self::with_call_log`]. A poisoned lock is recovered, not
/// propagated as a panic.
///
/// # Example
///
/// ```
/// use book_sync_testing::{InMemoryBookStore, StoreOp};
/// use book_sync_core::book::StoreError;
///
/// let store = InMemoryBookStore::with_call_log();
/// store.fail_times(StoreOp::Create, StoreError::Unavailable("db down".into()), 2);
/// assert!(store.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryBookStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that records every [`BookStore`] call.
    #[must_use]
    pub fn with_call_log() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                calls: Some(Vec::new()),
                ..StoreState::default()
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record directly, bypassing the call log and injected failures.
    pub fn insert(&self, fields: BookFields) -> BookRecord {
        let mut state = self.write();
        state.next_id += 1;
        let id = BookId::new(state.next_id);
        state.books.insert(id, fields.clone());
        BookRecord { id, fields }
    }

    /// Record with this id, if any.
    #[must_use]
    pub fn get(&self, id: BookId) -> Option<BookRecord> {
        let state = self.read();
        state.books.get(&id).map(|fields| BookRecord {
            id,
            fields: fields.clone(),
        })
    }

    /// Record with this ISBN, if any.
    #[must_use]
    pub fn get_by_isbn(&self, isbn: &str) -> Option<BookRecord> {
        self.read().find(isbn)
    }

    /// Every record, ordered by id.
    #[must_use]
    pub fn records(&self) -> Vec<BookRecord> {
        let state = self.read();
        state
            .books
            .iter()
            .map(|(id, fields)| BookRecord {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().books.len()
    }

    /// Whether the store has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().books.is_empty()
    }

    /// Calls made through the [`BookStore`] trait, in order.
    ///
    /// Always empty unless built with [`Self::with_call_log`].
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.read().calls.clone().unwrap_or_default()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        if let Some(calls) = self.write().calls.as_mut() {
            calls.clear();
        }
    }

    /// Fail every call to `op` with `error` until [`Self::clear_failures`].
    pub fn fail(&self, op: StoreOp, error: StoreError) {
        self.write().failures.insert(
            op,
            Failure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls to `op` with `error`.
    pub fn fail_times(&self, op: StoreOp, error: StoreError, times: usize) {
        self.write().failures.insert(
            op,
            Failure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.write().failures.clear();
    }
}

impl BookStore for InMemoryBookStore {
    fn exists_by_isbn<'a>(&'a self, isbn: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.write();
            state.record(StoreOp::ExistsByIsbn, StoreCall::ExistsByIsbn(isbn.to_string()))?;
            Ok(state.find(isbn).is_some())
        })
    }

    fn find_by_isbn<'a>(&'a self, isbn: &'a str) -> StoreFuture<'a, Option<BookRecord>> {
        Box::pin(async move {
            let mut state = self.write();
            state.record(StoreOp::FindByIsbn, StoreCall::FindByIsbn(isbn.to_string()))?;
            Ok(state.find(isbn))
        })
    }

    fn create(&self, fields: BookFields) -> StoreFuture<'_, BookRecord> {
        Box::pin(async move {
            let mut state = self.write();
            state.record(StoreOp::Create, StoreCall::Create(fields.isbn.clone()))?;
            if state.find(&fields.isbn).is_some() {
                return Err(StoreError::DuplicateIsbn(fields.isbn));
            }

            state.next_id += 1;
            let id = BookId::new(state.next_id);
            state.books.insert(id, fields.clone());
            Ok(BookRecord { id, fields })
        })
    }

    fn update(&self, id: BookId, fields: BookFields) -> StoreFuture<'_, BookRecord> {
        Box::pin(async move {
            let mut state = self.write();
            state.record(StoreOp::Update, StoreCall::Update(id))?;

            if let Some(other) = state.find(&fields.isbn).filter(|other| other.id != id) {
                return Err(StoreError::DuplicateIsbn(other.fields.isbn));
            }
            let Some(existing) = state.books.get_mut(&id) else {
                return Err(StoreError::NotFound(format!("id {id}")));
            };
            *existing = fields.clone();
            Ok(BookRecord { id, fields })
        })
    }
}
