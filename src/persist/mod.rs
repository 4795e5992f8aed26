/// Durable SQLite store.
pub mod sqlite;

use thiserror::Error;

use crate::{
    op::Operation,
    types::{OpId, OpStatus},
};

/// Storage failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload envelope could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// `put` found an existing record with the same id.
    #[error("operation already exists: {0}")]
    DuplicateKey(OpId),
    /// No record with the given id.
    #[error("operation not found: {0}")]
    NotFound(OpId),
    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// Store-specific failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for store calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Keyed table of queued operations with a by-status index.
///
/// Every method commits fully before returning.
pub trait OperationStore: Send {
    /// Inserts a new operation; an existing id is [`PersistError::DuplicateKey`].
    fn put(&mut self, op: &Operation) -> PersistResult<()>;
    /// Loads one operation; an absent id is [`PersistError::NotFound`].
    fn get(&self, id: &str) -> PersistResult<Operation>;
    /// Ordered by `created_at_ms`, then insertion order.
    fn list_by_status(&self, status: OpStatus) -> PersistResult<Vec<Operation>>;
    /// Number of operations in `status`.
    fn count_by_status(&self, status: OpStatus) -> PersistResult<usize> {
        Ok(self.list_by_status(status)?.len())
    }
    /// Replaces the mutable fields of an existing operation.
    fn update(&mut self, op: &Operation) -> PersistResult<()>;
    /// Returns whether a record was removed; absent ids are not an error.
    fn delete(&mut self, id: &str) -> PersistResult<bool>;
    /// Forces buffered state to stable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

impl<T: OperationStore + ?Sized> OperationStore for Box<T> {
    fn put(&mut self, op: &Operation) -> PersistResult<()> {
        (**self).put(op)
    }
    fn get(&self, id: &str) -> PersistResult<Operation> {
        (**self).get(id)
    }
    fn list_by_status(&self, status: OpStatus) -> PersistResult<Vec<Operation>> {
        (**self).list_by_status(status)
    }
    fn count_by_status(&self, status: OpStatus) -> PersistResult<usize> {
        (**self).count_by_status(status)
    }
    fn update(&mut self, op: &Operation) -> PersistResult<()> {
        (**self).update(op)
    }
    fn delete(&mut self, id: &str) -> PersistResult<bool> {
        (**self).delete(id)
    }
    fn flush(&mut self) -> PersistResult<()> {
        (**self).flush()
    }
}
