use async_trait::async_trait;
use thiserror::Error;

use crate::record::{Record, RecordField};

/// Enumeration of errors a `RecordStore` can report.
/// `ConditionFailed` is the only recoverable kind: it signals that a conditional insert found the
/// key already present. Everything else should be treated as fatal by callers.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record {supplier_ref} already exists")]
    ConditionFailed { supplier_ref: String },
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("failed to serialize change image: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("{0} is not a valid ChangeKind")]
    ParseChangeKindError(String),
    #[error("table {table} does not exist, it must be created by a migration")]
    MissingTable { table: String },
}

impl StoreError {
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StoreError::ConditionFailed { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The capability both halves of the relay need from durable storage.
///
/// Implementations must append a change-feed entry for every mutation that actually changes a
/// record, so that the notifier observes inserts and modifications in order.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create `record` only if no record with the same `supplier_ref` exists.
    /// Returns `StoreError::ConditionFailed` when it does.
    async fn put_if_absent(&self, record: &Record) -> StoreResult<()>;

    /// Set a single field on the record keyed by `supplier_ref`.
    /// Updating a key that does not exist is a successful no-op.
    async fn update_field(
        &self,
        supplier_ref: &str,
        field: RecordField,
        value: &str,
    ) -> StoreResult<()>;
}
