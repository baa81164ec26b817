use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use relay_common::record::{Record, RecordField};
use relay_common::store::{RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("missing supplierRef")]
    MissingKey,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WriteOutcome {
    Created,
    StatusUpdated,
}

/// Persists normalized records: the first delivery for a key creates the record, later ones
/// only move its status.
#[derive(Clone)]
pub struct RecordWriter {
    store: Arc<dyn RecordStore>,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn insert_or_update(&self, record: &Record) -> Result<WriteOutcome, WriteError> {
        if record.supplier_ref.is_empty() {
            return Err(WriteError::MissingKey);
        }

        match self.store.put_if_absent(record).await {
            Ok(()) => {
                info!("added {} - {}", record.supplier_ref, record.status);
                metrics::counter!("relay_records_created").increment(1);
                Ok(WriteOutcome::Created)
            }
            Err(error) if error.is_condition_failed() => {
                info!(
                    "{} exists, will try to update status instead",
                    record.supplier_ref
                );
                self.store
                    .update_field(&record.supplier_ref, RecordField::Status, &record.status)
                    .await?;

                info!("updated {} with {}", record.supplier_ref, record.status);
                metrics::counter!("relay_records_updated").increment(1);
                Ok(WriteOutcome::StatusUpdated)
            }
            Err(error) => Err(error.into()),
        }
    }
}
