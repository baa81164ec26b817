use std::sync::Arc;

use tracing::info;

use relay_common::record::RecordField;
use relay_common::store::RecordStore;

use crate::error::WritebackError;

/// Records identifiers assigned by the ITSM API against the originating record.
#[derive(Clone)]
pub struct IdentifierWriteback {
    store: Arc<dyn RecordStore>,
}

impl IdentifierWriteback {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn assign_identifier(
        &self,
        supplier_ref: &str,
        identifier: &str,
    ) -> Result<(), WritebackError> {
        if supplier_ref.is_empty() {
            return Err(WritebackError::MissingKey);
        }

        self.store
            .update_field(supplier_ref, RecordField::InternalIdentifier, identifier)
            .await?;

        info!("added change ref {} to {}", identifier, supplier_ref);
        metrics::counter!("relay_identifiers_assigned").increment(1);

        Ok(())
    }
}
