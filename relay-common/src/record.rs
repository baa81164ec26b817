use serde::{Deserialize, Serialize};

/// Status values the service desk uses for change tickets that we act on.
pub const STATUS_SCHEDULED: &str = "Scheduled";
pub const STATUS_IN_PROGRESS: &str = "In Progress";
pub const STATUS_COMPLETED: &str = "Completed";

/// A change ticket as persisted in the store, keyed by `supplier_ref`.
///
/// `start_time` and `end_time` are always stored in the target system's local time, rendered as
/// `YYYY-MM-DD HH:MM:SS`. `internal_identifier` stays empty until the ITSM API assigns one.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub supplier_ref: String,
    pub status: String,
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_identifier: Option<String>,
}

/// The fields of a `Record` that may change after creation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecordField {
    Status,
    InternalIdentifier,
}

impl RecordField {
    /// Column backing this field in the records table.
    pub fn column(&self) -> &'static str {
        match self {
            RecordField::Status => "status",
            RecordField::InternalIdentifier => "internal_identifier",
        }
    }
}

impl Record {
    /// Apply a single field update, returning whether the record changed.
    pub fn set_field(&mut self, field: RecordField, value: &str) -> bool {
        match field {
            RecordField::Status => {
                if self.status == value {
                    return false;
                }
                self.status = value.to_owned();
            }
            RecordField::InternalIdentifier => {
                if self.internal_identifier.as_deref() == Some(value) {
                    return false;
                }
                self.internal_identifier = Some(value.to_owned());
            }
        }
        true
    }
}
