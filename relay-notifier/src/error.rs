use reqwest::StatusCode;
use thiserror::Error;

use relay_common::store::StoreError;

/// Errors raised while delivering a message to the ITSM API.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to serialize outbound message: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("request to the ITSM API failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("the ITSM API responded with {status}: {body}")]
    StatusError { status: StatusCode, body: String },
    #[error("request failed, the ITSM API did not return a change identifier")]
    RemoteRejected,
    #[error("unrecognized response from the ITSM API: {0}")]
    UnrecognizedResponse(String),
}

#[derive(Error, Debug)]
pub enum WritebackError {
    #[error("missing supplierRef")]
    MissingKey,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A failure that aborts the whole change batch.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to notify the ITSM API: {0}")]
    Notify(#[from] NotifyError),
    #[error("failed to write back the change identifier: {0}")]
    Writeback(#[from] WritebackError),
}

/// The event a batch failed on, so that the failure can be charged to it.
#[derive(Error, Debug)]
#[error("change event {event_id} failed: {error}")]
pub struct BatchError {
    pub event_id: i64,
    #[source]
    pub error: HandlerError,
}

/// Enumeration of errors that stop the change feed worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a database error occurred while consuming the change feed")]
    DatabaseError(#[from] StoreError),
}
