//! Decide which change feed events become outbound ITSM messages.
use serde::Serialize;
use tracing::{info, warn};

use relay_common::change::{ChangeEvent, ChangeKind};
use relay_common::record::{Record, STATUS_COMPLETED, STATUS_IN_PROGRESS, STATUS_SCHEDULED};

#[derive(Serialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum MessageType {
    #[serde(rename = "HO_SIAM_IN_REST_CHG_POST_JSON")]
    Create,
    #[serde(rename = "HO_SIAM_IN_REST_CHG_UPDATE_JSON")]
    Update,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Create => "create",
            MessageType::Update => "update",
        }
    }
}

/// The record fields the ITSM API cares about.
#[derive(Serialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub supplier_ref: String,
    pub status: String,
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub success: bool,
}

impl Payload {
    fn from_record(record: &Record, success: bool) -> Self {
        Self {
            supplier_ref: record.supplier_ref.clone(),
            status: record.status.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            start_time: record.start_time.clone(),
            end_time: record.end_time.clone(),
            success,
        }
    }
}

#[derive(Serialize, Debug, PartialEq, Eq, Clone)]
pub struct OutboundMessage {
    #[serde(rename = "messageid")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_identifier: Option<String>,
    pub payload: Payload,
}

/// Classify a change event. Returns `None` for events that should not be forwarded.
///
/// An in-progress or completed record is always an update, even when it is first seen as an
/// insertion; only a newly inserted scheduled record is a create.
pub fn classify(event: &ChangeEvent) -> Option<OutboundMessage> {
    if event.kind == ChangeKind::Remove {
        info!(
            "ignoring change event {}, as it is of type {}",
            event.id, event.kind
        );
        return None;
    }

    let Some(record) = &event.new_image else {
        warn!(
            "ignoring change event {} of type {} without a new image",
            event.id, event.kind
        );
        return None;
    };

    info!("processing change event {}, type {}", event.id, event.kind);

    match record.status.as_str() {
        STATUS_IN_PROGRESS | STATUS_COMPLETED => Some(OutboundMessage {
            message_type: MessageType::Update,
            internal_identifier: record
                .internal_identifier
                .clone()
                .filter(|identifier| !identifier.is_empty()),
            payload: Payload::from_record(record, true),
        }),
        STATUS_SCHEDULED if event.kind == ChangeKind::Insert => Some(OutboundMessage {
            message_type: MessageType::Create,
            internal_identifier: None,
            payload: Payload::from_record(record, false),
        }),
        status => {
            info!(
                "ignoring event for {}, status: {}",
                record.supplier_ref, status
            );
            metrics::counter!("relay_events_ignored").increment(1);
            None
        }
    }
}
