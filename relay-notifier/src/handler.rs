use std::time::Instant;

use tracing::info;

use relay_common::change::ChangeEvent;

use crate::classify::classify;
use crate::error::{BatchError, HandlerError};
use crate::notify::ItsmClient;
use crate::writeback::IdentifierWriteback;

/// Forwards a batch of change events to the ITSM API, in order.
pub struct ChangeHandler {
    client: ItsmClient,
    writeback: IdentifierWriteback,
}

impl ChangeHandler {
    pub fn new(client: ItsmClient, writeback: IdentifierWriteback) -> Self {
        Self { client, writeback }
    }

    /// Handle every event in the batch. Ignored events are skipped, but the first failure
    /// aborts the batch so that it can be redelivered as a whole.
    pub async fn handle_events(&self, events: &[ChangeEvent]) -> Result<(), BatchError> {
        for event in events {
            self.handle_event(event)
                .await
                .map_err(|error| BatchError {
                    event_id: event.id,
                    error,
                })?;
        }

        Ok(())
    }

    async fn handle_event(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        let Some(message) = classify(event) else {
            return Ok(());
        };

        let start_time = Instant::now();
        let identifier = self.client.notify(&message).await?;
        metrics::histogram!("relay_notify_duration_seconds")
            .record(start_time.elapsed().as_secs_f64());
        metrics::counter!(
            "relay_notifications_sent",
            &[("message_type", message.message_type.as_str())]
        )
        .increment(1);

        match identifier {
            Some(identifier) => {
                self.writeback
                    .assign_identifier(&message.payload.supplier_ref, &identifier)
                    .await?
            }
            None => info!(
                "no new identifier for {}, nothing to write back",
                message.payload.supplier_ref
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time;

    use httpmock::prelude::*;
    use serde_json::json;
    use url::Url;

    use relay_common::change::ChangeKind;
    use relay_common::memory::MemoryStore;
    use relay_common::record::Record;
    use relay_common::store::RecordStore;

    use crate::config::ApiCredentials;
    use crate::error::NotifyError;

    fn handler(server: &MockServer, store: Arc<MemoryStore>) -> ChangeHandler {
        let credentials = ApiCredentials {
            url: Url::parse(&server.url("/api/change")).unwrap(),
            username: "user".to_owned(),
            password: "pass".to_owned(),
        };
        let client = ItsmClient::new(credentials, time::Duration::from_millis(5000)).unwrap();
        ChangeHandler::new(client, IdentifierWriteback::new(store))
    }

    fn record(supplier_ref: &str, status: &str) -> Record {
        Record {
            supplier_ref: supplier_ref.to_owned(),
            status: status.to_owned(),
            title: "foo change".to_owned(),
            description: "lorem ipsum".to_owned(),
            start_time: "2020-09-01 19:30:00".to_owned(),
            end_time: "2020-09-01 20:30:00".to_owned(),
            internal_identifier: None,
        }
    }

    #[tokio::test]
    async fn created_change_identifier_is_written_back() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/change")
                .json_body_partial(r#"{"messageid": "HO_SIAM_IN_REST_CHG_POST_JSON"}"#);
            then.status(200).json_body(json!({
                "result": { "internal_identifier": "CHG0123", "log": "Inserting change" }
            }));
        });

        let store = Arc::new(MemoryStore::new());
        store.put_if_absent(&record("abc-1", "Scheduled")).await.unwrap();
        let events = store.drain_changes();

        handler(&server, store.clone())
            .handle_events(&events)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            store.get("abc-1").unwrap().internal_identifier.as_deref(),
            Some("CHG0123")
        );
    }

    #[tokio::test]
    async fn update_carries_identifier_and_writes_nothing() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/change").json_body_partial(
                r#"{
                    "messageid": "HO_SIAM_IN_REST_CHG_UPDATE_JSON",
                    "internal_identifier": "CHG0123",
                    "payload": { "status": "Completed", "success": true }
                }"#,
            );
            then.status(200).json_body(json!({
                "result": { "internal_identifier": "CHG0123", "log": "Updating change" }
            }));
        });

        let mut image = record("abc-1", "Completed");
        image.internal_identifier = Some("CHG0123".to_owned());
        let events = vec![ChangeEvent::new(1, ChangeKind::Modify, Some(image))];

        let store = Arc::new(MemoryStore::new());
        handler(&server, store.clone())
            .handle_events(&events)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn ignored_events_do_not_stop_the_batch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/change");
            then.status(200).json_body(json!({
                "result": { "internal_identifier": "CHG0123", "log": "Updating change" }
            }));
        });

        let events = vec![
            ChangeEvent::new(1, ChangeKind::Remove, None),
            ChangeEvent::new(2, ChangeKind::Modify, Some(record("abc-1", "Scheduled"))),
            ChangeEvent::new(3, ChangeKind::Modify, Some(record("abc-1", "In Progress"))),
        ];

        handler(&server, Arc::new(MemoryStore::new()))
            .handle_events(&events)
            .await
            .unwrap();

        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn batch_of_only_ignored_events_makes_no_requests() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });

        let events = vec![
            ChangeEvent::new(1, ChangeKind::Remove, Some(record("abc-1", "Completed"))),
            ChangeEvent::new(2, ChangeKind::Modify, Some(record("abc-2", "Cancelled"))),
        ];

        handler(&server, Arc::new(MemoryStore::new()))
            .handle_events(&events)
            .await
            .unwrap();

        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn first_failure_aborts_the_batch() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(POST)
                .path("/api/change")
                .json_body_partial(r#"{"payload": {"supplierRef": "abc-1"}}"#);
            then.status(500).body("nope");
        });
        let never = server.mock(|when, then| {
            when.method(POST)
                .path("/api/change")
                .json_body_partial(r#"{"payload": {"supplierRef": "abc-2"}}"#);
            then.status(200).json_body(json!({
                "result": { "internal_identifier": "CHG0124", "log": "Inserting change" }
            }));
        });

        let events = vec![
            ChangeEvent::new(1, ChangeKind::Insert, Some(record("abc-1", "Scheduled"))),
            ChangeEvent::new(2, ChangeKind::Insert, Some(record("abc-2", "Scheduled"))),
        ];

        let err = handler(&server, Arc::new(MemoryStore::new()))
            .handle_events(&events)
            .await
            .unwrap_err();

        assert_eq!(err.event_id, 1);
        assert!(matches!(
            err.error,
            HandlerError::Notify(NotifyError::StatusError { .. })
        ));
        failing.assert_hits(1);
        never.assert_hits(0);
    }

    #[tokio::test]
    async fn created_change_without_key_fails_writeback() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/change");
            then.status(200).json_body(json!({
                "result": { "internal_identifier": "CHG0123", "log": "Inserting change" }
            }));
        });

        let events = vec![ChangeEvent::new(
            1,
            ChangeKind::Insert,
            Some(record("", "Scheduled")),
        )];
        let store = Arc::new(MemoryStore::new());

        let err = handler(&server, store.clone())
            .handle_events(&events)
            .await
            .unwrap_err();

        assert!(matches!(
            err.error,
            HandlerError::Writeback(crate::error::WritebackError::MissingKey)
        ));
        assert_eq!(store.calls(), 0);
    }
}
