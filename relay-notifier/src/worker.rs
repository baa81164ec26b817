use std::time;

use relay_common::health::HealthHandle;
use relay_common::pgstore::{PgChangeBatch, PgStore};
use tracing::{error, info};

use crate::error::WorkerError;
use crate::handler::ChangeHandler;

/// A worker to poll the change feed and forward each batch to the ITSM API.
pub struct ChangeFeedWorker<'p> {
    /// An identifier for this worker, used in logs.
    name: String,
    /// The store whose change feed we consume.
    store: &'p PgStore,
    /// The most events taken off the feed at once.
    dequeue_batch_size: u32,
    /// The interval for polling the feed.
    poll_interval: time::Duration,
    handler: ChangeHandler,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl<'p> ChangeFeedWorker<'p> {
    pub fn new(
        name: &str,
        store: &'p PgStore,
        dequeue_batch_size: u32,
        poll_interval: time::Duration,
        handler: ChangeHandler,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            store,
            dequeue_batch_size,
            poll_interval,
            handler,
            liveness,
        }
    }

    /// Wait until a batch of changes becomes available on the feed.
    async fn wait_for_changes(&self) -> Result<PgChangeBatch, WorkerError> {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy();

            if let Some(batch) = self.store.dequeue_changes(self.dequeue_batch_size).await? {
                return Ok(batch);
            }
        }
    }

    /// Handle one batch. A successful batch is consumed; a failed one is put back on the feed
    /// to be delivered again, with the failure charged to the event that caused it.
    async fn process_batch(&self, batch: PgChangeBatch) -> Result<(), WorkerError> {
        let size = batch.events.len();

        match self.handler.handle_events(&batch.events).await {
            Ok(()) => {
                batch.commit().await?;
                info!("{} processed {} change events", self.name, size);
            }
            Err(e) => {
                error!(
                    "{} failed to process a batch of {} change events: {}",
                    self.name, size, e
                );
                metrics::counter!("relay_feed_batches_failed").increment(1);
                batch.retry(e.event_id).await?;
            }
        }

        Ok(())
    }

    /// Run this worker to continuously process any changes that reach the feed.
    pub async fn run(&self) -> Result<(), WorkerError> {
        loop {
            let batch = self.wait_for_changes().await?;
            self.process_batch(batch).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use httpmock::prelude::*;
    use relay_common::change::ChangeKind;
    use relay_common::health::HealthRegistry;
    use relay_common::record::Record;
    use relay_common::store::RecordStore;
    use serde_json::json;
    use sqlx::PgPool;
    use url::Url;

    use crate::config::ApiCredentials;
    use crate::notify::ItsmClient;
    use crate::writeback::IdentifierWriteback;

    fn record(supplier_ref: &str) -> Record {
        Record {
            supplier_ref: supplier_ref.to_owned(),
            status: "Scheduled".to_owned(),
            title: "foo change".to_owned(),
            description: "lorem ipsum".to_owned(),
            start_time: "2020-09-01 19:30:00".to_owned(),
            end_time: "2020-09-01 20:30:00".to_owned(),
            internal_identifier: None,
        }
    }

    fn worker<'p>(
        store: &'p PgStore,
        server: &MockServer,
        registry: &HealthRegistry,
    ) -> ChangeFeedWorker<'p> {
        let credentials = ApiCredentials {
            url: Url::parse(&server.url("/api/change")).unwrap(),
            username: "user".to_owned(),
            password: "pass".to_owned(),
        };
        let client = ItsmClient::new(credentials, time::Duration::from_millis(5000)).unwrap();
        let handler = ChangeHandler::new(client, IdentifierWriteback::new(Arc::new(store.clone())));

        ChangeFeedWorker::new(
            "test-worker",
            store,
            10,
            time::Duration::from_millis(10),
            handler,
            registry.register("worker", ::time::Duration::seconds(30)),
        )
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_successful_batch_is_consumed(db: PgPool) {
        let store = PgStore::new_from_pool("change_records", db);
        store.put_if_absent(&record("abc-1")).await.unwrap();

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/change");
            then.status(200).json_body(json!({
                "result": { "internal_identifier": "CHG0123", "log": "Inserting change" }
            }));
        });

        let registry = HealthRegistry::new("liveness");
        let worker = worker(&store, &server, &registry);

        let batch = worker
            .wait_for_changes()
            .await
            .expect("failed to wait and read changes");
        assert!(registry.get_status().healthy);
        worker.process_batch(batch).await.unwrap();

        mock.assert_hits(1);
        let stored = store.get("abc-1").await.unwrap().unwrap();
        assert_eq!(stored.internal_identifier.as_deref(), Some("CHG0123"));

        // Only the identifier writeback is left on the feed.
        let batch = store.dequeue_changes(10).await.unwrap().unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].kind, ChangeKind::Modify);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_failed_batch_is_redelivered(db: PgPool) {
        let store = PgStore::new_from_pool("change_records", db);
        store.put_if_absent(&record("abc-1")).await.unwrap();

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/change");
            then.status(503).body("unavailable");
        });

        let registry = HealthRegistry::new("liveness");
        let worker = worker(&store, &server, &registry);

        let batch = worker.wait_for_changes().await.unwrap();
        worker
            .process_batch(batch)
            .await
            .expect("a failed batch does not stop the worker");

        let batch = store.dequeue_changes(10).await.unwrap().unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].kind, ChangeKind::Insert);
        assert_eq!(batch.events[0].supplier_ref(), "abc-1");

        let stored = store.get("abc-1").await.unwrap().unwrap();
        assert_eq!(stored.internal_identifier, None);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_failing_event_is_dropped_after_max_attempts(db: PgPool) {
        let store = PgStore::new_from_pool("change_records", db).max_delivery_attempts(2);
        store.put_if_absent(&record("abc-1")).await.unwrap();

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/change");
            then.status(200)
                .json_body(json!({ "result": { "internal_identifier": "" } }));
        });

        let registry = HealthRegistry::new("liveness");
        let worker = worker(&store, &server, &registry);

        for _ in 0..2 {
            let batch = worker.wait_for_changes().await.unwrap();
            worker.process_batch(batch).await.unwrap();
        }

        mock.assert_hits(2);
        assert!(store.dequeue_changes(10).await.unwrap().is_none());
    }
}
