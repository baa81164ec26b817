//! A `RecordStore` on top of PostgreSQL, with a change feed kept in a companion table.
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, error};

use crate::change::{ChangeEvent, ChangeKind};
use crate::record::{Record, RecordField};
use crate::store::{RecordStore, StoreError, StoreResult};

const RECORD_COLUMNS: &str =
    "supplier_ref, status, title, description, start_time, end_time, internal_identifier";

/// A row of the change feed table as read by `dequeue_changes`.
#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: i64,
    kind: ChangeKind,
    new_image: Option<Json<Record>>,
}

impl From<ChangeRow> for ChangeEvent {
    fn from(row: ChangeRow) -> Self {
        ChangeEvent::new(row.id, row.kind, row.new_image.map(|image| image.0))
    }
}

/// How many failed deliveries a change event survives before it is dropped from the feed.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: i32 = 10;

/// Records live in `table`; every mutation appends to `{table}_feed` in the same transaction,
/// so the feed can never observe a change that was rolled back, nor miss one that was committed.
#[derive(Clone)]
pub struct PgStore {
    table: String,
    feed_table: String,
    max_delivery_attempts: i32,
    pool: PgPool,
}

impl PgStore {
    /// Initialize a new PgStore backed by `table` in PostgreSQL.
    pub async fn new(
        table: &str,
        url: &str,
        max_connections: u32,
        app_name: &'static str,
    ) -> StoreResult<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|error| StoreError::ConnectionError { error })?
            .application_name(app_name);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);

        Ok(Self::new_from_pool(table, pool))
    }

    /// Initialize a new PgStore backed by `table` in PostgreSQL using an existing pool.
    pub fn new_from_pool(table: &str, pool: PgPool) -> Self {
        Self {
            table: table.to_owned(),
            feed_table: format!("{}_feed", table),
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            pool,
        }
    }

    /// Set how many failed deliveries an event may accumulate before it is discarded.
    pub fn max_delivery_attempts(mut self, attempts: i32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Confirm that the records table and its feed exist. The schema is created by migrations,
    /// so a `TABLE_NAME` with no matching migration is caught here rather than on first write.
    pub async fn check_schema(&self) -> StoreResult<()> {
        for table in [&self.table, &self.feed_table] {
            let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
                .bind(format!(r#""{}""#, table))
                .fetch_one(&self.pool)
                .await
                .map_err(|error| StoreError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?;

            if !exists {
                return Err(StoreError::MissingTable {
                    table: table.to_owned(),
                });
            }
        }

        Ok(())
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|error| StoreError::ConnectionError { error })
    }

    async fn append_change(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        kind: ChangeKind,
        image: &Record,
    ) -> StoreResult<()> {
        let query = format!(
            r#"
INSERT INTO "{}"
    (kind, new_image, created_at)
VALUES
    ($1, $2, NOW())
            "#,
            &self.feed_table
        );

        sqlx::query(&query)
            .bind(kind)
            .bind(Json(image))
            .execute(&mut **tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> StoreResult<()> {
        tx.commit()
            .await
            .map_err(|error| StoreError::QueryError {
                command: "COMMIT".to_owned(),
                error,
            })
    }

    /// Fetch a record by key.
    pub async fn get(&self, supplier_ref: &str) -> StoreResult<Option<Record>> {
        let query = format!(
            r#"SELECT {} FROM "{}" WHERE supplier_ref = $1"#,
            RECORD_COLUMNS, &self.table
        );

        sqlx::query_as(&query)
            .bind(supplier_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// Take the oldest `limit` change events off the feed.
    ///
    /// Only one consumer may hold the feed at a time, which keeps events for a given key in
    /// order. Returns `None` when the feed is empty or another consumer currently holds it.
    /// The returned batch must be committed for its events to be consumed; dropping it puts
    /// every event back on the feed. Events that already failed `max_delivery_attempts` times
    /// are discarded first.
    pub async fn dequeue_changes(&self, limit: u32) -> StoreResult<Option<PgChangeBatch>> {
        let mut tx = self.begin().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtext($1))")
            .bind(&self.feed_table)
            .fetch_one(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        if !acquired {
            debug!("change feed {} is held by another consumer", self.feed_table);
            return Ok(None);
        }

        let discard = format!(
            r#"DELETE FROM "{}" WHERE attempts >= $1 RETURNING id"#,
            &self.feed_table
        );
        let discarded: Vec<i64> = sqlx::query_scalar(&discard)
            .bind(self.max_delivery_attempts)
            .fetch_all(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        if !discarded.is_empty() {
            error!(
                "discarded change events {:?} from {} after {} failed deliveries",
                discarded, self.feed_table, self.max_delivery_attempts
            );
            metrics::counter!("relay_feed_events_discarded").increment(discarded.len() as u64);
        }

        let query = format!(
            r#"
SELECT
    id, kind, new_image
FROM
    "{}"
ORDER BY
    id
LIMIT $1
            "#,
            &self.feed_table
        );

        let rows: Vec<ChangeRow> = sqlx::query_as(&query)
            .bind(i64::from(limit))
            .fetch_all(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        if rows.is_empty() {
            if !discarded.is_empty() {
                Self::commit(tx).await?;
            }
            return Ok(None);
        }

        Ok(Some(PgChangeBatch {
            events: rows.into_iter().map(ChangeEvent::from).collect(),
            feed_table: self.feed_table.clone(),
            transaction: tx,
        }))
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn put_if_absent(&self, record: &Record) -> StoreResult<()> {
        let mut tx = self.begin().await?;

        let query = format!(
            r#"
INSERT INTO "{}"
    ({})
VALUES
    ($1, $2, $3, $4, $5, $6, $7)
            "#,
            &self.table, RECORD_COLUMNS
        );

        sqlx::query(&query)
            .bind(&record.supplier_ref)
            .bind(&record.status)
            .bind(&record.title)
            .bind(&record.description)
            .bind(&record.start_time)
            .bind(&record.end_time)
            .bind(&record.internal_identifier)
            .execute(&mut *tx)
            .await
            .map_err(|error| match error {
                sqlx::Error::Database(ref db_error) if db_error.is_unique_violation() => {
                    StoreError::ConditionFailed {
                        supplier_ref: record.supplier_ref.clone(),
                    }
                }
                error => StoreError::QueryError {
                    command: "INSERT".to_owned(),
                    error,
                },
            })?;

        self.append_change(&mut tx, ChangeKind::Insert, record)
            .await?;

        Self::commit(tx).await
    }

    async fn update_field(
        &self,
        supplier_ref: &str,
        field: RecordField,
        value: &str,
    ) -> StoreResult<()> {
        let mut tx = self.begin().await?;

        // Writing a value equal to the current one is not a change and must not reach the feed.
        let query = format!(
            r#"
UPDATE
    "{0}"
SET
    {1} = $1
WHERE
    supplier_ref = $2
    AND {1} IS DISTINCT FROM $1
RETURNING
    {2}
            "#,
            &self.table,
            field.column(),
            RECORD_COLUMNS
        );

        let updated: Option<Record> = sqlx::query_as(&query)
            .bind(value)
            .bind(supplier_ref)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        if let Some(record) = updated {
            self.append_change(&mut tx, ChangeKind::Modify, &record)
                .await?;
        }

        Self::commit(tx).await
    }
}

/// A batch of change events held under the feed lock until committed.
pub struct PgChangeBatch {
    pub events: Vec<ChangeEvent>,
    feed_table: String,
    transaction: Transaction<'static, Postgres>,
}

impl PgChangeBatch {
    /// Remove the batch's events from the feed and release the feed lock.
    pub async fn commit(mut self) -> StoreResult<()> {
        let ids: Vec<i64> = self.events.iter().map(|event| event.id).collect();
        let query = format!(r#"DELETE FROM "{}" WHERE id = ANY($1)"#, &self.feed_table);

        sqlx::query(&query)
            .bind(&ids[..])
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        PgStore::commit(self.transaction).await
    }

    /// Charge a failed delivery to `event_id` and release the feed lock. Every event stays on
    /// the feed to be delivered again, until the charged one runs out of attempts.
    pub async fn retry(mut self, event_id: i64) -> StoreResult<()> {
        let query = format!(
            r#"UPDATE "{}" SET attempts = attempts + 1 WHERE id = $1"#,
            &self.feed_table
        );

        sqlx::query(&query)
            .bind(event_id)
            .execute(&mut *self.transaction)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        PgStore::commit(self.transaction).await
    }

    /// Release the feed lock without consuming anything.
    pub async fn rollback(self) -> StoreResult<()> {
        self.transaction
            .rollback()
            .await
            .map_err(|error| StoreError::QueryError {
                command: "ROLLBACK".to_owned(),
                error,
            })
    }
}
