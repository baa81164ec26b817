//! Forward change feed events to the ITSM API and record the identifiers it assigns.
use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use eyre::Result;

use relay_common::health::HealthRegistry;
use relay_common::metrics::{serve, setup_metrics_routes};
use relay_common::pgstore::PgStore;
use relay_notifier::config::{ApiCredentials, Config};
use relay_notifier::handler::ChangeHandler;
use relay_notifier::notify::ItsmClient;
use relay_notifier::worker::ChangeFeedWorker;
use relay_notifier::writeback::IdentifierWriteback;

async fn index() -> &'static str {
    "change relay notifier"
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let credentials = ApiCredentials::try_from(&config.api)?;

    let store = PgStore::new(
        config.store.table()?,
        &config.store.database_url,
        config.store.max_pg_connections,
        "relay-notifier",
    )
    .await?
    .max_delivery_attempts(config.max_delivery_attempts);
    store.check_schema().await?;

    // A batch may spend the full request timeout on every event before reporting again.
    let deadline = config.request_timeout.0 * config.dequeue_batch_size
        + std::time::Duration::from_secs(30);
    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness.register("worker", time::Duration::try_from(deadline)?);

    let handler = ChangeHandler::new(
        ItsmClient::new(credentials, config.request_timeout.0)?,
        IdentifierWriteback::new(Arc::new(store.clone())),
    );
    let worker = ChangeFeedWorker::new(
        &config.worker_name,
        &store,
        config.dequeue_batch_size,
        config.poll_interval.0,
        handler,
        worker_liveness,
    );

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router, "relay-notifier")?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    worker.run().await?;

    Ok(())
}
