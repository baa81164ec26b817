//! Receive service desk webhooks and persist them as change records.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;

use relay_common::metrics::{serve, setup_metrics_routes};
use relay_common::pgstore::PgStore;
use relay_listener::config::Config;
use relay_listener::handlers::{add_routes, ListenerState};
use relay_listener::writer::RecordWriter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let normalizer = config.normalizer()?;

    let store = PgStore::new(
        config.store.table()?,
        &config.store.database_url,
        config.store.max_pg_connections,
        "relay-listener",
    )
    .await?;
    store.check_schema().await?;

    let state = ListenerState::new(normalizer, RecordWriter::new(Arc::new(store)));
    let app = add_routes(
        Router::new(),
        state,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app, "relay-listener")?;

    if let Err(e) = serve(app, &config.bind()).await {
        tracing::error!("failed to start relay-listener http server, {}", e);
        return Err(e.into());
    }

    Ok(())
}
