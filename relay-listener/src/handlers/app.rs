use std::convert::Infallible;

use axum::{extract::DefaultBodyLimit, routing, routing::MethodRouter, Router};
use tower::limit::ConcurrencyLimitLayer;

use super::webhook::{self, ListenerState};

pub fn add_routes(
    router: Router,
    state: ListenerState,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    let webhook: MethodRouter = routing::post(webhook::post_webhook)
        .with_state(state)
        .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
        .layer(DefaultBodyLimit::max(max_body_size));

    // The service desk posts to the root path; `/webhook` is kept for explicit configuration.
    router
        .route("/", routing::get(index).merge(webhook.clone()))
        .route("/webhook", webhook)
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop, just check axum health
}

pub async fn index() -> &'static str {
    "change relay listener"
}
