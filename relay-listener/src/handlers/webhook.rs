use std::sync::Arc;
use std::time::Instant;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_derive::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::normalize::Normalizer;
use crate::writer::{RecordWriter, WriteError};

#[derive(Serialize, Deserialize, Debug)]
pub struct WebhookPostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ListenerState {
    normalizer: Arc<Normalizer>,
    writer: RecordWriter,
}

impl ListenerState {
    pub fn new(normalizer: Normalizer, writer: RecordWriter) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            writer,
        }
    }
}

type WebhookResult = Result<Json<WebhookPostResponse>, (StatusCode, Json<WebhookPostResponse>)>;

/// Receive a change ticket webhook and persist it.
/// The body is read raw so that payloads sent without a JSON content type are still accepted.
pub async fn post_webhook(State(state): State<ListenerState>, body: Bytes) -> WebhookResult {
    metrics::counter!("relay_webhooks_received").increment(1);

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| bad_request(&format!("could not parse payload: {}", err)))?;
    debug!("received payload: {}", payload);

    let record = state
        .normalizer
        .normalize(&payload)
        .map_err(|err| bad_request(&err.to_string()))?;

    info!(
        "processing event: {}, status: {}",
        record.supplier_ref, record.status
    );

    let start_time = Instant::now();

    match state.writer.insert_or_update(&record).await {
        Ok(_) => {}
        Err(WriteError::MissingKey) => return Err(bad_request("missing supplierRef")),
        Err(err) => return Err(internal_error(err)),
    }

    metrics::histogram!("relay_store_write_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());

    Ok(Json(WebhookPostResponse { error: None }))
}

fn bad_request(msg: &str) -> (StatusCode, Json<WebhookPostResponse>) {
    warn!("rejected webhook: {}", msg);
    (
        StatusCode::BAD_REQUEST,
        Json(WebhookPostResponse {
            error: Some(msg.to_owned()),
        }),
    )
}

fn internal_error<E>(err: E) -> (StatusCode, Json<WebhookPostResponse>)
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(WebhookPostResponse {
            error: Some(err.to_string()),
        }),
    )
}
