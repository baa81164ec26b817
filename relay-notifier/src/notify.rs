use std::time;

use reqwest::header;
use serde_derive::Deserialize;
use tracing::{debug, info};

use crate::classify::OutboundMessage;
use crate::config::ApiCredentials;
use crate::error::NotifyError;

#[derive(Deserialize, Debug)]
struct ItsmResponse {
    result: ItsmResult,
}

#[derive(Deserialize, Debug)]
struct ItsmResult {
    internal_identifier: String,
    #[serde(default)]
    log: Option<String>,
}

/// Client for the ITSM inbound REST endpoint.
#[derive(Clone)]
pub struct ItsmClient {
    client: reqwest::Client,
    credentials: ApiCredentials,
}

impl ItsmClient {
    pub fn new(
        credentials: ApiCredentials,
        request_timeout: time::Duration,
    ) -> Result<Self, NotifyError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Change Relay Notifier")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            credentials,
        })
    }

    /// Send a message to the ITSM API.
    ///
    /// Returns the identifier the API assigned when it created a new change, and `None` when it
    /// updated an existing one.
    pub async fn notify(&self, message: &OutboundMessage) -> Result<Option<String>, NotifyError> {
        let body = serde_json::to_string(message)?;
        debug!("payload that will be sent: {}", body);

        let response = self
            .client
            .post(self.credentials.url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("ITSM API replied with {}: {}", status, body);

        if !status.is_success() {
            return Err(NotifyError::StatusError { status, body });
        }

        interpret_response(&body)
    }
}

/// Decide what a successful response means. The `log` text is the only signal for whether the
/// API created a change or updated one.
fn interpret_response(body: &str) -> Result<Option<String>, NotifyError> {
    let response: ItsmResponse = serde_json::from_str(body)
        .map_err(|e| NotifyError::UnrecognizedResponse(e.to_string()))?;
    let ItsmResult {
        internal_identifier,
        log,
    } = response.result;

    if internal_identifier.is_empty() {
        return Err(NotifyError::RemoteRejected);
    }

    let log = log.unwrap_or_default();
    if log.contains("Inserting") {
        info!("created change {}", internal_identifier);
        Ok(Some(internal_identifier))
    } else if log.contains("Updating") {
        info!("updated change {}", internal_identifier);
        Ok(None)
    } else {
        Err(NotifyError::UnrecognizedResponse(format!(
            "no create or update marker in log: {:?}",
            log
        )))
    }
}
