use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::{
    domain::CreateLocation,
    error::ApiError,
    protocol::{
        CommandAcceptedResponse, NOTIFICATION_AWAIT_HEADER, NOTIFICATION_SIMULATE_TIMEOUT_HEADER,
        NOTIFICATION_TIMEOUT_HEADER,
    },
};
use tracing::{info, warn};
use url::Url;

use crate::{coordinator::WaitConfig, error::TransportError};

pub type CommandResult = Result<CommandAcceptedResponse, TransportError>;

/// Sends a create command to the backend, at most once per call.
///
/// Implementations never panic on network or protocol failures; every
/// failure comes back as a [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, command: &CreateLocation, wait: &WaitConfig) -> CommandResult;
}

pub struct HttpTransport {
    http: Client,
    endpoint: Url,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(http: Client, endpoint: Url, request_timeout: Duration) -> Self {
        Self {
            http,
            endpoint,
            request_timeout,
        }
    }

    async fn post(&self, command: &CreateLocation, wait: &WaitConfig) -> CommandResult {
        let mut request = self.http.post(self.endpoint.clone()).json(command);
        if wait.await_on_server {
            // The server holds the response open for the wait window.
            request = request
                .header(NOTIFICATION_AWAIT_HEADER, "true")
                .header(
                    NOTIFICATION_TIMEOUT_HEADER,
                    wait.notification_timeout_secs.to_string(),
                )
                .header(
                    NOTIFICATION_SIMULATE_TIMEOUT_HEADER,
                    wait.simulate_timeout.to_string(),
                )
                .timeout(self.request_timeout.saturating_add(wait.timeout()));
        } else {
            request = request.timeout(self.request_timeout);
        }

        let response = request.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let body = response.bytes().await.map_err(TransportError::from_reqwest)?;
        serde_json::from_slice(&body).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, command: &CreateLocation, wait: &WaitConfig) -> CommandResult {
        info!(
            endpoint = %self.endpoint,
            name = %command.name,
            category = %command.category,
            await_on_server = wait.await_on_server,
            "transport: sending create location command"
        );
        let result = self.post(command, wait).await;
        match &result {
            Ok(accepted) => info!(id = %accepted.id, "transport: command accepted"),
            Err(error) => warn!(%error, "transport: command failed"),
        }
        result
    }
}

/// Prefers the backend's `{"error": ..}` body, then raw text, then the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<ApiError>(body) {
        return api_error.error;
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
