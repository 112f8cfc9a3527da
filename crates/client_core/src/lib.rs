use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use shared::protocol::{CREATE_LOCATION_ROUTE, NOTIFICATIONS_ROUTE};
use url::Url;

pub mod activity_log;
pub mod coordinator;
pub mod error;
pub mod subscription;
pub mod transport;

pub use activity_log::{ActivityLog, LogEntry, LogSink};
pub use coordinator::{Outcome, SubmissionCoordinator, WaitConfig};
pub use error::{StreamError, TransportError, WaitError};
pub use subscription::{EventConnector, EventSubscription, NotificationEvent, SseConnector};
pub use transport::{CommandResult, HttpTransport, Transport};

const DEFAULT_SERVER_URL: &str = "http://localhost:3001";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin of the backend, e.g. `http://localhost:3001`.
    pub server_url: String,
    /// Upper bound for a create request, not counting a server-side wait.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self, route: &str) -> Result<Url> {
        let base = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url: {}", self.server_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        base.join(route)
            .with_context(|| format!("failed to build endpoint {route}"))
    }
}

/// Builds a coordinator talking HTTP and SSE to the configured backend.
pub fn http_coordinator(config: &ClientConfig) -> Result<SubmissionCoordinator> {
    // No overall client timeout: it would also cut the long-lived event stream.
    let http = Client::builder()
        .connect_timeout(config.request_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let transport = HttpTransport::new(
        http.clone(),
        config.endpoint(CREATE_LOCATION_ROUTE)?,
        config.request_timeout,
    );
    let connector = SseConnector::new(http, config.endpoint(NOTIFICATIONS_ROUTE)?);

    Ok(SubmissionCoordinator::new(
        Arc::new(transport),
        Arc::new(EventSubscription::new(Arc::new(connector))),
    ))
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
