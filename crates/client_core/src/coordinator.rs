use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use shared::domain::{CreateLocation, LocationId, Notification};
use tracing::{error, info, warn};

use crate::{
    activity_log::LogSink,
    error::TransportError,
    subscription::{EventSubscription, NotificationEvent},
    transport::Transport,
};

const FORM_SOURCE: &str = "Form";
const EVENTSOURCE_SOURCE: &str = "Eventsource";

/// How a submission should wait for its confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Let the backend hold the response until it has seen the notification.
    pub await_on_server: bool,
    pub notification_timeout_secs: u64,
    /// Skip listening and report a timeout once the window has passed.
    pub simulate_timeout: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            await_on_server: false,
            notification_timeout_secs: 1,
            simulate_timeout: false,
        }
    }
}

impl WaitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }
}

/// The single terminal result of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    TransportFailed {
        error: TransportError,
    },
    ImmediateSuccess {
        id: LocationId,
        notification: Option<Notification>,
    },
    ConfirmedSuccess {
        id: LocationId,
        event: NotificationEvent,
    },
    /// The command was accepted but its confirmation did not arrive in time.
    /// The location may still be created.
    TimedOut {
        id: LocationId,
    },
}

impl Outcome {
    pub fn id(&self) -> Option<LocationId> {
        match self {
            Outcome::TransportFailed { .. } => None,
            Outcome::ImmediateSuccess { id, .. }
            | Outcome::ConfirmedSuccess { id, .. }
            | Outcome::TimedOut { id } => Some(*id),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::TransportFailed { .. })
    }

    /// Text a presentation layer can show as-is.
    pub fn summary(&self) -> String {
        match self {
            Outcome::TransportFailed { error } => format!("Something went wrong: {error}"),
            Outcome::ImmediateSuccess {
                id,
                notification: Some(notification),
            } => format!(
                "Success! Location {id} created\n{}",
                pretty_json(notification)
            ),
            Outcome::ImmediateSuccess {
                id,
                notification: None,
            } => format!("Success! Location {id} accepted"),
            Outcome::ConfirmedSuccess { event, .. } => {
                format!("Success!\n{}", pretty_json(&event.payload))
            }
            Outcome::TimedOut { id } => format!(
                "Success! The Location is not ready yet, but please check back soon\nLocation ID: {id}"
            ),
        }
    }
}

/// Drives one create command from submission to a terminal [`Outcome`].
pub struct SubmissionCoordinator {
    transport: Arc<dyn Transport>,
    notifications: Arc<EventSubscription>,
}

impl SubmissionCoordinator {
    pub fn new(transport: Arc<dyn Transport>, notifications: Arc<EventSubscription>) -> Self {
        Self {
            transport,
            notifications,
        }
    }

    pub fn notifications(&self) -> &Arc<EventSubscription> {
        &self.notifications
    }

    pub async fn submit(
        &self,
        command: CreateLocation,
        wait: &WaitConfig,
        log: &dyn LogSink,
    ) -> Outcome {
        log.append(
            FORM_SOURCE,
            format!("Creating location {}", compact_json(&command)),
        );

        let accepted = match self.transport.send(&command, wait).await {
            Ok(accepted) => accepted,
            Err(error) => {
                error!(%error, "form: create location request failed");
                log.append(FORM_SOURCE, format!("Request failed: {error}"));
                return Outcome::TransportFailed { error };
            }
        };
        log.append(
            FORM_SOURCE,
            format!("Response: {}", compact_json(&accepted)),
        );
        let id = accepted.id;

        if wait.await_on_server {
            info!(%id, "form: server awaited the notification");
            return Outcome::ImmediateSuccess {
                id,
                notification: accepted.notification,
            };
        }

        let timeout = wait.timeout();
        if wait.simulate_timeout {
            info!(%id, timeout_ms = timeout.as_millis() as u64, "form: simulating notification timeout");
            tokio::time::sleep(timeout).await;
            log.append(
                EVENTSOURCE_SOURCE,
                format!("Simulated timeout after {}ms", timeout.as_millis()),
            );
            return Outcome::TimedOut { id };
        }

        match self.notifications.await_one(Some(id), timeout).await {
            Ok(event) => {
                log.append(
                    EVENTSOURCE_SOURCE,
                    format!("Notification: {}", pretty_json(&event.payload)),
                );
                Outcome::ConfirmedSuccess { id, event }
            }
            Err(err) => {
                warn!(%id, %err, "form: reporting deferred success");
                log.append(
                    EVENTSOURCE_SOURCE,
                    format!("{err}; location {id} is not ready yet"),
                );
                Outcome::TimedOut { id }
            }
        }
    }
}

fn compact_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unserializable: {err}>"))
}

fn pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| format!("<unserializable: {err}>"))
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
