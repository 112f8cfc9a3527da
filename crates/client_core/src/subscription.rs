use std::{future, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use shared::{
    domain::{LocationId, Notification},
    protocol::{NOTIFICATIONS_STREAM, NOTIFICATION_EVENT},
};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{StreamError, WaitError};

const EVENT_BUFFER: usize = 64;

/// One server-sent event as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event: String,
    pub id: String,
    pub data: String,
}

pub type EventStream = BoxStream<'static, Result<RawEvent, StreamError>>;

#[async_trait]
pub trait EventConnector: Send + Sync {
    async fn connect(&self) -> Result<EventStream, StreamError>;
}

/// A confirmation delivered over the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub correlation_id: Option<LocationId>,
    pub payload: Value,
}

impl NotificationEvent {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(data)?;
        let correlation_id = payload
            .get("correlation_id")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok());
        Ok(Self {
            correlation_id,
            payload,
        })
    }

    /// Events without a correlation id are accepted by any waiter.
    pub fn matches(&self, expected: Option<LocationId>) -> bool {
        match (expected, self.correlation_id) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }

    pub fn notification(&self) -> Option<Notification> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Connects to the backend's `text/event-stream` notification endpoint.
pub struct SseConnector {
    http: Client,
    endpoint: Url,
}

impl SseConnector {
    pub fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }
}

#[async_trait]
impl EventConnector for SseConnector {
    async fn connect(&self) -> Result<EventStream, StreamError> {
        let request = self
            .http
            .get(self.endpoint.clone())
            .query(&[("stream", NOTIFICATIONS_STREAM)]);
        let source =
            EventSource::new(request).map_err(|err| StreamError::Connection(err.to_string()))?;
        info!(endpoint = %self.endpoint, "eventsource: connecting for notifications");

        let stream = source.filter_map(|item| async move {
            match item {
                Ok(Event::Open) => {
                    info!("eventsource: opened");
                    None
                }
                Ok(Event::Message(message)) => Some(Ok(RawEvent {
                    event: message.event,
                    id: message.id,
                    data: message.data,
                })),
                Err(reqwest_eventsource::Error::StreamEnded) => Some(Err(StreamError::Ended)),
                Err(err) => Some(Err(StreamError::Connection(err.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}

struct Connection {
    events: broadcast::Sender<NotificationEvent>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Owned notification stream with an explicit `open` / `await_one` / `close`
/// lifecycle.
///
/// The connection is opened lazily and shared by consecutive waits. Each wait
/// attaches exactly one listener and detaches it on every exit path, including
/// the caller dropping the wait future. Dropping the subscription tears the
/// connection down.
pub struct EventSubscription {
    connector: Arc<dyn EventConnector>,
    connection: Mutex<Option<Connection>>,
}

impl EventSubscription {
    pub fn new(connector: Arc<dyn EventConnector>) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
        }
    }

    pub async fn open(&self) -> Result<(), StreamError> {
        self.listen().await.map(drop)
    }

    pub async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            info!("eventsource: closed");
        }
    }

    pub async fn is_open(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Number of waits currently attached to the connection.
    pub async fn listener_count(&self) -> usize {
        self.connection
            .lock()
            .await
            .as_ref()
            .map_or(0, |connection| connection.events.receiver_count())
    }

    /// Suspends until a notification matching `correlation` arrives or
    /// `timeout` elapses, whichever comes first.
    ///
    /// A stream failure does not end the wait early; it runs to the deadline.
    pub async fn await_one(
        &self,
        correlation: Option<LocationId>,
        timeout: Duration,
    ) -> Result<NotificationEvent, WaitError> {
        info!(
            timeout_ms = timeout.as_millis() as u64,
            correlation_id = ?correlation,
            "eventsource: waiting for notification"
        );
        match tokio::time::timeout(timeout, self.next_matching(correlation)).await {
            Ok(event) => {
                info!("eventsource: received notification before timeout");
                Ok(event)
            }
            Err(_) => {
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "eventsource: reached timeout"
                );
                self.close_if_idle().await;
                Err(WaitError::TimedOut(timeout))
            }
        }
    }

    async fn next_matching(&self, correlation: Option<LocationId>) -> NotificationEvent {
        let mut receiver = match self.listen().await {
            Ok(receiver) => receiver,
            Err(err) => {
                error!(%err, "eventsource: could not connect; waiting out the deadline");
                return future::pending().await;
            }
        };

        loop {
            match receiver.recv().await {
                Ok(event) if event.matches(correlation) => return event,
                Ok(event) => debug!(
                    correlation_id = ?event.correlation_id,
                    "eventsource: skipping notification for another command"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "eventsource: waiter fell behind; notifications dropped")
                }
                // Connection replaced or closed underneath us; nothing else will arrive.
                Err(RecvError::Closed) => return future::pending().await,
            }
        }
    }

    async fn listen(&self) -> Result<broadcast::Receiver<NotificationEvent>, StreamError> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref().filter(|c| c.is_alive()) {
            return Ok(connection.events.subscribe());
        }

        let stream = self.connector.connect().await?;
        let (events, receiver) = broadcast::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_events(stream, events.clone()));
        *guard = Some(Connection { events, reader });
        Ok(receiver)
    }

    /// Other waits may still be attached to a shared connection; leave it to them.
    async fn close_if_idle(&self) {
        let mut guard = self.connection.lock().await;
        if guard
            .as_ref()
            .is_some_and(|connection| connection.events.receiver_count() == 0)
        {
            guard.take();
            info!("eventsource: closed");
        }
    }
}

async fn read_events(mut stream: EventStream, events: broadcast::Sender<NotificationEvent>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(raw) if raw.event == NOTIFICATION_EVENT => {
                match NotificationEvent::from_json(&raw.data) {
                    Ok(event) => {
                        debug!(event_id = %raw.id, "eventsource: notification received");
                        // No waiter attached is fine; the event simply has no audience.
                        let _ = events.send(event);
                    }
                    Err(err) => warn!(%err, "eventsource: notification payload is not JSON"),
                }
            }
            Ok(raw) => debug!(event = %raw.event, "eventsource: ignoring event"),
            Err(err) => {
                error!(%err, "eventsource: errored; closing connection");
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
