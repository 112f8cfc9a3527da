use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{Action, CreateLocation, Category, LocationId, Notification},
    protocol::{CommandAcceptedResponse, NOTIFICATION_EVENT},
};
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    coordinator::WaitConfig,
    error::{StreamError, TransportError},
    subscription::{EventConnector, EventStream, RawEvent},
    transport::{CommandResult, Transport},
};

type Item = Result<RawEvent, StreamError>;

/// Event connector backed by an in-process channel; each connect replaces the
/// previous channel.
#[derive(Default)]
pub(crate) struct ChannelConnector {
    current: Mutex<Option<mpsc::UnboundedSender<Item>>>,
    connects: AtomicUsize,
    refuse: bool,
}

impl ChannelConnector {
    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, item: Item) -> bool {
        self.current
            .lock()
            .expect("lock")
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }

    pub(crate) fn emit_notification(&self, correlation_id: Option<LocationId>) -> bool {
        self.emit(Ok(notification_event(correlation_id)))
    }
}

#[async_trait]
impl EventConnector for ChannelConnector {
    async fn connect(&self) -> Result<EventStream, StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(StreamError::Connection("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock().expect("lock") = Some(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub(crate) fn notification_event(correlation_id: Option<LocationId>) -> RawEvent {
    let mut notification = Notification::new(correlation_id);
    if let Some(id) = correlation_id {
        notification = notification.with_action(Action::redirect(id));
    }
    RawEvent {
        event: NOTIFICATION_EVENT.into(),
        id: notification.id.to_string(),
        data: serde_json::to_string(&notification).expect("notification json"),
    }
}

pub(crate) fn sample_command() -> CreateLocation {
    CreateLocation {
        name: "Lisbon".into(),
        category: Category::City,
        description: "Capital of Portugal".into(),
    }
}

/// Transport returning a canned result after an optional delay.
pub(crate) struct FakeTransport {
    result: CommandResult,
    delay: Duration,
    calls: Mutex<Vec<(CreateLocation, WaitConfig)>>,
}

impl FakeTransport {
    pub(crate) fn accepting(id: LocationId) -> Self {
        Self::with_result(Ok(CommandAcceptedResponse {
            id,
            notification: None,
        }))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::with_result(Err(TransportError::Status {
            status: 500,
            message: message.into(),
        }))
    }

    pub(crate) fn with_result(result: CommandResult) -> Self {
        Self {
            result,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> Vec<(CreateLocation, WaitConfig)> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, command: &CreateLocation, wait: &WaitConfig) -> CommandResult {
        self.calls
            .lock()
            .expect("lock")
            .push((command.clone(), *wait));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Timer wheel granularity allows a tick of slack on the paused clock.
pub(crate) fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(20),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}
