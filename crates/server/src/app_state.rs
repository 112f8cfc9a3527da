use std::time::Duration;

use shared::domain::Notification;
use tokio::sync::broadcast;

use crate::{config::Settings, reactor::Reactor};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) notifications: broadcast::Sender<Notification>,
    pub(crate) reactor: Reactor,
    pub(crate) default_await_timeout: Duration,
}

impl AppState {
    pub(crate) fn new(settings: &Settings) -> Self {
        let (notifications, _) = broadcast::channel(settings.notification_buffer.max(1));
        let reactor = Reactor::new(settings.processing_delay(), notifications.clone());
        Self {
            notifications,
            reactor,
            default_await_timeout: settings.default_await_timeout(),
        }
    }
}
