use std::time::Duration;

use shared::domain::{Action, CreateLocationCommand, Notification};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

/// Processes accepted commands in the background and announces each one
/// on the notification bus once done.
#[derive(Clone)]
pub(crate) struct Reactor {
    processing_delay: Duration,
    notifications: broadcast::Sender<Notification>,
}

impl Reactor {
    pub(crate) fn new(
        processing_delay: Duration,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            processing_delay,
            notifications,
        }
    }

    pub(crate) fn dispatch(&self, command: CreateLocationCommand) -> JoinHandle<()> {
        let reactor = self.clone();
        tokio::spawn(async move { reactor.project(command).await })
    }

    async fn project(&self, command: CreateLocationCommand) {
        tokio::time::sleep(self.processing_delay).await;
        info!(id = %command.id, name = %command.name, "reactor: projecting location");

        let mut notification =
            Notification::new(Some(command.id)).with_action(Action::redirect(command.id));
        match serde_json::to_value(&command) {
            Ok(location) => notification = notification.with_data("location", location),
            Err(err) => {
                warn!(id = %command.id, %err, "reactor: could not attach location data");
                notification = notification.with_error(format!("location data unavailable: {err}"));
            }
        }

        match self.notifications.send(notification) {
            Ok(subscribers) => info!(id = %command.id, subscribers, "reactor: sent notification"),
            Err(_) => debug!(id = %command.id, "reactor: notification had no subscribers"),
        }
    }
}

#[cfg(test)]
#[path = "tests/reactor_tests.rs"]
mod tests;
