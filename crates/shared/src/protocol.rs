use serde::{Deserialize, Serialize};

use crate::domain::{LocationId, Notification};

pub const CREATE_LOCATION_ROUTE: &str = "/api/location/create";
pub const NOTIFICATIONS_ROUTE: &str = "/api/notifications";

/// Name of the only notification stream the backend serves.
pub const NOTIFICATIONS_STREAM: &str = "notifications";
/// SSE event name carrying a serialized [`Notification`].
pub const NOTIFICATION_EVENT: &str = "notification";

pub const NOTIFICATION_AWAIT_HEADER: &str = "X-Notification-Await";
pub const NOTIFICATION_TIMEOUT_HEADER: &str = "X-Notification-Timeout";
pub const NOTIFICATION_SIMULATE_TIMEOUT_HEADER: &str = "X-Notification-Simulate-Timeout";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAcceptedResponse {
    pub id: LocationId,
    #[serde(default)]
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamQuery {
    pub stream: String,
}
