use std::{convert::Infallible, future, sync::Arc, time::Duration};

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use shared::{
    domain::{CreateLocation, CreateLocationCommand, LocationId, Notification},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        CommandAcceptedResponse, StreamQuery, CREATE_LOCATION_ROUTE, NOTIFICATIONS_ROUTE,
        NOTIFICATIONS_STREAM, NOTIFICATION_AWAIT_HEADER, NOTIFICATION_EVENT,
        NOTIFICATION_SIMULATE_TIMEOUT_HEADER, NOTIFICATION_TIMEOUT_HEADER,
    },
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/healthz", get(healthz))
        .route(CREATE_LOCATION_ROUTE, post(create_location))
        .route(NOTIFICATIONS_ROUTE, get(notifications))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Wait behaviour a client requested through the `X-Notification-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NotificationOptions {
    pub(crate) await_notification: bool,
    pub(crate) timeout: Duration,
    pub(crate) simulate_timeout: bool,
}

pub(crate) fn parse_notification_headers(
    headers: &HeaderMap,
    default_timeout: Duration,
) -> NotificationOptions {
    let mut options = NotificationOptions {
        await_notification: false,
        timeout: default_timeout,
        simulate_timeout: false,
    };

    if let Some(value) = header_str(headers, NOTIFICATION_AWAIT_HEADER) {
        debug!(header = NOTIFICATION_AWAIT_HEADER, value, "received header");
        match parse_bool(value) {
            Some(parsed) => options.await_notification = parsed,
            None => warn!(
                header = NOTIFICATION_AWAIT_HEADER,
                value, "could not parse header into boolean"
            ),
        }
    }

    if let Some(value) = header_str(headers, NOTIFICATION_TIMEOUT_HEADER) {
        debug!(header = NOTIFICATION_TIMEOUT_HEADER, value, "received header");
        match value.trim().parse::<u64>() {
            Ok(secs) => options.timeout = Duration::from_secs(secs),
            Err(_) => warn!(
                header = NOTIFICATION_TIMEOUT_HEADER,
                value,
                default = ?default_timeout,
                "could not parse header; using default"
            ),
        }
    }

    if let Some(value) = header_str(headers, NOTIFICATION_SIMULATE_TIMEOUT_HEADER) {
        debug!(header = NOTIFICATION_SIMULATE_TIMEOUT_HEADER, value, "received header");
        match parse_bool(value) {
            Some(parsed) => options.simulate_timeout = parsed,
            None => warn!(
                header = NOTIFICATION_SIMULATE_TIMEOUT_HEADER,
                value, "could not parse header; using default"
            ),
        }
    }

    options
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

async fn create_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateLocation>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CommandAcceptedResponse>)> {
    let options = parse_notification_headers(&headers, state.default_await_timeout);
    let Json(payload) = payload.map_err(reject_payload)?;

    let command = CreateLocationCommand::accept(payload, LocationId::new_v4(), Utc::now());
    let id = command.id;
    info!(%id, command = "CreateLocation", "publishing command");

    // Subscribe before dispatching so a fast reactor cannot beat the wait.
    let receiver = (options.await_notification && !options.simulate_timeout)
        .then(|| state.notifications.subscribe());
    state.reactor.dispatch(command);

    let mut response = CommandAcceptedResponse {
        id,
        notification: None,
    };
    if options.await_notification {
        response.notification = await_notification(receiver, id, options.timeout).await;
    }

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Undecodable commands are validation failures; an over-limit body keeps its 413.
fn reject_payload(rejection: JsonRejection) -> (StatusCode, Json<ApiError>) {
    error!(err = %rejection, "failed to decode payload");
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return (rejection.status(), Json(ApiError::new(rejection.body_text())));
    }
    api_error(ApiException::new(ErrorCode::Validation, rejection.body_text()))
}

/// Without a receiver this only sleeps out the timeout.
async fn await_notification(
    receiver: Option<broadcast::Receiver<Notification>>,
    id: LocationId,
    timeout: Duration,
) -> Option<Notification> {
    info!(%id, timeout_ms = timeout.as_millis() as u64, "awaiting notification");

    let correlated = async move {
        let Some(mut receiver) = receiver else {
            return future::pending().await;
        };
        loop {
            match receiver.recv().await {
                Ok(notification) if notification.correlation_id == Some(id) => {
                    return notification
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%id, skipped, "notification wait lagged behind the bus")
                }
                Err(RecvError::Closed) => return future::pending().await,
            }
        }
    };

    match tokio::time::timeout(timeout, correlated).await {
        Ok(notification) => {
            debug!(%id, "got notification");
            Some(notification)
        }
        Err(_) => {
            error!(%id, timeout_ms = timeout.as_millis() as u64, "timed out waiting for notification");
            None
        }
    }
}

async fn notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if query.stream != NOTIFICATIONS_STREAM {
        return Err(api_error(ApiException::new(
            ErrorCode::NotFound,
            format!("stream '{}' does not exist", query.stream),
        )));
    }
    info!(stream = %query.stream, "subscriber connected");

    let stream = BroadcastStream::new(state.notifications.subscribe()).filter_map(|item| async move {
        match item {
            Ok(notification) => match serde_json::to_string(&notification) {
                Ok(data) => {
                    debug!(id = %notification.id, "sending SSE notification");
                    Some(Ok(Event::default()
                        .event(NOTIFICATION_EVENT)
                        .id(notification.id.to_string())
                        .data(data)))
                }
                Err(err) => {
                    error!(%err, "failed to encode notification");
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "SSE subscriber lagged; notifications dropped");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn api_error(err: ApiException) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(err.into()))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
