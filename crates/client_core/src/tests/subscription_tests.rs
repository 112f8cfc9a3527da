use super::*;
use crate::test_support::{assert_elapsed, notification_event, ChannelConnector};
use tokio::time::{sleep, Instant};

const WINDOW: Duration = Duration::from_secs(1);

fn subscription() -> (Arc<ChannelConnector>, Arc<EventSubscription>) {
    let connector = Arc::new(ChannelConnector::default());
    let subscription = Arc::new(EventSubscription::new(connector.clone()));
    (connector, subscription)
}

fn emit_after(connector: &Arc<ChannelConnector>, delay: Duration, id: Option<LocationId>) {
    let connector = Arc::clone(connector);
    tokio::spawn(async move {
        sleep(delay).await;
        connector.emit_notification(id);
    });
}

#[tokio::test(start_paused = true)]
async fn resolves_as_soon_as_matching_event_arrives() {
    let (connector, subscription) = subscription();
    let id = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(200), Some(id));

    let started = Instant::now();
    let event = subscription
        .await_one(Some(id), WINDOW)
        .await
        .expect("notification");

    assert_eq!(event.correlation_id, Some(id));
    assert_elapsed(started, Duration::from_millis(200));
    assert_eq!(subscription.listener_count().await, 0);
    assert!(subscription.is_open().await, "connection is kept for later waits");
}

#[tokio::test(start_paused = true)]
async fn times_out_and_closes_connection() {
    let (connector, subscription) = subscription();

    let started = Instant::now();
    let err = subscription
        .await_one(None, WINDOW)
        .await
        .expect_err("should time out");

    assert_eq!(err, WaitError::TimedOut(WINDOW));
    assert_elapsed(started, WINDOW);
    assert_eq!(connector.connects(), 1);
    assert_eq!(subscription.listener_count().await, 0);
    assert!(!subscription.is_open().await);
}

#[tokio::test(start_paused = true)]
async fn skips_notifications_for_other_commands() {
    let (connector, subscription) = subscription();
    let mine = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(100), Some(LocationId::new_v4()));
    emit_after(&connector, Duration::from_millis(300), Some(mine));

    let started = Instant::now();
    let event = subscription
        .await_one(Some(mine), WINDOW)
        .await
        .expect("notification");

    assert_eq!(event.correlation_id, Some(mine));
    assert_elapsed(started, Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn accepts_uncorrelated_notification() {
    let (connector, subscription) = subscription();
    emit_after(&connector, Duration::from_millis(50), None);

    let event = subscription
        .await_one(Some(LocationId::new_v4()), WINDOW)
        .await
        .expect("first event wins without correlation id");
    assert_eq!(event.correlation_id, None);
}

#[tokio::test(start_paused = true)]
async fn ignores_foreign_event_names_and_invalid_payloads() {
    let (connector, subscription) = subscription();
    let id = LocationId::new_v4();
    let emitter = Arc::clone(&connector);
    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        emitter.emit(Ok(RawEvent {
            event: "heartbeat".into(),
            id: String::new(),
            data: "{}".into(),
        }));
        emitter.emit(Ok(RawEvent {
            event: NOTIFICATION_EVENT.into(),
            id: String::new(),
            data: "not json".into(),
        }));
        emitter.emit(Ok(notification_event(Some(id))));
    });

    let event = subscription
        .await_one(Some(id), WINDOW)
        .await
        .expect("notification");
    assert_eq!(event.correlation_id, Some(id));
    assert!(event.notification().is_some());
}

#[tokio::test(start_paused = true)]
async fn stream_error_degrades_to_timeout_at_deadline() {
    let (connector, subscription) = subscription();
    let emitter = Arc::clone(&connector);
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        emitter.emit(Err(StreamError::Connection("reset by peer".into())));
    });

    let started = Instant::now();
    let err = subscription
        .await_one(None, WINDOW)
        .await
        .expect_err("should time out");

    assert_eq!(err, WaitError::TimedOut(WINDOW));
    assert_elapsed(started, WINDOW);
    assert!(!subscription.is_open().await);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_waits_out_the_deadline() {
    let connector = Arc::new(ChannelConnector::refusing());
    let subscription = EventSubscription::new(connector.clone());

    let started = Instant::now();
    let err = subscription
        .await_one(None, WINDOW)
        .await
        .expect_err("should time out");

    assert_eq!(err, WaitError::TimedOut(WINDOW));
    assert_elapsed(started, WINDOW);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_stream_error() {
    let (connector, subscription) = subscription();
    subscription.open().await.expect("open");
    connector.emit(Err(StreamError::Ended));
    sleep(Duration::from_millis(1)).await;
    assert!(!subscription.is_open().await);

    let id = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(100), Some(id));
    subscription
        .await_one(Some(id), WINDOW)
        .await
        .expect("notification on fresh connection");
    assert_eq!(connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn close_during_wait_drops_connection_and_next_wait_reconnects() {
    let (connector, subscription) = subscription();
    let waiting = Arc::clone(&subscription);
    let started = Instant::now();
    let pending = tokio::spawn(async move { waiting.await_one(None, WINDOW).await });

    sleep(Duration::from_millis(100)).await;
    assert_eq!(subscription.listener_count().await, 1);
    subscription.close().await;
    assert!(!subscription.is_open().await);

    let err = pending.await.expect("wait task").expect_err("should time out");
    assert_eq!(err, WaitError::TimedOut(WINDOW));
    assert_elapsed(started, WINDOW);

    let id = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(100), Some(id));
    let event = subscription
        .await_one(Some(id), WINDOW)
        .await
        .expect("notification on fresh connection");
    assert_eq!(event.correlation_id, Some(id));
    assert_eq!(connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn abandoned_wait_releases_its_listener() {
    let (_connector, subscription) = subscription();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), subscription.await_one(None, WINDOW))
            .await;
    assert!(abandoned.is_err());

    assert_eq!(subscription.listener_count().await, 0);
    assert!(subscription.is_open().await);
}

#[tokio::test(start_paused = true)]
async fn later_wait_never_sees_an_earlier_event() {
    let (connector, subscription) = subscription();
    let first = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(100), Some(first));
    subscription
        .await_one(Some(first), WINDOW)
        .await
        .expect("first notification");

    // Arrives while nobody is listening.
    connector.emit_notification(None);
    sleep(Duration::from_millis(1)).await;

    let err = subscription
        .await_one(None, Duration::from_millis(500))
        .await
        .expect_err("stale event must not be delivered");
    assert_eq!(err, WaitError::TimedOut(Duration::from_millis(500)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_waits_share_one_connection_without_cross_delivery() {
    let (connector, subscription) = subscription();
    let a = LocationId::new_v4();
    let b = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(100), Some(b));
    emit_after(&connector, Duration::from_millis(200), Some(a));

    let (got_a, got_b) = tokio::join!(
        subscription.await_one(Some(a), WINDOW),
        subscription.await_one(Some(b), WINDOW),
    );

    assert_eq!(got_a.expect("a").correlation_id, Some(a));
    assert_eq!(got_b.expect("b").correlation_id, Some(b));
    assert_eq!(connector.connects(), 1);
    assert_eq!(subscription.listener_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_leaves_shared_connection_to_other_waiters() {
    let (connector, subscription) = subscription();
    let slow = LocationId::new_v4();
    emit_after(&connector, Duration::from_millis(800), Some(slow));

    let (short, long) = tokio::join!(
        subscription.await_one(None, Duration::from_millis(300)),
        subscription.await_one(Some(slow), WINDOW),
    );

    assert!(short.is_err());
    assert_eq!(long.expect("long wait").correlation_id, Some(slow));
    assert_eq!(connector.connects(), 1);
}

#[test]
fn notification_event_reads_correlation_id_from_payload() {
    let id = LocationId::new_v4();
    let raw = notification_event(Some(id));
    let event = NotificationEvent::from_json(&raw.data).expect("json");
    assert_eq!(event.correlation_id, Some(id));
    assert!(event.matches(Some(id)));
    assert!(!event.matches(Some(LocationId::new_v4())));
    assert!(event.matches(None));
}
