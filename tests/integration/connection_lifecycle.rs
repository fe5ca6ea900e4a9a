//! Connection manager behaviour against the scripted transport.

use std::time::Duration;

use homesync::cache::QueryKey;
use homesync::config::AuthMode;
use homesync::error::SyncError;
use homesync::realtime::events::{EventKind, SyncEvent, on};
use homesync::realtime::transport::Frame;
use homesync::realtime::{AppState, ConnectionStatus, spawn_lifecycle_listener};

use crate::helpers::{OpenScript, eventually, harness, task_created, test_config};

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_then_task_created_lands_at_head_of_household_list() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);

    h.client.connect().await.expect("connect");
    let server = h.next_server().await;
    assert_eq!(h.client.status(), ConnectionStatus::Connected);
    assert_eq!(server.endpoint.token, "secret");
    assert_eq!(server.endpoint.auth_mode, AuthMode::Query);

    server.push(task_created("t0", "h1", "older"));
    server.push(task_created("t1", "h1", "Buy milk"));

    let cache = h.cache.clone();
    eventually("two cached tasks", || {
        cache.tasks("h1").is_some_and(|t| t.len() == 2)
    })
    .await;
    let tasks = h.cache.tasks("h1").unwrap();
    assert_eq!(tasks[0].id, "t1");
    assert_eq!(tasks[0].title, "Buy milk");
    assert_eq!(h.count(EventKind::Connect), 1);
    assert_eq!(h.cache.full_invalidation_count(), 1);
}

#[tokio::test]
async fn concurrent_connects_open_exactly_one_transport() {
    let mut h = harness(test_config(20, 5), Duration::from_millis(50));

    let (a, b) = tokio::join!(h.client.connect(), h.client.connect());
    a.expect("first connect");
    b.expect("second connect");

    let _server = h.next_server().await;
    assert_eq!(h.transport.opens(), 1);
    assert_eq!(h.count(EventKind::Connect), 1);

    // Already connected: another call is a no-op.
    h.client.connect().await.expect("connect again");
    assert_eq!(h.transport.opens(), 1);
}

#[tokio::test]
async fn missing_token_fails_with_auth_missing() {
    let h = harness(test_config(20, 5), Duration::ZERO);
    h.tokens.set_token(None);

    let err = h.client.connect().await.unwrap_err();
    assert_eq!(err, SyncError::AuthMissing);
    assert_eq!(h.client.status(), ConnectionStatus::Error);
    assert_eq!(h.transport.opens(), 0);

    let events = h.events.lock().unwrap().clone();
    assert!(matches!(
        events.as_slice(),
        [SyncEvent::ConnectError(failure)] if failure.error == SyncError::AuthMissing
    ));
}

#[tokio::test]
async fn disconnect_from_error_is_reported_as_transition() {
    let h = harness(test_config(20, 5), Duration::ZERO);
    h.tokens.set_token(None);
    h.client.connect().await.unwrap_err();
    assert_eq!(h.client.status(), ConnectionStatus::Error);

    h.client.disconnect().await.expect("disconnect");
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        h.kinds(),
        vec![EventKind::ConnectError, EventKind::Disconnect]
    );

    // Already disconnected: nothing further to report.
    h.client.disconnect().await.expect("disconnect again");
    assert_eq!(h.count(EventKind::Disconnect), 1);
}

#[tokio::test]
async fn first_open_failure_is_reported_then_retried() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.transport.script([OpenScript::Refuse]);

    let err = h.client.connect().await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));

    let _server = h.next_server().await;
    let client = h.client.clone();
    eventually("connected after retry", || {
        client.status() == ConnectionStatus::Connected
    })
    .await;
    assert_eq!(h.transport.opens(), 2);
    assert_eq!(h.count(EventKind::ConnectError), 1);
    // The first successful open of the session is a connect, not a reconnect.
    let events = h.events.clone();
    eventually("connect event", || {
        events.lock().unwrap().iter().any(|e| e.kind() == EventKind::Connect)
    })
    .await;
    assert_eq!(h.count(EventKind::Reconnect), 0);
}

// ---------------------------------------------------------------------------
// Reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abnormal_close_reconnects_rejoins_and_invalidates_once() {
    let mut h = harness(test_config(20, 5), Duration::from_millis(80));

    h.client.join_room("h1").expect("join");
    h.client.connect().await.expect("connect");
    let mut first = h.next_server().await;
    assert_eq!(first.next_json().await["type"], "join:household");
    assert_eq!(h.cache.full_invalidation_count(), 1);

    first.close(1006, "network lost");

    let client = h.client.clone();
    eventually("connecting after backoff", || {
        client.status() == ConnectionStatus::Connecting
    })
    .await;

    let mut second = h.next_server().await;
    let rejoin = second.next_json().await;
    assert_eq!(rejoin["type"], "join:household");
    assert_eq!(rejoin["data"]["householdId"], "h1");

    let events = h.events.clone();
    eventually("reconnect event", || {
        events.lock().unwrap().iter().any(|e| e.kind() == EventKind::Reconnect)
    })
    .await;
    assert_eq!(h.client.status(), ConnectionStatus::Connected);
    assert_eq!(h.cache.full_invalidation_count(), 2);
    assert_eq!(h.count(EventKind::Reconnect), 1);

    let kinds = h.kinds();
    let disconnect = kinds.iter().position(|k| *k == EventKind::Disconnect);
    let reconnect = kinds.iter().position(|k| *k == EventKind::Reconnect);
    assert!(disconnect < reconnect);

    let events = h.events.lock().unwrap().clone();
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Disconnect(info) if info.code == Some(1006) && info.reason == "network lost"
    )));
}

#[tokio::test]
async fn clean_close_does_not_retry() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let server = h.next_server().await;

    server.close(1000, "server shutdown");
    let client = h.client.clone();
    eventually("disconnected", || {
        client.status() == ConnectionStatus::Disconnected
    })
    .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.transport.opens(), 1);
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn dropped_link_counts_as_abnormal_close() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let server = h.next_server().await;
    drop(server);

    let _second = h.next_server().await;
    assert_eq!(h.transport.opens(), 2);
}

#[tokio::test]
async fn retry_ceiling_sets_error_until_manual_connect() {
    let mut h = harness(test_config(20, 2), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let server = h.next_server().await;

    h.transport.script([OpenScript::Refuse, OpenScript::Refuse]);
    server.close(1011, "internal error");

    let client = h.client.clone();
    eventually("error status", || client.status() == ConnectionStatus::Error).await;
    assert_eq!(h.transport.opens(), 3);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.transport.opens(), 3, "no automatic retry after the ceiling");

    let events = h.events.lock().unwrap().clone();
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ConnectError(f) if f.error == SyncError::RetryExhausted { attempts: 2 }
    )));

    h.client.connect().await.expect("manual connect");
    let _again = h.next_server().await;
    assert_eq!(h.transport.opens(), 4);
    assert_eq!(h.client.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn socket_error_reports_and_retries() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let server = h.next_server().await;

    server
        .events
        .send(homesync::realtime::transport::TransportEvent::Error("reset by peer".into()))
        .unwrap();

    let _second = h.next_server().await;
    let events = h.events.lock().unwrap().clone();
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ConnectError(f) if matches!(&f.error, SyncError::Transport(m) if m == "reset by peer")
    )));
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_closes_with_normal_code() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let mut server = h.next_server().await;

    h.client.disconnect().await.expect("disconnect");
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        server.next_frame().await,
        Frame::Close {
            code: 1000,
            reason: "Client disconnect".into()
        }
    );

    let events = h.events.lock().unwrap().clone();
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Disconnect(info)) if info.code == Some(1000)
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.opens(), 1);
}

#[tokio::test]
async fn disconnect_cancels_pending_retry() {
    let mut h = harness(test_config(200, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let server = h.next_server().await;

    server.close(1006, "gone");
    let client = h.client.clone();
    eventually("disconnected", || {
        client.status() == ConnectionStatus::Disconnected
    })
    .await;
    h.client.disconnect().await.expect("disconnect");

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(h.transport.opens(), 1);
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn disconnect_during_open_never_reaches_connected() {
    let mut h = harness(test_config(20, 5), Duration::from_millis(100));

    let client = h.client.clone();
    let pending = tokio::spawn(async move { client.connect().await });
    let c = h.client.clone();
    eventually("connecting", || c.status() == ConnectionStatus::Connecting).await;

    h.client.disconnect().await.expect("disconnect");
    assert!(pending.await.unwrap().is_err());

    // The late transport is closed as soon as it opens.
    let mut late = h.next_server().await;
    assert!(matches!(late.next_frame().await, Frame::Close { code: 1000, .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
    assert_eq!(h.count(EventKind::Connect), 0);
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_and_unknown_frames_are_dropped() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let server = h.next_server().await;

    server.push("not json at all");
    server.push(r#"{"type":"task:archived","data":{"taskId":"x"}}"#);
    server.push(r#"{"type":"task:created","data":{"householdId":"h1"}}"#);
    server.push(r#"{"type":"connect","data":null}"#);
    server.push(task_created("t1", "h1", "still alive"));

    let cache = h.cache.clone();
    eventually("valid task cached", || cache.tasks("h1").is_some()).await;
    assert_eq!(h.client.status(), ConnectionStatus::Connected);
    assert_eq!(h.count(EventKind::TaskCreated), 1);
    assert_eq!(h.count(EventKind::Connect), 1);
}

#[tokio::test]
async fn failing_handlers_do_not_block_others() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.subscribe(EventKind::TaskCreated, |_| Err("boom".into()));
    h.client
        .subscribe(EventKind::TaskCreated, |_| panic!("handler panicked"));

    h.client.connect().await.expect("connect");
    let server = h.next_server().await;
    server.push(task_created("t1", "h1", "x"));
    server.push(task_created("t2", "h1", "y"));

    let events = h.events.clone();
    eventually("both events recorded", || {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == EventKind::TaskCreated)
            .count()
            == 2
    })
    .await;
    assert_eq!(h.cache.tasks("h1").map(|t| t.len()), Some(2));
    assert_eq!(h.client.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn typed_handlers_receive_payloads() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.client.on::<on::MemberLeft, _>(move |leave| {
        sink.lock().unwrap().push(leave.user_id.clone());
        Ok(())
    });

    h.client.connect().await.expect("connect");
    let server = h.next_server().await;
    server.push(r#"{"type":"household:member_left","data":{"userId":"u7","household":{"id":"h1"}}}"#);

    eventually("typed handler ran", || !seen.lock().unwrap().is_empty()).await;
    assert_eq!(seen.lock().unwrap().as_slice(), ["u7".to_owned()]);
    assert_eq!(
        h.cache
            .invalidation_count(&QueryKey::HouseholdUsers("h1".into())),
        1
    );
}

// ---------------------------------------------------------------------------
// App lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn background_disconnects_and_foreground_reconnects() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.join_room("h1").expect("join");
    h.client.connect().await.expect("connect");
    let mut first = h.next_server().await;
    assert_eq!(first.next_json().await["type"], "join:household");

    h.client.set_app_state(AppState::Background).expect("background");
    assert!(matches!(first.next_frame().await, Frame::Close { code: 1000, .. }));
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);

    h.client.set_app_state(AppState::Active).expect("active");
    let mut second = h.next_server().await;
    assert_eq!(second.next_json().await["data"]["householdId"], "h1");

    let client = h.client.clone();
    eventually("connected", || client.status() == ConnectionStatus::Connected).await;
    // A new session starts after an explicit disconnect.
    let events = h.events.clone();
    eventually("second connect event", || {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == EventKind::Connect)
            .count()
            == 2
    })
    .await;
}

#[tokio::test]
async fn foreground_without_room_stays_disconnected() {
    let h = harness(test_config(20, 5), Duration::ZERO);
    h.client.set_app_state(AppState::Background).expect("background");
    h.client.set_app_state(AppState::Active).expect("active");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.opens(), 0);
}

#[tokio::test]
async fn lifecycle_listener_forwards_state_changes() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.join_room("h1").expect("join");
    h.client.connect().await.expect("connect");
    let _first = h.next_server().await;

    let (states, rx) = tokio::sync::watch::channel(AppState::Active);
    let listener = spawn_lifecycle_listener(h.client.clone(), rx);

    states.send(AppState::Background).unwrap();
    let client = h.client.clone();
    eventually("disconnected", || {
        client.status() == ConnectionStatus::Disconnected
    })
    .await;

    states.send(AppState::Active).unwrap();
    let _second = h.next_server().await;

    drop(states);
    listener.await.unwrap();
}

#[tokio::test]
async fn shutdown_rejects_further_calls() {
    let h = harness(test_config(20, 5), Duration::ZERO);
    h.client.shutdown();
    assert_eq!(h.client.join_room("h1"), Err(SyncError::Closed));
    assert_eq!(h.client.connect().await, Err(SyncError::Closed));
}
