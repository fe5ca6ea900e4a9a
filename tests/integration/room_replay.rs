//! Household room join/leave ordering and replay.

use std::time::Duration;

use homesync::realtime::ConnectionStatus;

use crate::helpers::{eventually, harness, test_config};

#[tokio::test]
async fn switching_rooms_sends_leave_before_join() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.connect().await.expect("connect");
    let mut server = h.next_server().await;

    h.client.join_room("A").expect("join A");
    h.client.join_room("B").expect("join B");

    let first = server.next_json().await;
    assert_eq!(first["type"], "join:household");
    assert_eq!(first["data"]["householdId"], "A");

    let second = server.next_json().await;
    assert_eq!(second["type"], "leave:household");
    assert_eq!(second["data"]["householdId"], "A");

    let third = server.next_json().await;
    assert_eq!(third["type"], "join:household");
    assert_eq!(third["data"]["householdId"], "B");

    let client = h.client.clone();
    eventually("room B tracked", || client.current_room().as_deref() == Some("B")).await;
}

#[tokio::test]
async fn join_before_connect_is_sent_on_open() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.join_room("h1").expect("join");
    h.client.join_room("h2").expect("join");

    h.client.connect().await.expect("connect");
    let mut server = h.next_server().await;

    // Only the latest room is joined; nothing was sent for h1.
    let join = server.next_json().await;
    assert_eq!(join["type"], "join:household");
    assert_eq!(join["data"]["householdId"], "h2");
    assert!(server.frames.try_recv().is_err());
}

#[tokio::test]
async fn leave_clears_room_so_reconnect_does_not_rejoin() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.join_room("h1").expect("join");
    h.client.connect().await.expect("connect");
    let mut first = h.next_server().await;
    assert_eq!(first.next_json().await["type"], "join:household");

    h.client.leave_room("h1").expect("leave");
    let leave = first.next_json().await;
    assert_eq!(leave["type"], "leave:household");
    assert_eq!(leave["data"]["householdId"], "h1");

    first.close(1006, "drop");
    let mut second = h.next_server().await;
    let client = h.client.clone();
    eventually("reconnected", || client.status() == ConnectionStatus::Connected).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(second.frames.try_recv().is_err());
    assert_eq!(h.client.current_room(), None);
}

#[tokio::test]
async fn leave_while_disconnected_sends_nothing() {
    let mut h = harness(test_config(20, 5), Duration::ZERO);
    h.client.join_room("h1").expect("join");
    h.client.leave_room("h1").expect("leave");

    h.client.connect().await.expect("connect");
    let mut server = h.next_server().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(server.frames.try_recv().is_err());
}
