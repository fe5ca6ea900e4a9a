//! The real WebSocket transport against a loopback tokio-tungstenite server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use homesync::cache::MemoryQueryCache;
use homesync::config::{AuthMode, SyncConfig};
use homesync::credentials::StaticTokenStore;
use homesync::realtime::{ConnectionStatus, SyncClient, WebSocketTransport};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::helpers::{eventually, task_created};

const WAIT: Duration = Duration::from_secs(3);

struct Accepted {
    ws: WebSocketStream<TcpStream>,
    uri: String,
    authorization: Option<String>,
}

async fn accept(listener: &TcpListener) -> Accepted {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("timed out waiting for the client")
        .expect("accept");

    let captured = Arc::new(Mutex::new((String::new(), None)));
    let sink = captured.clone();
    let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        let authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        *sink.lock().unwrap() = (req.uri().to_string(), authorization);
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    .expect("websocket handshake");

    let (uri, authorization) = captured.lock().unwrap().clone();
    Accepted {
        ws,
        uri,
        authorization,
    }
}

async fn next_message(ws: &mut WebSocketStream<TcpStream>) -> Message {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client stream ended")
            .expect("read error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(&text).expect("valid JSON"),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn setup(mode: AuthMode) -> (TcpListener, SyncClient, Arc<MemoryQueryCache>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let mut config = SyncConfig::default();
    config.server.ws_url = Some(format!("ws://{addr}/ws"));
    config.server.auth_mode = mode;
    config.reconnect.base_delay_ms = 20;
    config.keepalive.ping_interval_secs = 0;

    let cache = Arc::new(MemoryQueryCache::new());
    let client = SyncClient::new(
        config,
        Arc::new(StaticTokenStore::new(Some("s3cret token".into()))),
        cache.clone(),
        Arc::new(WebSocketTransport::new()),
    );
    (listener, client, cache)
}

#[tokio::test]
async fn query_auth_join_and_event_round_trip() {
    let (listener, client, cache) = setup(AuthMode::Query).await;
    client.join_room("h1").expect("join");

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut server = accept(&listener).await;
    connecting.await.unwrap().expect("connect");

    assert_eq!(server.uri, "/ws?token=s3cret%20token");
    assert_eq!(server.authorization, None);

    let join = next_json(&mut server.ws).await;
    assert_eq!(join["type"], "join:household");
    assert_eq!(join["data"]["householdId"], "h1");

    server
        .ws
        .send(Message::Text(task_created("t1", "h1", "Water plants")))
        .await
        .unwrap();
    let c = cache.clone();
    eventually("task cached", || c.tasks("h1").is_some()).await;
    assert_eq!(cache.tasks("h1").unwrap()[0].title, "Water plants");

    client.disconnect().await.expect("disconnect");
    match next_message(&mut server.ws).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason, "Client disconnect");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn header_auth_sends_bearer_token() {
    let (listener, client, _cache) = setup(AuthMode::Header).await;
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let server = accept(&listener).await;
    connecting.await.unwrap().expect("connect");

    assert_eq!(server.uri, "/ws");
    assert_eq!(server.authorization.as_deref(), Some("Bearer s3cret token"));
}

#[tokio::test]
async fn handshake_auth_sends_token_first() {
    let (listener, client, _cache) = setup(AuthMode::Handshake).await;
    client.join_room("h1").expect("join");
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut server = accept(&listener).await;
    connecting.await.unwrap().expect("connect");

    let auth = next_json(&mut server.ws).await;
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["token"], "s3cret token");
    assert_eq!(next_json(&mut server.ws).await["type"], "join:household");
}

#[tokio::test]
async fn dropped_socket_reconnects_and_rejoins() {
    let (listener, client, _cache) = setup(AuthMode::Query).await;
    client.join_room("h1").expect("join");
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut first = accept(&listener).await;
    connecting.await.unwrap().expect("connect");
    assert_eq!(next_json(&mut first.ws).await["type"], "join:household");

    // Vanish without a closing handshake.
    drop(first);

    let mut second = accept(&listener).await;
    let rejoin = next_json(&mut second.ws).await;
    assert_eq!(rejoin["type"], "join:household");
    assert_eq!(rejoin["data"]["householdId"], "h1");

    let c = client.clone();
    eventually("connected again", || c.status() == ConnectionStatus::Connected).await;
}
