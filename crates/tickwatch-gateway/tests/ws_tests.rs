//! End-to-end `WebSocket` tests against a gateway bound to an ephemeral
//! port.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tickwatch_dispatch::{EndpointDescriptor, EndpointRegistry, OwnerReceiver, OwnerThreadBridge};
use tickwatch_gateway::{AppState, GatewayConfig, GatewayHandle, spawn_gateway};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(3);

struct Harness {
    gateway: GatewayHandle,
    state: Arc<AppState<()>>,
    _receiver: OwnerReceiver<()>,
}

async fn start() -> Harness {
    let registry = Arc::new(EndpointRegistry::new());
    registry.register(EndpointDescriptor::inline("getPower", true, |_| {
        Ok(json!([{ "CircuitID": 1, "PowerConsumed": 12.5 }]))
    }));
    registry.register(EndpointDescriptor::inline("getProdStats", true, |_| {
        Ok(json!({ "ItemsProduced": 3 }))
    }));

    let config = GatewayConfig {
        host: String::from("127.0.0.1"),
        port: 0,
        publish_interval_ms: 50,
        ..GatewayConfig::default()
    };
    let (bridge, receiver) = OwnerThreadBridge::channel(config.bridge_timeout());
    let state = AppState::shared(registry, bridge, &config);
    let gateway = spawn_gateway(&config, Arc::clone(&state)).await.unwrap();
    Harness {
        gateway,
        state,
        _receiver: receiver,
    }
}

async fn connect(harness: &Harness) -> Client {
    let url = format!("ws://{}/ws", harness.gateway.local_addr());
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Client, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text frame, or `None` if nothing arrives within `wait`.
async fn next_frame(ws: &mut Client, wait: Duration) -> Option<Value> {
    loop {
        let msg = timeout(wait, ws.next()).await.ok()??.ok()?;
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).ok();
        }
    }
}

#[tokio::test]
async fn subscriber_receives_endpoint_frames() {
    let harness = start().await;
    let mut ws = connect(&harness).await;

    send(
        &mut ws,
        &json!({ "action": "subscribe", "endpoints": ["getPower"] }),
    )
    .await;
    let frame = next_frame(&mut ws, TIMEOUT).await.unwrap();

    assert_eq!(frame["endpoint"], "getPower");
    assert_eq!(frame["data"][0]["PowerConsumed"], 12.5);

    ws.close(None).await.ok();
    harness.gateway.shutdown().await;
}

#[tokio::test]
async fn only_subscribed_endpoints_are_pushed() {
    let harness = start().await;
    let mut ws = connect(&harness).await;

    send(
        &mut ws,
        &json!({ "action": "subscribe", "endpoints": ["getProdStats", "getUnicorns"] }),
    )
    .await;
    for _ in 0..5 {
        let frame = next_frame(&mut ws, TIMEOUT).await.unwrap();
        assert_eq!(frame["endpoint"], "getProdStats");
    }

    ws.close(None).await.ok();
    harness.gateway.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_stops_frames() {
    let harness = start().await;
    let mut ws = connect(&harness).await;

    send(
        &mut ws,
        &json!({ "action": "subscribe", "endpoints": ["getPower"] }),
    )
    .await;
    assert!(next_frame(&mut ws, TIMEOUT).await.is_some());

    send(
        &mut ws,
        &json!({ "action": "unsubscribe", "endpoints": ["getPower"] }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    // Discard whatever was queued before the unsubscribe landed.
    while next_frame(&mut ws, Duration::from_millis(50)).await.is_some() {}

    assert!(next_frame(&mut ws, Duration::from_millis(300)).await.is_none());

    ws.close(None).await.ok();
    harness.gateway.shutdown().await;
}

#[tokio::test]
async fn malformed_control_message_keeps_connection_open() {
    let harness = start().await;
    let mut ws = connect(&harness).await;

    ws.send(Message::text("not valid json")).await.unwrap();
    send(&mut ws, &json!({ "action": "explode", "endpoints": [] })).await;
    send(
        &mut ws,
        &json!({ "action": "subscribe", "endpoints": ["getPower"] }),
    )
    .await;

    let frame = next_frame(&mut ws, TIMEOUT).await.unwrap();
    assert_eq!(frame["endpoint"], "getPower");

    ws.close(None).await.ok();
    harness.gateway.shutdown().await;
}

#[tokio::test]
async fn closing_the_socket_removes_the_session() {
    let harness = start().await;
    let mut ws = connect(&harness).await;
    send(
        &mut ws,
        &json!({ "action": "subscribe", "endpoints": ["getPower"] }),
    )
    .await;
    assert!(next_frame(&mut ws, TIMEOUT).await.is_some());
    assert_eq!(harness.state.sessions.session_count(), 1);

    ws.close(None).await.ok();
    drop(ws);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while harness.state.sessions.session_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session not removed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.state.sessions.subscribed_endpoints().is_empty());

    harness.gateway.shutdown().await;
}
