//! WebSocket Integration Tests
//!
//! - New clients receive a status message first
//! - Controller events reach every connected client
//! - Closing a client removes its subscription

use futures::{SinkExt, StreamExt};
use qlink_bridge::{monitor, router, BridgeContext, HubHandle, MonitorMode, Settings};
use qlink_test_utils::{wait_for, MockController, DEFAULT_TIMEOUT};
use qlink_transport::QlinkClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestEnv {
    controller: MockController,
    ctx: Arc<BridgeContext>,
    ws_url: String,
}

impl TestEnv {
    async fn start() -> Self {
        let controller = MockController::start().await;
        let addr: std::net::SocketAddr = controller.addr().parse().unwrap();
        let settings = Settings {
            vantage_ip: addr.ip().to_string(),
            vantage_port: addr.port(),
            timeout: Duration::from_millis(300),
            monitor_mode: MonitorMode::Events,
            ..Default::default()
        };

        let client = Arc::new(QlinkClient::new(
            settings.controller_addr(),
            settings.client_options(),
        ));
        let (hub, _) = HubHandle::spawn();
        let ctx = Arc::new(BridgeContext::new(settings, client, hub));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}/events", listener.local_addr().unwrap());
        let app = router(ctx.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            controller,
            ctx,
            ws_url,
        }
    }

    async fn connect(&self) -> WsClient {
        let (ws, _) = connect_async(&self.ws_url)
            .await
            .expect("Failed to connect");
        ws
    }
}

/// Next JSON text frame, skipping control frames
async fn next_json(ws: &mut WsClient) -> Value {
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("Timed out waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).expect("invalid JSON frame");
        }
    }
}

#[tokio::test]
async fn test_initial_status_message() {
    let env = TestEnv::start().await;
    env.ctx.store().update(23, &[(3, qlink_core::LedState::On)].into());

    let mut ws = env.connect().await;
    let status = next_json(&mut ws).await;

    assert_eq!(status["type"], "status");
    assert_eq!(status["connected"], false);
    assert_eq!(status["monitoring"], false);
    assert_eq!(status["leds"]["23"]["3"], "on");
    assert!(status.get("timestamp").is_some());
}

#[tokio::test]
async fn test_broadcast_reaches_all_clients() {
    let env = TestEnv::start().await;
    let mut a = env.connect().await;
    let mut b = env.connect().await;
    next_json(&mut a).await;
    next_json(&mut b).await;

    env.ctx.hub().broadcast(&json!({"type": "button", "station": 7}));

    assert_eq!(next_json(&mut a).await["station"], 7);
    assert_eq!(next_json(&mut b).await["station"], 7);
}

#[tokio::test]
async fn test_controller_event_end_to_end() {
    let env = TestEnv::start().await;
    let mut ws = env.connect().await;
    next_json(&mut ws).await;

    let task = monitor::spawn(env.ctx.clone()).expect("event monitor should start");
    let status_ctx = env.ctx.clone();
    assert!(
        wait_for(move || status_ctx.status().is_connected(), DEFAULT_TIMEOUT).await,
        "event listener never connected"
    );

    env.controller.push_event("SW 1 23 5 1");

    let event = next_json(&mut ws).await;
    assert_eq!(event["type"], "button");
    assert_eq!(event["master"], 1);
    assert_eq!(event["station"], 23);
    assert_eq!(event["button"], 5);
    assert_eq!(event["raw"], "SW 1 23 5 1");
    task.abort();
}

#[tokio::test]
async fn test_close_unsubscribes() {
    let env = TestEnv::start().await;
    let mut ws = env.connect().await;
    next_json(&mut ws).await;
    assert_eq!(env.ctx.hub().subscriber_count().await, 1);

    ws.send(WsMessage::Close(None)).await.expect("Failed to send close");
    drop(ws);

    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while env.ctx.hub().subscriber_count().await > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "subscriber was never removed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
