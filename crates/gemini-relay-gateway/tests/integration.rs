//! Gateway integration tests: start a real gateway backed by `cat` as the
//! engine and drive it over WebSocket + HTTP.
//!
//! Run with: `cargo test -p gemini-relay-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use gemini_relay_core::config::{Config, EngineConfig};
use gemini_relay_gateway::GatewayState;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a gateway whose engine is `cat` and return its state + port.
async fn start_test_gateway() -> (Arc<GatewayState>, u16) {
    let port = find_free_port();

    let config = Config {
        engine: Some(EngineConfig {
            candidates: vec!["cat".into()],
            probe_args: vec![],
            stop_timeout_ms: 2_000,
            ..EngineConfig::default()
        }),
        ..Config::default()
    };
    let state = Arc::new(GatewayState::new(config));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = gemini_relay_gateway::start_gateway(state_clone, "127.0.0.1", port, false).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

async fn connect(port: u16) -> Ws {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (ws, _) = connect_async(&url).await.expect("WS connect failed");
    ws
}

async fn send_action(ws: &mut Ws, action: Value) {
    ws.send(Message::Text(action.to_string().into()))
        .await
        .unwrap();
}

async fn next_frame(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn start_engine(ws: &mut Ws) {
    send_action(ws, json!({"action": "start_engine"})).await;
    let starting = next_frame(ws).await;
    assert_eq!(starting["payload"]["content"], "Starting gemini-cli engine...");
    assert_eq!(next_frame(ws).await["type"], "engine_started");
    let ready = next_frame(ws).await;
    assert_eq!(ready["type"], "terminal");
    assert_eq!(
        ready["payload"]["content"],
        "Engine started successfully using cat. Ready for commands."
    );
}

async fn wait_until_idle(state: &GatewayState) -> bool {
    for _ in 0..100 {
        if state.supervisor.registry().is_empty().await && state.connection_count().await == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, port) = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["engines"], 0);
}

#[tokio::test]
async fn test_plain_get_on_ws_route_is_rejected() {
    let (_state, port) = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/ws"))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_start_twice_reports_already_running() {
    let (state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;

    start_engine(&mut ws).await;
    assert_eq!(state.supervisor.registry().len().await, 1);

    send_action(&mut ws, json!({"action": "start_engine"})).await;
    let notice = next_frame(&mut ws).await;
    assert_eq!(notice["type"], "terminal");
    assert_eq!(notice["payload"]["content"], "Engine is already running.");
    assert_eq!(state.supervisor.registry().len().await, 1);

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_slash_command_round_trip() {
    let (_state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;
    start_engine(&mut ws).await;

    send_action(&mut ws, json!({"action": "send_command", "command": "/help"})).await;

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "terminal", "payload": {"content": "/help", "type": "command"}})
    );
    assert_eq!(
        next_frame(&mut ws).await,
        json!({
            "type": "terminal",
            "payload": {"content": "Executing slash command: /help", "type": "output"}
        })
    );
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "command_type", "payload": {"type": "slash_command", "command": "/help"}})
    );
    // `cat` echoes the command back as engine output.
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "gemini_output", "payload": {"content": "/help\n"}})
    );

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_tool_segment_is_separated_from_plain_output() {
    let (_state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;
    start_engine(&mut ws).await;

    send_action(
        &mut ws,
        json!({"action": "send_command", "command": "Hello [TOOL]ls -la[/TOOL] world"}),
    )
    .await;

    // echo + command_type (normal commands get no info line)
    assert_eq!(next_frame(&mut ws).await["payload"]["type"], "command");
    assert_eq!(next_frame(&mut ws).await["type"], "command_type");

    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "tool_output", "payload": {"content": "ls -la"}})
    );
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "gemini_output", "payload": {"content": "Hello  world\n"}})
    );

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_command_before_start() {
    let (_state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;

    send_action(&mut ws, json!({"action": "send_command", "command": "hello"})).await;

    let notice = next_frame(&mut ws).await;
    assert_eq!(
        notice["payload"]["content"],
        "Engine is not running. Please start the engine first."
    );
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"type": "engine_stopped", "payload": {}})
    );

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_open() {
    let (_state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;

    ws.send(Message::Text("this is not json".into())).await.unwrap();
    send_action(&mut ws, json!({"command": "no action"})).await;

    // The connection still works and nothing was sent for the bad messages.
    start_engine(&mut ws).await;

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_disconnect_terminates_engine() {
    let (state, port) = start_test_gateway().await;
    let mut ws = connect(port).await;
    start_engine(&mut ws).await;

    let conn_id = *state.connections.read().await.keys().next().unwrap();
    let process = state.supervisor.registry().get(conn_id).await.unwrap();
    assert!(process.is_running().await);

    ws.close(None).await.unwrap();
    drop(ws);

    assert!(wait_until_idle(&state).await, "engine was not cleaned up");
    assert!(!process.is_running().await);
}

#[tokio::test]
async fn test_each_connection_gets_its_own_engine() {
    let (state, port) = start_test_gateway().await;
    let mut first = connect(port).await;
    let mut second = connect(port).await;

    start_engine(&mut first).await;
    start_engine(&mut second).await;
    assert_eq!(state.supervisor.registry().len().await, 2);

    send_action(&mut second, json!({"action": "send_command", "command": "@notes.md"})).await;
    assert_eq!(next_frame(&mut second).await["payload"]["content"], "@notes.md");
    assert_eq!(
        next_frame(&mut second).await["payload"]["content"],
        "Executing at command: @notes.md"
    );

    first.close(None).await.ok();
    drop(first);
    for _ in 0..100 {
        if state.supervisor.registry().len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(state.supervisor.registry().len().await, 1);

    second.close(None).await.ok();
}
