//! WebSocket connection lifecycle: one receive loop per client, bound to at
//! most one engine process.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use gemini_relay_core::dispatch::{FrameSink, frame_channel};
use gemini_relay_core::protocol::{ClientAction, CommandKind, Frame};
use gemini_relay_core::types::ConnectionId;

use crate::dispatch::forward_frames;
use crate::state::GatewayState;

/// Handle a new WebSocket connection until the client goes away, then stop
/// its engine.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = ConnectionId::new();
    info!(conn_id = %conn_id, "WebSocket client connected");

    let (ws_tx, ws_rx) = ws.split();
    let (frames, frame_rx) = frame_channel(conn_id);

    state.register_connection(conn_id).await;
    let guard = ConnectionGuard::new(state.clone(), conn_id);

    let send_task = tokio::spawn(forward_frames(conn_id, ws_tx, frame_rx));

    receive_loop(&state, &frames, ws_rx).await;

    guard.release().await;
    send_task.abort();
    info!(conn_id = %conn_id, "WebSocket client disconnected");
}

/// Read client messages until close or a transport error.
async fn receive_loop<S>(state: &GatewayState, frames: &FrameSink, mut ws_rx: S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let conn_id = frames.conn_id();
    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                handle_client_message(state, frames, text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(conn_id = %conn_id, %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Interpret one inbound message. Malformed input is logged and ignored.
pub async fn handle_client_message(state: &GatewayState, frames: &FrameSink, text: &str) {
    let conn_id = frames.conn_id();
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            warn!(conn_id = %conn_id, %e, "Ignoring malformed client message");
            return;
        }
    };

    match action {
        ClientAction::StartEngine => {
            // Failures are already reported to the client as frames.
            let _ = state.supervisor.start(conn_id, frames).await;
        }
        ClientAction::StopEngine => stop_engine(state, frames).await,
        ClientAction::SendCommand {
            command: Some(command),
        } if !command.is_empty() => send_command(state, frames, &command).await,
        ClientAction::SendCommand { .. } => {
            debug!(conn_id = %conn_id, "send_command without a command, ignoring");
        }
    }
}

/// Echo and annotate a command for the UI, then forward it to the engine.
async fn send_command(state: &GatewayState, frames: &FrameSink, command: &str) {
    let Ok(process) = state.supervisor.require_running(frames.conn_id(), frames).await else {
        return;
    };

    let kind = CommandKind::classify(command);
    frames.send(Frame::command_echo(command));
    if let Some(label) = kind.label() {
        frames.send(Frame::output(format!("Executing {label}: {command}")));
    }
    frames.send(Frame::CommandType {
        kind,
        command: command.to_string(),
    });

    let _ = state.supervisor.write(&process, command, frames).await;
}

async fn stop_engine(state: &GatewayState, frames: &FrameSink) {
    match state.supervisor.stop(frames.conn_id()).await {
        Some(_) => {
            frames.send(Frame::output("Engine stopped."));
            frames.send(Frame::engine_stopped());
        }
        None => frames.send(Frame::output("Engine is not running.")),
    }
}

/// Unregister the connection and terminate its engine, if any.
async fn cleanup_connection(state: &GatewayState, conn_id: ConnectionId) {
    state.unregister_connection(conn_id).await;
    if let Some(status) = state.supervisor.stop(conn_id).await {
        info!(conn_id = %conn_id, status = ?status, "Terminated engine for disconnected client");
    }
}

/// Runs connection cleanup on every exit path. [`release`](Self::release)
/// is the normal path; if the handler future is dropped or unwinds first,
/// `Drop` schedules the same cleanup on the runtime. Cleanup pops the
/// registry entry, so it takes effect at most once.
struct ConnectionGuard {
    state: Arc<GatewayState>,
    conn_id: ConnectionId,
    released: bool,
}

impl ConnectionGuard {
    fn new(state: Arc<GatewayState>, conn_id: ConnectionId) -> Self {
        Self {
            state,
            conn_id,
            released: false,
        }
    }

    async fn release(mut self) {
        cleanup_connection(&self.state, self.conn_id).await;
        self.released = true;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(conn_id = %self.conn_id, "No runtime available for connection cleanup");
            return;
        };
        let state = self.state.clone();
        let conn_id = self.conn_id;
        handle.spawn(async move {
            cleanup_connection(&state, conn_id).await;
        });
    }
}
