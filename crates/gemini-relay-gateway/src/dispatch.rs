//! Socket side of frame dispatch: the one task allowed to write to a
//! connection.

use std::fmt::Display;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use gemini_relay_core::protocol::Frame;
use gemini_relay_core::types::ConnectionId;

/// Serialize queued frames and write them to the socket, one message each,
/// until the queue closes or the socket fails. A failed write ends the task;
/// later frames are discarded by the producers' closed-sink check.
pub async fn forward_frames<S>(
    conn_id: ConnectionId,
    mut ws_tx: S,
    mut frames: mpsc::UnboundedReceiver<Frame>,
) -> usize
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut sent = 0;
    while let Some(frame) = frames.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!(conn_id = %conn_id, %e, "Failed to serialize frame");
                continue;
            }
        };
        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
            debug!(conn_id = %conn_id, %e, "Could not send message to client");
            break;
        }
        sent += 1;
    }
    sent
}
