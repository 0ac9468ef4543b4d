//! Producer side of the per-connection outbound frame queue.
//!
//! Every task that wants to talk to a browser (the coordinator, the
//! supervisor, both output readers) holds a clone of the connection's
//! [`FrameSink`]. A single writer task owns the receiving half and is the only
//! thing that touches the transport, so frames never interleave mid-write.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::protocol::Frame;
use crate::types::ConnectionId;

/// Create the outbound queue for one connection.
pub fn frame_channel(conn_id: ConnectionId) -> (FrameSink, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FrameSink { conn_id, tx }, rx)
}

/// Cloneable, best-effort handle for queueing frames to one connection.
#[derive(Debug, Clone)]
pub struct FrameSink {
    conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl FrameSink {
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queue a frame. Never fails: a closed connection turns this into a no-op.
    pub fn send(&self, frame: Frame) {
        if let Err(e) = self.try_send(frame) {
            debug!(conn_id = %self.conn_id, %e, "Dropping frame");
        }
    }

    /// Queue a frame, reporting a closed connection as [`RelayError::Dispatch`].
    pub fn try_send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|e| {
            RelayError::Dispatch(format!(
                "connection {} is closed, {} frame not delivered",
                self.conn_id,
                e.0.kind()
            ))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
