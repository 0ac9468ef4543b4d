//! WebSocket gateway for Gemini Relay.
//!
//! Each browser connection gets its own engine process. The gateway accepts
//! the connection, interprets inbound actions, and runs the single writer
//! task that delivers queued frames back to the browser.

pub mod connection;
pub mod dispatch;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::GatewayState;
