//! Core types, wire protocol, config, and errors for Gemini Relay.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod types;
