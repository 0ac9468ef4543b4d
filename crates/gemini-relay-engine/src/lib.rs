//! Engine process management for Gemini Relay.
//!
//! Three layers, leaf first:
//!
//! - [`resolver`] finds a launch command that actually runs the engine.
//! - [`classifier`] splits the engine's text output into typed frames.
//! - [`supervisor`] owns one engine process per connection: spawn, stream,
//!   write, terminate.

pub mod classifier;
pub mod resolver;
pub mod supervisor;

pub use classifier::OutputClassifier;
pub use resolver::{CommandResolver, EngineCommand};
pub use supervisor::{ManagedProcess, ProcessRegistry, Supervisor};
