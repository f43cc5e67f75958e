//! Per-connection session handlers.
//!
//! Sessions are transport-agnostic: they consume a stream of inbound text
//! frames and write typed outbound frames to a queue. The server layer binds
//! them to WebSocket halves.

pub mod agent;


pub use agent::AgentSession;

/// Errors surfaced by the transport under a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),
}
