//! Connection registry: the single source of truth for which rigs are online.

mod connection;

pub use connection::{CloseReason, ConnectionRegistry, PendingOutcome, RigConnection};
