//! Command dispatch: request/response over the agent's duplex connection.

mod dispatcher;

pub use dispatcher::{CommandDispatcher, CommandError, CommandReply};
