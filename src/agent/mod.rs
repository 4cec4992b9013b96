//! Agent assembly and lifecycle.
//!
//! [`Agent::new`] grants the oracle its token allowance; [`Agent::start`] wires the sync engine,
//! the reveal trigger and the coordinator's loops together and returns an `AgentHandle` whose
//! `shutdown` cancels and joins all of them.

mod lifecycle;
mod types;

pub use lifecycle::{Agent, AgentSettings};
pub use types::AgentError;
