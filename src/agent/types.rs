use crate::chain::ChainError;
use crate::store::StoreError;

/// Top level error of the agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Startup error: {0}")]
	Startup(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Timed out: {0}")]
	Timeout(String),
}
