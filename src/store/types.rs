use serde::{Deserialize, Serialize};

/// Errors raised by the durable key-value store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lifecycle of a commitment issued by this agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    /// Seed generated and stored, commit not yet submitted
    Created,
    /// Commit transaction submitted
    Committed,
    /// Commit is on chain and waits for its reveal
    PendingReveal,
    Revealed,
    /// Reveal window closed before the seed could be published
    Expired,
    /// Commit submission failed or reverted
    Abandoned,
}

impl CommitStatus {
    /// Terminal statuses never move back into the pending-reveal set
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revealed | Self::Expired | Self::Abandoned)
    }
}

/// Per-hash bookkeeping persisted next to the seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub status: CommitStatus,
    pub commit_block: Option<u64>,
    /// Unix seconds of the last status change
    pub updated_at: i64,
}

impl CommitRecord {
    pub fn new(status: CommitStatus) -> Self {
        Self {
            status,
            commit_block: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}
