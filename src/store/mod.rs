//! Durable state of the agent.
//!
//! Everything the agent must remember across restarts lives behind the [`KvStore`] trait: seeds,
//! commit transaction hashes, per-commitment status records, the pending-reveal set and the sync
//! cursor. [`CommitmentRepository`] gives that raw byte store a typed shape.

mod kv;
mod repository;
mod types;

pub use kv::{KvStore, MemoryStore, SqliteStore};
pub use repository::CommitmentRepository;
pub use types::{CommitRecord, CommitStatus, StoreError, StoreResult};
