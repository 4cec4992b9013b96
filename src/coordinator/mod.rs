//! Commit-reveal coordination.
//!
//! - `commit_reveal`: the [`Coordinator`], which issues commits, reveals seeds and reconciles
//!   local state with the oracle.
//! - `nonce`: nonce bookkeeping for the single signing account.
//! - `receipt`: bounded polling for transaction receipts.
//! - `retry`: hashes waiting for the next reconcile pass.

pub mod commit_reveal;
pub mod nonce;
pub mod receipt;
pub mod retry;

pub use commit_reveal::Coordinator;
