//! Chain access for the randomness agent.
//!
//! [`ChainClient`] is the seam between the agent and the EVM node: block head, oracle logs,
//! receipts, nonces, the oracle's commit/reveal entry points and the token allowance. The
//! production implementation is [`EthChainClient`], built on an ethers HTTP provider and a
//! local signing wallet.

mod client;
pub mod contracts;
#[cfg(test)]
pub mod mock;
mod types;

pub use client::{ChainClient, EthChainClient, parse_address};
pub use types::{ChainError, OnChainCommitRecord, TxOutcome};
