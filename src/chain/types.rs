use ethers::providers::ProviderError;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// Errors raised while talking to the chain node or the oracle contract
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract call failed: {0}")]
    Contract(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Log decode error: {0}")]
    Decode(String),

    #[error("Invalid chain configuration: {0}")]
    Config(String),
}

/// Mined result of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    pub block_number: Option<u64>,
    /// Receipt status == 1
    pub success: bool,
}

/// A commitment as the oracle contract sees it, returned by the per-user unverified list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainCommitRecord {
    pub hash: H256,
    pub committer: Address,
    pub commit_block: u64,
    pub seed: H256,
    pub revealed: bool,
    pub verified_block: u64,
    pub consumer: Address,
    pub subscriber: Address,
    pub subscribe_block: u64,
    pub subscribe_status: u8,
}
