//! In-memory chain used by unit tests.

use crate::chain::contracts::{
    CommitHashFilter, RandomConsumedFilter, RevealSeedFilter, SubscribeFilter, UnSubscribeFilter,
};
use crate::chain::{ChainClient, ChainError, OnChainCommitRecord, TxOutcome};
use ethers::abi::{Token, encode};
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, H256, Log, TxHash, U64, U256};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::sync::Mutex;

/// How the mock mines a submitted transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceiptPolicy {
    #[default]
    Success,
    Revert,
    /// Never mined
    Pending,
}

#[derive(Default)]
struct MockState {
    head: u64,
    head_failures: usize,
    logs: Vec<Log>,
    filter_failures: usize,
    filter_calls: Vec<(u64, u64)>,
    nonce: u64,
    tx_counter: u64,
    receipts: HashMap<TxHash, TxOutcome>,
    tx_blocks: HashMap<TxHash, u64>,
    commit_policy: ReceiptPolicy,
    reveal_policy: ReceiptPolicy,
    fail_sends: bool,
    commits: Vec<(H256, u64)>,
    reveals: Vec<(H256, H256, u64)>,
    approvals: Vec<(Address, U256, u64)>,
    allowance: U256,
    unverified: Vec<OnChainCommitRecord>,
}

pub struct MockChain {
    address: Address,
    oracle: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            oracle: Address::from_low_u64_be(0x0a),
            state: Mutex::new(MockState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_head(&self, head: u64) {
        self.with_state(|s| s.head = head);
    }

    pub fn fail_next_heads(&self, count: usize) {
        self.with_state(|s| s.head_failures = count);
    }

    pub fn push_log(&self, log: Log) {
        self.with_state(|s| s.logs.push(log));
    }

    pub fn fail_next_filters(&self, count: usize) {
        self.with_state(|s| s.filter_failures = count);
    }

    pub fn filter_calls(&self) -> Vec<(u64, u64)> {
        self.with_state(|s| s.filter_calls.clone())
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.with_state(|s| s.nonce = nonce);
    }

    pub fn set_commit_policy(&self, policy: ReceiptPolicy) {
        self.with_state(|s| s.commit_policy = policy);
    }

    pub fn set_reveal_policy(&self, policy: ReceiptPolicy) {
        self.with_state(|s| s.reveal_policy = policy);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.with_state(|s| s.fail_sends = fail);
    }

    pub fn set_allowance(&self, amount: U256) {
        self.with_state(|s| s.allowance = amount);
    }

    pub fn commits(&self) -> Vec<(H256, u64)> {
        self.with_state(|s| s.commits.clone())
    }

    pub fn reveals(&self) -> Vec<(H256, H256, u64)> {
        self.with_state(|s| s.reveals.clone())
    }

    pub fn approvals(&self) -> Vec<(Address, U256, u64)> {
        self.with_state(|s| s.approvals.clone())
    }

    pub fn set_transaction_block(&self, tx: TxHash, block: u64) {
        self.with_state(|s| {
            s.tx_blocks.insert(tx, block);
        });
    }

    pub fn add_unverified(&self, record: OnChainCommitRecord) {
        self.with_state(|s| s.unverified.push(record));
    }

    /// Builds the record the oracle keeps for a fresh commitment
    pub fn unverified_record(&self, hash: H256, commit_block: u64) -> OnChainCommitRecord {
        OnChainCommitRecord {
            hash,
            committer: self.address,
            commit_block,
            seed: H256::zero(),
            revealed: false,
            verified_block: 0,
            consumer: Address::zero(),
            subscriber: Address::zero(),
            subscribe_block: 0,
            subscribe_status: 0,
        }
    }

    fn mine(state: &mut MockState, policy: ReceiptPolicy) -> TxHash {
        state.tx_counter += 1;
        let tx = H256::from_low_u64_be(state.tx_counter);
        match policy {
            ReceiptPolicy::Success | ReceiptPolicy::Revert => {
                state.nonce += 1;
                state.receipts.insert(
                    tx,
                    TxOutcome {
                        block_number: Some(state.head),
                        success: policy == ReceiptPolicy::Success,
                    },
                );
            }
            ReceiptPolicy::Pending => {}
        }
        tx
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    fn address(&self) -> Address {
        self.address
    }

    fn oracle_address(&self) -> Address {
        self.oracle
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.with_state(|s| {
            if s.head_failures > 0 {
                s.head_failures -= 1;
                return Err(ChainError::Rpc("head unavailable".to_string()));
            }
            Ok(s.head)
        })
    }

    async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, ChainError> {
        self.with_state(|s| {
            s.filter_calls.push((from, to));
            if s.filter_failures > 0 {
                s.filter_failures -= 1;
                return Err(ChainError::Rpc("filter failed".to_string()));
            }
            Ok(s.logs
                .iter()
                .filter(|log| {
                    let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                    block >= from && block <= to
                })
                .cloned()
                .collect())
        })
    }

    async fn transaction_count(&self, _owner: Address) -> Result<u64, ChainError> {
        Ok(self.with_state(|s| s.nonce))
    }

    async fn transaction_receipt(&self, tx: TxHash) -> Result<Option<TxOutcome>, ChainError> {
        Ok(self.with_state(|s| s.receipts.get(&tx).copied()))
    }

    async fn block_of_transaction(&self, tx: TxHash) -> Result<Option<u64>, ChainError> {
        Ok(self.with_state(|s| s.tx_blocks.get(&tx).copied()))
    }

    async fn compute_commit_hash(&self, seed: H256) -> Result<H256, ChainError> {
        Ok(H256::from(keccak256(seed.as_bytes())))
    }

    async fn send_commit(&self, hash: H256, nonce: u64) -> Result<TxHash, ChainError> {
        self.with_state(|s| {
            if s.fail_sends {
                return Err(ChainError::Rpc("send rejected".to_string()));
            }
            s.commits.push((hash, nonce));
            let policy = s.commit_policy;
            let tx = Self::mine(s, policy);
            if policy == ReceiptPolicy::Success {
                let record = self.unverified_record(hash, s.head);
                s.unverified.push(record);
            }
            Ok(tx)
        })
    }

    async fn send_reveal(&self, hash: H256, seed: H256, nonce: u64) -> Result<TxHash, ChainError> {
        self.with_state(|s| {
            if s.fail_sends {
                return Err(ChainError::Rpc("send rejected".to_string()));
            }
            s.reveals.push((hash, seed, nonce));
            let policy = s.reveal_policy;
            let tx = Self::mine(s, policy);
            if policy == ReceiptPolicy::Success {
                s.unverified.retain(|r| r.hash != hash);
            }
            Ok(tx)
        })
    }

    async fn token_allowance(&self, _owner: Address, _spender: Address) -> Result<U256, ChainError> {
        Ok(self.with_state(|s| s.allowance))
    }

    async fn send_approve(
        &self,
        spender: Address,
        amount: U256,
        nonce: u64,
    ) -> Result<TxHash, ChainError> {
        self.with_state(|s| {
            if s.fail_sends {
                return Err(ChainError::Rpc("send rejected".to_string()));
            }
            s.approvals.push((spender, amount, nonce));
            s.allowance = amount;
            Ok(Self::mine(s, ReceiptPolicy::Success))
        })
    }

    async fn list_unverified_commitments(
        &self,
        owner: Address,
    ) -> Result<Vec<OnChainCommitRecord>, ChainError> {
        Ok(self.with_state(|s| {
            s.unverified
                .iter()
                .filter(|r| r.committer == owner)
                .cloned()
                .collect()
        }))
    }
}

fn address_topic(address: Address) -> H256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address.as_bytes());
    H256(topic)
}

fn oracle_log(block: u64, topics: Vec<H256>, data: Vec<Token>) -> Log {
    Log {
        address: Address::from_low_u64_be(0x0a),
        topics,
        data: Bytes::from(encode(&data)),
        block_number: Some(U64::from(block)),
        log_index: Some(U256::zero()),
        ..Default::default()
    }
}

pub fn subscribe_log(block: u64, committer: Address, consumer: Address, hash: H256) -> Log {
    oracle_log(
        block,
        vec![
            SubscribeFilter::signature(),
            address_topic(committer),
            address_topic(consumer),
        ],
        vec![Token::FixedBytes(hash.as_bytes().to_vec())],
    )
}

pub fn commit_hash_log(block: u64, sender: Address, hash: H256) -> Log {
    oracle_log(
        block,
        vec![CommitHashFilter::signature(), address_topic(sender)],
        vec![
            Token::FixedBytes(hash.as_bytes().to_vec()),
            Token::Uint(U256::from(block)),
        ],
    )
}

pub fn reveal_seed_log(block: u64, committer: Address, hash: H256, seed: H256) -> Log {
    oracle_log(
        block,
        vec![RevealSeedFilter::signature(), address_topic(committer)],
        vec![
            Token::FixedBytes(hash.as_bytes().to_vec()),
            Token::FixedBytes(seed.as_bytes().to_vec()),
        ],
    )
}

pub fn unsubscribe_log(block: u64, consumer: Address, hash: H256) -> Log {
    oracle_log(
        block,
        vec![UnSubscribeFilter::signature(), address_topic(consumer)],
        vec![Token::FixedBytes(hash.as_bytes().to_vec())],
    )
}

pub fn random_consumed_log(block: u64, consumer: Address, hash: H256) -> Log {
    oracle_log(
        block,
        vec![RandomConsumedFilter::signature(), address_topic(consumer)],
        vec![Token::FixedBytes(hash.as_bytes().to_vec())],
    )
}

/// Sets the position of a log within its block
pub fn with_index(mut log: Log, index: u64) -> Log {
    log.log_index = Some(U256::from(index));
    log
}
