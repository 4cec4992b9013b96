use crate::chain::contracts::{OracleContract, TokenContract};
use crate::chain::{ChainError, OnChainCommitRecord, TxOutcome};
use crate::config::AgentConfig;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Filter, H256, Log, TxHash, U64, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// `Commit` struct as returned by `getUserUnverifiedList`, in field order
type RawCommit = (
	Address,
	[u8; 32],
	U256,
	[u8; 32],
	bool,
	U256,
	Address,
	Address,
	U256,
	u8,
);

fn commit_record(raw: RawCommit) -> OnChainCommitRecord {
	let (
		author,
		commit,
		block,
		seed,
		revealed,
		verified_block,
		consumer,
		subsender,
		sub_block,
		substatus,
	) = raw;
	OnChainCommitRecord {
		hash: H256::from(commit),
		committer: author,
		commit_block: block.low_u64(),
		seed: H256::from(seed),
		revealed,
		verified_block: verified_block.low_u64(),
		consumer,
		subscriber: subsender,
		subscribe_block: sub_block.low_u64(),
		subscribe_status: substatus,
	}
}

/// Everything the agent needs from the chain.
///
/// Read operations never sign. Every write takes an explicit nonce, which the caller owns.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
	/// Address the agent signs with
	fn address(&self) -> Address;

	/// Address of the oracle contract
	fn oracle_address(&self) -> Address;

	async fn block_number(&self) -> Result<u64, ChainError>;

	/// Oracle logs in the inclusive block range `[from, to]`
	async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, ChainError>;

	async fn transaction_count(&self, owner: Address) -> Result<u64, ChainError>;

	/// `None` while the transaction is not mined
	async fn transaction_receipt(&self, tx: TxHash) -> Result<Option<TxOutcome>, ChainError>;

	async fn block_of_transaction(&self, tx: TxHash) -> Result<Option<u64>, ChainError>;

	/// Commitment hash the oracle derives from a seed
	async fn compute_commit_hash(&self, seed: H256) -> Result<H256, ChainError>;

	async fn send_commit(&self, hash: H256, nonce: u64) -> Result<TxHash, ChainError>;

	async fn send_reveal(&self, hash: H256, seed: H256, nonce: u64) -> Result<TxHash, ChainError>;

	async fn token_allowance(&self, owner: Address, spender: Address) -> Result<U256, ChainError>;

	async fn send_approve(
		&self,
		spender: Address,
		amount: U256,
		nonce: u64,
	) -> Result<TxHash, ChainError>;

	/// Commitments of `owner` the oracle has not verified yet
	async fn list_unverified_commitments(
		&self,
		owner: Address,
	) -> Result<Vec<OnChainCommitRecord>, ChainError>;
}

/// JSON-RPC backed chain client with a local signing key
pub struct EthChainClient {
	provider: Provider<Http>,
	oracle: OracleContract<SignerClient>,
	token: TokenContract<SignerClient>,
	address: Address,
	gas_limit: U256,
	gas_price: U256,
}

impl EthChainClient {
	pub fn connect(config: &AgentConfig) -> Result<Self, ChainError> {
		let http_client = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.rpc_timeout_secs))
			.build()
			.map_err(|e| ChainError::Config(format!("Failed to build HTTP client: {}", e)))?;
		let url = reqwest::Url::parse(&config.rpc_url)
			.map_err(|e| ChainError::Config(format!("Invalid RPC url {}: {}", config.rpc_url, e)))?;
		let provider = Provider::new(Http::new_with_client(url, http_client));

		let wallet = config
			.private_key
			.parse::<LocalWallet>()
			.map_err(|e| ChainError::Signer(e.to_string()))?
			.with_chain_id(config.chain_id);
		let address = wallet.address();

		let signer = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
		let oracle_address = parse_address(&config.oracle_address)?;
		let token_address = parse_address(&config.token_address)?;

		Ok(Self {
			provider,
			oracle: OracleContract::new(oracle_address, signer.clone()),
			token: TokenContract::new(token_address, signer),
			address,
			gas_limit: U256::from(config.gas_limit),
			gas_price: U256::from(config.gas_price_wei),
		})
	}
}

pub fn parse_address(value: &str) -> Result<Address, ChainError> {
	value
		.parse::<Address>()
		.map_err(|e| ChainError::Config(format!("Invalid address {}: {}", value, e)))
}

#[async_trait::async_trait]
impl ChainClient for EthChainClient {
	fn address(&self) -> Address {
		self.address
	}

	fn oracle_address(&self) -> Address {
		self.oracle.address()
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		Ok(self.provider.get_block_number().await?.as_u64())
	}

	async fn filter_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, ChainError> {
		let filter = Filter::new()
			.address(self.oracle.address())
			.from_block(from)
			.to_block(to);
		let logs = self.provider.get_logs(&filter).await?;
		debug!("Fetched {} logs in [{}, {}]", logs.len(), from, to);
		Ok(logs)
	}

	async fn transaction_count(&self, owner: Address) -> Result<u64, ChainError> {
		Ok(self
			.provider
			.get_transaction_count(owner, None)
			.await?
			.low_u64())
	}

	async fn transaction_receipt(&self, tx: TxHash) -> Result<Option<TxOutcome>, ChainError> {
		let receipt = self.provider.get_transaction_receipt(tx).await?;
		Ok(receipt.map(|r| TxOutcome {
			block_number: r.block_number.map(|b| b.as_u64()),
			success: r.status == Some(U64::from(1)),
		}))
	}

	async fn block_of_transaction(&self, tx: TxHash) -> Result<Option<u64>, ChainError> {
		let transaction = self.provider.get_transaction(tx).await?;
		Ok(transaction.and_then(|t| t.block_number).map(|b| b.as_u64()))
	}

	async fn compute_commit_hash(&self, seed: H256) -> Result<H256, ChainError> {
		let hash = self
			.oracle
			.get_hash(seed.0)
			.from(self.address)
			.call()
			.await
			.map_err(|e| ChainError::Contract(format!("getHash: {}", e)))?;
		Ok(H256::from(hash))
	}

	async fn send_commit(&self, hash: H256, nonce: u64) -> Result<TxHash, ChainError> {
		let call = self
			.oracle
			.commit(hash.0)
			.legacy()
			.nonce(nonce)
			.gas(self.gas_limit)
			.gas_price(self.gas_price);
		let pending = call
			.send()
			.await
			.map_err(|e| ChainError::Contract(format!("commit: {}", e)))?;
		Ok(pending.tx_hash())
	}

	async fn send_reveal(&self, hash: H256, seed: H256, nonce: u64) -> Result<TxHash, ChainError> {
		let call = self
			.oracle
			.reveal(hash.0, seed.0)
			.legacy()
			.nonce(nonce)
			.gas(self.gas_limit)
			.gas_price(self.gas_price);
		let pending = call
			.send()
			.await
			.map_err(|e| ChainError::Contract(format!("reveal: {}", e)))?;
		Ok(pending.tx_hash())
	}

	async fn token_allowance(&self, owner: Address, spender: Address) -> Result<U256, ChainError> {
		self.token
			.allowance(owner, spender)
			.call()
			.await
			.map_err(|e| ChainError::Contract(format!("allowance: {}", e)))
	}

	async fn send_approve(
		&self,
		spender: Address,
		amount: U256,
		nonce: u64,
	) -> Result<TxHash, ChainError> {
		let call = self
			.token
			.approve(spender, amount)
			.legacy()
			.nonce(nonce)
			.gas(self.gas_limit)
			.gas_price(self.gas_price);
		let pending = call
			.send()
			.await
			.map_err(|e| ChainError::Contract(format!("approve: {}", e)))?;
		Ok(pending.tx_hash())
	}

	async fn list_unverified_commitments(
		&self,
		owner: Address,
	) -> Result<Vec<OnChainCommitRecord>, ChainError> {
		let commits = self
			.oracle
			.get_user_unverified_list(owner)
			.from(self.address)
			.call()
			.await
			.map_err(|e| ChainError::Contract(format!("getUserUnverifiedList: {}", e)))?;

		Ok(commits.into_iter().map(commit_record).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unverified_commit_tuple_maps_by_position() {
		let raw: RawCommit = (
			Address::repeat_byte(0xa1),
			[0x11; 32],
			U256::from(1_234u64),
			[0x22; 32],
			true,
			U256::from(1_240u64),
			Address::repeat_byte(0xc1),
			Address::repeat_byte(0xd1),
			U256::from(1_236u64),
			2,
		);

		let record = commit_record(raw);

		assert_eq!(record.hash, H256::repeat_byte(0x11));
		assert_eq!(record.committer, Address::repeat_byte(0xa1));
		assert_eq!(record.commit_block, 1_234);
		assert_eq!(record.seed, H256::repeat_byte(0x22));
		assert!(record.revealed);
		assert_eq!(record.verified_block, 1_240);
		assert_eq!(record.consumer, Address::repeat_byte(0xc1));
		assert_eq!(record.subscriber, Address::repeat_byte(0xd1));
		assert_eq!(record.subscribe_block, 1_236);
		assert_eq!(record.subscribe_status, 2);
	}
}
