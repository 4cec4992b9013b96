use crate::store::{CommitRecord, CommitStatus, KvStore, StoreError, StoreResult};
use ethers::types::{H256, TxHash};
use std::sync::Arc;
use tracing::debug;

const SEED_PREFIX: &[u8] = b"kss";
const TX_PREFIX: &[u8] = b"kst";
const RECORD_PREFIX: &[u8] = b"ksm";
const PENDING_PREFIX: &[u8] = b"ksu";
const CURSOR_KEY: &[u8] = b"lastSyncBlock";

/// Typed view over the key-value store for commitments, seeds and the sync cursor.
///
/// Key layout:
/// - `kss || hash` -> seed
/// - `kst || hash` -> commit transaction hash
/// - `ksm || hash` -> bincode [`CommitRecord`]
/// - `ksu || hash` -> marker, present while the hash awaits its reveal
/// - `lastSyncBlock` -> next block to scan, big-endian u64
#[derive(Clone)]
pub struct CommitmentRepository {
	store: Arc<dyn KvStore>,
}

fn key(prefix: &[u8], hash: &H256) -> Vec<u8> {
	let mut key = Vec::with_capacity(prefix.len() + 32);
	key.extend_from_slice(prefix);
	key.extend_from_slice(hash.as_bytes());
	key
}

fn decode_hash(bytes: &[u8]) -> StoreResult<H256> {
	if bytes.len() != 32 {
		return Err(StoreError::Corrupt(format!(
			"expected 32 bytes, found {}",
			bytes.len()
		)));
	}
	Ok(H256::from_slice(bytes))
}

impl CommitmentRepository {
	pub fn new(store: Arc<dyn KvStore>) -> Self {
		Self { store }
	}

	/// Stores the seed behind `hash`. A new hash starts out as `Created`.
	pub fn store_seed(&self, hash: H256, seed: H256) -> StoreResult<()> {
		self.store.set(&key(SEED_PREFIX, &hash), seed.as_bytes())?;
		if self.record(hash)?.is_none() {
			self.put_record(hash, &CommitRecord::new(CommitStatus::Created))?;
		}
		Ok(())
	}

	pub fn seed(&self, hash: H256) -> StoreResult<Option<H256>> {
		self.store
			.get(&key(SEED_PREFIX, &hash))?
			.map(|bytes| decode_hash(&bytes))
			.transpose()
	}

	pub fn store_tx(&self, hash: H256, tx: TxHash) -> StoreResult<()> {
		self.store.set(&key(TX_PREFIX, &hash), tx.as_bytes())
	}

	pub fn tx(&self, hash: H256) -> StoreResult<Option<TxHash>> {
		self.store
			.get(&key(TX_PREFIX, &hash))?
			.map(|bytes| decode_hash(&bytes))
			.transpose()
	}

	pub fn record(&self, hash: H256) -> StoreResult<Option<CommitRecord>> {
		match self.store.get(&key(RECORD_PREFIX, &hash))? {
			Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
			None => Ok(None),
		}
	}

	pub fn status(&self, hash: H256) -> StoreResult<Option<CommitStatus>> {
		Ok(self.record(hash)?.map(|r| r.status))
	}

	fn put_record(&self, hash: H256, record: &CommitRecord) -> StoreResult<()> {
		let bytes = bincode::serialize(record)?;
		self.store.set(&key(RECORD_PREFIX, &hash), &bytes)
	}

	/// Moves `hash` to `status`. Terminal statuses are sticky; returns whether the update applied.
	pub fn set_status(&self, hash: H256, status: CommitStatus) -> StoreResult<bool> {
		let mut record = self
			.record(hash)?
			.unwrap_or_else(|| CommitRecord::new(status));
		if record.status.is_terminal() && record.status != status {
			debug!(
				"Ignoring {:?} for {:?}, already {:?}",
				status, hash, record.status
			);
			return Ok(false);
		}
		record.status = status;
		record.updated_at = chrono::Utc::now().timestamp();
		self.put_record(hash, &record)?;
		Ok(true)
	}

	pub fn set_commit_block(&self, hash: H256, block: u64) -> StoreResult<()> {
		let mut record = self
			.record(hash)?
			.unwrap_or_else(|| CommitRecord::new(CommitStatus::Committed));
		if record.commit_block == Some(block) {
			return Ok(());
		}
		record.commit_block = Some(block);
		self.put_record(hash, &record)
	}

	/// Adds `hash` to the pending-reveal set unless its status is already terminal.
	pub fn mark_pending(&self, hash: H256) -> StoreResult<bool> {
		if let Some(status) = self.status(hash)? {
			if status.is_terminal() {
				return Ok(false);
			}
		}
		self.store.set(&key(PENDING_PREFIX, &hash), &[1])?;
		Ok(true)
	}

	pub fn is_pending(&self, hash: H256) -> StoreResult<bool> {
		self.store.has(&key(PENDING_PREFIX, &hash))
	}

	pub fn clear_pending(&self, hash: H256) -> StoreResult<()> {
		self.store.delete(&key(PENDING_PREFIX, &hash))
	}

	/// Every hash currently awaiting a reveal
	pub fn pending_hashes(&self) -> StoreResult<Vec<H256>> {
		self.store
			.scan(PENDING_PREFIX)?
			.into_iter()
			.map(|(key, _)| decode_hash(&key[PENDING_PREFIX.len()..]))
			.collect()
	}

	/// Records a published seed. Safe to apply any number of times.
	pub fn mark_revealed(&self, hash: H256, seed: Option<H256>) -> StoreResult<()> {
		if let Some(seed) = seed {
			self.store.set(&key(SEED_PREFIX, &hash), seed.as_bytes())?;
		}
		self.clear_pending(hash)?;
		if self.status(hash)? != Some(CommitStatus::Revealed) {
			self.set_status(hash, CommitStatus::Revealed)?;
		}
		Ok(())
	}

	pub fn mark_expired(&self, hash: H256) -> StoreResult<()> {
		self.clear_pending(hash)?;
		self.set_status(hash, CommitStatus::Expired)?;
		Ok(())
	}

	pub fn mark_abandoned(&self, hash: H256) -> StoreResult<()> {
		self.clear_pending(hash)?;
		self.set_status(hash, CommitStatus::Abandoned)?;
		Ok(())
	}

	/// Next block the sync engine has to scan
	pub fn cursor(&self) -> StoreResult<Option<u64>> {
		match self.store.get(CURSOR_KEY)? {
			Some(bytes) => {
				let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
					StoreError::Corrupt(format!("cursor has {} bytes", bytes.len()))
				})?;
				Ok(Some(u64::from_be_bytes(raw)))
			}
			None => Ok(None),
		}
	}

	pub fn set_cursor(&self, block: u64) -> StoreResult<()> {
		self.store.set(CURSOR_KEY, &block.to_be_bytes())
	}
}
