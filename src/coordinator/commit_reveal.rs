use crate::agent::AgentError;
use crate::chain::{ChainClient, ChainError, TxOutcome};
use crate::config::CoordinatorConfig;
use crate::coordinator::nonce::NonceManager;
use crate::coordinator::receipt::wait_for_receipt;
use crate::coordinator::retry::RetryBuffer;
use crate::store::{CommitStatus, CommitmentRepository};
use crate::utils::{TOKEN_DECIMALS, format_token_amount, short_hash};
use ethers::types::{H256, TxHash, U256};
use ethers::utils::keccak256;
use itertools::Itertools;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one reveal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// Reveal mined successfully
    Revealed,
    /// Nothing to do for this hash
    Skipped,
    /// Attempt failed, the hash goes back to the retry buffer
    Retry,
}

/// `commit_block + max_unverified_blocks <= current`
pub fn is_expired(commit_block: u64, current_block: u64, max_unverified_blocks: u64) -> bool {
    commit_block.saturating_add(max_unverified_blocks) <= current_block
}

/// Drives the agent's commitments from seed generation to reveal.
///
/// Commits are issued on a timer. Reveals go through a bounded queue drained by a single worker;
/// hashes that could not be queued or revealed wait in a retry buffer until the next reconcile
/// pass, which checks them against the oracle's own view before queueing them again.
pub struct Coordinator {
    chain: Arc<dyn ChainClient>,
    repo: CommitmentRepository,
    config: CoordinatorConfig,
    nonces: NonceManager,
    retry: RetryBuffer,
    reveal_tx: mpsc::Sender<H256>,
    reveal_rx: Mutex<Option<mpsc::Receiver<H256>>>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        repo: CommitmentRepository,
        config: CoordinatorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (reveal_tx, reveal_rx) = mpsc::channel(config.reveal_queue_capacity.max(1));
        Self {
            chain,
            repo,
            config,
            nonces: NonceManager::new(),
            retry: RetryBuffer::new(),
            reveal_tx,
            reveal_rx: Mutex::new(Some(reveal_rx)),
            cancel,
        }
    }

    pub fn repository(&self) -> &CommitmentRepository {
        &self.repo
    }

    /// Hashes currently sitting in the reveal queue
    pub fn queue_depth(&self) -> usize {
        self.config
            .reveal_queue_capacity
            .max(1)
            .saturating_sub(self.reveal_tx.capacity())
    }

    #[cfg(test)]
    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    /// Makes sure the oracle may pull `amount` of the payment token from the agent's account.
    pub async fn approve_allowance(&self, amount: U256) -> Result<(), AgentError> {
        let owner = self.chain.address();
        let spender = self.chain.oracle_address();

        let current = self.chain.token_allowance(owner, spender).await?;
        if current >= amount {
            info!(
                "Token allowance of {} already granted to oracle {:?}",
                format_token_amount(current, TOKEN_DECIMALS),
                spender
            );
            return Ok(());
        }

        let tx = self
            .send_with_nonce(|nonce| self.chain.send_approve(spender, amount, nonce))
            .await?;
        info!(
            "Approving {} tokens to oracle {:?} in {:?}",
            format_token_amount(amount, TOKEN_DECIMALS),
            spender,
            tx
        );

        match self.wait(tx).await {
            Some(TxOutcome { success: true, .. }) => {
                info!("Token allowance granted");
                Ok(())
            }
            Some(_) => Err(AgentError::Startup(format!(
                "Approve transaction {:?} reverted",
                tx
            ))),
            None => Err(AgentError::Timeout(format!(
                "No receipt for approve transaction {:?}",
                tx
            ))),
        }
    }

    /// Generates a seed, stores it and commits its hash on chain.
    ///
    /// Returns the commitment hash, or `None` when the submission failed and the commitment
    /// was abandoned.
    pub async fn issue_commit(&self) -> Result<Option<H256>, AgentError> {
        let seed = self.fresh_seed();
        let hash = self.chain.compute_commit_hash(seed).await?;

        // The seed must be durable before the hash is public.
        self.repo.store_seed(hash, seed)?;
        self.repo.mark_pending(hash)?;

        let tx = match self
            .send_with_nonce(|nonce| self.chain.send_commit(hash, nonce))
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                error!("Failed to submit commit {}: {}", short_hash(&hash), e);
                self.repo.mark_abandoned(hash)?;
                return Ok(None);
            }
        };
        self.repo.store_tx(hash, tx)?;
        self.repo.set_status(hash, CommitStatus::Committed)?;
        info!("Committed {} in {:?}", short_hash(&hash), tx);

        match self.wait(tx).await {
            Some(TxOutcome {
                success: true,
                block_number,
            }) => {
                if let Some(block) = block_number {
                    self.repo.set_commit_block(hash, block)?;
                }
                self.repo.set_status(hash, CommitStatus::PendingReveal)?;
                debug!("Commit {} mined in block {:?}", short_hash(&hash), block_number);
            }
            Some(_) => {
                warn!("Commit {} reverted, abandoning", short_hash(&hash));
                self.repo.mark_abandoned(hash)?;
                return Ok(None);
            }
            None => {
                warn!(
                    "No receipt for commit {} yet, keeping it pending",
                    short_hash(&hash)
                );
                self.repo.set_status(hash, CommitStatus::PendingReveal)?;
            }
        }

        Ok(Some(hash))
    }

    /// Queues `hash` for reveal, falling back to the retry buffer when the queue is full.
    pub fn request_reveal(&self, hash: H256) {
        match self.reveal_tx.try_send(hash) {
            Ok(()) => debug!("Queued {} for reveal", short_hash(&hash)),
            Err(TrySendError::Full(hash)) => {
                warn!(
                    "Reveal queue full, deferring {} to the next reconcile",
                    short_hash(&hash)
                );
                self.retry.push(hash);
            }
            Err(TrySendError::Closed(hash)) => {
                warn!("Reveal queue closed, deferring {}", short_hash(&hash));
                self.retry.push(hash);
            }
        }
    }

    /// Narrows `candidates` down to the hashes that still need a reveal.
    ///
    /// Hashes the oracle reports as revealed are recorded as such, hashes past the reveal window
    /// are expired, and hashes the oracle does not list yet are left alone.
    pub async fn reconcile(&self, candidates: Vec<H256>) -> Result<Vec<H256>, AgentError> {
        let on_chain: HashMap<H256, _> = self
            .chain
            .list_unverified_commitments(self.chain.address())
            .await?
            .into_iter()
            .map(|record| (record.hash, record))
            .collect();
        let current_block = self.chain.block_number().await?;

        let mut work = Vec::new();
        for hash in candidates.into_iter().unique() {
            let Some(record) = on_chain.get(&hash) else {
                debug!("{} not listed by the oracle, skipping", short_hash(&hash));
                continue;
            };

            if record.revealed {
                let seed = (!record.seed.is_zero()).then_some(record.seed);
                self.repo.mark_revealed(hash, seed)?;
                continue;
            }

            self.repo.set_commit_block(hash, record.commit_block)?;
            if is_expired(
                record.commit_block,
                current_block,
                self.config.max_unverified_blocks,
            ) {
                info!(
                    "Commitment {} from block {} expired at block {}",
                    short_hash(&hash),
                    record.commit_block,
                    current_block
                );
                self.repo.mark_expired(hash)?;
                continue;
            }

            work.push(hash);
        }

        Ok(work)
    }

    /// Submits the reveal for `hash` and waits for it to be mined.
    pub async fn reveal(&self, hash: H256) -> Result<RevealOutcome, AgentError> {
        match self.repo.status(hash)? {
            Some(CommitStatus::Revealed) => {
                self.repo.clear_pending(hash)?;
                debug!("{} already revealed", short_hash(&hash));
                return Ok(RevealOutcome::Skipped);
            }
            Some(status) if status.is_terminal() => {
                debug!("{} is {:?}, not revealing", short_hash(&hash), status);
                return Ok(RevealOutcome::Skipped);
            }
            _ => {}
        }

        let Some(seed) = self.repo.seed(hash)? else {
            error!("No stored seed for {}, cannot reveal", short_hash(&hash));
            return Ok(RevealOutcome::Skipped);
        };

        let tx = match self
            .send_with_nonce(|nonce| self.chain.send_reveal(hash, seed, nonce))
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Failed to submit reveal for {}: {}", short_hash(&hash), e);
                return Ok(RevealOutcome::Retry);
            }
        };
        info!("Revealing {} in {:?}", short_hash(&hash), tx);

        match self.wait(tx).await {
            Some(TxOutcome { success: true, .. }) => {
                self.repo.mark_revealed(hash, Some(seed))?;
                info!("Revealed {}", short_hash(&hash));
                Ok(RevealOutcome::Revealed)
            }
            Some(_) => {
                warn!("Reveal of {} reverted", short_hash(&hash));
                Ok(RevealOutcome::Retry)
            }
            None => {
                warn!("No receipt for reveal of {}", short_hash(&hash));
                Ok(RevealOutcome::Retry)
            }
        }
    }

    async fn process_reveal(&self, hash: H256) {
        match self.reveal(hash).await {
            Ok(RevealOutcome::Revealed) | Ok(RevealOutcome::Skipped) => {}
            Ok(RevealOutcome::Retry) => self.retry.push(hash),
            Err(e) => {
                error!("Reveal of {} failed: {}", short_hash(&hash), e);
                self.retry.push(hash);
            }
        }
    }

    /// Issues a commit unless the reveal queue is backed up.
    pub async fn commit_tick(&self) {
        let depth = self.queue_depth();
        if depth >= self.config.backpressure_threshold {
            debug!("Reveal queue holds {} entries, skipping commit", depth);
            return;
        }
        if let Err(e) = self.issue_commit().await {
            error!("Commit failed: {}", e);
        }
    }

    /// Re-examines persisted pending hashes plus the retry buffer and queues what remains.
    pub async fn reconcile_tick(&self) {
        let mut candidates = match self.repo.pending_hashes() {
            Ok(hashes) => hashes,
            Err(e) => {
                error!("Failed to load pending reveals: {}", e);
                Vec::new()
            }
        };
        let retried = self.retry.drain();
        candidates.extend(retried.iter().copied());
        if candidates.is_empty() {
            return;
        }

        match self.reconcile(candidates).await {
            Ok(work) => {
                if !work.is_empty() {
                    info!("Reconcile queued {} reveals", work.len());
                }
                for hash in work {
                    self.request_reveal(hash);
                }
            }
            Err(e) => {
                warn!("Reconcile failed: {}", e);
                self.retry.extend(retried);
            }
        }
    }

    /// Drains the reveal queue until cancelled. Only one worker may run.
    pub async fn run_reveal_worker(self: Arc<Self>) {
        let receiver = self.reveal_rx.lock().ok().and_then(|mut rx| rx.take());
        let Some(mut receiver) = receiver else {
            error!("Reveal worker already started");
            return;
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(hash) => self.process_reveal(hash).await,
                    None => break,
                },
            }
        }
        debug!("Reveal worker stopped");
    }

    pub async fn run_commit_timer(self: Arc<Self>) {
        let period = self.config.timings.commit_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.commit_tick().await,
            }
        }
        debug!("Commit timer stopped");
    }

    pub async fn run_reconcile_timer(self: Arc<Self>) {
        let period = self.config.timings.reconcile_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.reconcile_tick().await,
            }
        }
        debug!("Reconcile timer stopped");
    }

    fn fresh_seed(&self) -> H256 {
        let mut entropy = [0u8; 32];
        rand::rng().fill(&mut entropy);

        let mut material = Vec::with_capacity(52);
        material.extend_from_slice(self.chain.address().as_bytes());
        material.extend_from_slice(&entropy);
        H256::from(keccak256(material))
    }

    async fn send_with_nonce<F, Fut>(&self, send: F) -> Result<TxHash, ChainError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<TxHash, ChainError>>,
    {
        let observed = match self.chain.transaction_count(self.chain.address()).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Failed to read account nonce, using cached value: {}", e);
                None
            }
        };
        let nonce = self.nonces.next(observed).await;
        match send(nonce).await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                self.nonces.release(nonce).await;
                Err(e)
            }
        }
    }

    async fn wait(&self, tx: TxHash) -> Option<TxOutcome> {
        wait_for_receipt(
            self.chain.as_ref(),
            tx,
            self.config.timings.receipt_poll,
            self.config.timings.receipt_timeout,
            &self.cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockChain, ReceiptPolicy};
    use crate::store::MemoryStore;
    use ethers::types::Address;
    use std::time::Duration;

    fn setup() -> (Arc<MockChain>, Arc<Coordinator>) {
        let chain = Arc::new(MockChain::new(Address::repeat_byte(0x11)));
        chain.set_head(100);
        let repo = CommitmentRepository::new(Arc::new(MemoryStore::new()));
        let coordinator = Arc::new(Coordinator::new(
            chain.clone(),
            repo,
            CoordinatorConfig::default(),
            CancellationToken::new(),
        ));
        (chain, coordinator)
    }

    fn seed_pending(coordinator: &Coordinator, hash: H256, seed: H256) {
        let repo = coordinator.repository();
        repo.store_seed(hash, seed).unwrap();
        repo.mark_pending(hash).unwrap();
        repo.set_status(hash, CommitStatus::PendingReveal).unwrap();
    }

    #[test]
    fn expiry_boundary() {
        assert!(!is_expired(100, 499, 400));
        assert!(is_expired(100, 500, 400));
        assert!(is_expired(0, 400, 400));
    }

    #[tokio::test(start_paused = true)]
    async fn commit_stores_seed_before_hash_goes_out() {
        let (chain, coordinator) = setup();

        let hash = coordinator.issue_commit().await.unwrap().unwrap();

        let repo = coordinator.repository();
        let seed = repo.seed(hash).unwrap().unwrap();
        assert_eq!(H256::from(keccak256(seed.as_bytes())), hash);
        assert!(repo.is_pending(hash).unwrap());
        assert_eq!(repo.status(hash).unwrap(), Some(CommitStatus::PendingReveal));
        assert_eq!(repo.record(hash).unwrap().unwrap().commit_block, Some(100));
        assert!(repo.tx(hash).unwrap().is_some());
        assert_eq!(chain.commits(), vec![(hash, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submission_abandons_and_reuses_nonce() {
        let (chain, coordinator) = setup();
        chain.fail_sends(true);

        assert_eq!(coordinator.issue_commit().await.unwrap(), None);
        assert!(coordinator.repository().pending_hashes().unwrap().is_empty());

        chain.fail_sends(false);
        let hash = coordinator.issue_commit().await.unwrap().unwrap();
        assert_eq!(chain.commits(), vec![(hash, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_commit_is_abandoned() {
        let (chain, coordinator) = setup();
        chain.set_commit_policy(ReceiptPolicy::Revert);

        assert_eq!(coordinator.issue_commit().await.unwrap(), None);

        let (hash, _) = chain.commits()[0];
        let repo = coordinator.repository();
        assert_eq!(repo.status(hash).unwrap(), Some(CommitStatus::Abandoned));
        assert!(!repo.is_pending(hash).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_commit_stays_pending() {
        let (chain, coordinator) = setup();
        chain.set_commit_policy(ReceiptPolicy::Pending);

        let hash = coordinator.issue_commit().await.unwrap().unwrap();

        assert!(coordinator.repository().is_pending(hash).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn backed_up_queue_suppresses_commits() {
        let (chain, coordinator) = setup();
        for i in 0..12u64 {
            coordinator.request_reveal(H256::from_low_u64_be(i + 1));
        }
        assert_eq!(coordinator.queue_depth(), 12);

        for _ in 0..1000 {
            coordinator.commit_tick().await;
        }

        assert!(chain.commits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn short_queue_allows_commit() {
        let (chain, coordinator) = setup();
        for i in 0..9u64 {
            coordinator.request_reveal(H256::from_low_u64_be(i + 1));
        }

        coordinator.commit_tick().await;

        assert_eq!(chain.commits().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_defers_to_retry_buffer() {
        let chain = Arc::new(MockChain::new(Address::repeat_byte(0x11)));
        let repo = CommitmentRepository::new(Arc::new(MemoryStore::new()));
        let config = CoordinatorConfig {
            reveal_queue_capacity: 2,
            ..CoordinatorConfig::default()
        };
        let coordinator = Coordinator::new(chain, repo, config, CancellationToken::new());

        for i in 0..3u64 {
            coordinator.request_reveal(H256::from_low_u64_be(i + 1));
        }

        assert_eq!(coordinator.queue_depth(), 2);
        assert_eq!(coordinator.retry_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_marks_hash_revealed() {
        let (chain, coordinator) = setup();
        let hash = coordinator.issue_commit().await.unwrap().unwrap();
        let seed = coordinator.repository().seed(hash).unwrap().unwrap();

        assert_eq!(
            coordinator.reveal(hash).await.unwrap(),
            RevealOutcome::Revealed
        );

        let repo = coordinator.repository();
        assert_eq!(repo.status(hash).unwrap(), Some(CommitStatus::Revealed));
        assert!(!repo.is_pending(hash).unwrap());
        assert_eq!(chain.reveals(), vec![(hash, seed, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn revealed_hash_is_not_revealed_again() {
        let (chain, coordinator) = setup();
        let hash = H256::repeat_byte(0x42);
        coordinator
            .repository()
            .mark_revealed(hash, Some(H256::repeat_byte(0x43)))
            .unwrap();

        assert_eq!(coordinator.reveal(hash).await.unwrap(), RevealOutcome::Skipped);
        assert!(chain.reveals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_seed_is_skipped() {
        let (chain, coordinator) = setup();
        let hash = H256::repeat_byte(0x44);
        coordinator.repository().mark_pending(hash).unwrap();

        assert_eq!(coordinator.reveal(hash).await.unwrap(), RevealOutcome::Skipped);
        assert!(chain.reveals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_reveal_is_retried() {
        let (chain, coordinator) = setup();
        chain.set_reveal_policy(ReceiptPolicy::Revert);
        let hash = H256::repeat_byte(0x45);
        seed_pending(&coordinator, hash, H256::repeat_byte(0x46));

        coordinator.process_reveal(hash).await;

        assert_eq!(coordinator.retry_len(), 1);
        assert!(coordinator.repository().is_pending(hash).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_reveal_is_retried() {
        let (chain, coordinator) = setup();
        chain.set_reveal_policy(ReceiptPolicy::Pending);
        let hash = H256::repeat_byte(0x47);
        seed_pending(&coordinator, hash, H256::repeat_byte(0x48));

        coordinator.process_reveal(hash).await;

        assert_eq!(chain.reveals().len(), 1);
        assert_eq!(coordinator.retry_len(), 1);
        assert!(coordinator.repository().is_pending(hash).unwrap());
        assert_ne!(
            coordinator.repository().status(hash).unwrap(),
            Some(CommitStatus::Revealed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_filters_candidates() {
        let (chain, coordinator) = setup();
        chain.set_head(500);
        let live = H256::repeat_byte(1);
        let stale = H256::repeat_byte(2);
        let unknown = H256::repeat_byte(3);
        let done = H256::repeat_byte(4);
        for hash in [live, stale, unknown, done] {
            seed_pending(&coordinator, hash, H256::repeat_byte(0x99));
        }
        chain.add_unverified(chain.unverified_record(live, 101));
        chain.add_unverified(chain.unverified_record(stale, 100));
        let mut revealed = chain.unverified_record(done, 300);
        revealed.revealed = true;
        chain.add_unverified(revealed);

        let work = coordinator
            .reconcile(vec![live, stale, unknown, done, live])
            .await
            .unwrap();

        assert_eq!(work, vec![live]);
        let repo = coordinator.repository();
        assert_eq!(repo.status(stale).unwrap(), Some(CommitStatus::Expired));
        assert!(!repo.is_pending(stale).unwrap());
        assert_eq!(repo.status(done).unwrap(), Some(CommitStatus::Revealed));
        assert!(repo.is_pending(unknown).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_tick_requeues_retry_buffer() {
        let (chain, coordinator) = setup();
        let hash = H256::repeat_byte(7);
        seed_pending(&coordinator, hash, H256::repeat_byte(8));
        chain.add_unverified(chain.unverified_record(hash, 90));
        coordinator.retry.push(hash);

        coordinator.reconcile_tick().await;

        assert_eq!(coordinator.retry_len(), 0);
        assert_eq!(coordinator.queue_depth(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_reveals_queued_hash() {
        let (chain, coordinator) = setup();
        let hash = coordinator.issue_commit().await.unwrap().unwrap();
        let worker = tokio::spawn(coordinator.clone().run_reveal_worker());

        coordinator.request_reveal(hash);
        for _ in 0..50 {
            if coordinator.repository().status(hash).unwrap() == Some(CommitStatus::Revealed) {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        assert_eq!(
            coordinator.repository().status(hash).unwrap(),
            Some(CommitStatus::Revealed)
        );
        assert_eq!(chain.reveals().len(), 1);
        coordinator.cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn approve_skips_when_allowance_suffices() {
        let (chain, coordinator) = setup();
        chain.set_allowance(U256::from(1_000u64));

        coordinator.approve_allowance(U256::from(500u64)).await.unwrap();
        assert!(chain.approvals().is_empty());

        coordinator.approve_allowance(U256::from(5_000u64)).await.unwrap();
        assert_eq!(chain.approvals().len(), 1);
    }
}
