use crate::agent::AgentError;
use crate::coordinator::Coordinator;
use crate::store::CommitStatus;
use crate::sync::events::{OracleEvent, OracleEventHandler, ScanMode};
use crate::utils::short_hash;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Turns the agent's own oracle events into coordinator actions.
///
/// - `Subscribe`: a consumer is waiting, queue the reveal if the seed is still unrevealed.
/// - `CommitHash`: the commit is on chain. Backfilled commits are queued at once; live ones
///   after a grace delay so the commit block can settle.
/// - `RevealSeed`: the seed is public, record it.
pub struct RevealTrigger {
    coordinator: Arc<Coordinator>,
    live_grace: Duration,
    cancel: CancellationToken,
}

impl RevealTrigger {
    pub fn new(coordinator: Arc<Coordinator>, live_grace: Duration, cancel: CancellationToken) -> Self {
        Self {
            coordinator,
            live_grace,
            cancel,
        }
    }

    fn schedule_live_reveal(&self, hash: ethers::types::H256) {
        let coordinator = self.coordinator.clone();
        let cancel = self.cancel.clone();
        let grace = self.live_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(grace) => coordinator.request_reveal(hash),
            }
        });
    }
}

#[async_trait::async_trait]
impl OracleEventHandler for RevealTrigger {
    async fn handle(&mut self, event: &OracleEvent, mode: ScanMode) -> Result<(), AgentError> {
        let repo = self.coordinator.repository();
        match event {
            OracleEvent::Subscribed { consumer, hash, .. } => {
                if repo.seed(*hash)?.is_some() && repo.is_pending(*hash)? {
                    info!(
                        "Consumer {:?} subscribed to {}, queueing reveal",
                        consumer,
                        short_hash(hash)
                    );
                    self.coordinator.request_reveal(*hash);
                } else {
                    debug!("Subscription to {} needs no reveal", short_hash(hash));
                }
            }
            OracleEvent::CommitRegistered { hash, block, .. } => {
                if repo.seed(*hash)?.is_none() {
                    debug!("CommitHash for unknown {}", short_hash(hash));
                    return Ok(());
                }
                repo.set_commit_block(*hash, *block)?;
                if !repo.is_pending(*hash)? {
                    return Ok(());
                }
                if repo.status(*hash)? == Some(CommitStatus::Committed) {
                    repo.set_status(*hash, CommitStatus::PendingReveal)?;
                }
                match mode {
                    ScanMode::Backfill => self.coordinator.request_reveal(*hash),
                    ScanMode::Live => self.schedule_live_reveal(*hash),
                }
            }
            OracleEvent::SeedRevealed { hash, seed, .. } => {
                repo.mark_revealed(*hash, Some(*seed))?;
                debug!("Seed for {} is public", short_hash(hash));
            }
            OracleEvent::Unsubscribed { .. } | OracleEvent::RandomConsumed { .. } => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RevealTrigger"
    }
}
