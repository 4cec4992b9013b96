use crate::chain::{ChainClient, TxOutcome};
use ethers::types::TxHash;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls for the receipt of `tx` every `poll` until `timeout` elapses.
///
/// Returns `None` on timeout or cancellation. Failed polls are retried.
pub async fn wait_for_receipt(
    chain: &dyn ChainClient,
    tx: TxHash,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<TxOutcome> {
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep_until(deadline) => return None,
            _ = ticker.tick() => {
                match chain.transaction_receipt(tx).await {
                    Ok(Some(outcome)) => return Some(outcome),
                    Ok(None) => {}
                    Err(e) => debug!("Receipt poll for {:?} failed: {}", tx, e),
                }
            }
        }
    }
}
