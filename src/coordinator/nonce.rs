use tokio::sync::Mutex;
use tracing::debug;

/// Hands out transaction nonces for the agent's single signing account.
///
/// The node's pending count lags behind transactions this process has just broadcast, so the
/// manager keeps its own next value and never goes below what the chain reports.
#[derive(Debug, Default)]
pub struct NonceManager {
    next: Mutex<u64>,
}

/// `max(observed, cached)`; leaves the following value in `cached`.
pub fn assign_nonce(cached: &mut u64, observed: Option<u64>) -> u64 {
    let nonce = observed.map_or(*cached, |n| n.max(*cached));
    *cached = nonce + 1;
    nonce
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next nonce given what the chain currently reports, if it could be read.
    pub async fn next(&self, observed: Option<u64>) -> u64 {
        let mut cached = self.next.lock().await;
        let nonce = assign_nonce(&mut cached, observed);
        debug!("Assigned nonce {} (chain reported {:?})", nonce, observed);
        nonce
    }

    /// Gives back a nonce whose transaction never reached the node.
    pub async fn release(&self, nonce: u64) {
        let mut cached = self.next.lock().await;
        if *cached == nonce + 1 {
            *cached = nonce;
        }
    }
}
