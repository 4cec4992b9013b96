use ethers::types::H256;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Hashes waiting to be re-enqueued by the next reconcile pass
#[derive(Debug, Default)]
pub struct RetryBuffer {
    hashes: Mutex<Vec<H256>>,
}

impl RetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere must not cost us queued reveals.
    fn hashes(&self) -> MutexGuard<'_, Vec<H256>> {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, hash: H256) {
        self.hashes().push(hash);
    }

    pub fn extend(&self, more: impl IntoIterator<Item = H256>) {
        self.hashes().extend(more);
    }

    /// Empties the buffer and returns its contents
    pub fn drain(&self) -> Vec<H256> {
        std::mem::take(&mut *self.hashes())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.hashes().len()
    }
}
