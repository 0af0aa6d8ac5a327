//! Explicit cache invalidation.
//!
//! Every mutation of thread state (a confirmed send, a read transition)
//! bumps that thread's epoch. Pollers remember the last epoch they saw and
//! refresh when it moves.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use swapmail_core::ThreadKey;

/// Per-thread invalidation epochs shared by every open view.
#[derive(Debug, Default)]
pub struct InvalidationBus {
    epochs: RwLock<HashMap<ThreadKey, u64>>,
}

impl InvalidationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that `key` changed; returns the new epoch.
    pub fn invalidate(&self, key: &ThreadKey) -> u64 {
        let mut epochs = self.epochs.write().unwrap_or_else(PoisonError::into_inner);
        let epoch = epochs.entry(key.clone()).or_insert(0);
        *epoch += 1;
        tracing::trace!(thread = %key, epoch = *epoch, "thread invalidated");
        *epoch
    }

    /// Current epoch of `key` (0 if never invalidated).
    #[must_use]
    pub fn epoch(&self, key: &ThreadKey) -> u64 {
        self.epochs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
