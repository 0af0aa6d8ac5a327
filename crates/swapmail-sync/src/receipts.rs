//! Automatic read receipts.
//!
//! After every applied poll the tracker picks out messages the local viewer
//! still owes a receipt for and fires `mark_read` for each, off the poll
//! path. Ids with an attempt already in flight are skipped; a failed attempt
//! is forgotten so the next poll that still shows the message unread tries
//! again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use swapmail_core::{Error, Message, MessageId, UserId};

use crate::executor::TaskExecutor;
use crate::invalidate::InvalidationBus;
use crate::transport::SyncTransport;

/// Tracks outstanding read receipts for one viewer.
#[derive(Debug, Clone)]
pub struct ReadReceiptTracker {
    viewer: UserId,
    outstanding: Arc<Mutex<HashSet<MessageId>>>,
}

impl ReadReceiptTracker {
    #[must_use]
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            outstanding: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ids from `messages` that need a receipt now; they are marked
    /// outstanding before returning.
    ///
    /// Messages authored by the viewer are never selected.
    pub fn due(&self, messages: &[Message]) -> Vec<MessageId> {
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        messages
            .iter()
            .filter(|m| m.awaits_receipt_from(&self.viewer))
            .filter_map(|m| outstanding.insert(m.id).then_some(m.id))
            .collect()
    }

    /// Number of receipts currently in flight.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fire receipts for `ids` through `executor`.
    ///
    /// Each id is settled (removed from the outstanding set) once its round
    /// trip finishes, whatever the result.
    pub fn dispatch(
        &self,
        ids: Vec<MessageId>,
        transport: &Arc<dyn SyncTransport>,
        executor: &dyn TaskExecutor,
        bus: &Arc<InvalidationBus>,
    ) {
        if ids.is_empty() {
            return;
        }
        let tracker = self.clone();
        let transport = Arc::clone(transport);
        let bus = Arc::clone(bus);
        executor.execute(Box::new(move || {
            for id in ids {
                let result = transport.mark_read(id, &tracker.viewer);
                tracker.settle(id);
                match result {
                    Ok(receipt) if receipt.changed => {
                        tracing::debug!(message_id = %id, thread = %receipt.thread, "marked read");
                        bus.invalidate(&receipt.thread);
                    }
                    Ok(_) => {}
                    Err(err @ Error::MessageNotFound(_)) => {
                        tracing::warn!(message_id = %id, error = %err, "read receipt for unknown message");
                    }
                    Err(err) => {
                        tracing::debug!(message_id = %id, error = %err, "read receipt failed; will retry on next poll");
                    }
                }
            }
        }));
    }

    fn settle(&self, id: MessageId) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}
