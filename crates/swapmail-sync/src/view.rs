//! Client-side state of one open conversation.
//!
//! [`ThreadView`] owns the confirmed-message cache, the pending sends, the
//! poll scheduler and the receipt tracker for a single thread. It performs
//! no I/O: callers take tickets out, do the round trip with no lock held,
//! and feed the result back in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use swapmail_core::{
    Error, Message, MessageId, PendingEntry, Result, SyncSettings, TempId, ThreadKey, UserId,
};

use crate::invalidate::InvalidationBus;
use crate::poller::{Connectivity, DiscardReason, PollOutcome, PollTicket, SyncPoller};
use crate::receipts::ReadReceiptTracker;
use crate::reconcile::{RenderedEntry, SendReconciler};
use crate::transport::AppendRequest;

/// An optimistic send waiting for its append round trip.
#[derive(Debug, Clone)]
pub struct SendTicket {
    pub entry: PendingEntry,
    pub request: AppendRequest,
    generation: u64,
}

/// What a completed poll did to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Applied { messages: usize, reconciled: usize },
    Failed {
        consecutive_failures: u32,
        connectivity: Connectivity,
    },
    Discarded(DiscardReason),
}

/// Result of [`ThreadView::complete_poll`].
#[derive(Debug, Clone)]
pub struct PollReport {
    pub status: PollStatus,
    /// Messages that now need a read receipt from the local user.
    pub receipts_due: Vec<MessageId>,
}

/// Render-ready state of a view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub thread: Option<ThreadKey>,
    pub entries: Vec<RenderedEntry>,
    pub connectivity: Connectivity,
    pub consecutive_failures: u32,
}

impl ViewSnapshot {
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }
}

/// One open conversation for the local user.
#[derive(Debug)]
pub struct ThreadView {
    local_user: UserId,
    key: Option<ThreadKey>,
    recipient: Option<UserId>,
    settings: SyncSettings,
    poller: SyncPoller,
    confirmed: Vec<Message>,
    /// Messages confirmed by our own sends that no poll has returned yet.
    local_confirmed: Vec<Message>,
    reconciler: SendReconciler,
    receipts: ReadReceiptTracker,
    bus: Arc<InvalidationBus>,
}

impl ThreadView {
    /// Open `key` for `local_user`.
    ///
    /// `counterpart` is who sends in this view go to. Direct threads derive
    /// it from the pair; project threads need it spelled out before the
    /// first send.
    pub fn new(
        local_user: UserId,
        key: ThreadKey,
        counterpart: Option<UserId>,
        settings: SyncSettings,
        bus: Arc<InvalidationBus>,
        now: Instant,
    ) -> Result<Self> {
        let mut view = Self {
            receipts: ReadReceiptTracker::new(local_user.clone()),
            reconciler: SendReconciler::new(local_user.clone(), settings.reconcile_window),
            poller: SyncPoller::new(settings.clone()),
            local_user,
            key: None,
            recipient: None,
            settings,
            confirmed: Vec::new(),
            local_confirmed: Vec::new(),
            bus,
        };
        view.switch(key, counterpart, now)?;
        Ok(view)
    }

    /// Point the view at another thread. Pending sends of the old thread are
    /// dropped from display; responses still in flight for it are ignored.
    pub fn switch(
        &mut self,
        key: ThreadKey,
        counterpart: Option<UserId>,
        now: Instant,
    ) -> Result<()> {
        if !key.admits(&self.local_user) {
            return Err(Error::invalid_thread(format!(
                "{} is not a participant of {key}",
                self.local_user
            )));
        }
        let recipient = match (&key, counterpart) {
            (_, Some(other)) if other == self.local_user => {
                return Err(Error::validation("cannot open a conversation with yourself"));
            }
            (_, Some(other)) => Some(other),
            (ThreadKey::Direct { users }, None) => users.other(&self.local_user).cloned(),
            (ThreadKey::Project { .. }, None) => None,
        };
        tracing::debug!(thread = %key, user = %self.local_user, "thread view opened");
        self.poller.open(key.clone(), self.bus.epoch(&key), now);
        self.key = Some(key);
        self.recipient = recipient;
        self.confirmed.clear();
        self.local_confirmed.clear();
        self.reconciler = SendReconciler::new(self.local_user.clone(), self.settings.reconcile_window);
        Ok(())
    }

    /// Stop polling. Pending state is kept for a final snapshot.
    pub fn close(&mut self) {
        self.poller.close();
        self.key = None;
    }

    #[must_use]
    pub const fn key(&self) -> Option<&ThreadKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub const fn local_user(&self) -> &UserId {
        &self.local_user
    }

    #[must_use]
    pub const fn recipient(&self) -> Option<&UserId> {
        self.recipient.as_ref()
    }

    /// Address later sends to `recipient`. Used by project views opened
    /// without a counterpart.
    pub fn set_recipient(&mut self, recipient: UserId) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::validation("thread view is closed"))?;
        if recipient == self.local_user {
            return Err(Error::validation("cannot send a message to yourself"));
        }
        if !key.admits(&recipient) {
            return Err(Error::invalid_thread(format!(
                "{recipient} is not a participant of {key}"
            )));
        }
        self.recipient = Some(recipient);
        Ok(())
    }

    #[must_use]
    pub const fn receipts(&self) -> &ReadReceiptTracker {
        &self.receipts
    }

    #[must_use]
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.poller.time_until_due(now)
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    /// A ticket if a list request should go out now.
    pub fn poll_due(&mut self, now: Instant) -> Option<PollTicket> {
        if let Some(key) = &self.key {
            self.poller.observe_epoch(self.bus.epoch(key));
        }
        self.poller.poll_due(now)
    }

    /// Apply the response to `ticket`.
    pub fn complete_poll(
        &mut self,
        ticket: &PollTicket,
        result: Result<Vec<Message>>,
        now: Instant,
    ) -> PollReport {
        match self.poller.complete(ticket, result, now) {
            PollOutcome::Applied(messages) => {
                let count = messages.len();
                self.apply_log(messages);
                let reconciled = self.reconciler.reconcile(&self.confirmed).len();
                PollReport {
                    status: PollStatus::Applied {
                        messages: count,
                        reconciled,
                    },
                    receipts_due: self.receipts.due(&self.confirmed),
                }
            }
            PollOutcome::Failed {
                consecutive_failures,
                connectivity,
            } => PollReport {
                status: PollStatus::Failed {
                    consecutive_failures,
                    connectivity,
                },
                receipts_due: Vec::new(),
            },
            PollOutcome::Discarded(reason) => PollReport {
                status: PollStatus::Discarded(reason),
                receipts_due: Vec::new(),
            },
        }
    }

    /// Replace the cache with a fresh log, keeping our own confirmed sends
    /// the log does not show yet.
    fn apply_log(&mut self, mut log: Vec<Message>) {
        self.local_confirmed
            .retain(|mine| !log.iter().any(|m| m.id == mine.id));
        if !self.local_confirmed.is_empty() {
            log.extend(self.local_confirmed.iter().cloned());
            log.sort_by_key(Message::order_key);
        }
        self.confirmed = log;
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Show `content` as pending and build the append request for it.
    pub fn begin_send(&mut self, content: &str, submitted_at: i64) -> Result<SendTicket> {
        let (key, recipient) = self.send_target()?;
        let entry = self.reconciler.begin(content, submitted_at)?;
        tracing::debug!(thread = %key, temp_id = %entry.temp_id, "send submitted");
        Ok(self.ticket_for(entry, &key, recipient))
    }

    /// Retry a failed send with the same content.
    pub fn resubmit(&mut self, temp_id: &TempId, submitted_at: i64) -> Result<SendTicket> {
        let (key, recipient) = self.send_target()?;
        let entry = self.reconciler.resubmit(temp_id, submitted_at)?;
        tracing::debug!(thread = %key, old = %temp_id, temp_id = %entry.temp_id, "send resubmitted");
        Ok(self.ticket_for(entry, &key, recipient))
    }

    /// Current state of an unconfirmed send, if it is still tracked.
    #[must_use]
    pub fn pending(&self, temp_id: &TempId) -> Option<PendingEntry> {
        self.reconciler.get(temp_id).cloned()
    }

    /// Drop a pending or failed send.
    pub fn abandon(&mut self, temp_id: &TempId) -> Option<PendingEntry> {
        self.reconciler.abandon(temp_id)
    }

    /// Apply the outcome of an append. Outcomes for a thread the view has
    /// since left are ignored.
    pub fn finish_send(&mut self, ticket: &SendTicket, result: Result<Message>) {
        if ticket.generation != self.poller.generation() {
            tracing::debug!(temp_id = %ticket.entry.temp_id, "send finished after thread switch");
            if let Ok(message) = &result {
                self.invalidate(message);
            }
            return;
        }
        match result {
            Ok(message) => {
                self.reconciler.confirm(&ticket.entry.temp_id, &message);
                if !self.confirmed.iter().any(|m| m.id == message.id) {
                    let at = self
                        .confirmed
                        .partition_point(|m| m.order_key() < message.order_key());
                    self.confirmed.insert(at, message.clone());
                    self.local_confirmed.push(message.clone());
                }
                self.reconciler.reconcile(&self.confirmed);
                self.invalidate(&message);
            }
            Err(err) => {
                tracing::warn!(
                    temp_id = %ticket.entry.temp_id,
                    error = %err,
                    recoverable = err.is_recoverable(),
                    "send failed"
                );
                self.reconciler.fail(&ticket.entry.temp_id, &err);
            }
        }
    }

    fn invalidate(&self, message: &Message) {
        match message.thread_key() {
            Ok(key) => {
                self.bus.invalidate(&key);
            }
            Err(err) => tracing::warn!(message_id = %message.id, error = %err, "confirmed message has no thread"),
        }
    }

    fn send_target(&self) -> Result<(ThreadKey, UserId)> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::validation("thread view is closed"))?;
        let recipient = self
            .recipient
            .clone()
            .ok_or_else(|| Error::validation(format!("no recipient set for {key}")))?;
        Ok((key, recipient))
    }

    fn ticket_for(&self, entry: PendingEntry, key: &ThreadKey, recipient: UserId) -> SendTicket {
        let project_id = match key {
            ThreadKey::Project { project_id } => Some(project_id.clone()),
            ThreadKey::Direct { .. } => None,
        };
        SendTicket {
            request: AppendRequest {
                sender_id: self.local_user.clone(),
                recipient_id: recipient,
                project_id,
                content: entry.content.clone(),
            },
            entry,
            generation: self.poller.generation(),
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            thread: self.key.clone(),
            entries: self.reconciler.render(&self.confirmed),
            connectivity: self.poller.connectivity(),
            consecutive_failures: self.poller.consecutive_failures(),
        }
    }
}
