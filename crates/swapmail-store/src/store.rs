//! The message store: one append-only log per thread.
//!
//! # Concurrency
//!
//! - Appends and read transitions on a thread are serialized by that
//!   thread's writer mutex. Different threads never contend.
//! - Each thread publishes an immutable `Arc<Vec<Message>>` snapshot after
//!   every committed write. `list` clones the `Arc` and never waits for a
//!   writer to finish its journal I/O, and never sees a half-applied write.
//! - Lock order: thread writer -> journal -> id index -> snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use swapmail_core::{
    Config, Message, MessageId, ProjectId, ReadReceipt, SenderDisplay, ThreadKey, ThreadSummary,
    UserId, now_micros, resolve, validate_content,
};

use crate::error::{StoreError, StoreResult};
use crate::inbox::summarize;
use crate::journal::{Journal, JournalRecord};

/// Tail state guarded by a thread's writer mutex.
#[derive(Debug, Default)]
struct Tail {
    last_created_at: Option<i64>,
}

#[derive(Debug, Default)]
struct ThreadLog {
    writer: Mutex<Tail>,
    snapshot: RwLock<Arc<Vec<Message>>>,
}

impl ThreadLog {
    fn snapshot(&self) -> Arc<Vec<Message>> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn publish(&self, next: Vec<Message>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

/// Append-only, per-thread message log with monotonic read flags.
#[derive(Debug, Default)]
pub struct MessageStore {
    threads: RwLock<HashMap<ThreadKey, Arc<ThreadLog>>>,
    index: RwLock<HashMap<MessageId, ThreadKey>>,
    profiles: RwLock<HashMap<UserId, SenderDisplay>>,
    /// Last assigned message sequence.
    last_seq: AtomicU64,
    journal: Option<Mutex<Journal>>,
}

impl MessageStore {
    /// A store that keeps everything in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a journal-backed store, replaying every committed record.
    pub fn open(path: &Path, fsync: bool) -> StoreResult<Self> {
        let (journal, records) = Journal::open(path, fsync)?;
        let mut store = Self::default();
        let replayed = records.len();
        for record in records {
            store.replay(record)?;
        }
        store.journal = Some(Mutex::new(journal));
        tracing::info!(
            path = %path.display(),
            records = replayed,
            threads = store.thread_count(),
            "message store opened"
        );
        Ok(store)
    }

    /// Build the store the configuration asks for.
    pub fn from_config(config: &Config) -> StoreResult<Self> {
        match &config.journal_path {
            Some(path) => Self::open(path, config.journal_fsync),
            None => Ok(Self::in_memory()),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append a message and return it with its store-assigned id and
    /// timestamp.
    pub fn append(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        project_id: Option<&ProjectId>,
        content: &str,
    ) -> StoreResult<Message> {
        validate_content(content)?;
        let key = resolve(project_id, Some(sender_id), Some(recipient_id))?;
        if project_id.is_some_and(|p| !p.is_blank()) && sender_id == recipient_id {
            return Err(StoreError::invalid(
                "recipient_id",
                "sender and recipient must differ",
            ));
        }
        let log = self.thread_log_or_create(&key);

        let mut tail = log.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let now = now_micros();
        let created_at = tail.last_created_at.map_or(now, |last| now.max(last + 1));
        let id = MessageId::new(self.last_seq.fetch_add(1, Ordering::AcqRel) + 1);
        let message = Message {
            id,
            sender_id: sender_id.clone(),
            recipient_id: recipient_id.clone(),
            project_id: project_id.filter(|p| !p.is_blank()).cloned(),
            content: content.to_string(),
            is_read: false,
            created_at,
            sender_display: None,
        };

        self.write_journal(&JournalRecord::Append {
            message: message.clone(),
        })?;
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, key.clone());
        let mut next = log.snapshot().as_ref().clone();
        next.push(message.clone());
        log.publish(next);
        tail.last_created_at = Some(created_at);
        drop(tail);

        tracing::debug!(thread = %key, message_id = %id, "message appended");
        Ok(self.decorate(message))
    }

    /// Record that `reader` has seen a message.
    ///
    /// Idempotent: marking an already-read message succeeds with
    /// `changed == false`. Only the recipient may mark a message; the sender
    /// gets `SelfRead`. This is deliberately narrower than "anyone but the
    /// sender": in a project thread a third buyer can see a message that was
    /// never addressed to them.
    pub fn mark_read(&self, message_id: MessageId, reader: &UserId) -> StoreResult<ReadReceipt> {
        let key = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Message", message_id.to_string()))?;
        let log = self
            .thread_log(&key)
            .ok_or_else(|| StoreError::not_found("Message", message_id.to_string()))?;

        let tail = log.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = log.snapshot();
        // Ids grow monotonically within a thread, so the log is sorted by id too.
        let pos = current
            .binary_search_by_key(&message_id, |m| m.id)
            .map_err(|_| StoreError::not_found("Message", message_id.to_string()))?;
        let message = &current[pos];
        if message.sender_id == *reader {
            return Err(StoreError::SelfRead {
                message_id,
                reader: reader.to_string(),
            });
        }
        if message.recipient_id != *reader {
            return Err(StoreError::invalid(
                "reader",
                format!("{reader} is not the recipient of {message_id}"),
            ));
        }
        if message.is_read {
            return Ok(ReadReceipt {
                message_id,
                thread: key,
                changed: false,
            });
        }

        self.write_journal(&JournalRecord::Read { id: message_id })?;
        let mut next = current.as_ref().clone();
        next[pos].is_read = true;
        log.publish(next);
        drop(tail);

        tracing::debug!(thread = %key, message_id = %message_id, reader = %reader, "message read");
        Ok(ReadReceipt {
            message_id,
            thread: key,
            changed: true,
        })
    }

    /// Register or replace the public profile shown next to a user's messages.
    pub fn upsert_profile(&self, profile: SenderDisplay) -> StoreResult<()> {
        if profile.id.is_blank() {
            return Err(StoreError::invalid("profile.id", "must not be blank"));
        }
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        self.write_journal(&JournalRecord::Profile {
            profile: profile.clone(),
        })?;
        profiles.insert(profile.id.clone(), profile);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// All messages of a thread, ascending by `(created_at, id)`.
    ///
    /// Unknown threads are simply empty.
    #[must_use]
    pub fn list(&self, key: &ThreadKey) -> Vec<Message> {
        let Some(log) = self.thread_log(key) else {
            return Vec::new();
        };
        let snapshot = log.snapshot();
        snapshot.iter().cloned().map(|m| self.decorate(m)).collect()
    }

    /// Fetch a single message by id.
    pub fn get(&self, message_id: MessageId) -> StoreResult<Message> {
        let key = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message_id)
            .cloned();
        key.and_then(|key| self.thread_log(&key))
            .and_then(|log| {
                let snapshot = log.snapshot();
                snapshot
                    .binary_search_by_key(&message_id, |m| m.id)
                    .ok()
                    .map(|pos| snapshot[pos].clone())
            })
            .map(|m| self.decorate(m))
            .ok_or_else(|| StoreError::not_found("Message", message_id.to_string()))
    }

    /// Unread messages addressed to `user`, across all threads.
    #[must_use]
    pub fn unread_count(&self, user: &UserId) -> usize {
        self.thread_snapshots()
            .iter()
            .flat_map(|(_, messages)| messages.iter())
            .filter(|m| m.recipient_id == *user && !m.is_read)
            .count()
    }

    /// Conversation list for `user`, most recently active first.
    #[must_use]
    pub fn inbox(&self, user: &UserId) -> Vec<ThreadSummary> {
        let mut summaries: Vec<ThreadSummary> = self
            .thread_snapshots()
            .into_iter()
            .filter_map(|(key, messages)| summarize(&key, &messages, user))
            .map(|mut summary| {
                summary.last_message = self.decorate(summary.last_message);
                summary
            })
            .collect();
        summaries.sort_by(|a, b| b.last_message.order_key().cmp(&a.last_message.order_key()));
        summaries
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn thread_log(&self, key: &ThreadKey) -> Option<Arc<ThreadLog>> {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn thread_log_or_create(&self, key: &ThreadKey) -> Arc<ThreadLog> {
        if let Some(log) = self.thread_log(key) {
            return log;
        }
        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(threads.entry(key.clone()).or_default())
    }

    fn thread_snapshots(&self) -> Vec<(ThreadKey, Arc<Vec<Message>>)> {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, log)| (key.clone(), log.snapshot()))
            .collect()
    }

    fn write_journal(&self, record: &JournalRecord) -> StoreResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(record)
            .inspect_err(|e| tracing::error!(error = %e, "journal write failed"))
    }

    fn decorate(&self, mut message: Message) -> Message {
        message.sender_display = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.sender_id)
            .cloned();
        message
    }

    /// Apply a journal record during `open`; no locking contention exists yet.
    fn replay(&mut self, record: JournalRecord) -> StoreResult<()> {
        match record {
            JournalRecord::Append { mut message } => {
                let key = message.thread_key()?;
                message.sender_display = None;
                let log = self.thread_log_or_create(&key);
                let mut tail = log.writer.lock().unwrap_or_else(PoisonError::into_inner);
                let mut next = log.snapshot().as_ref().clone();
                if let Some(last) = next.last() {
                    if last.order_key() >= message.order_key() {
                        return Err(StoreError::Journal(format!(
                            "message {} is out of order in thread {key}",
                            message.id
                        )));
                    }
                }
                tail.last_created_at = Some(message.created_at);
                self.last_seq.fetch_max(message.id.seq(), Ordering::AcqRel);
                self.index
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(message.id, key);
                next.push(message);
                log.publish(next);
            }
            JournalRecord::Read { id } => {
                let key = self
                    .index
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::Journal(format!("read record for unknown message {id}"))
                    })?;
                if let Some(log) = self.thread_log(&key) {
                    let mut next = log.snapshot().as_ref().clone();
                    if let Ok(pos) = next.binary_search_by_key(&id, |m| m.id) {
                        next[pos].is_read = true;
                        log.publish(next);
                    }
                }
            }
            JournalRecord::Profile { profile } => {
                self.profiles
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(profile.id.clone(), profile);
            }
        }
        Ok(())
    }
}
