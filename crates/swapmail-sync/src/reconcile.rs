//! Optimistic sends and their reconciliation against the confirmed log.
//!
//! A send shows up at once as a [`PendingEntry`]. It leaves the pending list
//! the moment the confirmed log contains its message, matched either by the
//! id the append returned or, when that response never arrived, by
//! `(sender, content, |created_at - submitted_at| <= window)` against a
//! message no other entry has claimed.

use std::collections::HashSet;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use swapmail_core::{
    Error, Message, MessageId, PendingEntry, PendingStatus, Result, TempId, UserId,
    validate_content,
};

/// One row of a rendered thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RenderedEntry {
    Confirmed(Message),
    Pending(PendingEntry),
}

impl RenderedEntry {
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.content,
            Self::Pending(p) => &p.content,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    entry: PendingEntry,
    confirmed_id: Option<MessageId>,
}

/// Pending sends for one thread view, in submission order.
#[derive(Debug)]
pub struct SendReconciler {
    local_user: UserId,
    window_micros: i64,
    entries: IndexMap<TempId, Tracked>,
    claimed: HashSet<MessageId>,
}

impl SendReconciler {
    #[must_use]
    pub fn new(local_user: UserId, window: Duration) -> Self {
        Self {
            local_user,
            window_micros: i64::try_from(window.as_micros()).unwrap_or(i64::MAX),
            entries: IndexMap::new(),
            claimed: HashSet::new(),
        }
    }

    /// Record a new optimistic send. Blank content is rejected before
    /// anything becomes visible.
    pub fn begin(&mut self, content: &str, submitted_at: i64) -> Result<PendingEntry> {
        validate_content(content)?;
        let entry = PendingEntry {
            temp_id: TempId::generate(),
            content: content.to_string(),
            sender_id: self.local_user.clone(),
            submitted_at,
            status: PendingStatus::Pending,
            error: None,
        };
        self.entries.insert(
            entry.temp_id.clone(),
            Tracked {
                entry: entry.clone(),
                confirmed_id: None,
            },
        );
        Ok(entry)
    }

    /// The append for `temp_id` succeeded with `message`.
    ///
    /// Returns `false` when the entry is already gone (reconciled by a poll
    /// or abandoned).
    pub fn confirm(&mut self, temp_id: &TempId, message: &Message) -> bool {
        let Some(tracked) = self.entries.get_mut(temp_id) else {
            return false;
        };
        tracked.confirmed_id = Some(message.id);
        tracked.entry.status = PendingStatus::Pending;
        tracked.entry.error = None;
        true
    }

    /// The append for `temp_id` failed. The entry stays visible as failed
    /// with its content intact; nothing retries automatically.
    pub fn fail(&mut self, temp_id: &TempId, error: &Error) -> bool {
        let Some(tracked) = self.entries.get_mut(temp_id) else {
            return false;
        };
        tracked.entry.status = PendingStatus::Failed;
        tracked.entry.error = Some(error.to_string());
        true
    }

    /// Replace a failed entry with a fresh pending one carrying the same
    /// content.
    pub fn resubmit(&mut self, temp_id: &TempId, submitted_at: i64) -> Result<PendingEntry> {
        match self.entries.get(temp_id) {
            Some(t) if t.entry.status == PendingStatus::Failed => {}
            Some(_) => {
                return Err(Error::validation(format!(
                    "send {temp_id} has not failed; nothing to resubmit"
                )));
            }
            None => return Err(Error::validation(format!("no pending send {temp_id}"))),
        }
        let Some(old) = self.entries.shift_remove(temp_id) else {
            return Err(Error::validation(format!("no pending send {temp_id}")));
        };
        self.begin(&old.entry.content, submitted_at)
    }

    /// Discard an entry without sending it.
    pub fn abandon(&mut self, temp_id: &TempId) -> Option<PendingEntry> {
        self.entries.shift_remove(temp_id).map(|t| t.entry)
    }

    /// Drop every entry whose message is present in `confirmed`.
    ///
    /// `confirmed` must be the full ascending log of the thread. Returns the
    /// temp ids that were reconciled.
    pub fn reconcile(&mut self, confirmed: &[Message]) -> Vec<TempId> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let present: HashSet<MessageId> = confirmed.iter().map(|m| m.id).collect();
        self.claimed.retain(|id| present.contains(id));

        let mut reconciled = Vec::new();

        // Id correlation first: these are certain.
        self.entries.retain(|temp_id, tracked| match tracked.confirmed_id {
            Some(id) if present.contains(&id) => {
                self.claimed.insert(id);
                reconciled.push(temp_id.clone());
                false
            }
            _ => true,
        });

        // Ids already promised to an entry whose message has not shown up yet.
        let reserved: HashSet<MessageId> =
            self.entries.values().filter_map(|t| t.confirmed_id).collect();

        let window = self.window_micros;
        let mut fallback = Vec::new();
        for (temp_id, tracked) in &self.entries {
            if tracked.confirmed_id.is_some() {
                continue;
            }
            let entry = &tracked.entry;
            let found = confirmed.iter().find(|m| {
                m.sender_id == entry.sender_id
                    && m.content == entry.content
                    && m.created_at.abs_diff(entry.submitted_at) <= window.unsigned_abs()
                    && !self.claimed.contains(&m.id)
                    && !reserved.contains(&m.id)
            });
            if let Some(m) = found {
                self.claimed.insert(m.id);
                fallback.push(temp_id.clone());
            }
        }
        for temp_id in fallback {
            tracing::debug!(temp_id = %temp_id, "pending send reconciled by content match");
            self.entries.shift_remove(&temp_id);
            reconciled.push(temp_id);
        }
        reconciled
    }

    /// Pending and failed entries in submission order.
    pub fn entries(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.values().map(|t| &t.entry)
    }

    #[must_use]
    pub fn get(&self, temp_id: &TempId) -> Option<&PendingEntry> {
        self.entries.get(temp_id).map(|t| &t.entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Confirmed messages in log order followed by unconfirmed entries in
    /// submission order.
    #[must_use]
    pub fn render(&self, confirmed: &[Message]) -> Vec<RenderedEntry> {
        let present: HashSet<MessageId> = confirmed.iter().map(|m| m.id).collect();
        confirmed
            .iter()
            .cloned()
            .map(RenderedEntry::Confirmed)
            .chain(
                self.entries
                    .values()
                    .filter(|t| !t.confirmed_id.is_some_and(|id| present.contains(&id)))
                    .map(|t| RenderedEntry::Pending(t.entry.clone())),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_704_067_200_000_000;
    const SECOND: i64 = 1_000_000;

    fn reconciler() -> SendReconciler {
        SendReconciler::new("u1".into(), Duration::from_secs(5))
    }

    fn stored(id: u64, from: &str, content: &str, at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            sender_id: from.into(),
            recipient_id: "u2".into(),
            project_id: None,
            content: content.into(),
            is_read: false,
            created_at: at,
            sender_display: None,
        }
    }

    #[test]
    fn blank_content_never_becomes_visible() {
        let mut r = reconciler();
        assert!(r.begin("  ", T0).is_err());
        assert!(r.is_empty());
    }

    #[test]
    fn id_correlation_drops_entry_once_present() {
        let mut r = reconciler();
        let entry = r.begin("Hello", T0).unwrap();
        let m = stored(1, "u1", "Hello", T0 + 20 * SECOND);
        assert!(r.confirm(&entry.temp_id, &m));

        // Not in the log yet: still rendered, once.
        assert!(r.reconcile(&[]).is_empty());
        assert_eq!(r.render(&[]).len(), 1);

        let log = vec![m];
        // Render alone already hides it, before reconcile runs.
        assert_eq!(r.render(&log).len(), 1);
        assert_eq!(r.reconcile(&log), vec![entry.temp_id]);
        assert!(r.is_empty());
    }

    #[test]
    fn fallback_matches_within_window_only() {
        let mut r = reconciler();
        r.begin("Hello", T0).unwrap();
        let too_late = stored(1, "u1", "Hello", T0 + 6 * SECOND);
        assert!(r.reconcile(&[too_late.clone()]).is_empty());

        let in_window = stored(2, "u1", "Hello", T0 + 2 * SECOND);
        assert_eq!(r.reconcile(&[too_late, in_window]).len(), 1);
        assert!(r.is_empty());
    }

    #[test]
    fn fallback_ignores_other_senders_and_content() {
        let mut r = reconciler();
        r.begin("Hello", T0).unwrap();
        let log = vec![
            stored(1, "u2", "Hello", T0),
            stored(2, "u1", "Hello!", T0),
        ];
        assert!(r.reconcile(&log).is_empty());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn identical_sends_claim_distinct_messages() {
        let mut r = reconciler();
        r.begin("ok", T0).unwrap();
        r.begin("ok", T0 + SECOND).unwrap();

        let one = vec![stored(1, "u1", "ok", T0)];
        assert_eq!(r.reconcile(&one).len(), 1);
        assert_eq!(r.len(), 1, "second send must wait for its own message");

        // A later pass over the same log must not reuse message 1.
        assert!(r.reconcile(&one).is_empty());

        let both = vec![stored(1, "u1", "ok", T0), stored(2, "u1", "ok", T0 + SECOND)];
        assert_eq!(r.reconcile(&both).len(), 1);
        assert!(r.is_empty());
    }

    #[test]
    fn failure_keeps_content_and_resubmit_replaces() {
        let mut r = reconciler();
        let entry = r.begin("Is the bike available?", T0).unwrap();
        assert!(r.fail(&entry.temp_id, &Error::transient("timeout")));

        let failed = r.get(&entry.temp_id).unwrap();
        assert_eq!(failed.status, PendingStatus::Failed);
        assert_eq!(failed.content, "Is the bike available?");
        assert!(failed.error.as_deref().unwrap().contains("timeout"));

        let fresh = r.resubmit(&entry.temp_id, T0 + SECOND).unwrap();
        assert_ne!(fresh.temp_id, entry.temp_id);
        assert_eq!(fresh.status, PendingStatus::Pending);
        assert_eq!(fresh.content, entry.content);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn resubmit_requires_failed_entry() {
        let mut r = reconciler();
        let entry = r.begin("hi", T0).unwrap();
        assert!(r.resubmit(&entry.temp_id, T0).is_err());
        assert!(r.resubmit(&TempId::generate(), T0).is_err());
    }

    #[test]
    fn failed_entry_whose_message_landed_is_reconciled() {
        let mut r = reconciler();
        let entry = r.begin("Hello", T0).unwrap();
        r.fail(&entry.temp_id, &Error::transient("response lost"));
        let log = vec![stored(7, "u1", "Hello", T0 + SECOND)];
        assert_eq!(r.reconcile(&log), vec![entry.temp_id]);
    }

    #[test]
    fn abandon_removes_entry() {
        let mut r = reconciler();
        let entry = r.begin("hi", T0).unwrap();
        assert_eq!(r.abandon(&entry.temp_id).unwrap().content, "hi");
        assert!(r.abandon(&entry.temp_id).is_none());
    }

    #[test]
    fn render_orders_confirmed_then_submission_order() {
        let mut r = reconciler();
        let a = r.begin("first", T0 + 10 * SECOND).unwrap();
        let b = r.begin("second", T0 + 11 * SECOND).unwrap();
        let log = vec![stored(1, "u2", "hey", T0), stored(2, "u1", "yo", T0 + SECOND)];
        let rendered = r.render(&log);
        let contents: Vec<&str> = rendered.iter().map(RenderedEntry::content).collect();
        assert_eq!(contents, vec!["hey", "yo", "first", "second"]);
        assert!(!rendered[1].is_pending());
        assert!(rendered[2].is_pending());
        assert_eq!(r.entries().next().unwrap().temp_id, a.temp_id);
        assert_eq!(r.entries().nth(1).unwrap().temp_id, b.temp_id);
    }
}
