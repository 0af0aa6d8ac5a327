//! Conversation summaries for inbox views and notification badges.

use swapmail_core::{Message, ThreadKey, ThreadSummary, UserId};

/// Summarize one thread from `user`'s point of view.
///
/// Returns `None` when the thread is empty or `user` neither sent nor
/// received anything in it.
#[must_use]
pub fn summarize(key: &ThreadKey, messages: &[Message], user: &UserId) -> Option<ThreadSummary> {
    let involved = match key {
        ThreadKey::Direct { users } => users.contains(user),
        ThreadKey::Project { .. } => messages
            .iter()
            .any(|m| m.sender_id == *user || m.recipient_id == *user),
    };
    if !involved {
        return None;
    }
    let last_message = messages.last()?.clone();
    let unread = messages
        .iter()
        .filter(|m| m.recipient_id == *user && !m.is_read)
        .count();
    Some(ThreadSummary {
        thread: key.clone(),
        last_message,
        unread,
        total: messages.len(),
    })
}
