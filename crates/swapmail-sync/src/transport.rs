//! The round-trip seam between a thread view and the message store.
//!
//! Views never touch the store directly; every call goes through
//! [`SyncTransport`], which is where network failures surface as
//! [`Error::Transient`](swapmail_core::Error::Transient).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use swapmail_core::{
    Message, MessageId, ProjectId, ReadReceipt, Result, ThreadKey, ThreadSummary, UserId,
};
use swapmail_store::MessageStore;

/// Body of a send round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub content: String,
}

/// Round trips the sync layer needs from the server.
pub trait SyncTransport: Send + Sync {
    /// Current log of a thread, ascending by `(created_at, id)`.
    fn list(&self, key: &ThreadKey) -> Result<Vec<Message>>;

    /// Append a message; the server assigns id and timestamp.
    fn append(&self, request: &AppendRequest) -> Result<Message>;

    /// Idempotent read transition on behalf of `reader`.
    fn mark_read(&self, message_id: MessageId, reader: &UserId) -> Result<ReadReceipt>;

    /// Conversation list for `user`.
    fn inbox(&self, user: &UserId) -> Result<Vec<ThreadSummary>>;

    /// Unread messages addressed to `user`.
    fn unread_count(&self, user: &UserId) -> Result<usize>;
}

/// In-process transport backed directly by a [`MessageStore`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    store: Arc<MessageStore>,
}

impl LocalTransport {
    #[must_use]
    pub const fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }
}

impl SyncTransport for LocalTransport {
    fn list(&self, key: &ThreadKey) -> Result<Vec<Message>> {
        Ok(self.store.list(key))
    }

    fn append(&self, request: &AppendRequest) -> Result<Message> {
        Ok(self.store.append(
            &request.sender_id,
            &request.recipient_id,
            request.project_id.as_ref(),
            &request.content,
        )?)
    }

    fn mark_read(&self, message_id: MessageId, reader: &UserId) -> Result<ReadReceipt> {
        Ok(self.store.mark_read(message_id, reader)?)
    }

    fn inbox(&self, user: &UserId) -> Result<Vec<ThreadSummary>> {
        Ok(self.store.inbox(user))
    }

    fn unread_count(&self, user: &UserId) -> Result<usize> {
        Ok(self.store.unread_count(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_transport_maps_store_errors() {
        let transport = LocalTransport::new(Arc::new(MessageStore::in_memory()));
        let err = transport
            .mark_read(MessageId::new(1), &UserId::from("u2"))
            .unwrap_err();
        assert_eq!(err.error_type(), "NOT_FOUND");

        let err = transport
            .append(&AppendRequest {
                sender_id: "u1".into(),
                recipient_id: "u2".into(),
                project_id: None,
                content: " ".into(),
            })
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn append_request_wire_shape() {
        let json = serde_json::to_value(AppendRequest {
            sender_id: "u1".into(),
            recipient_id: "u2".into(),
            project_id: Some("p".into()),
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"senderId": "u1", "recipientId": "u2", "projectId": "p", "content": "hi"})
        );
    }
}
