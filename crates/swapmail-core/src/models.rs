//! Data models for swapmail
//!
//! Stored messages are immutable apart from their read flag. Pending entries
//! live only on the client until the store confirms them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::thread::{ThreadKey, resolve};
use crate::timestamps::iso_micros;

// =============================================================================
// Identifiers
// =============================================================================

/// Marketplace user identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Marketplace project identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank ids (empty or whitespace) never identify anything.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(UserId);
string_id!(ProjectId);

/// Store-assigned message id.
///
/// Backed by the store's global append sequence; rendered as `m<seq>` on the
/// wire. Ordering compares the sequence numerically, so `m9 < m10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    #[must_use]
    pub const fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('m')
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| Error::validation(format!("malformed message id: {s:?}")))
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Client-local temporary id for a pending send (`tmp-<16 hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    /// Generate a fresh temporary id from OS randomness.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        if getrandom::getrandom(&mut bytes).is_err() {
            // Fall back to the clock; uniqueness only matters per client.
            bytes = crate::timestamps::now_micros().to_le_bytes();
        }
        Self(format!("tmp-{}", hex::encode(bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Message
// =============================================================================

/// Public profile shown next to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderDisplay {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A stored message between two marketplace users.
///
/// # Ordering
/// Within a thread, messages sort by `(created_at, id)` ascending.
///
/// # Mutability
/// Only `is_read` ever changes, and only from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub content: String,
    pub is_read: bool,
    /// Microseconds since epoch; ISO-8601 on the wire.
    #[serde(with = "iso_micros")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display: Option<SenderDisplay>,
}

impl Message {
    /// Sort key used everywhere messages are ordered.
    #[must_use]
    pub const fn order_key(&self) -> (i64, MessageId) {
        (self.created_at, self.id)
    }

    /// The conversation this message belongs to.
    pub fn thread_key(&self) -> Result<ThreadKey, Error> {
        resolve(
            self.project_id.as_ref(),
            Some(&self.sender_id),
            Some(&self.recipient_id),
        )
    }

    /// Whether `viewer` still owes this message a read receipt.
    ///
    /// Only the addressee owes one. In a two-party thread that is the same as
    /// "anyone but the sender"; the narrower rule is intentional so that
    /// other buyers in a project thread never send receipts the store would
    /// refuse.
    #[must_use]
    pub fn awaits_receipt_from(&self, viewer: &UserId) -> bool {
        !self.is_read && self.sender_id != *viewer && self.recipient_id == *viewer
    }
}

/// Reject empty or whitespace-only message bodies.
pub fn validate_content(content: &str) -> Result<(), Error> {
    if content.trim().is_empty() {
        return Err(Error::validation("message content must not be empty"));
    }
    Ok(())
}

// =============================================================================
// Read receipts
// =============================================================================

/// Outcome of a read transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub thread: ThreadKey,
    /// `false` when the message was already read (idempotent no-op).
    pub changed: bool,
}

// =============================================================================
// Pending sends
// =============================================================================

/// Client-side status of an unconfirmed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Failed,
}

/// A locally rendered, not-yet-confirmed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub temp_id: TempId,
    pub content: String,
    pub sender_id: UserId,
    #[serde(with = "iso_micros")]
    pub submitted_at: i64,
    pub status: PendingStatus,
    /// Last transport error, kept for display once the entry has failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Inbox
// =============================================================================

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread: ThreadKey,
    pub last_message: Message,
    pub unread: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: MessageId::new(1),
            sender_id: "u1".into(),
            recipient_id: "u2".into(),
            project_id: None,
            content: "Hello".into(),
            is_read: false,
            created_at: 1_704_067_200_000_000,
            sender_display: None,
        }
    }

    #[test]
    fn message_wire_shape_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["recipientId"], "u2");
        assert_eq!(json["isRead"], false);
        assert_eq!(json["createdAt"], "2024-01-01T00:00:00.000000Z");
        assert!(json.get("projectId").is_none());
        assert!(json.get("senderDisplay").is_none());
    }

    #[test]
    fn message_accepts_wire_payload_with_display() {
        let raw = r#"{
            "id": "m7",
            "senderId": "u1",
            "recipientId": "u2",
            "projectId": "p9",
            "content": "swap?",
            "isRead": true,
            "createdAt": "2024-05-01T10:00:00Z",
            "senderDisplay": {"id": "u1", "name": "Ana", "avatarUrl": "https://x/a.png"}
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.id, MessageId::new(7));
        assert_eq!(msg.project_id, Some(ProjectId::from("p9")));
        assert_eq!(msg.sender_display.unwrap().name, "Ana");
    }

    #[test]
    fn message_ids_order_numerically() {
        assert!(MessageId::new(9) < MessageId::new(10));
        assert_eq!("m10".parse::<MessageId>().unwrap(), MessageId::new(10));
        assert!("10".parse::<MessageId>().is_err());
        assert!("mx".parse::<MessageId>().is_err());
    }

    #[test]
    fn receipt_owed_only_by_other_party() {
        let msg = sample();
        assert!(msg.awaits_receipt_from(&"u2".into()));
        assert!(!msg.awaits_receipt_from(&"u1".into()));
        assert!(!msg.awaits_receipt_from(&"u3".into()));
        let read = Message {
            is_read: true,
            ..sample()
        };
        assert!(!read.awaits_receipt_from(&"u2".into()));
    }

    #[test]
    fn blank_content_is_rejected() {
        assert!(validate_content("").is_err());
        assert!(validate_content(" \n\t").is_err());
        assert!(validate_content(" hi ").is_ok());
    }

    #[test]
    fn temp_ids_are_unique_and_prefixed() {
        let a = TempId::generate();
        let b = TempId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("tmp-"));
        assert_eq!(a.as_str().len(), 4 + 16);
    }
}
