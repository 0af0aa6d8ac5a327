//! Error types for the message store

use swapmail_core::MessageId;
use thiserror::Error;

/// Message store error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record not found
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// Invalid argument
    #[error("Invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    /// The conversation context does not name a thread
    #[error("Invalid thread: {0}")]
    InvalidThread(String),

    /// A sender tried to mark their own message as read
    #[error("{reader} cannot mark own message {message_id} as read")]
    SelfRead {
        message_id: MessageId,
        reader: String,
    },

    /// Journal file is unreadable or corrupt
    #[error("Journal error: {0}")]
    Journal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// The error code string for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidArgument { .. } | Self::InvalidThread(_) | Self::SelfRead { .. } => {
                "VALIDATION_ERROR"
            }
            Self::Journal(_) | Self::Io(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "TYPE_ERROR",
        }
    }
}

impl From<swapmail_core::Error> for StoreError {
    fn from(e: swapmail_core::Error) -> Self {
        match e {
            swapmail_core::Error::InvalidThreadSpec(msg) => Self::InvalidThread(msg),
            swapmail_core::Error::Validation(msg) => Self::invalid("content", msg),
            other => Self::invalid("request", other.to_string()),
        }
    }
}

impl From<StoreError> for swapmail_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, identifier } => {
                match identifier.parse::<MessageId>() {
                    Ok(id) if entity == "Message" => Self::MessageNotFound(id),
                    _ => Self::Internal(format!("{entity} not found: {identifier}")),
                }
            }
            StoreError::InvalidArgument { field, message } => {
                Self::Validation(format!("{field}: {message}"))
            }
            StoreError::InvalidThread(msg) => Self::InvalidThreadSpec(msg),
            StoreError::SelfRead { message_id, .. } => Self::SelfRead(message_id),
            StoreError::Journal(msg) => Self::Journal(msg),
            StoreError::Io(e) => Self::Io(e),
            StoreError::Serialization(e) => Self::Serialization(e),
        }
    }
}
