//! Error types for swapmail
//!
//! Three failure families reach callers: validation problems rejected before
//! the store is touched, lookups of unknown messages, and transient transport
//! failures. None of them is fatal to the consuming application.

use thiserror::Error;

use crate::models::MessageId;

/// Result type alias for swapmail operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for swapmail
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid thread selector: {0}")]
    InvalidThreadSpec(String),

    #[error("Sender cannot mark own message as read: {0}")]
    SelfRead(MessageId),

    // ==========================================================================
    // Resource Not Found Errors
    // ==========================================================================
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    // ==========================================================================
    // Transport Errors
    // ==========================================================================
    #[error("Transient network error: {0}")]
    Transient(String),

    // ==========================================================================
    // Storage / I/O Errors
    // ==========================================================================
    #[error("Journal error: {0}")]
    Journal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==========================================================================
    // Internal Errors
    // ==========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid thread selector error
    pub fn invalid_thread(message: impl Into<String>) -> Self {
        Self::InvalidThreadSpec(message.into())
    }

    /// Create a transient transport error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Returns the error type string (for JSON responses)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidThreadSpec(_) | Self::SelfRead(_) => {
                "VALIDATION_ERROR"
            }
            Self::MessageNotFound(_) => "NOT_FOUND",
            Self::Transient(_) => "TRANSIENT_NETWORK_ERROR",
            Self::Journal(_) | Self::Io(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "TYPE_ERROR",
            Self::Internal(_) => "UNHANDLED_EXCEPTION",
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Validation failures are permanent for the given input; a missing
    /// message stays missing. Transport and storage hiccups are worth
    /// another attempt on the next poll or an explicit resend.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Io(_) | Self::Journal(_))
    }

    /// Whether the error was raised before reaching the store.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidThreadSpec(_) | Self::SelfRead(_)
        )
    }
}
