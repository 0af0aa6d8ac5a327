//! Core types, thread identity, and configuration for swapmail
//!
//! This crate provides:
//! - Identifiers and the message data model (`Message`, `PendingEntry`, ...)
//! - Thread resolution (`ThreadKey`, `resolve`)
//! - Configuration management (`Config`, environment parsing)
//! - Common error types

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod models;
pub mod thread;
pub mod timestamps;

// Re-export key types for convenience
pub use config::{BackoffPolicy, Config, SyncSettings};
pub use error::{Error, Result};
pub use models::{
    Message, MessageId, PendingEntry, PendingStatus, ProjectId, ReadReceipt, SenderDisplay,
    TempId, ThreadSummary, UserId, validate_content,
};
pub use thread::{PollQuery, ThreadKey, UserPair, resolve};
pub use timestamps::{iso_to_micros, micros_to_iso, now_micros};
