//! Message store for swapmail
//!
//! This crate provides:
//! - A per-thread, append-only message log with monotonic read flags
//! - Snapshot reads that never wait for writers
//! - An optional JSON-lines journal so the log survives restarts
//! - Inbox summaries and unread counts
//!
//! # Timestamp Convention
//!
//! `created_at` is stored as `i64` microseconds since the Unix epoch and is
//! strictly increasing within a thread, even if the wall clock steps back.

#![forbid(unsafe_code)]

pub mod error;
pub mod inbox;
pub mod journal;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use journal::{Journal, JournalRecord};
pub use store::MessageStore;
