//! Client-side synchronisation for swapmail conversations
//!
//! This crate provides:
//! - [`SyncPoller`], a clock-driven, single-flight poll scheduler with a
//!   degraded-connectivity signal
//! - [`ReadReceiptTracker`], which marks incoming messages read as they appear
//! - [`SendReconciler`], optimistic sends that collapse into the confirmed log
//! - [`ThreadView`] and [`ViewHandle`], which tie those together per thread
//! - [`MessagingClient`], the session-bound entry point for UI code

#![forbid(unsafe_code)]

pub mod client;
pub mod executor;
pub mod invalidate;
pub mod poller;
pub mod receipts;
pub mod reconcile;
pub mod runner;
pub mod transport;
pub mod view;

pub use client::{MessagingClient, Session, SyncContext};
pub use executor::{InlineExecutor, Task, TaskExecutor, WorkerExecutor};
pub use invalidate::InvalidationBus;
pub use poller::{Connectivity, DiscardReason, PollOutcome, PollTicket, SyncPoller};
pub use receipts::ReadReceiptTracker;
pub use reconcile::{RenderedEntry, SendReconciler};
pub use runner::ViewHandle;
pub use transport::{AppendRequest, LocalTransport, SyncTransport};
pub use view::{PollReport, PollStatus, SendTicket, ThreadView, ViewSnapshot};
