//! Shared fixtures for sync integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use swapmail_core::{
    Error, Message, MessageId, ReadReceipt, Result, SyncSettings, ThreadKey, ThreadSummary,
    UserId, resolve,
};
use swapmail_store::MessageStore;
use swapmail_sync::{
    AppendRequest, InlineExecutor, LocalTransport, MessagingClient, Session, SyncContext,
    SyncTransport, Task, TaskExecutor,
};

/// Transport that can be told to fail, and records every receipt it sends.
pub struct FlakyTransport {
    inner: LocalTransport,
    failing_lists: AtomicU32,
    fail_appends: AtomicBool,
    drop_append_responses: AtomicBool,
    receipts: Mutex<Vec<(MessageId, UserId)>>,
}

impl FlakyTransport {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self {
            inner: LocalTransport::new(store),
            failing_lists: AtomicU32::new(0),
            fail_appends: AtomicBool::new(false),
            drop_append_responses: AtomicBool::new(false),
            receipts: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `n` list calls.
    pub fn fail_next_lists(&self, n: u32) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, on: bool) {
        self.fail_appends.store(on, Ordering::SeqCst);
    }

    /// Let appends land in the store but report a transport error.
    pub fn drop_append_responses(&self, on: bool) {
        self.drop_append_responses.store(on, Ordering::SeqCst);
    }

    pub fn receipts(&self) -> Vec<(MessageId, UserId)> {
        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SyncTransport for FlakyTransport {
    fn list(&self, key: &ThreadKey) -> Result<Vec<Message>> {
        let remaining = self.failing_lists.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_lists.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::transient("connection refused"));
        }
        self.inner.list(key)
    }

    fn append(&self, request: &AppendRequest) -> Result<Message> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::transient("connection refused"));
        }
        let message = self.inner.append(request)?;
        if self.drop_append_responses.load(Ordering::SeqCst) {
            return Err(Error::transient("response lost"));
        }
        Ok(message)
    }

    fn mark_read(&self, message_id: MessageId, reader: &UserId) -> Result<ReadReceipt> {
        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message_id, reader.clone()));
        self.inner.mark_read(message_id, reader)
    }

    fn inbox(&self, user: &UserId) -> Result<Vec<ThreadSummary>> {
        self.inner.inbox(user)
    }

    fn unread_count(&self, user: &UserId) -> Result<usize> {
        self.inner.unread_count(user)
    }
}

pub fn direct(a: &str, b: &str) -> ThreadKey {
    resolve(None, Some(&a.into()), Some(&b.into())).expect("valid pair")
}

/// Executor that holds tasks until the test releases them.
#[derive(Default)]
pub struct QueuedExecutor {
    tasks: Mutex<Vec<Task>>,
}

impl QueuedExecutor {
    pub fn run_all(&self) -> usize {
        let tasks: Vec<Task> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let n = tasks.len();
        for task in tasks {
            task();
        }
        n
    }
}

impl TaskExecutor for QueuedExecutor {
    fn execute(&self, task: Task) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

pub fn context(
    transport: &Arc<FlakyTransport>,
    executor: Arc<dyn TaskExecutor>,
    settings: SyncSettings,
) -> SyncContext {
    SyncContext::new(
        Arc::clone(transport) as Arc<dyn SyncTransport>,
        executor,
        settings,
    )
}

/// Inline context with default settings.
pub fn inline_context(transport: &Arc<FlakyTransport>) -> SyncContext {
    context(transport, Arc::new(InlineExecutor), SyncSettings::default())
}

/// Client for `user`; clients built from clones of one context share its
/// invalidation bus.
pub fn client(user: &str, ctx: &SyncContext) -> MessagingClient {
    MessagingClient::new(Session::new(user), ctx.clone())
}

pub fn setup() -> (Arc<MessageStore>, Arc<FlakyTransport>) {
    let store = Arc::new(MessageStore::in_memory());
    let transport = Arc::new(FlakyTransport::new(Arc::clone(&store)));
    (store, transport)
}
