//! The messaging surface handed to UI code.
//!
//! A [`MessagingClient`] is bound to one [`Session`]; there is no ambient
//! "current user". Sends made while a view of the target thread is open go
//! through that view so the pending entry shows up in it. Otherwise the
//! append runs detached: the client keeps the entry until the store confirms
//! it, and a failed one stays listed in [`MessagingClient::detached_sends`]
//! until it is resubmitted or abandoned.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use swapmail_core::{
    Error, Message, MessageId, PendingEntry, ProjectId, ReadReceipt, Result, SyncSettings, TempId,
    ThreadKey, ThreadSummary, UserId, now_micros, resolve,
};
use swapmail_store::MessageStore;

use crate::executor::{InlineExecutor, TaskExecutor};
use crate::invalidate::InvalidationBus;
use crate::reconcile::SendReconciler;
use crate::runner::{ViewHandle, ViewShared};
use crate::transport::{AppendRequest, LocalTransport, SyncTransport};
use crate::view::ThreadView;

/// The signed-in user on whose behalf every call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub local_user: UserId,
}

impl Session {
    #[must_use]
    pub fn new(local_user: impl Into<UserId>) -> Self {
        Self {
            local_user: local_user.into(),
        }
    }
}

/// Everything views need to talk to the outside world.
#[derive(Clone)]
pub struct SyncContext {
    pub transport: Arc<dyn SyncTransport>,
    pub executor: Arc<dyn TaskExecutor>,
    pub bus: Arc<InvalidationBus>,
    pub settings: SyncSettings,
}

impl SyncContext {
    #[must_use]
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        executor: Arc<dyn TaskExecutor>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            transport,
            executor,
            bus: Arc::new(InvalidationBus::new()),
            settings,
        }
    }

    /// In-process context over `store` with inline execution.
    #[must_use]
    pub fn local(store: Arc<MessageStore>, settings: SyncSettings) -> Self {
        Self::new(
            Arc::new(LocalTransport::new(store)),
            Arc::new(InlineExecutor),
            settings,
        )
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Sends made with no view of their thread open.
#[derive(Debug)]
struct DetachedSends {
    reconciler: SendReconciler,
    requests: HashMap<TempId, (ThreadKey, AppendRequest)>,
}

impl DetachedSends {
    fn settle(&mut self, temp_id: &TempId, result: &Result<Message>) {
        match result {
            Ok(_) => {
                self.reconciler.abandon(temp_id);
                self.requests.remove(temp_id);
            }
            Err(err) => {
                self.reconciler.fail(temp_id, err);
            }
        }
    }
}

/// Messaging operations for one session.
pub struct MessagingClient {
    session: Session,
    ctx: SyncContext,
    views: Mutex<Vec<Weak<ViewShared>>>,
    detached: Arc<Mutex<DetachedSends>>,
}

impl MessagingClient {
    #[must_use]
    pub fn new(session: Session, ctx: SyncContext) -> Self {
        let reconciler =
            SendReconciler::new(session.local_user.clone(), ctx.settings.reconcile_window);
        Self {
            session,
            ctx,
            views: Mutex::new(Vec::new()),
            detached: Arc::new(Mutex::new(DetachedSends {
                reconciler,
                requests: HashMap::new(),
            })),
        }
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub const fn context(&self) -> &SyncContext {
        &self.ctx
    }

    fn local_user(&self) -> &UserId {
        &self.session.local_user
    }

    /// Canonical key for the given inputs.
    pub fn resolve_thread(
        &self,
        project_id: Option<&ProjectId>,
        user_a: Option<&UserId>,
        user_b: Option<&UserId>,
    ) -> Result<ThreadKey> {
        resolve(project_id, user_a, user_b)
    }

    /// Current log of `key`, ascending.
    pub fn list_messages(&self, key: &ThreadKey) -> Result<Vec<Message>> {
        self.ensure_participant(key)?;
        self.ctx.transport.list(key)
    }

    /// Send `content` to `recipient_id` as the session user.
    ///
    /// Returns the optimistic entry. If a view of the target thread is open
    /// the entry is rendered there and reconciled as usual; a project view
    /// opened without a counterpart takes `recipient_id` as its own.
    /// Otherwise the append runs detached on the executor and the entry is
    /// tracked by the client until it is confirmed.
    pub fn send_message(
        &self,
        recipient_id: &UserId,
        project_id: Option<&ProjectId>,
        content: &str,
    ) -> Result<PendingEntry> {
        let key = self.target(recipient_id, project_id)?;
        for view in self.open_views() {
            if let Some(sent) = view.try_send(&key, recipient_id, content) {
                return sent;
            }
        }

        let request = self.append_request(recipient_id, project_id, content);
        let entry = {
            let mut detached = self.lock_detached();
            let entry = detached.reconciler.begin(content, now_micros())?;
            detached
                .requests
                .insert(entry.temp_id.clone(), (key.clone(), request.clone()));
            entry
        };
        Ok(self.submit_detached(entry, key, request))
    }

    /// Unconfirmed sends made with no view open, in submission order. Failed
    /// ones stay here until resubmitted or abandoned.
    #[must_use]
    pub fn detached_sends(&self) -> Vec<PendingEntry> {
        self.lock_detached().reconciler.entries().cloned().collect()
    }

    /// Retry a failed detached send with the same content and recipient.
    pub fn resubmit(&self, temp_id: &TempId) -> Result<PendingEntry> {
        let (entry, key, request) = {
            let mut detached = self.lock_detached();
            let target = detached
                .requests
                .get(temp_id)
                .cloned()
                .ok_or_else(|| Error::validation(format!("no detached send {temp_id}")))?;
            let entry = detached.reconciler.resubmit(temp_id, now_micros())?;
            detached.requests.remove(temp_id);
            detached
                .requests
                .insert(entry.temp_id.clone(), target.clone());
            let (key, request) = target;
            (entry, key, request)
        };
        tracing::debug!(thread = %key, old = %temp_id, temp_id = %entry.temp_id, "detached send resubmitted");
        Ok(self.submit_detached(entry, key, request))
    }

    /// Drop a detached send. A request already in flight still lands if the
    /// store accepts it.
    pub fn abandon(&self, temp_id: &TempId) -> Option<PendingEntry> {
        let mut detached = self.lock_detached();
        detached.requests.remove(temp_id);
        detached.reconciler.abandon(temp_id)
    }

    fn submit_detached(
        &self,
        entry: PendingEntry,
        key: ThreadKey,
        request: AppendRequest,
    ) -> PendingEntry {
        let transport = Arc::clone(&self.ctx.transport);
        let bus = Arc::clone(&self.ctx.bus);
        let detached = Arc::clone(&self.detached);
        let temp_id = entry.temp_id.clone();
        self.ctx.executor.execute(Box::new(move || {
            let result = transport.append(&request);
            match &result {
                Ok(message) => {
                    tracing::debug!(temp_id = %temp_id, message_id = %message.id, thread = %key, "detached send confirmed");
                    bus.invalidate(&key);
                }
                Err(err) => {
                    tracing::warn!(temp_id = %temp_id, thread = %key, error = %err, "detached send failed");
                }
            }
            detached
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .settle(&temp_id, &result);
        }));
        self.lock_detached()
            .reconciler
            .get(&entry.temp_id)
            .cloned()
            .unwrap_or(entry)
    }

    /// Send and wait for the store's answer on the calling thread.
    pub fn send_now(
        &self,
        recipient_id: &UserId,
        project_id: Option<&ProjectId>,
        content: &str,
    ) -> Result<Message> {
        let key = self.target(recipient_id, project_id)?;
        let message = self
            .ctx
            .transport
            .append(&self.append_request(recipient_id, project_id, content))?;
        self.ctx.bus.invalidate(&key);
        Ok(message)
    }

    /// Mark `message_id` read on behalf of the session user.
    pub fn mark_message_read(&self, message_id: MessageId) -> Result<ReadReceipt> {
        let receipt = self.ctx.transport.mark_read(message_id, self.local_user())?;
        if receipt.changed {
            self.ctx.bus.invalidate(&receipt.thread);
        }
        Ok(receipt)
    }

    /// Open a live view of `key`.
    ///
    /// The view polls only when ticked or after [`ViewHandle::start`].
    pub fn open_thread(&self, key: ThreadKey, counterpart: Option<UserId>) -> Result<ViewHandle> {
        let view = ThreadView::new(
            self.local_user().clone(),
            key,
            counterpart,
            self.ctx.settings.clone(),
            Arc::clone(&self.ctx.bus),
            Instant::now(),
        )?;
        let handle = ViewHandle::new(view, self.ctx.clone());
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        views.retain(|w| w.strong_count() > 0);
        views.push(Arc::downgrade(handle.shared()));
        Ok(handle)
    }

    /// Conversations the session user takes part in, newest first.
    pub fn inbox(&self) -> Result<Vec<ThreadSummary>> {
        self.ctx.transport.inbox(self.local_user())
    }

    /// Unread messages addressed to the session user.
    pub fn unread_count(&self) -> Result<usize> {
        self.ctx.transport.unread_count(self.local_user())
    }

    fn ensure_participant(&self, key: &ThreadKey) -> Result<()> {
        if key.admits(self.local_user()) {
            Ok(())
        } else {
            Err(Error::invalid_thread(format!(
                "{} is not a participant of {key}",
                self.local_user()
            )))
        }
    }

    fn target(&self, recipient_id: &UserId, project_id: Option<&ProjectId>) -> Result<ThreadKey> {
        if recipient_id == self.local_user() {
            return Err(Error::validation("cannot send a message to yourself"));
        }
        resolve(project_id, Some(self.local_user()), Some(recipient_id))
    }

    fn append_request(
        &self,
        recipient_id: &UserId,
        project_id: Option<&ProjectId>,
        content: &str,
    ) -> AppendRequest {
        AppendRequest {
            sender_id: self.local_user().clone(),
            recipient_id: recipient_id.clone(),
            project_id: project_id.filter(|p| !p.is_blank()).cloned(),
            content: content.to_string(),
        }
    }

    fn open_views(&self) -> Vec<Arc<ViewShared>> {
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        views.retain(|w| w.strong_count() > 0);
        views.iter().filter_map(Weak::upgrade).collect()
    }

    fn lock_detached(&self) -> MutexGuard<'_, DetachedSends> {
        self.detached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MessagingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingClient")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swapmail_core::PendingStatus;

    fn client_for(user: &str, store: &Arc<MessageStore>) -> MessagingClient {
        MessagingClient::new(
            Session::new(user),
            SyncContext::local(Arc::clone(store), SyncSettings::default()),
        )
    }

    #[test]
    fn resolve_is_symmetric_through_client() {
        let store = Arc::new(MessageStore::in_memory());
        let client = client_for("u1", &store);
        let ab = client
            .resolve_thread(None, Some(&"a".into()), Some(&"b".into()))
            .unwrap();
        let ba = client
            .resolve_thread(None, Some(&"b".into()), Some(&"a".into()))
            .unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn detached_send_lands_in_store() {
        let store = Arc::new(MessageStore::in_memory());
        let client = client_for("u1", &store);
        let entry = client.send_message(&"u2".into(), None, "Hello").unwrap();
        assert_eq!(entry.status, PendingStatus::Pending);
        assert_eq!(entry.sender_id, UserId::from("u1"));
        assert!(client.detached_sends().is_empty());

        let key = client
            .resolve_thread(None, Some(&"u1".into()), Some(&"u2".into()))
            .unwrap();
        let log = client.list_messages(&key).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(client.context().bus.epoch(&key), 1);
    }

    #[test]
    fn sending_to_self_is_rejected() {
        let store = Arc::new(MessageStore::in_memory());
        let client = client_for("u1", &store);
        assert!(client.send_message(&"u1".into(), None, "hi").is_err());
        assert!(
            client
                .send_message(&"u1".into(), Some(&"p".into()), "hi")
                .is_err()
        );
        assert_eq!(store.message_count(), 0);
    }

    #[test]
    fn outsider_cannot_list_direct_thread() {
        let store = Arc::new(MessageStore::in_memory());
        let client = client_for("u3", &store);
        let key = client
            .resolve_thread(None, Some(&"u1".into()), Some(&"u2".into()))
            .unwrap();
        assert!(client.list_messages(&key).is_err());
    }

    #[test]
    fn mark_read_is_idempotent_and_rejects_self() {
        let store = Arc::new(MessageStore::in_memory());
        let sender = client_for("u1", &store);
        let reader = client_for("u2", &store);
        let m = sender.send_now(&"u2".into(), None, "Hello").unwrap();

        assert!(sender.mark_message_read(m.id).is_err());
        assert!(reader.mark_message_read(m.id).unwrap().changed);
        assert!(!reader.mark_message_read(m.id).unwrap().changed);
        assert_eq!(reader.unread_count().unwrap(), 0);
    }
}
