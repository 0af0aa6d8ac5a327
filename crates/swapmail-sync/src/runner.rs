//! Driving a [`ThreadView`] against a transport.
//!
//! [`ViewHandle`] is the live face of an open conversation. Every transport
//! call it makes happens with the view unlocked, so a send can be submitted
//! while a poll is in flight and vice versa. [`ViewHandle::start`] spawns a
//! background loop that ticks the view until stopped; the loop hands each
//! list request to a short-lived thread and never waits on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use swapmail_core::{Message, PendingEntry, Result, TempId, ThreadKey, UserId, now_micros};

use crate::client::SyncContext;
use crate::poller::PollTicket;
use crate::receipts::ReadReceiptTracker;
use crate::view::{PollReport, SendTicket, ThreadView, ViewSnapshot};

/// Longest the background loop sleeps before checking for work again.
const TICK_SLICE: Duration = Duration::from_millis(100);

pub(crate) struct ViewShared {
    view: Mutex<ThreadView>,
    ctx: SyncContext,
}

impl ViewShared {
    fn lock(&self) -> MutexGuard<'_, ThreadView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn key(&self) -> Option<ThreadKey> {
        self.lock().key().cloned()
    }

    fn take_ticket(&self, now: Instant) -> Option<(PollTicket, ReadReceiptTracker)> {
        let mut view = self.lock();
        let ticket = view.poll_due(now)?;
        Some((ticket, view.receipts().clone()))
    }

    fn finish_poll(
        &self,
        ticket: &PollTicket,
        tracker: &ReadReceiptTracker,
        result: Result<Vec<Message>>,
        now: Instant,
    ) -> PollReport {
        let report = self.lock().complete_poll(ticket, result, now);
        tracker.dispatch(
            report.receipts_due.clone(),
            &self.ctx.transport,
            self.ctx.executor.as_ref(),
            &self.ctx.bus,
        );
        report
    }

    fn tick(&self, now: Instant) -> Option<PollReport> {
        let (ticket, tracker) = self.take_ticket(now)?;
        let result = self.ctx.transport.list(&ticket.key);
        Some(self.finish_poll(&ticket, &tracker, result, now))
    }

    /// Issue a due poll on its own thread. A request that never returns
    /// holds only that thread; the poller supersedes it and the loop goes on.
    fn tick_detached(self: &Arc<Self>, now: Instant) {
        let Some((ticket, tracker)) = self.take_ticket(now) else {
            return;
        };
        let shared = Arc::clone(self);
        let request = ticket.clone();
        let receipts = tracker.clone();
        let spawned = thread::Builder::new()
            .name("swapmail-poll".into())
            .spawn(move || {
                let result = shared.ctx.transport.list(&request.key);
                shared.finish_poll(&request, &receipts, result, Instant::now());
            });
        if let Err(err) = spawned {
            tracing::warn!(thread = %ticket.key, error = %err, "failed to spawn poll thread");
            self.finish_poll(&ticket, &tracker, Err(err.into()), now);
        }
    }

    pub(crate) fn send(self: &Arc<Self>, content: &str) -> Result<PendingEntry> {
        let ticket = self.lock().begin_send(content, now_micros())?;
        Ok(self.submit(ticket))
    }

    /// Send through this view if it shows `key` and can address `recipient`.
    ///
    /// A project view opened without a counterpart adopts `recipient`. The
    /// check and the pending entry happen under one lock, so a concurrent
    /// switch cannot send into the wrong thread.
    pub(crate) fn try_send(
        self: &Arc<Self>,
        key: &ThreadKey,
        recipient: &UserId,
        content: &str,
    ) -> Option<Result<PendingEntry>> {
        let ticket = {
            let mut view = self.lock();
            if view.key() != Some(key) {
                return None;
            }
            let adopt = match view.recipient() {
                Some(current) if current != recipient => return None,
                Some(_) => false,
                None => true,
            };
            if adopt {
                view.set_recipient(recipient.clone())
                    .and_then(|()| view.begin_send(content, now_micros()))
            } else {
                view.begin_send(content, now_micros())
            }
        };
        Some(ticket.map(|t| self.submit(t)))
    }

    /// Hand the append to the executor. Returns the entry as it stands once
    /// `execute` returns, which with an inline executor is already settled.
    fn submit(self: &Arc<Self>, ticket: SendTicket) -> PendingEntry {
        let entry = ticket.entry.clone();
        let shared = Arc::clone(self);
        self.ctx.executor.execute(Box::new(move || {
            let result = shared.ctx.transport.append(&ticket.request);
            shared.lock().finish_send(&ticket, result);
        }));
        self.lock().pending(&entry.temp_id).unwrap_or(entry)
    }
}

/// Handle to an open conversation.
pub struct ViewHandle {
    shared: Arc<ViewShared>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ViewHandle {
    pub(crate) fn new(view: ThreadView, ctx: SyncContext) -> Self {
        Self {
            shared: Arc::new(ViewShared {
                view: Mutex::new(view),
                ctx,
            }),
            stop: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<ViewShared> {
        &self.shared
    }

    /// Poll once if a poll is due. Returns `None` when nothing was due.
    pub fn tick(&self, now: Instant) -> Option<PollReport> {
        self.shared.tick(now)
    }

    /// Send `content` to the view's counterpart. The returned entry is
    /// already part of the next snapshot.
    pub fn send(&self, content: &str) -> Result<PendingEntry> {
        self.shared.send(content)
    }

    /// Retry a failed send.
    pub fn resubmit(&self, temp_id: &TempId) -> Result<PendingEntry> {
        let ticket = self.shared.lock().resubmit(temp_id, now_micros())?;
        Ok(self.shared.submit(ticket))
    }

    pub fn abandon(&self, temp_id: &TempId) -> Option<PendingEntry> {
        self.shared.lock().abandon(temp_id)
    }

    /// Move the view to another thread.
    pub fn switch(&self, key: ThreadKey, counterpart: Option<UserId>) -> Result<()> {
        self.shared.lock().switch(key, counterpart, Instant::now())
    }

    /// Stop polling the thread. Responses still in flight are dropped.
    pub fn close(&self) {
        self.shared.lock().close();
    }

    #[must_use]
    pub fn key(&self) -> Option<ThreadKey> {
        self.shared.key()
    }

    #[must_use]
    pub fn snapshot(&self) -> ViewSnapshot {
        self.shared.lock().snapshot()
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.join.is_some()
    }

    /// Spawn the background polling loop. Does nothing if already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.join.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let stop = Arc::clone(&self.stop);
        let join = thread::Builder::new()
            .name("swapmail-view".into())
            .spawn(move || run(&shared, &stop))?;
        self.join = Some(join);
        Ok(())
    }

    /// Signal the loop to stop and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.join();
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the thread to exit (call after `signal_stop`).
    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.stop();
        // Poll threads may still hold the view; whatever they bring back
        // is discarded.
        self.shared.lock().close();
    }
}

impl std::fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandle")
            .field("thread", &self.key())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run(shared: &Arc<ViewShared>, stop: &AtomicBool) {
    tracing::debug!(thread = ?shared.key(), "view loop started");
    while !stop.load(Ordering::Relaxed) {
        shared.tick_detached(Instant::now());

        // Sleep in small increments so we notice shutdown and invalidations quickly
        let wait = shared
            .lock()
            .time_until_due(Instant::now())
            .unwrap_or(TICK_SLICE)
            .clamp(Duration::from_millis(1), TICK_SLICE);
        thread::sleep(wait);
    }
    tracing::debug!(thread = ?shared.key(), "view loop stopped");
}
