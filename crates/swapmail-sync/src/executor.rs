//! Fire-and-forget execution of send and read-receipt round trips.
//!
//! Views hand their network work to a [`TaskExecutor`] so that neither a
//! send nor a batch of read receipts ever holds up the next poll.

use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run deferred round trips.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs every task immediately on the calling thread.
///
/// Deterministic; used by tests and one-shot CLI commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Runs tasks in order on one dedicated background thread.
pub struct WorkerExecutor {
    tx: Mutex<Option<Sender<Task>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerExecutor {
    /// Spawn the worker thread.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(task) = rx.recv() {
                task();
            }
        })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        })
    }

    /// Stop accepting tasks, drain what is queued, and wait for the thread.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            // The last owner may be a task running on the worker itself.
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

impl TaskExecutor for WorkerExecutor {
    fn execute(&self, task: Task) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            tracing::debug!("worker executor shut down; dropping task");
            return;
        };
        if tx.send(task).is_err() {
            tracing::warn!("worker executor thread is gone; dropping task");
        }
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutor").finish_non_exhaustive()
    }
}
