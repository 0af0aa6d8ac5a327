//! Poll scheduling for one open thread view.
//!
//! [`SyncPoller`] is a pure state machine: the caller passes the current
//! [`Instant`] in, asks for a [`PollTicket`] when one is due, performs the
//! round trip itself, and hands the result back through
//! [`SyncPoller::complete`]. Nothing here blocks or sleeps.
//!
//! # Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | At most one request in flight | `poll_due` returns `None` while a ticket is outstanding |
//! | Stale responses never applied | tickets carry `(generation, request_seq)` |
//! | A hung request never blocks | abandoned after `supersede_after`, counted as a failure |
//! | Degraded signal | `degraded_after` consecutive failures; reset by the next success |

use std::fmt;
use std::time::{Duration, Instant};

use swapmail_core::{Error, Message, SyncSettings, ThreadKey};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Coarse connectivity signal shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Healthy,
    Degraded,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Permission to issue one list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub key: ThreadKey,
    pub generation: u64,
    pub request_seq: u64,
    pub issued_at: Instant,
}

/// Why a response was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The view switched to another thread after the request was issued.
    ThreadChanged,
    /// The view was closed.
    Closed,
    /// The request was abandoned for taking too long.
    Superseded,
}

/// Result of handing a response back to the poller.
#[derive(Debug)]
pub enum PollOutcome {
    /// Fresh log for the active thread; apply it.
    Applied(Vec<Message>),
    /// The request failed; nothing to apply.
    Failed {
        consecutive_failures: u32,
        connectivity: Connectivity,
    },
    Discarded(DiscardReason),
}

// ---------------------------------------------------------------------------
// SyncPoller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request_seq: u64,
    issued_at: Instant,
}

/// Poll scheduler for a single thread view.
#[derive(Debug)]
pub struct SyncPoller {
    settings: SyncSettings,
    key: Option<ThreadKey>,
    generation: u64,
    next_seq: u64,
    in_flight: Option<InFlight>,
    next_due: Option<Instant>,
    consecutive_failures: u32,
    connectivity: Connectivity,
    seen_epoch: u64,
    refresh_requested: bool,
}

impl SyncPoller {
    #[must_use]
    pub const fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            key: None,
            generation: 0,
            next_seq: 0,
            in_flight: None,
            next_due: None,
            consecutive_failures: 0,
            connectivity: Connectivity::Healthy,
            seen_epoch: 0,
            refresh_requested: false,
        }
    }

    /// Start polling `key`. The first poll is due immediately.
    ///
    /// Any outstanding request belongs to the previous generation and will be
    /// discarded when it returns. `epoch` is the key's current invalidation
    /// epoch, used as the baseline for [`observe_epoch`](Self::observe_epoch).
    pub fn open(&mut self, key: ThreadKey, epoch: u64, now: Instant) {
        self.generation += 1;
        tracing::debug!(thread = %key, generation = self.generation, "poller opened");
        self.key = Some(key);
        self.in_flight = None;
        self.next_due = Some(now);
        self.consecutive_failures = 0;
        self.connectivity = Connectivity::Healthy;
        self.seen_epoch = epoch;
        self.refresh_requested = false;
    }

    /// Stop polling. Idempotent; late responses are discarded.
    pub fn close(&mut self) {
        if let Some(key) = self.key.take() {
            self.generation += 1;
            tracing::debug!(thread = %key, "poller closed");
        }
        self.in_flight = None;
        self.next_due = None;
        self.refresh_requested = false;
    }

    #[must_use]
    pub const fn active(&self) -> Option<&ThreadKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Feed the active key's current invalidation epoch.
    ///
    /// A moved epoch requests a refresh: immediately when eager refresh is
    /// on, otherwise the next scheduled tick picks the change up.
    pub fn observe_epoch(&mut self, epoch: u64) {
        if epoch <= self.seen_epoch || self.key.is_none() {
            return;
        }
        self.seen_epoch = epoch;
        if self.settings.eager_refresh {
            self.refresh_requested = true;
        }
    }

    /// Issue a ticket if a poll is due and none is outstanding.
    pub fn poll_due(&mut self, now: Instant) -> Option<PollTicket> {
        let key = self.key.clone()?;

        if let Some(in_flight) = self.in_flight {
            if now.saturating_duration_since(in_flight.issued_at) < self.settings.supersede_after {
                return None;
            }
            tracing::warn!(
                thread = %key,
                request_seq = in_flight.request_seq,
                "poll request superseded after {:?}",
                self.settings.supersede_after
            );
            self.in_flight = None;
            self.record_failure(&key, now);
            // The abandoned request already used up its slot; go again now.
            self.next_due = Some(now);
        }

        let due = self.refresh_requested || self.next_due.is_some_and(|at| now >= at);
        if !due {
            return None;
        }

        self.next_seq += 1;
        self.refresh_requested = false;
        self.in_flight = Some(InFlight {
            request_seq: self.next_seq,
            issued_at: now,
        });
        Some(PollTicket {
            key,
            generation: self.generation,
            request_seq: self.next_seq,
            issued_at: now,
        })
    }

    /// Hand a response back. Only the current generation's outstanding
    /// request is ever applied.
    pub fn complete(
        &mut self,
        ticket: &PollTicket,
        result: Result<Vec<Message>, Error>,
        now: Instant,
    ) -> PollOutcome {
        let Some(key) = self.key.clone() else {
            return PollOutcome::Discarded(DiscardReason::Closed);
        };
        if ticket.generation != self.generation {
            tracing::debug!(thread = %ticket.key, "discarding response for previous thread");
            return PollOutcome::Discarded(DiscardReason::ThreadChanged);
        }
        match self.in_flight {
            Some(in_flight) if in_flight.request_seq == ticket.request_seq => {}
            _ => {
                tracing::debug!(
                    thread = %key,
                    request_seq = ticket.request_seq,
                    "discarding superseded response"
                );
                return PollOutcome::Discarded(DiscardReason::Superseded);
            }
        }
        self.in_flight = None;

        match result {
            Ok(messages) => {
                self.record_success(&key, now);
                PollOutcome::Applied(messages)
            }
            Err(err) => {
                tracing::debug!(thread = %key, error = %err, "poll failed");
                self.record_failure(&key, now);
                PollOutcome::Failed {
                    consecutive_failures: self.consecutive_failures,
                    connectivity: self.connectivity,
                }
            }
        }
    }

    /// Time until the poller next wants attention, or `None` when closed.
    #[must_use]
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.key.as_ref()?;
        if let Some(in_flight) = self.in_flight {
            let deadline = in_flight.issued_at + self.settings.supersede_after;
            return Some(deadline.saturating_duration_since(now));
        }
        if self.refresh_requested {
            return Some(Duration::ZERO);
        }
        self.next_due.map(|at| at.saturating_duration_since(now))
    }

    fn record_success(&mut self, key: &ThreadKey, now: Instant) {
        if self.connectivity == Connectivity::Degraded {
            tracing::info!(
                thread = %key,
                after_failures = self.consecutive_failures,
                "connectivity restored"
            );
        }
        self.consecutive_failures = 0;
        self.connectivity = Connectivity::Healthy;
        self.next_due = Some(now + self.settings.poll_interval);
    }

    fn record_failure(&mut self, key: &ThreadKey, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.settings.degraded_after
            && self.connectivity == Connectivity::Healthy
        {
            tracing::warn!(
                thread = %key,
                consecutive_failures = self.consecutive_failures,
                "connectivity degraded"
            );
            self.connectivity = Connectivity::Degraded;
        }
        let wait = self
            .settings
            .backoff
            .interval_after(self.settings.poll_interval, self.consecutive_failures);
        self.next_due = Some(now + wait);
    }
}
