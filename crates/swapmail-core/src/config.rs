//! Configuration management for swapmail
//!
//! Configuration is loaded from environment variables. Every knob has a
//! default, so an empty environment yields a working in-memory setup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Default number of consecutive poll failures before the degraded signal.
pub const DEFAULT_DEGRADED_AFTER: u32 = 3;

/// Default tolerance when matching a pending send to a stored message by
/// content and timestamp.
pub const DEFAULT_RECONCILE_WINDOW: Duration = Duration::from_millis(5000);

const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// How the poll interval reacts to consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Keep polling at the base interval no matter what.
    Flat,
    /// Double the interval per consecutive failure, capped at `max`.
    Exponential { max: Duration },
}

impl BackoffPolicy {
    /// Interval to wait before the next poll given the current failure streak.
    #[must_use]
    pub fn interval_after(&self, base: Duration, consecutive_failures: u32) -> Duration {
        match *self {
            Self::Flat => base,
            Self::Exponential { max } => {
                let shift = consecutive_failures.min(16);
                base.saturating_mul(1u32 << shift).min(max.max(base))
            }
        }
    }
}

/// Poller and reconciler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// An outstanding poll older than this is abandoned so it cannot block
    /// later ticks.
    pub supersede_after: Duration,
    pub degraded_after: u32,
    pub backoff: BackoffPolicy,
    /// Poll immediately when the thread is invalidated instead of waiting
    /// for the next scheduled tick.
    pub eager_refresh: bool,
    pub reconcile_window: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            supersede_after: DEFAULT_POLL_INTERVAL * 2,
            degraded_after: DEFAULT_DEGRADED_AFTER,
            backoff: BackoffPolicy::Flat,
            eager_refresh: true,
            reconcile_window: DEFAULT_RECONCILE_WINDOW,
        }
    }
}

impl SyncSettings {
    /// Override the poll interval, keeping supersession at twice the interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.supersede_after = interval * 2;
        self
    }
}

/// Main configuration struct for swapmail
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub sync: SyncSettings,
    /// Journal file for the message store; `None` keeps messages in memory.
    pub journal_path: Option<PathBuf>,
    /// fsync the journal after every write.
    pub journal_fsync: bool,
}

impl Config {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };
        let mut config = Self::default();
        let sync = &mut config.sync;

        if let Some(ms) = env.u64_opt("SWAPMAIL_POLL_INTERVAL_MS").filter(|ms| *ms > 0) {
            *sync = sync.clone().with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = env
            .u64_opt("SWAPMAIL_POLL_SUPERSEDE_AFTER_MS")
            .filter(|ms| *ms > 0)
        {
            sync.supersede_after = Duration::from_millis(ms);
        }
        sync.degraded_after = env
            .u32("SWAPMAIL_DEGRADED_AFTER_FAILURES", sync.degraded_after)
            .max(1);
        if let Some(v) = env.value("SWAPMAIL_POLL_BACKOFF") {
            sync.backoff = match v.trim().to_lowercase().as_str() {
                "exponential" | "exp" => BackoffPolicy::Exponential {
                    max: Duration::from_millis(env.u64(
                        "SWAPMAIL_POLL_BACKOFF_MAX_MS",
                        u64::try_from(DEFAULT_BACKOFF_MAX.as_millis()).unwrap_or(u64::MAX),
                    )),
                },
                "flat" => BackoffPolicy::Flat,
                other => {
                    tracing::warn!(value = other, "unknown SWAPMAIL_POLL_BACKOFF; using flat");
                    BackoffPolicy::Flat
                }
            };
        }
        sync.eager_refresh = env.bool("SWAPMAIL_EAGER_REFRESH", sync.eager_refresh);
        if let Some(ms) = env.u64_opt("SWAPMAIL_RECONCILE_WINDOW_MS") {
            sync.reconcile_window = Duration::from_millis(ms);
        }

        config.journal_path = env
            .value("SWAPMAIL_JOURNAL_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        config.journal_fsync = env.bool("SWAPMAIL_JOURNAL_FSYNC", config.journal_fsync);
        config
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn value(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.value(key).map_or(default, |v| parse_bool(&v, default))
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.value(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.u64_opt(key).unwrap_or(default)
    }

    fn u64_opt(&self, key: &str) -> Option<u64> {
        self.value(key).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse().ok()
            }
        })
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => default,
    }
}
