//! Registry online status and its time-bounded cache.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// Reachability of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnlineStatus {
    /// The health endpoint answered with a success status.
    Online,
    /// The health endpoint failed or could not be reached.
    Offline,
    /// The integration is disabled.
    NotConfigured,
}

impl OnlineStatus {
    /// Returns true if the registry is reachable.
    pub fn is_online(&self) -> bool {
        matches!(self, OnlineStatus::Online)
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OnlineStatus::Online => "ONLINE",
            OnlineStatus::Offline => "OFFLINE",
            OnlineStatus::NotConfigured => "NOT_CONFIGURED",
        })
    }
}

/// Caches the last health check result for a fixed time.
#[derive(Debug)]
pub struct OnlineStatusCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, OnlineStatus)>>,
}

impl OnlineStatusCache {
    /// Creates an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached status, or runs `check` and caches its result.
    pub fn get_or_check(&self, check: impl FnOnce() -> OnlineStatus) -> OnlineStatus {
        let mut cached = self.cached.lock();
        if let Some((at, status)) = *cached {
            if at.elapsed() < self.ttl {
                return status;
            }
        }
        let status = check();
        *cached = Some((Instant::now(), status));
        status
    }

    /// Stores a freshly observed status.
    pub fn store(&self, status: OnlineStatus) {
        *self.cached.lock() = Some((Instant::now(), status));
    }

    /// Drops the cached status.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}
