//! Configuration for the sync engine.

use crate::model::LayoutBranch;
use std::time::Duration;

/// Timeout classes of registry calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryTimeouts {
    /// Ordinary resource calls.
    pub default: Duration,
    /// Redraw and bulk transfer create/poll.
    pub long: Duration,
    /// Forced start of a bulk transfer.
    pub expedite: Duration,
    /// Health check.
    pub health: Duration,
}

impl Default for RegistryTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            long: Duration::from_secs(20 * 60),
            expedite: Duration::from_secs(10 * 60),
            health: Duration::from_secs(5),
        }
    }
}

impl RegistryTimeouts {
    /// Uses the same timeout for every class.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            default: timeout,
            long: timeout,
            expedite: timeout,
            health: timeout,
        }
    }
}

/// Configuration of the registry integration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Whether the integration runs at all.
    pub enabled: bool,
    /// Registry base URL, e.g. `https://registry.example.com`.
    pub base_url: String,
    /// Call timeouts.
    pub timeouts: RegistryTimeouts,
    /// How long a health check result is reused.
    pub online_status_ttl: Duration,
    /// Interval of the scheduled push.
    pub push_interval: Duration,
    /// Interval of the scheduled bulk transfer management.
    pub bulk_transfer_interval: Duration,
    /// Delay before the first scheduled run.
    pub initial_delay: Duration,
    /// How long a trigger waits for the run lock.
    pub lock_wait: Duration,
    /// Lease of the push run lock.
    pub push_lock_lease: Duration,
    /// Lease of the bulk transfer run lock.
    pub bulk_transfer_lock_lease: Duration,
    /// Branch handled by the scheduled jobs.
    pub branch: LayoutBranch,
}

impl RegistryConfig {
    /// Creates an enabled configuration for the given registry.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            base_url: base_url.into(),
            timeouts: RegistryTimeouts::default(),
            online_status_ttl: Duration::from_secs(60),
            push_interval: Duration::from_secs(60),
            bulk_transfer_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(30),
            lock_wait: Duration::from_secs(1),
            push_lock_lease: Duration::from_secs(60 * 60),
            bulk_transfer_lock_lease: Duration::from_secs(60 * 60),
            branch: LayoutBranch::Main,
        }
    }

    /// Creates a disabled configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new("")
        }
    }

    /// Sets the call timeouts.
    pub fn with_timeouts(mut self, timeouts: RegistryTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the online status cache lifetime.
    pub fn with_online_status_ttl(mut self, ttl: Duration) -> Self {
        self.online_status_ttl = ttl;
        self
    }

    /// Sets the scheduled push interval.
    pub fn with_push_interval(mut self, interval: Duration) -> Self {
        self.push_interval = interval;
        self
    }

    /// Sets the scheduled bulk transfer interval.
    pub fn with_bulk_transfer_interval(mut self, interval: Duration) -> Self {
        self.bulk_transfer_interval = interval;
        self
    }

    /// Sets the delay before the first scheduled run.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets how long a trigger waits for the run lock.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the push run lock lease.
    pub fn with_push_lock_lease(mut self, lease: Duration) -> Self {
        self.push_lock_lease = lease;
        self
    }

    /// Sets the bulk transfer run lock lease.
    pub fn with_bulk_transfer_lock_lease(mut self, lease: Duration) -> Self {
        self.bulk_transfer_lock_lease = lease;
        self
    }

    /// Sets the branch handled by the scheduled jobs.
    pub fn with_branch(mut self, branch: LayoutBranch) -> Self {
        self.branch = branch;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::disabled()
    }
}
