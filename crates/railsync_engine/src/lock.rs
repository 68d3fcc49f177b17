//! Run locks: at most one push or bulk transfer run at a time.
//!
//! A lock is a named lease. The holder releases it when the run ends; a lease
//! whose holder vanished expires and may be taken over by the next acquirer.

use crate::error::StoreResult;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// Name of the push run lock.
pub const PUSH_LOCK: &str = "registry-push";

/// Name of the bulk transfer run lock.
pub const BULK_TRANSFER_LOCK: &str = "registry-bulk-transfer";

/// Proof of holding a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generates a token unique within this host.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self(format!(
            "{}-{}-{}",
            std::process::id(),
            nanos,
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Wraps a stored token.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named, leased mutual exclusion facility.
pub trait RunLock: Send + Sync {
    /// Tries to take the lock, waiting at most `wait`.
    ///
    /// Returns `None` if another holder kept it for the whole wait.
    fn try_lock(&self, name: &str, wait: Duration, lease: Duration)
        -> StoreResult<Option<LockToken>>;

    /// Releases the lock if `token` still holds it.
    fn unlock(&self, name: &str, token: &LockToken) -> StoreResult<()>;
}

/// Releases a lock when dropped.
pub struct RunLockGuard<'a> {
    lock: &'a dyn RunLock,
    name: String,
    token: LockToken,
}

impl<'a> RunLockGuard<'a> {
    /// Takes the lock, or returns `None` if it stayed busy for the whole wait.
    pub fn acquire(
        lock: &'a dyn RunLock,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> StoreResult<Option<Self>> {
        Ok(lock.try_lock(name, wait, lease)?.map(|token| {
            trace!(lock = name, %token, "lock acquired");
            Self {
                lock,
                name: name.to_string(),
                token,
            }
        }))
    }

    /// Returns the holder token.
    pub fn token(&self) -> &LockToken {
        &self.token
    }
}

impl Drop for RunLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock(&self.name, &self.token) {
            warn!(lock = %self.name, error = %err, "failed to release run lock");
        }
    }
}

/// Runs `body` while holding the lock. Returns `None` if the lock stayed busy.
pub fn run_with_lock<T>(
    lock: &dyn RunLock,
    name: &str,
    wait: Duration,
    lease: Duration,
    body: impl FnOnce() -> T,
) -> StoreResult<Option<T>> {
    let Some(_guard) = RunLockGuard::acquire(lock, name, wait, lease)? else {
        return Ok(None);
    };
    Ok(Some(body()))
}

struct Lease {
    token: LockToken,
    /// `None` for a lease too long to represent.
    expires: Option<Instant>,
}

impl Lease {
    fn expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// In-process run lock.
#[derive(Default)]
pub struct ProcessRunLock {
    leases: Mutex<HashMap<String, Lease>>,
    released: Condvar,
}

impl ProcessRunLock {
    /// Creates a lock with no holders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the named lock is held by an unexpired lease.
    pub fn is_held(&self, name: &str) -> bool {
        self.leases
            .lock()
            .get(name)
            .is_some_and(|lease| !lease.expired(Instant::now()))
    }
}

impl RunLock for ProcessRunLock {
    fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> StoreResult<Option<LockToken>> {
        // no deadline when the wait is too long to represent
        let deadline = Instant::now().checked_add(wait);
        let mut leases = self.leases.lock();
        loop {
            let now = Instant::now();
            let free = leases.get(name).map_or(true, |held| held.expired(now));
            if free {
                let token = LockToken::generate();
                leases.insert(
                    name.to_string(),
                    Lease {
                        token: token.clone(),
                        expires: now.checked_add(lease),
                    },
                );
                return Ok(Some(token));
            }
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Ok(None);
            }
            // Wake up at the deadline or when the current lease runs out.
            let lease_end = leases.get(name).and_then(|held| held.expires);
            let wake = match (deadline, lease_end) {
                (Some(deadline), Some(lease_end)) => Some(deadline.min(lease_end)),
                (deadline, lease_end) => deadline.or(lease_end),
            };
            match wake {
                Some(wake) => {
                    self.released.wait_until(&mut leases, wake);
                }
                None => self.released.wait(&mut leases),
            }
        }
    }

    fn unlock(&self, name: &str, token: &LockToken) -> StoreResult<()> {
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(|held| &held.token == token) {
            leases.remove(name);
            self.released.notify_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn second_acquirer_times_out() {
        let lock = ProcessRunLock::new();
        let token = lock.try_lock("push", Duration::ZERO, LEASE).unwrap().unwrap();
        assert!(lock
            .try_lock("push", Duration::from_millis(20), LEASE)
            .unwrap()
            .is_none());
        assert!(lock.try_lock("other", Duration::ZERO, LEASE).unwrap().is_some());

        lock.unlock("push", &token).unwrap();
        assert!(lock.try_lock("push", Duration::ZERO, LEASE).unwrap().is_some());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let lock = ProcessRunLock::new();
        let stale = lock
            .try_lock("push", Duration::ZERO, Duration::from_millis(10))
            .unwrap()
            .unwrap();
        let fresh = lock
            .try_lock("push", Duration::from_millis(200), LEASE)
            .unwrap()
            .unwrap();
        assert_ne!(stale, fresh);

        // the stale holder cannot release the new lease
        lock.unlock("push", &stale).unwrap();
        assert!(lock.is_held("push"));
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let lock = Arc::new(ProcessRunLock::new());
        let token = lock.try_lock("push", Duration::ZERO, LEASE).unwrap().unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.try_lock("push", Duration::from_secs(5), LEASE).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        lock.unlock("push", &token).unwrap();
        assert!(waiter.join().unwrap().is_some());
    }

    #[test]
    fn unbounded_wait_and_lease() {
        let lock = Arc::new(ProcessRunLock::new());
        let token = lock
            .try_lock("push", Duration::MAX, Duration::MAX)
            .unwrap()
            .unwrap();
        assert!(lock.is_held("push"));

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.try_lock("push", Duration::MAX, LEASE).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        lock.unlock("push", &token).unwrap();
        assert!(waiter.join().unwrap().is_some());
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = ProcessRunLock::new();
        let result = run_with_lock(&lock, "push", Duration::ZERO, LEASE, || {
            assert!(lock.is_held("push"));
            7
        })
        .unwrap();
        assert_eq!(result, Some(7));
        assert!(!lock.is_held("push"));
    }

    #[test]
    fn at_most_one_holder() {
        let lock = Arc::new(ProcessRunLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (lock, inside, max_inside) =
                    (Arc::clone(&lock), Arc::clone(&inside), Arc::clone(&max_inside));
                thread::spawn(move || {
                    run_with_lock(lock.as_ref(), "push", Duration::from_secs(5), LEASE, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
