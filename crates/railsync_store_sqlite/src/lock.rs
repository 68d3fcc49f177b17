//! Run lock stored as lease rows.
//!
//! A row in `run_lock` is a lease: the holder token and the wall-clock
//! millisecond at which it expires. Any process sharing the database may take
//! over an expired lease.

use crate::error::SqliteResult;
use chrono::Utc;
use parking_lot::Mutex;
use railsync_engine::{LockToken, RunLock, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// How often a waiting acquirer retries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cross-process run lock over the `run_lock` table.
#[derive(Clone)]
pub struct SqliteRunLock {
    connection: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteRunLock {
    pub(crate) fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self {
            connection,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often a waiting acquirer retries.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the holder token of an unexpired lease.
    pub fn holder(&self, name: &str) -> StoreResult<Option<LockToken>> {
        let connection = self.connection.lock();
        let token: Option<String> = connection
            .query_row(
                "SELECT token FROM run_lock WHERE name = ?1 AND expires_at > ?2",
                params![name, now_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(crate::SqliteStoreError::from)?;
        Ok(token.map(LockToken::from_string))
    }

    /// One attempt: takes the lease if it is free or expired.
    fn try_take(&self, name: &str, lease: Duration) -> SqliteResult<Option<LockToken>> {
        let mut connection = self.connection.lock();
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_millis();
        let held: Option<i64> = tx
            .query_row(
                "SELECT expires_at FROM run_lock WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if held.is_some_and(|expires_at| expires_at > now) {
            return Ok(None);
        }
        let token = LockToken::generate();
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        tx.execute(
            "INSERT OR REPLACE INTO run_lock (name, token, expires_at) VALUES (?1, ?2, ?3)",
            params![name, token.as_str(), now.saturating_add(lease_ms)],
        )?;
        tx.commit()?;
        Ok(Some(token))
    }
}

impl RunLock for SqliteRunLock {
    fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> StoreResult<Option<LockToken>> {
        // no deadline when the wait is too long to represent
        let deadline = Instant::now().checked_add(wait);
        loop {
            if let Some(token) = self.try_take(name, lease)? {
                return Ok(Some(token));
            }
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    trace!(lock = name, "lease still held");
                    return Ok(None);
                }
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };
            thread::sleep(pause);
        }
    }

    fn unlock(&self, name: &str, token: &LockToken) -> StoreResult<()> {
        let connection = self.connection.lock();
        connection
            .execute(
                "DELETE FROM run_lock WHERE name = ?1 AND token = ?2",
                params![name, token.as_str()],
            )
            .map_err(crate::SqliteStoreError::from)?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn second_acquirer_waits_then_gives_up() {
        let lock = SqliteStore::in_memory()
            .unwrap()
            .run_lock()
            .with_poll_interval(Duration::from_millis(5));
        let token = lock.try_lock("push", Duration::ZERO, LEASE).unwrap().unwrap();
        assert_eq!(lock.holder("push").unwrap(), Some(token.clone()));
        assert!(lock
            .try_lock("push", Duration::from_millis(20), LEASE)
            .unwrap()
            .is_none());

        lock.unlock("push", &token).unwrap();
        assert!(lock.holder("push").unwrap().is_none());
        assert!(lock.try_lock("push", Duration::ZERO, LEASE).unwrap().is_some());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let lock = SqliteStore::in_memory().unwrap().run_lock();
        let stale = lock
            .try_lock("bulk", Duration::ZERO, Duration::ZERO)
            .unwrap()
            .unwrap();
        let fresh = lock.try_lock("bulk", Duration::ZERO, LEASE).unwrap().unwrap();
        assert_ne!(stale, fresh);

        // the stale holder cannot release the new lease
        lock.unlock("bulk", &stale).unwrap();
        assert_eq!(lock.holder("bulk").unwrap(), Some(fresh));
    }

    #[test]
    fn unbounded_wait_polls_until_released() {
        let lock = SqliteStore::in_memory()
            .unwrap()
            .run_lock()
            .with_poll_interval(Duration::from_millis(5));
        let token = lock.try_lock("push", Duration::MAX, LEASE).unwrap().unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || lock.try_lock("push", Duration::MAX, LEASE).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        lock.unlock("push", &token).unwrap();
        assert!(waiter.join().unwrap().is_some());
    }

    #[test]
    fn locks_are_independent_by_name() {
        let lock = SqliteStore::in_memory().unwrap().run_lock();
        assert!(lock.try_lock("a", Duration::ZERO, LEASE).unwrap().is_some());
        assert!(lock.try_lock("b", Duration::ZERO, LEASE).unwrap().is_some());
    }
}
