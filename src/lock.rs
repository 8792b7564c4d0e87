//! Lease-based distributed mutual exclusion over a shared cache store.
//!
//! A lease is a `{owner_id}` record written under a namespaced key with a
//! server-side sliding TTL. Acquisition is a conditional insert that
//! refuses to replace a live entry; contention is handled by polling, not
//! by blocking on the store. The lease duration and the caller's
//! acquisition timeout are independent: a holder keeps a long lease alive
//! by touching it through [`DistributedLock::is_held`] (reads refresh the
//! sliding expiration), while contending callers can give up quickly.
//!
//! This is a lease, not a consensus primitive. There is no fencing token:
//! a lease that silently expires can be re-acquired by a different owner
//! without the original holder noticing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cache::{Cache, SetFlags};
use crate::error::{Error, Result};

/// Namespace prefix for lease entries, keeping them apart from view-state
/// entries living in the same store.
const LEASE_KEY_PREFIX: &str = "lease:";

/// Stored lease record.
#[derive(Debug, Serialize, Deserialize)]
struct LeaseEntry {
    owner_id: String,
}

/// Lease-based lock over a shared [`Cache`] store.
///
/// Cheap to clone; instances sharing the same store coordinate with each
/// other regardless of which process they live in.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn Cache>,
    lease_duration: Duration,
    polling_interval: Duration,
}

impl DistributedLock {
    /// Create a lock over `store`.
    ///
    /// `lease_duration` is the sliding TTL stamped on every lease entry;
    /// `polling_interval` is the delay between acquisition attempts.
    pub fn new(store: Arc<dyn Cache>, lease_duration: Duration, polling_interval: Duration) -> Self {
        Self {
            store,
            lease_duration,
            polling_interval,
        }
    }

    /// Acquire the lease on `key` for `owner_id`, waiting up to `timeout`.
    ///
    /// Attempts a conditional insert; on contention sleeps the polling
    /// interval and retries. Never busy-spins.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for an empty key or owner.
    /// * [`Error::LockTimeout`] when the elapsed time exceeds `timeout`,
    ///   carrying both the requested timeout and the time actually waited.
    pub async fn acquire(&self, key: &str, owner_id: &str, timeout: Duration) -> Result<()> {
        validate(key, owner_id)?;
        let entry = serde_json::to_string(&LeaseEntry {
            owner_id: owner_id.to_string(),
        })?;
        let storage_key = storage_key(key);
        let started = Instant::now();

        loop {
            let inserted = self
                .store
                .set(&storage_key, &entry, self.lease_duration, SetFlags::NONE)
                .await?;
            if inserted {
                tracing::debug!(key, owner_id, "lease acquired");
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::debug!(key, owner_id, ?elapsed, "lease acquisition timed out");
                return Err(Error::LockTimeout { timeout, elapsed });
            }
            tokio::time::sleep(self.polling_interval).await;
        }
    }

    /// Whether `owner_id` currently holds the lease on `key`.
    ///
    /// The underlying read refreshes the entry's sliding expiration, so
    /// holders call this periodically to keep a lease alive.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty key or owner;
    /// [`Error::MalformedPayload`] if the stored entry is not a lease.
    pub async fn is_held(&self, key: &str, owner_id: &str) -> Result<bool> {
        validate(key, owner_id)?;
        match self.store.get(&storage_key(key)).await? {
            Some(raw) => {
                let entry: LeaseEntry = serde_json::from_str(&raw)
                    .map_err(|e| Error::MalformedPayload(e.to_string()))?;
                Ok(entry.owner_id == owner_id)
            }
            None => Ok(false),
        }
    }

    /// Release the lease on `key`, provided `owner_id` holds it.
    ///
    /// The ownership check and the delete are two store operations, not
    /// one: between them the lease can expire and be re-acquired by a
    /// third party, in which case the delete removes the new holder's
    /// lease. A store with compare-and-delete keyed by owner would close
    /// the window; this contract does not require one.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for an empty key or owner.
    /// * [`Error::ForeignLockRelease`] when the lease is absent or held
    ///   by another owner; the entry is left untouched.
    pub async fn release(&self, key: &str, owner_id: &str) -> Result<()> {
        if !self.is_held(key, owner_id).await? {
            return Err(Error::ForeignLockRelease {
                key: key.to_string(),
            });
        }
        self.store.remove(&storage_key(key)).await?;
        tracing::debug!(key, owner_id, "lease released");
        Ok(())
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("lease_duration", &self.lease_duration)
            .field("polling_interval", &self.polling_interval)
            .finish()
    }
}

fn storage_key(key: &str) -> String {
    format!("{LEASE_KEY_PREFIX}{key}")
}

fn validate(key: &str, owner_id: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("lease key must not be empty".to_string()));
    }
    if owner_id.is_empty() {
        return Err(Error::InvalidArgument("owner id must not be empty".to_string()));
    }
    Ok(())
}
