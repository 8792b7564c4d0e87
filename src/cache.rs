//! Cache collaborator contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Write-behavior flags for [`Cache::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetFlags {
    allow_overwrite: bool,
}

impl SetFlags {
    /// Refuse to replace a live, unexpired entry.
    pub const NONE: SetFlags = SetFlags {
        allow_overwrite: false,
    };

    /// Replace any existing entry and reset its expiration.
    pub const ALLOW_OVERWRITE: SetFlags = SetFlags {
        allow_overwrite: true,
    };

    /// Whether this write may replace a live entry.
    pub fn allows_overwrite(self) -> bool {
        self.allow_overwrite
    }
}

/// A shared key/value store with sliding expiration.
///
/// Serves two roles: the view-state cache consulted by Materialize, and
/// the coordination store the [`DistributedLock`](crate::DistributedLock)
/// writes its lease entries into. Implementations must be safe for
/// concurrent use across unrelated keys.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` under `key` with the given sliding expiration.
    ///
    /// Returns `false` without modifying the store when a live entry
    /// exists and `flags` does not allow overwriting; returns `true` when
    /// the value was written (which also resets the expiration).
    async fn set(
        &self,
        key: &str,
        value: &str,
        sliding_expiration: Duration,
        flags: SetFlags,
    ) -> Result<bool>;

    /// Read the value under `key`, or `None` if absent or expired.
    ///
    /// Reading a live entry refreshes its sliding expiration -- lease
    /// holders rely on this side effect to keep their lease alive.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete the entry under `key`.
    ///
    /// Returns `false` when the entry was already absent or expired.
    async fn remove(&self, key: &str) -> Result<bool>;
}
