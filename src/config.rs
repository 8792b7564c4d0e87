//! Repository timing knobs.

use std::time::Duration;

/// Timing configuration shared by the repository and its lock.
///
/// Lease duration and acquire timeout are deliberately independent: a
/// holder keeps a long lease alive by touching it (see
/// [`DistributedLock::is_held`](crate::DistributedLock::is_held)), while
/// contending callers use a much shorter patience window.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Delay between lease acquisition attempts.
    pub polling_interval: Duration,
    /// Server-side sliding lifetime of a lease entry.
    pub lease_duration: Duration,
    /// How long repository operations wait for a contended lease.
    pub acquire_timeout: Duration,
    /// Sliding expiration applied to cached view layouts.
    pub cache_expiration: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(100),
            lease_duration: Duration::from_secs(60 * 60),
            acquire_timeout: Duration::from_secs(60),
            cache_expiration: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let config = RepositoryConfig::default();
        assert_eq!(config.polling_interval, Duration::from_millis(100));
        assert_eq!(config.lease_duration, Duration::from_secs(3600));
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.cache_expiration, Duration::from_secs(86_400));
    }
}
