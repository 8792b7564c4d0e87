//! In-memory reference backends.
//!
//! [`MemoryCache`] and [`MemoryEventLog`] implement the collaborator
//! contracts entirely in process memory. They back the crate's own tests
//! and are useful as fixtures for applications testing against the
//! repository without real infrastructure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::cache::{Cache, SetFlags};
use crate::error::Result;
use crate::event::Event;
use crate::log::{EventLog, LogFeatures, validate_event};

struct CacheEntry {
    value: String,
    sliding_expiration: Duration,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        // Out-of-range expirations clamp to a century, effectively "never".
        self.expires_at = now
            + chrono::Duration::from_std(self.sliding_expiration)
                .unwrap_or_else(|_| chrono::Duration::days(36_500));
    }
}

/// An in-memory [`Cache`] with per-entry sliding expiration.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(
        &self,
        key: &str,
        value: &str,
        sliding_expiration: Duration,
        flags: SetFlags,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        if !flags.allows_overwrite()
            && let Some(existing) = entries.get(key)
            && !existing.is_expired(now)
        {
            return Ok(false);
        }
        let mut entry = CacheEntry {
            value: value.to_string(),
            sliding_expiration,
            expires_at: now,
        };
        entry.touch(now);
        entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        // Take the entry out, then re-insert if still live; sidesteps
        // holding a mutable borrow across the expiry removal.
        match entries.remove(key) {
            Some(entry) if entry.is_expired(now) => Ok(None),
            Some(mut entry) => {
                entry.touch(now);
                let value = entry.value.clone();
                entries.insert(key.to_string(), entry);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }
}

/// An in-memory append-only [`EventLog`].
///
/// Events are returned in append order, so the default instance
/// advertises `ordered_queries`. [`MemoryEventLog::unordered`] drops the
/// capability and returns query results in reverse, simulating a backend
/// whose range reads carry no order guarantee.
pub struct MemoryEventLog {
    events: Mutex<Vec<Event>>,
    schema_ready: Mutex<bool>,
    init_calls: AtomicUsize,
    features: LogFeatures,
}

impl MemoryEventLog {
    /// Create an empty log advertising ordered queries.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            schema_ready: Mutex::new(false),
            init_calls: AtomicUsize::new(0),
            features: LogFeatures {
                ordered_queries: true,
            },
        }
    }

    /// Create an empty log that does not guarantee query order.
    pub fn unordered() -> Self {
        Self {
            features: LogFeatures {
                ordered_queries: false,
            },
            ..Self::new()
        }
    }

    /// How many times [`EventLog::init_schema`] has run.
    pub fn init_schema_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn query_events(&self, flow_id: &str) -> Result<Vec<Event>> {
        let events = self.events.lock().await;
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|event| event.flow_id == flow_id)
            .cloned()
            .collect();
        if !self.features.ordered_queries {
            matching.reverse();
        }
        Ok(matching)
    }

    async fn set_event(&self, event: Event) -> Result<()> {
        validate_event(&event)?;
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        *self.schema_ready.lock().await = true;
        Ok(())
    }

    async fn schema_initialized(&self) -> Result<bool> {
        Ok(*self.schema_ready.lock().await)
    }

    fn features(&self) -> LogFeatures {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn set_without_overwrite_never_replaces_live_entry() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        let first = cache.set("k", "one", ttl, SetFlags::NONE).await.expect("set");
        assert!(first, "first write should succeed");

        let second = cache.set("k", "two", ttl, SetFlags::NONE).await.expect("set");
        assert!(!second, "live entry must not be replaced without overwrite");

        let value = cache.get("k").await.expect("get");
        assert_eq!(value.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn set_with_overwrite_always_replaces() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        cache.set("k", "one", ttl, SetFlags::NONE).await.expect("set");
        let replaced = cache
            .set("k", "two", ttl, SetFlags::ALLOW_OVERWRITE)
            .await
            .expect("set");
        assert!(replaced);

        let value = cache.get("k").await.expect("get");
        assert_eq!(value.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn get_on_absent_key_returns_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn expired_entry_behaves_as_absent() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Duration::from_millis(20), SetFlags::NONE)
            .await
            .expect("set");

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("k").await.expect("get"), None);
        // A non-overwriting write may now claim the slot.
        let claimed = cache
            .set("k", "new", Duration::from_secs(60), SetFlags::NONE)
            .await
            .expect("set");
        assert!(claimed, "expired entry should not block a fresh write");
    }

    #[tokio::test]
    async fn get_refreshes_sliding_expiration() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Duration::from_millis(80), SetFlags::NONE)
            .await
            .expect("set");

        // Keep touching the entry past its original lifetime.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(
                cache.get("k").await.expect("get").is_some(),
                "entry should stay alive while it keeps being read"
            );
        }

        // Stop touching; the entry should now age out.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn remove_returns_false_for_absent_or_expired() {
        let cache = MemoryCache::new();
        assert!(!cache.remove("missing").await.expect("remove"));

        cache
            .set("k", "v", Duration::from_millis(20), SetFlags::NONE)
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.remove("k").await.expect("remove"));
    }

    #[tokio::test]
    async fn remove_returns_true_for_live_entry() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Duration::from_secs(60), SetFlags::NONE)
            .await
            .expect("set");
        assert!(cache.remove("k").await.expect("remove"));
        assert_eq!(cache.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn log_filters_by_flow_and_keeps_append_order() {
        let log = MemoryEventLog::new();
        log.set_event(Event::new("a", "one", "[]")).await.expect("append");
        log.set_event(Event::new("b", "other", "[]")).await.expect("append");
        log.set_event(Event::new("a", "two", "[]")).await.expect("append");

        let events = log.query_events("a").await.expect("query");
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn unordered_log_reverses_query_results() {
        let log = MemoryEventLog::unordered();
        assert!(!log.features().ordered_queries);

        log.set_event(Event::new("a", "one", "[]")).await.expect("append");
        log.set_event(Event::new("a", "two", "[]")).await.expect("append");

        let events = log.query_events("a").await.expect("query");
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["two", "one"]);
    }

    #[tokio::test]
    async fn log_rejects_empty_identifiers() {
        let log = MemoryEventLog::new();
        let err = log
            .set_event(Event::new("", "one", "[]"))
            .await
            .expect_err("empty flow id should be rejected");
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = log
            .set_event(Event::new("a", "", "[]"))
            .await
            .expect_err("empty event id should be rejected");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn schema_flag_flips_after_init() {
        let log = MemoryEventLog::new();
        assert!(!log.schema_initialized().await.expect("check"));
        log.init_schema().await.expect("init");
        assert!(log.schema_initialized().await.expect("check"));
        assert_eq!(log.init_schema_calls(), 1);
    }
}
