//! The view repository: Create / Materialize / Persist / Close.
//!
//! Each repository instance owns a unique id used as the lock owner for
//! every lease it takes. The materialization protocol combines the lease,
//! a cache-aside fast path, and deterministic event replay; the persist
//! protocol combines a lease check, a best-effort cache refresh, and the
//! authoritative log append with cache compensation on failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{Cache, SetFlags};
use crate::config::RepositoryConfig;
use crate::dispatch::EventDispatch;
use crate::error::{Error, Result};
use crate::event::{Event, generate_flow_id, sort_for_replay};
use crate::lock::DistributedLock;
use crate::log::EventLog;
use crate::serializer::{JsonSerializer, Serializer};
use crate::view::FlowView;

/// Well-known lease key guarding one-time schema bootstrap.
const SCHEMA_LEASE_KEY: &str = "schema-init";

/// Envelope stored in the cache for a flow's view state.
///
/// Carrying the flow id inside the payload lets Materialize verify the
/// entry is consistent with the key it was read under.
#[derive(Debug, Serialize, Deserialize)]
struct CachedLayout {
    flow_id: String,
    state: Value,
}

/// Shared state behind a repository and the handles its views hold.
struct RepositoryInner {
    repository_id: String,
    event_log: Arc<dyn EventLog>,
    cache: Option<Arc<dyn Cache>>,
    serializer: Arc<dyn Serializer>,
    lock: DistributedLock,
    config: RepositoryConfig,
    /// Fast-path flag for schema bootstrap. Scoped to this repository's
    /// shared state, not the process; correctness across instances comes
    /// from the schema lease plus re-check, the flag only skips I/O.
    schema_ready: AtomicBool,
    /// Ensures the missing-cache warning is logged once.
    missing_cache_warned: AtomicBool,
}

impl RepositoryInner {
    /// The persist step: lease check, best-effort cache refresh, append,
    /// cache compensation on append failure.
    async fn persist(
        &self,
        flow_id: &str,
        event_id: &str,
        arguments: Value,
        layout: Value,
    ) -> Result<()> {
        if !self.lock.is_held(flow_id, &self.repository_id).await? {
            return Err(Error::NoLockHeld {
                flow_id: flow_id.to_string(),
            });
        }

        // Best-effort cache refresh; the log append below stays the
        // authoritative write.
        match &self.cache {
            Some(cache) => {
                let envelope = CachedLayout {
                    flow_id: flow_id.to_string(),
                    state: layout,
                };
                let payload = self.serializer.encode(&serde_json::to_value(&envelope)?)?;
                if let Err(e) = cache
                    .set(
                        flow_id,
                        &payload,
                        self.config.cache_expiration,
                        SetFlags::ALLOW_OVERWRITE,
                    )
                    .await
                {
                    tracing::warn!(flow_id, error = %e, "cache refresh failed, continuing with append");
                }
            }
            None => {
                if !self.missing_cache_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!("no cache collaborator configured, view state will not be cached");
                }
            }
        }

        let event = Event::new(flow_id, event_id, self.serializer.encode(&arguments)?);
        if let Err(append_err) = self.event_log.set_event(event).await {
            // A cached layout that the log never saw must not survive.
            if let Some(cache) = &self.cache
                && let Err(remove_err) = cache.remove(flow_id).await
            {
                tracing::warn!(
                    flow_id,
                    error = %remove_err,
                    "cache invalidation after failed append also failed"
                );
            }
            return Err(append_err);
        }

        tracing::debug!(flow_id, event_id, "event appended");
        Ok(())
    }
}

/// Non-owning back-reference from a view to its repository.
///
/// Held inside every bound view's [`ViewCore`](crate::ViewCore); forwards
/// recorded operations to the repository's persist step.
#[derive(Clone)]
pub struct RepositoryHandle {
    inner: Weak<RepositoryInner>,
}

impl RepositoryHandle {
    pub(crate) async fn persist(
        &self,
        flow_id: &str,
        event_id: &str,
        arguments: Value,
        layout: Value,
    ) -> Result<()> {
        let inner = self.inner.upgrade().ok_or(Error::RepositoryGone)?;
        inner.persist(flow_id, event_id, arguments, layout).await
    }
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle").finish()
    }
}

/// Materializes and persists views of per-flow event logs with exclusive
/// access per flow.
///
/// `Clone` is cheap; clones share the same repository id and collaborators.
pub struct ViewRepository<V: FlowView> {
    inner: Arc<RepositoryInner>,
    dispatch: Arc<EventDispatch<V>>,
}

impl<V: FlowView> Clone for ViewRepository<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dispatch: Arc::clone(&self.dispatch),
        }
    }
}

impl<V: FlowView> std::fmt::Debug for ViewRepository<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRepository")
            .field("repository_id", &self.inner.repository_id)
            .finish()
    }
}

impl<V: FlowView> ViewRepository<V> {
    /// Start configuring a repository.
    pub fn builder() -> ViewRepositoryBuilder<V> {
        ViewRepositoryBuilder::new()
    }

    /// This repository's unique id, used as its lock owner id.
    pub fn repository_id(&self) -> &str {
        &self.inner.repository_id
    }

    /// Start a new flow and return its (empty) view, holding the flow's
    /// lease until [`close`](ViewRepository::close).
    ///
    /// A flow id is generated when none is given.
    ///
    /// # Errors
    ///
    /// * [`Error::FlowAlreadyExists`] when the log already holds events
    ///   for the flow.
    /// * [`Error::LockTimeout`] when the flow's lease is contended.
    ///
    /// Every failure releases the lease before propagating.
    pub async fn create(&self, flow_id: Option<String>, tag: Option<Value>) -> Result<V> {
        let flow_id = match flow_id {
            Some(id) if id.is_empty() => {
                return Err(Error::InvalidArgument(
                    "flow id must not be empty".to_string(),
                ));
            }
            Some(id) => id,
            None => generate_flow_id(),
        };

        self.ensure_schema().await?;
        self.inner
            .lock
            .acquire(
                &flow_id,
                &self.inner.repository_id,
                self.inner.config.acquire_timeout,
            )
            .await?;

        match self.create_locked(&flow_id, tag).await {
            Ok(view) => Ok(view),
            Err(e) => {
                self.release_quietly(&flow_id).await;
                Err(e)
            }
        }
    }

    async fn create_locked(&self, flow_id: &str, tag: Option<Value>) -> Result<V> {
        let existing = self.inner.event_log.query_events(flow_id).await?;
        if !existing.is_empty() {
            return Err(Error::FlowAlreadyExists(flow_id.to_string()));
        }

        let mut view = self.dispatch.new_view(flow_id, self.handle());
        if let Some(tag) = tag {
            view.core_mut().set_tag(tag);
        }
        tracing::info!(flow_id, "flow created");
        Ok(view)
    }

    /// Rebuild the view for an existing flow, from cache when possible,
    /// otherwise by replaying its event log. The flow's lease is held on
    /// return until [`close`](ViewRepository::close).
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidFlowId`] when the flow has no events (and no
    ///   cached layout).
    /// * [`Error::LayoutMismatch`] when a cached layout cannot be
    ///   interpreted or fails the flow-id consistency check; no replay
    ///   fallback is attempted.
    /// * [`Error::UnknownEventIdentifier`] when replay hits an event with
    ///   no registered handler.
    ///
    /// Every failure releases the lease before propagating.
    pub async fn materialize(&self, flow_id: &str) -> Result<V> {
        if flow_id.is_empty() {
            return Err(Error::InvalidArgument(
                "flow id must not be empty".to_string(),
            ));
        }

        self.ensure_schema().await?;
        self.inner
            .lock
            .acquire(
                flow_id,
                &self.inner.repository_id,
                self.inner.config.acquire_timeout,
            )
            .await?;

        match self.materialize_locked(flow_id).await {
            Ok(view) => Ok(view),
            Err(e) => {
                self.release_quietly(flow_id).await;
                Err(e)
            }
        }
    }

    async fn materialize_locked(&self, flow_id: &str) -> Result<V> {
        let mut view = self.dispatch.new_view(flow_id, self.handle());
        view.core_mut().begin_hydration();

        let cached = match &self.inner.cache {
            Some(cache) => cache.get(flow_id).await?,
            None => None,
        };

        match cached {
            Some(payload) => {
                self.apply_cached_layout(&mut view, flow_id, &payload)?;
                tracing::debug!(flow_id, "materialized from cache");
            }
            None => {
                let replayed = self.replay_from_log(&mut view, flow_id).await?;
                tracing::debug!(flow_id, events = replayed, "materialized by replay");
            }
        }

        view.core_mut().finish_hydration();
        Ok(view)
    }

    /// Apply a cached layout onto a freshly built view as a schema merge:
    /// keys present in the layout overwrite the view's defaults, keys the
    /// layout does not know keep theirs.
    fn apply_cached_layout(&self, view: &mut V, flow_id: &str, payload: &str) -> Result<()> {
        let mismatch = |reason: String| Error::LayoutMismatch {
            flow_id: flow_id.to_string(),
            reason,
        };

        let value = self
            .inner
            .serializer
            .decode(payload)
            .map_err(|e| mismatch(e.to_string()))?;
        let envelope: CachedLayout =
            serde_json::from_value(value).map_err(|e| mismatch(e.to_string()))?;
        if envelope.flow_id != flow_id {
            return Err(mismatch(format!(
                "layout belongs to flow '{}'",
                envelope.flow_id
            )));
        }

        let Value::Object(layout_map) = envelope.state else {
            return Err(mismatch("layout state is not a keyed map".to_string()));
        };
        let mut base = serde_json::to_value(&*view)?;
        let Value::Object(base_map) = &mut base else {
            return Err(mismatch(
                "view does not export a keyed layout".to_string(),
            ));
        };
        for (key, entry) in layout_map {
            base_map.insert(key, entry);
        }

        let core = std::mem::take(view.core_mut());
        let mut merged: V =
            serde_json::from_value(base).map_err(|e| mismatch(e.to_string()))?;
        *merged.core_mut() = core;
        *view = merged;
        Ok(())
    }

    async fn replay_from_log(&self, view: &mut V, flow_id: &str) -> Result<usize> {
        let mut events = self.inner.event_log.query_events(flow_id).await?;
        if events.is_empty() {
            return Err(Error::InvalidFlowId(flow_id.to_string()));
        }
        if !self.inner.event_log.features().ordered_queries {
            sort_for_replay(&mut events);
        }
        for event in &events {
            self.dispatch
                .replay(view, event, self.inner.serializer.as_ref())?;
        }
        Ok(events.len())
    }

    /// Release the flow's lease and dispose the view.
    ///
    /// Disposal is idempotent: closing an already-disposed view is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`Error::ForeignLockRelease`] when the lease lapsed and was taken
    /// by another owner; the view is left undisposed so the caller can
    /// inspect it.
    pub async fn close(&self, view: &mut V) -> Result<()> {
        if view.core().is_disposed() {
            return Ok(());
        }
        let flow_id = view.core().flow_id().to_string();
        self.inner
            .lock
            .release(&flow_id, &self.inner.repository_id)
            .await?;
        view.core_mut().dispose();
        tracing::info!(flow_id, "flow closed");
        Ok(())
    }

    /// Release a flow's lease by id, without a view in hand.
    ///
    /// # Errors
    ///
    /// Same as [`close`](ViewRepository::close).
    pub async fn close_flow(&self, flow_id: &str) -> Result<()> {
        self.inner
            .lock
            .release(flow_id, &self.inner.repository_id)
            .await
    }

    fn handle(&self) -> RepositoryHandle {
        RepositoryHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Ensure the event log's schema exists, at most once per cooperating
    /// fleet: fast-path flag, then the well-known schema lease, then a
    /// re-check (another repository may have just finished) before
    /// calling [`EventLog::init_schema`].
    async fn ensure_schema(&self) -> Result<()> {
        if self.inner.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        self.inner
            .lock
            .acquire(
                SCHEMA_LEASE_KEY,
                &self.inner.repository_id,
                self.inner.config.acquire_timeout,
            )
            .await?;

        let result = self.init_schema_locked().await;
        self.release_quietly(SCHEMA_LEASE_KEY).await;
        result?;

        self.inner.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn init_schema_locked(&self) -> Result<()> {
        if self.inner.event_log.schema_initialized().await? {
            return Ok(());
        }
        tracing::info!("initializing event log schema");
        self.inner.event_log.init_schema().await
    }

    /// Release a lease on a compensation path, logging instead of masking
    /// the error being propagated.
    async fn release_quietly(&self, key: &str) {
        if let Err(e) = self
            .inner
            .lock
            .release(key, &self.inner.repository_id)
            .await
        {
            tracing::warn!(key, error = %e, "failed to release lease");
        }
    }
}

/// Builder for [`ViewRepository`].
///
/// Collaborators are injected explicitly; there are no ambient defaults
/// beyond the JSON serializer.
pub struct ViewRepositoryBuilder<V: FlowView> {
    event_log: Option<Arc<dyn EventLog>>,
    lock_store: Option<Arc<dyn Cache>>,
    cache: Option<Arc<dyn Cache>>,
    serializer: Option<Arc<dyn Serializer>>,
    dispatch: Option<Arc<EventDispatch<V>>>,
    config: RepositoryConfig,
}

impl<V: FlowView> ViewRepositoryBuilder<V> {
    /// Create a builder with no collaborators configured.
    pub fn new() -> Self {
        Self {
            event_log: None,
            lock_store: None,
            cache: None,
            serializer: None,
            dispatch: None,
            config: RepositoryConfig::default(),
        }
    }

    /// Set the event log backend (required).
    pub fn event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Set the shared store lease entries are written into (required).
    ///
    /// Commonly the same store as [`cache`](Self::cache).
    pub fn lock_store(mut self, store: Arc<dyn Cache>) -> Self {
        self.lock_store = Some(store);
        self
    }

    /// Set the view-state cache (optional). Without one, Materialize
    /// always replays and Persist skips the cache refresh.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the serializer. Defaults to [`JsonSerializer`].
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Set the dispatch table for the view type (required).
    pub fn dispatch(mut self, dispatch: Arc<EventDispatch<V>>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Override the timing knobs.
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the repository.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when a required collaborator is missing.
    pub fn build(self) -> Result<ViewRepository<V>> {
        let event_log = self.event_log.ok_or_else(|| {
            Error::InvalidArgument("an event log is required".to_string())
        })?;
        let lock_store = self.lock_store.ok_or_else(|| {
            Error::InvalidArgument("a lock store is required".to_string())
        })?;
        let dispatch = self.dispatch.ok_or_else(|| {
            Error::InvalidArgument("a dispatch table is required".to_string())
        })?;
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonSerializer));

        let lock = DistributedLock::new(
            lock_store,
            self.config.lease_duration,
            self.config.polling_interval,
        );

        Ok(ViewRepository {
            inner: Arc::new(RepositoryInner {
                repository_id: Uuid::new_v4().to_string(),
                event_log,
                cache: self.cache,
                serializer,
                lock,
                config: self.config,
                schema_ready: AtomicBool::new(false),
                missing_cache_warned: AtomicBool::new(false),
            }),
            dispatch,
        })
    }
}

impl<V: FlowView> Default for ViewRepositoryBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}
