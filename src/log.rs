//! Event-log collaborator contract.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::event::Event;

/// Capabilities a log backend advertises to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFeatures {
    /// Whether [`EventLog::query_events`] returns events already in
    /// creation order. When `false`, the repository sorts before replay.
    pub ordered_queries: bool,
}

/// An append-only per-flow event log.
///
/// Backends (a key-range store, a SQL table, ...) live outside this crate;
/// the repository only depends on this contract. Implementations are
/// assumed safe for concurrent use across unrelated flows.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Return every event recorded for `flow_id`.
    ///
    /// The result is restartable: calling again re-reads the log.
    async fn query_events(&self, flow_id: &str) -> Result<Vec<Event>>;

    /// Append one event. The log is append-only; events are never
    /// rewritten. Implementations must reject an event with an empty
    /// flow or event id.
    async fn set_event(&self, event: Event) -> Result<()>;

    /// Create the backing schema. Guarded by the repository's bootstrap
    /// lease, so implementations need not be concurrency-safe against
    /// themselves.
    async fn init_schema(&self) -> Result<()>;

    /// Whether the backing schema already exists. May itself perform I/O.
    async fn schema_initialized(&self) -> Result<bool>;

    /// Capability flags for this backend.
    fn features(&self) -> LogFeatures;
}

/// Shared validation for [`EventLog::set_event`] implementations.
pub(crate) fn validate_event(event: &Event) -> Result<()> {
    if event.flow_id.is_empty() {
        return Err(Error::InvalidArgument(
            "event flow id must not be empty".to_string(),
        ));
    }
    if event.event_id.is_empty() {
        return Err(Error::InvalidArgument(
            "event identifier must not be empty".to_string(),
        ));
    }
    Ok(())
}
