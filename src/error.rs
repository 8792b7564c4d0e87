//! Crate-level error type covering lock, dispatch, and repository failures.

use std::time::Duration;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure kinds produced by the lock, dispatch module, and repository.
///
/// Dispatch-table build failures (`DuplicateEventIdentifier`,
/// `NonInterceptable`, `CannotIntercept`) are programmer errors and are
/// never retried. Lease failures (`LockTimeout`, `ForeignLockRelease`,
/// `NoLockHeld`) are surfaced distinctly so callers can tell contention
/// apart from real faults.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An empty or otherwise unusable argument was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The lease could not be acquired within the caller's patience window.
    ///
    /// Carries the requested timeout and the duration actually waited.
    #[error("lease not acquired within {timeout:?} (waited {elapsed:?})")]
    LockTimeout {
        /// The timeout the caller asked for.
        timeout: Duration,
        /// How long the acquire loop actually polled before giving up.
        elapsed: Duration,
    },

    /// Release was attempted by an owner that does not hold the lease.
    ///
    /// The lease entry is left untouched.
    #[error("lease for '{key}' is held by another owner or does not exist")]
    ForeignLockRelease {
        /// The lease key whose release was refused.
        key: String,
    },

    /// Persist was invoked without the flow's lease being held.
    ///
    /// No log write is attempted.
    #[error("no lease held for flow '{flow_id}'")]
    NoLockHeld {
        /// The flow whose lease was missing.
        flow_id: String,
    },

    /// Two operations were registered under the same event identifier.
    #[error("duplicate event identifier '{0}'")]
    DuplicateEventIdentifier(String),

    /// An operation tagged with an event identifier cannot be intercepted.
    ///
    /// Statically prevented by the [`FlowView`](crate::FlowView) capability
    /// interface; retained so the kind taxonomy is complete for foreign
    /// dispatch implementations.
    #[error("operation '{0}' cannot be intercepted")]
    NonInterceptable(String),

    /// The view type itself does not support interception.
    ///
    /// Statically prevented, see [`Error::NonInterceptable`].
    #[error("view type cannot be intercepted")]
    CannotIntercept,

    /// Replay encountered an event identifier with no registered handler.
    #[error("no replay function registered for event identifier '{0}'")]
    UnknownEventIdentifier(String),

    /// Materialize found zero events for the requested flow.
    #[error("flow '{0}' has no recorded events")]
    InvalidFlowId(String),

    /// Create was asked to start a flow that already has events.
    #[error("flow '{0}' already exists")]
    FlowAlreadyExists(String),

    /// A cached view layout could not be interpreted or failed the
    /// flow-id consistency check.
    #[error("cached layout for flow '{flow_id}' is unusable: {reason}")]
    LayoutMismatch {
        /// The flow whose cached layout was rejected.
        flow_id: String,
        /// Why the payload could not be applied.
        reason: String,
    },

    /// A positional argument array disagreed with the expected arity.
    #[error("argument array has {actual} elements, expected {expected}")]
    ArrayLengthMismatch {
        /// Number of argument slots the operation declares.
        expected: usize,
        /// Number of elements actually present in the payload.
        actual: usize,
    },

    /// A serialized payload was structurally invalid.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An operation was attempted on a disposed view.
    #[error("view has been disposed")]
    AlreadyDisposed,

    /// The repository that owns a view has been dropped.
    #[error("owning repository is no longer alive")]
    RepositoryGone,

    /// An event-log or cache collaborator failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// A value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
