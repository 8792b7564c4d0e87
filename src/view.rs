//! View lifecycle state and the capability interface for tagged operations.
//!
//! A concrete view embeds a [`ViewCore`] (annotated `#[serde(skip)]` so it
//! stays out of the exported layout) and implements [`FlowView`]. Each
//! tagged operation runs its real body, then calls
//! [`record`](FlowView::record) with its event identifier and the actual
//! argument values; the hook forwards to the owning repository's persist
//! step unless eventing is disabled. This explicit wrapper replaces
//! runtime proxy generation: the compiler, not a bytecode emitter,
//! guarantees every tagged operation is interceptable.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::repository::RepositoryHandle;
use crate::serializer::arguments_value;

/// Lifecycle state embedded in every view.
///
/// A view is valid only once its flow id is non-empty (Bound). During
/// hydration eventing is disabled so replayed operations never re-persist.
/// Disposal is terminal and idempotent.
#[derive(Debug, Clone, Default)]
pub struct ViewCore {
    flow_id: String,
    owner: Option<RepositoryHandle>,
    eventing_disabled: bool,
    disposed: bool,
    tag: Option<Value>,
}

impl ViewCore {
    /// The flow this view projects. Empty until the view is bound.
    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Whether the view has been bound to a flow and an owner.
    pub fn is_bound(&self) -> bool {
        !self.flow_id.is_empty()
    }

    /// Whether tagged operations currently skip persistence.
    pub fn is_eventing_disabled(&self) -> bool {
        self.eventing_disabled
    }

    /// Whether the view has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// The opaque tag attached at creation, if any.
    pub fn tag(&self) -> Option<&Value> {
        self.tag.as_ref()
    }

    /// Attach an opaque tag.
    pub fn set_tag(&mut self, tag: Value) {
        self.tag = Some(tag);
    }

    pub(crate) fn bind(&mut self, flow_id: &str, owner: RepositoryHandle) {
        self.flow_id = flow_id.to_string();
        self.owner = Some(owner);
    }

    pub(crate) fn owner(&self) -> Option<&RepositoryHandle> {
        self.owner.as_ref()
    }

    pub(crate) fn begin_hydration(&mut self) {
        self.eventing_disabled = true;
    }

    pub(crate) fn finish_hydration(&mut self) {
        self.eventing_disabled = false;
    }

    pub(crate) fn dispose(&mut self) {
        self.disposed = true;
    }
}

/// A mutable, lifecycle-managed projection of one flow's events.
///
/// Implementors embed a `#[serde(skip)]` [`ViewCore`] and route their
/// tagged operations through [`record`](FlowView::record):
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct Account {
///     #[serde(skip)]
///     core: ViewCore,
///     balance: i64,
/// }
///
/// impl Account {
///     fn apply_deposit(&mut self, amount: i64) {
///         self.balance += amount;
///     }
///
///     pub async fn deposit(&mut self, amount: i64) -> flowview::Result<()> {
///         self.ensure_active()?;
///         self.apply_deposit(amount);
///         self.record("deposited", (amount,)).await
///     }
/// }
/// ```
///
/// The serde supertraits define the exportable layout written to the
/// cache: everything except the skipped core.
pub trait FlowView: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Lifecycle state access.
    fn core(&self) -> &ViewCore;

    /// Mutable lifecycle state access.
    fn core_mut(&mut self) -> &mut ViewCore;

    /// Entry guard for tagged operations: fails on a disposed view before
    /// the operation's body runs, so a rejected call has no side effects.
    fn ensure_active(&self) -> Result<()> {
        if self.core().is_disposed() {
            return Err(Error::AlreadyDisposed);
        }
        Ok(())
    }

    /// Forward a completed tagged operation to the owning repository.
    ///
    /// Call this after the operation's real body, passing the event
    /// identifier and the actual argument values as a tuple. No-ops while
    /// eventing is disabled (hydration), so replay never re-persists.
    ///
    /// # Errors
    ///
    /// * [`Error::AlreadyDisposed`] on a disposed view, with no side
    ///   effects.
    /// * [`Error::RepositoryGone`] if the owning repository was dropped
    ///   or the view was never bound.
    /// * Any persist failure from the repository, unchanged.
    fn record<Args>(
        &self,
        event_id: &str,
        args: Args,
    ) -> impl Future<Output = Result<()>> + Send
    where
        Args: Serialize + Send,
        Self: Sized,
    {
        async move {
            let core = self.core();
            if core.is_disposed() {
                return Err(Error::AlreadyDisposed);
            }
            if core.is_eventing_disabled() {
                return Ok(());
            }
            if event_id.is_empty() {
                return Err(Error::InvalidArgument(
                    "event identifier must not be empty".to_string(),
                ));
            }
            let owner = core.owner().cloned().ok_or(Error::RepositoryGone)?;
            let arguments = arguments_value(&args)?;
            let layout = serde_json::to_value(self)?;
            owner.persist(core.flow_id(), event_id, arguments, layout).await
        }
    }
}
