//! Per-view-type event dispatch: the replay table and the view factory.
//!
//! The table maps each event identifier to a typed decode-and-invoke
//! function, registered explicitly by the view author. The closure
//! signature ties the identifier to its positional argument types at
//! compile time, so "positional type agreement" is checked when the table
//! is written, not when an event is replayed. Built once, immutable
//! afterwards, and injected into the repository at construction.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::repository::RepositoryHandle;
use crate::serializer::{ArgTuple, Serializer, decode_args};
use crate::view::FlowView;

/// Type-erased replay entry: decodes the stored argument payload and
/// applies the operation's body to the view.
type ReplayFn<V> = Box<dyn Fn(&mut V, &str, &dyn Serializer) -> Result<()> + Send + Sync>;

/// Immutable mapping from event identifier to replay function, plus the
/// view factory, for one concrete view type.
pub struct EventDispatch<V: FlowView> {
    table: HashMap<String, ReplayFn<V>>,
}

impl<V: FlowView> EventDispatch<V> {
    /// Start registering replay handlers.
    pub fn builder() -> EventDispatchBuilder<V> {
        EventDispatchBuilder::new()
    }

    /// Build a fresh view bound to `flow_id` and its owning repository.
    pub(crate) fn new_view(&self, flow_id: &str, owner: RepositoryHandle) -> V {
        let mut view = V::default();
        view.core_mut().bind(flow_id, owner);
        view
    }

    /// Replay one stored event onto the view.
    ///
    /// Used exclusively during hydration, with the view's eventing
    /// disabled, so the invoked operation body cannot re-persist.
    ///
    /// # Errors
    ///
    /// * [`Error::UnknownEventIdentifier`] when no handler is registered
    ///   for the event's identifier.
    /// * Any decode failure from the serializer, unchanged.
    pub fn replay(&self, view: &mut V, event: &Event, serializer: &dyn Serializer) -> Result<()> {
        let replay = self
            .table
            .get(event.event_id.as_str())
            .ok_or_else(|| Error::UnknownEventIdentifier(event.event_id.clone()))?;
        replay(view, &event.arguments, serializer)
    }

    /// Whether a handler is registered for `event_id`.
    pub fn handles(&self, event_id: &str) -> bool {
        self.table.contains_key(event_id)
    }

    /// Number of registered event identifiers.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// Manual `Debug` because replay functions are opaque.
impl<V: FlowView> std::fmt::Debug for EventDispatch<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatch")
            .field("events", &self.table.len())
            .finish()
    }
}

/// Builder collecting replay handlers for one view type.
///
/// Registration failures (duplicate or empty identifiers) are remembered
/// and reported by [`build`](EventDispatchBuilder::build), keeping the
/// registration chain fluent.
pub struct EventDispatchBuilder<V: FlowView> {
    table: HashMap<String, ReplayFn<V>>,
    error: Option<Error>,
}

impl<V: FlowView> EventDispatchBuilder<V> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            error: None,
        }
    }

    /// Register the replay handler for `event_id`.
    ///
    /// `Args` is the operation's ordered parameter-type list as a tuple;
    /// the handler receives the decoded values and applies the
    /// operation's body:
    ///
    /// ```ignore
    /// EventDispatchBuilder::new()
    ///     .on("deposited", |account: &mut Account, (amount,): (i64,)| {
    ///         account.apply_deposit(amount);
    ///         Ok(())
    ///     })
    ///     .build()?;
    /// ```
    pub fn on<Args, F>(mut self, event_id: impl Into<String>, handler: F) -> Self
    where
        Args: ArgTuple + Send + 'static,
        F: Fn(&mut V, Args) -> Result<()> + Send + Sync + 'static,
    {
        if self.error.is_some() {
            return self;
        }
        let event_id = event_id.into();
        if event_id.is_empty() {
            self.error = Some(Error::InvalidArgument(
                "event identifier must not be empty".to_string(),
            ));
            return self;
        }
        if self.table.contains_key(&event_id) {
            self.error = Some(Error::DuplicateEventIdentifier(event_id));
            return self;
        }
        let replay: ReplayFn<V> = Box::new(move |view, raw, serializer| {
            let args = decode_args::<Args>(serializer, raw)?;
            handler(view, args)
        });
        self.table.insert(event_id, replay);
        self
    }

    /// Finish building the immutable dispatch table.
    ///
    /// # Errors
    ///
    /// * [`Error::DuplicateEventIdentifier`] when two registrations share
    ///   an identifier.
    /// * [`Error::InvalidArgument`] when an identifier was empty.
    pub fn build(self) -> Result<EventDispatch<V>> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(EventDispatch { table: self.table })
    }
}

impl<V: FlowView> Default for EventDispatchBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use crate::view::test_fixtures::{TallyView, tally_dispatch};

    fn event(event_id: &str, arguments: &str) -> Event {
        Event::new("flow-1", event_id, arguments)
    }

    #[test]
    fn duplicate_event_identifier_fails_at_build() {
        let result = EventDispatchBuilder::new()
            .on("x", |_: &mut TallyView, (n,): (i64,)| {
                let _ = n;
                Ok(())
            })
            .on("x", |view: &mut TallyView, (label,): (String,)| {
                view.apply_rename(label);
                Ok(())
            })
            .build();

        match result {
            Err(Error::DuplicateEventIdentifier(id)) => assert_eq!(id, "x"),
            other => panic!("expected DuplicateEventIdentifier, got: {other:?}"),
        }
    }

    #[test]
    fn empty_event_identifier_fails_at_build() {
        let result = EventDispatchBuilder::new()
            .on("", |_: &mut TallyView, (): ()| Ok(()))
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn replay_decodes_arguments_and_applies_the_operation() {
        let dispatch = tally_dispatch();
        let serializer = JsonSerializer;
        let mut view = TallyView::default();

        dispatch
            .replay(&mut view, &event("added", "[40]"), &serializer)
            .expect("replay should succeed");
        dispatch
            .replay(&mut view, &event("added", "[2]"), &serializer)
            .expect("replay should succeed");
        dispatch
            .replay(&mut view, &event("renamed", r#"["ledger"]"#), &serializer)
            .expect("replay should succeed");

        assert_eq!(view.total, 42);
        assert_eq!(view.label, "ledger");
    }

    #[test]
    fn replay_of_unknown_identifier_fails() {
        let dispatch = tally_dispatch();
        let mut view = TallyView::default();

        let err = dispatch
            .replay(&mut view, &event("vanished", "[]"), &JsonSerializer)
            .expect_err("unknown identifier should fail");
        match err {
            Error::UnknownEventIdentifier(id) => assert_eq!(id, "vanished"),
            other => panic!("expected UnknownEventIdentifier, got: {other}"),
        }
    }

    #[test]
    fn replay_with_wrong_arity_surfaces_length_mismatch() {
        let dispatch = tally_dispatch();
        let mut view = TallyView::default();

        let err = dispatch
            .replay(&mut view, &event("added", "[1, 2]"), &JsonSerializer)
            .expect_err("two values for a one-argument operation");
        assert!(
            matches!(err, Error::ArrayLengthMismatch { expected: 1, actual: 2 }),
            "got: {err}"
        );
    }

    #[test]
    fn replay_with_wrong_slot_type_surfaces_malformed_payload() {
        let dispatch = tally_dispatch();
        let mut view = TallyView::default();

        let err = dispatch
            .replay(&mut view, &event("added", r#"["not a number"]"#), &JsonSerializer)
            .expect_err("string where i64 expected");
        assert!(matches!(err, Error::MalformedPayload(_)), "got: {err}");
    }

    #[test]
    fn table_reports_registered_identifiers() {
        let dispatch = tally_dispatch();
        assert_eq!(dispatch.len(), 2);
        assert!(!dispatch.is_empty());
        assert!(dispatch.handles("added"));
        assert!(dispatch.handles("renamed"));
        assert!(!dispatch.handles("vanished"));
    }
}
