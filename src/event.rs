//! Event wire shape and replay ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable fact appended to a flow's log.
///
/// `arguments` is the serializer-encoded positional array of the values the
/// tagged operation was invoked with; it is decoded again during replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The flow this event belongs to.
    pub flow_id: String,
    /// Identifier of the tagged operation that produced the event.
    pub event_id: String,
    /// Server-visible creation time, the primary replay ordering key.
    pub created_utc: DateTime<Utc>,
    /// Serialized positional argument array.
    pub arguments: String,
}

impl Event {
    /// Build an event stamped with the current UTC time.
    pub fn new(
        flow_id: impl Into<String>,
        event_id: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            event_id: event_id.into(),
            created_utc: Utc::now(),
            arguments: arguments.into(),
        }
    }
}

/// Generate a fresh flow id.
pub fn generate_flow_id() -> String {
    Uuid::new_v4().to_string()
}

/// Sort events into replay order: ascending creation time, ties broken by
/// the order the log returned them in.
///
/// Used when the event log does not advertise
/// [`ordered_queries`](crate::LogFeatures::ordered_queries). The sort is
/// stable, which is what preserves log-provided order between equal
/// timestamps.
pub(crate) fn sort_for_replay(events: &mut [Event]) {
    events.sort_by_key(|event| event.created_utc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, flow: &str, id: &str) -> Event {
        Event {
            flow_id: flow.to_string(),
            event_id: id.to_string(),
            created_utc: Utc.timestamp_opt(secs, 0).single().expect("valid timestamp"),
            arguments: "[]".to_string(),
        }
    }

    #[test]
    fn generated_flow_ids_are_unique_and_nonempty() {
        let a = generate_flow_id();
        let b = generate_flow_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn sort_orders_by_creation_time() {
        let mut events = vec![at(30, "f", "c"), at(10, "f", "a"), at(20, "f", "b")];
        sort_for_replay(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn sort_keeps_log_order_for_equal_timestamps() {
        let mut events = vec![at(10, "f", "first"), at(10, "f", "second"), at(5, "f", "earliest")];
        sort_for_replay(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["earliest", "first", "second"]);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = Event::new("flow-1", "renamed", r#"["bob"]"#);
        let json = serde_json::to_string(&event).expect("serialize should succeed");
        let back: Event = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, event);
    }
}
