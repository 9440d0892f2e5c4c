//! Events broadcast by the voice assistant.
//!
//! Every event carries a sequence number that increases by one per event
//! across all kinds, so a subscriber can tell when it lagged.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::CommandResult;

/// Broadcast channel capacity: 256 events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventKind {
    /// The wake phrase was heard and a command window opened.
    WakeDetected,
    /// A command utterance completed. Results are ranked, best first.
    CommandsDetected { results: Vec<CommandResult> },
    /// The command window closed and wake detection is armed again.
    ListeningTimedOut,
    Status {
        status: AssistantStatus,
        /// Optional human-readable detail (e.g. error message).
        #[serde(skip_serializing_if = "Option::is_none", default)]
        detail: Option<String>,
    },
}

/// Lifecycle state of the voice assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantStatus {
    /// Constructed; `initialize()` not yet called.
    Uninitialized,
    /// Both tasks running.
    Ready,
    /// Startup failed. Restart the process.
    Failed,
    /// Torn down; cannot be initialized again.
    ShutDown,
}

/// Sequenced broadcast sender shared by the lifecycle manager and the
/// detect task.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<AssistantEvent>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Send an event. Having no subscriber is not an error.
    pub fn emit(&self, kind: EventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(AssistantEvent { seq, kind });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_event_flattens_kind_next_to_seq() {
        let event = AssistantEvent {
            seq: 4,
            kind: EventKind::CommandsDetected {
                results: vec![CommandResult {
                    command_id: 2,
                    phrase_id: 5,
                    phrase: "turn off the light".into(),
                    confidence: 0.72,
                }],
            },
        };

        let json = serde_json::to_value(&event).expect("serialize commands event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["kind"], "commandsdetected");
        assert_eq!(json["results"][0]["commandId"], 2);
        assert_eq!(json["results"][0]["phrase"], "turn off the light");

        let round_trip: AssistantEvent =
            serde_json::from_value(json).expect("deserialize commands event");
        assert_eq!(round_trip.kind, event.kind);
    }

    #[test]
    fn status_event_uses_lowercase_status_and_omits_empty_detail() {
        let event = AssistantEvent {
            seq: 0,
            kind: EventKind::Status {
                status: AssistantStatus::ShutDown,
                detail: None,
            },
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["kind"], "status");
        assert_eq!(json["status"], "shutdown");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn unit_kinds_serialize_as_bare_tags() {
        let json = serde_json::to_string(&AssistantEvent {
            seq: 9,
            kind: EventKind::ListeningTimedOut,
        })
        .expect("serialize timeout event");
        assert_eq!(json, r#"{"seq":9,"kind":"listeningtimedout"}"#);
    }

    #[test]
    fn bus_numbers_events_in_send_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(EventKind::WakeDetected);
        bus.emit(EventKind::ListeningTimedOut);

        let first = rx.try_recv().expect("first event");
        let second = rx.try_recv().expect("second event");
        assert_eq!((first.seq, first.kind), (0, EventKind::WakeDetected));
        assert_eq!((second.seq, second.kind), (1, EventKind::ListeningTimedOut));
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(EventKind::WakeDetected);
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
