use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::alarm::AlarmStateSnapshot;
use crate::time::Clock;

const CHANNEL_CAPACITY: usize = 64;

/// Publishes alarm-state and entity-sync envelopes to connected clients.
/// Delivery is best-effort over a broadcast channel drained by the websocket
/// transport; a slow or closed client never blocks the rest. Envelope
/// timestamps are wall-clock for display only and are never an input to
/// rule evaluation.
pub struct Broadcaster {
    clock: Clock,
    sequence: AtomicU64,
    tx: broadcast::Sender<JsonValue>,
}

impl Broadcaster {
    pub fn new(clock: Clock) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            clock,
            sequence: AtomicU64::new(0),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JsonValue> {
        self.tx.subscribe()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn alarm_state_message(&self, snapshot: &AlarmStateSnapshot) -> JsonValue {
        json!({
            "type": "alarm_state",
            "timestamp": self.clock.now().to_rfc3339(),
            "sequence": self.next_sequence(),
            "payload": {
                "state": snapshot.as_json(),
                "effective_settings": snapshot.timing.as_json(),
            },
        })
    }

    pub fn broadcast_alarm_state(&self, snapshot: &AlarmStateSnapshot) {
        let message = self.alarm_state_message(snapshot);
        let _ = self.tx.send(message);
    }

    pub fn entity_sync_message(&self, entities: &[JsonValue]) -> JsonValue {
        json!({
            "type": "entity_sync",
            "timestamp": self.clock.now().to_rfc3339(),
            "sequence": self.next_sequence(),
            "payload": {
                "entities": entities,
                "count": entities.len(),
            },
        })
    }

    /// No-op when nothing changed.
    pub fn broadcast_entity_sync(&self, entities: &[JsonValue]) {
        if entities.is_empty() {
            return;
        }
        let message = self.entity_sync_message(entities);
        let _ = self.tx.send(message);
    }
}
