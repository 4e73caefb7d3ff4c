//! Event bus: non-blocking fan-out of lifecycle events to subscribers.
//!
//! Grounded on krusty-core's `agent::loop_events::LoopEvent` — a single
//! tagged enum every producer emits and every consumer maps to its own
//! presentation format — generalized here into a pub/sub broadcaster so
//! more than one subscriber (an SSE handler, a test harness) can observe
//! the same stream.
//!
//! Delivery is best-effort: a lagging or dropped subscriber never blocks a
//! producer and never corrupts orchestrator state, because state is always
//! persisted through the repository layer independently of the event bus.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// One event on the bus. `payload` fields are documented per `type` in
/// spec.md §4.5.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    SessionCompleted,
    SessionError,

    TurnStarted,
    TurnMessageDelta,
    TurnSegmentComplete,
    TurnThoughtDelta,
    TurnToolStarted,
    TurnToolCompleted,
    TurnCompleted,

    QuestionsAsked,
    QuestionsAnswered,
    QuestionsSubmitted,

    WorkflowCreated,
    WorkflowStageChanged,
    WorkflowApprovalNeeded,
    WorkflowCompleted,
    WorkflowError,

    ChannelCreated,
    ChannelDeleted,
}

impl Event {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self { event_type, payload }
    }
}

/// Fan-out broadcaster. Cloning an `EventBus` handle shares the same
/// underlying channel — every clone's `broadcast` call reaches every
/// subscriber registered via any clone's `subscribe`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Non-blocking fan-out. Returns immediately regardless of whether any
    /// subscribers are listening; a send with zero receivers is not an error.
    pub fn broadcast(&self, event: Event) {
        let event_type = event.event_type;
        if self.sender.send(event).is_err() {
            tracing::trace!(?event_type, "event bus: no active subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.broadcast(Event::new(EventType::WorkflowCreated, json!({"id": "w1"})));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type, EventType::WorkflowCreated);
        assert_eq!(e2.payload["id"], "w1");
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.broadcast(Event::new(EventType::WorkflowCreated, json!({})));
    }

    #[tokio::test]
    async fn ordering_within_a_single_producer_is_preserved() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.broadcast(Event::new(EventType::TurnStarted, json!({"i": 0})));
        bus.broadcast(Event::new(EventType::TurnMessageDelta, json!({"i": 1})));
        bus.broadcast(Event::new(EventType::TurnCompleted, json!({"i": 2})));

        assert_eq!(rx.recv().await.unwrap().payload["i"], 0);
        assert_eq!(rx.recv().await.unwrap().payload["i"], 1);
        assert_eq!(rx.recv().await.unwrap().payload["i"], 2);
    }
}
