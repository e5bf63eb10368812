//! Session event fan-out.
//!
//! One broadcast channel per process: the scheduler (and the extension
//! bus) publish [`SessionEvent`]s, and any number of subscribers — SSE
//! connections, the stdio transport, tests — consume them. There is no
//! replay: a subscriber only sees events emitted after it attached. Slow
//! subscribers lag and lose events rather than blocking emission.

use std::sync::Arc;

use tokio::sync::broadcast;

use coda_domain::event::{AgentEvent, EventSink, SessionEvent};

/// A serialized event ready for any transport.
#[derive(Debug, Clone)]
pub struct EventFrame {
    /// `agent_event`, `extension_ui_request`, or `extension_error`.
    pub name: &'static str,
    /// The JSON payload.
    pub data: String,
}

/// Broadcast fan-out of session events.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Arc<EventFrame>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event. Serialization happens once, here; subscribers
    /// share the frame.
    pub fn emit(&self, event: SessionEvent) {
        let data = match serde_json::to_string(&event) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize session event");
                return;
            }
        };
        let frame = Arc::new(EventFrame {
            name: event.name(),
            data,
        });
        // Send fails only when no subscriber exists; events are lossy by
        // contract.
        let _ = self.tx.send(frame);
    }

    pub fn emit_agent(&self, event: AgentEvent) {
        self.emit(SessionEvent::Agent(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventFrame>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// The sink handed to the extension bus and UI bridge.
    pub fn sink(&self) -> EventSink {
        let this = self.clone();
        Arc::new(move |event| this.emit(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_emission_order() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.emit_agent(AgentEvent::AgentStart);
        broadcaster.emit_agent(AgentEvent::TurnStart { turn_index: 0 });
        broadcaster.emit_agent(AgentEvent::AgentEnd);

        let names: Vec<String> = vec![
            rx.recv().await.unwrap().data.clone(),
            rx.recv().await.unwrap().data.clone(),
            rx.recv().await.unwrap().data.clone(),
        ];
        assert!(names[0].contains("agent_start"));
        assert!(names[1].contains("turn_start"));
        assert!(names[2].contains("agent_end"));
    }

    #[tokio::test]
    async fn two_subscribers_see_the_same_sequence() {
        let broadcaster = EventBroadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        broadcaster.emit_agent(AgentEvent::AgentStart);
        broadcaster.emit_agent(AgentEvent::AgentEnd);

        for rx in [&mut a, &mut b] {
            assert!(rx.recv().await.unwrap().data.contains("agent_start"));
            assert!(rx.recv().await.unwrap().data.contains("agent_end"));
        }
    }

    #[tokio::test]
    async fn dropping_one_subscriber_does_not_affect_the_other() {
        let broadcaster = EventBroadcaster::new();
        let a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        drop(a);
        broadcaster.emit_agent(AgentEvent::AgentStart);
        assert!(b.recv().await.unwrap().data.contains("agent_start"));
    }

    #[tokio::test]
    async fn emitting_without_subscribers_is_fine() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.emit_agent(AgentEvent::AgentStart);
        // Late subscriber missed it: no replay.
        let mut rx = broadcaster.subscribe();
        broadcaster.emit_agent(AgentEvent::AgentEnd);
        assert!(rx.recv().await.unwrap().data.contains("agent_end"));
    }
}
