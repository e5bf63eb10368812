//! Session event taxonomy.
//!
//! [`AgentEvent`] carries everything the scheduler produces while driving a
//! prompt: lifecycle boundaries, message deltas, tool activity, retries and
//! compaction notices. [`SessionEvent`] is the envelope the event plane
//! fans out to subscribers (SSE or stdout lines).

use serde::Serialize;
use uuid::Uuid;

use crate::stream::Usage;

/// Scheduler state as observed by hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Preparing,
    Streaming,
    ToolExecuting,
    OverflowCompact,
}

impl SchedulerState {
    /// True whenever a turn is in flight.
    pub fn is_streaming(&self) -> bool {
        !matches!(self, SchedulerState::Idle)
    }
}

/// Events emitted by the scheduler while driving a prompt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A prompt chain has started (precedes every `turn_start`).
    AgentStart,

    /// The prompt chain finished; follows all `turn_end`s.
    AgentEnd,

    /// One LLM round-trip began.
    TurnStart { turn_index: u32 },

    /// One LLM round-trip finished, successfully or not.
    TurnEnd {
        turn_index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        entry_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Incremental assistant text.
    TextDelta { text: String },

    /// Incremental reasoning/thinking text.
    ReasoningDelta { text: String },

    /// Incremental tool-call argument data from the stream.
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is about to execute.
    ToolExecutionStart {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Incremental tool output snapshot (long-running tools).
    ToolUpdate {
        call_id: String,
        content: String,
        #[serde(skip_serializing_if = "serde_json::Value::is_null")]
        details: serde_json::Value,
    },

    /// A tool finished and its result was recorded.
    ToolExecutionEnd {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// Token usage reported by the provider.
    Usage { usage: Usage },

    /// A transient provider error is being retried.
    Retry {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// Compaction began (auto or explicit).
    CompactionStart,

    /// Compaction finished and the entry was appended.
    CompactionEnd {
        entry_id: Uuid,
        tokens_before: u64,
        tokens_after: u64,
    },

    /// Scheduler state transition.
    State { state: SchedulerState },

    /// Non-fatal notice for hosts (e.g. a built-in tool was overridden).
    Warning { message: String },
}

/// The envelope fanned out to event-plane subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SessionEvent {
    Agent(AgentEvent),
    /// A UI round-trip request from an extension (serialized request).
    ExtensionUiRequest(serde_json::Value),
    ExtensionError {
        extension: String,
        event: String,
        message: String,
    },
}

impl SessionEvent {
    /// The SSE `event:` name / stdio `event` field for this envelope.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Agent(_) => "agent_event",
            SessionEvent::ExtensionUiRequest(_) => "extension_ui_request",
            SessionEvent::ExtensionError { .. } => "extension_error",
        }
    }
}

/// Where producers hand session events to the event plane. The gateway
/// backs this with its broadcast fan-out; tests use plain collectors.
pub type EventSink = std::sync::Arc<dyn Fn(SessionEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_event_tags_are_snake_case() {
        let ev = AgentEvent::TurnStart { turn_index: 0 };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "turn_start");

        let ev = AgentEvent::ToolExecutionStart {
            call_id: "c".into(),
            tool_name: "bash".into(),
            arguments: serde_json::json!({}),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_execution_start");
    }

    #[test]
    fn envelope_names() {
        assert_eq!(SessionEvent::Agent(AgentEvent::AgentStart).name(), "agent_event");
        assert_eq!(
            SessionEvent::ExtensionError {
                extension: "x".into(),
                event: "tool_call".into(),
                message: "boom".into(),
            }
            .name(),
            "extension_error"
        );
    }

    #[test]
    fn idle_is_not_streaming() {
        assert!(!SchedulerState::Idle.is_streaming());
        assert!(SchedulerState::Streaming.is_streaming());
        assert!(SchedulerState::ToolExecuting.is_streaming());
    }
}
