//! Event payloads and decision types for the extension bus.

use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct ToolResultEvent {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub details: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct BeforeAgentStartEvent {
    /// The prompt(s) about to start the cycle.
    pub prompts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InputEvent {
    pub text: String,
    /// Attached image references (paths or URLs).
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SwitchEvent {
    pub from_session: String,
    pub to_session: String,
}

#[derive(Debug, Clone)]
pub struct ForkEvent {
    pub session: String,
    pub at_entry_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct TurnEndEvent {
    pub turn_index: u32,
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returned from `on_tool_call`. The first blocking handler wins;
/// remaining handlers still observe the event.
#[derive(Debug, Clone)]
pub struct ToolCallDecision {
    pub block: bool,
    pub reason: Option<String>,
}

impl ToolCallDecision {
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            block: true,
            reason: Some(reason.into()),
        }
    }
}

/// Replacement for a tool result; unset fields keep the current value.
#[derive(Debug, Clone, Default)]
pub struct ToolResultPatch {
    pub content: Option<String>,
    pub details: Option<Value>,
    pub is_error: Option<bool>,
}

/// Returned from `on_before_agent_start`.
#[derive(Debug, Clone, Default)]
pub struct BeforeAgentStartDecision {
    /// Extra user message appended before the prompt.
    pub message: Option<String>,
    /// Replacement system prompt; handlers see the previous handler's
    /// output (chained).
    pub system_prompt: Option<String>,
}

/// Terminal actions for the `input` event.
#[derive(Debug, Clone)]
pub enum InputAction {
    /// Consume the input; the agent never sees it. First wins.
    Handled,
    /// Replace text/images; transforms chain.
    Transform(InputEvent),
    /// Pass through unchanged.
    Continue,
}

/// First cancel wins for `session_before_switch` / `session_before_fork`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    Cancel,
}

/// Returned from `on_before_compact`.
#[derive(Debug, Clone)]
pub enum CompactDecision {
    /// Abort the compaction entirely.
    Cancel,
    /// Supply the compaction without an LLM call.
    Supply(CompactionOverride),
}

/// An extension-supplied compaction. Validated before use: the kept id
/// must exist on the active branch and the summary must be non-empty.
#[derive(Debug, Clone)]
pub struct CompactionOverride {
    pub summary: String,
    pub first_kept_entry_id: Uuid,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merged outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulated result of dispatching `before_agent_start`.
#[derive(Debug, Clone, Default)]
pub struct BeforeAgentStartOutcome {
    /// Injected messages, in handler registration order.
    pub messages: Vec<String>,
    /// Final system prompt after chained replacement, if any handler set one.
    pub system_prompt: Option<String>,
}

/// Result of dispatching `input`.
#[derive(Debug, Clone)]
pub enum InputOutcome {
    /// An extension consumed the input.
    Handled,
    /// The (possibly transformed) input to prompt with.
    Continue(InputEvent),
}
