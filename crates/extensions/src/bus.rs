//! Ordered, sequential event dispatch with per-event merge semantics.
//!
//! Handlers run in registration order, one at a time. Faults are logged,
//! surfaced as `extension_error` events, and never abort dispatch.

use std::sync::Arc;

use coda_domain::event::{EventSink, SessionEvent};
use coda_domain::message::Message;

use crate::context::ExtensionContext;
use crate::events::*;
use crate::Extension;

pub struct ExtensionBus {
    extensions: Vec<Arc<dyn Extension>>,
    events: EventSink,
}

impl ExtensionBus {
    pub fn new(extensions: Vec<Arc<dyn Extension>>, events: EventSink) -> Self {
        Self { extensions, events }
    }

    pub fn extensions(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    fn report_error(&self, extension: &str, event: &str, error: &coda_domain::Error) {
        tracing::warn!(extension, event, error = %error, "extension handler failed");
        (self.events)(SessionEvent::ExtensionError {
            extension: extension.to_owned(),
            event: event.to_owned(),
            message: error.to_string(),
        });
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn initialize(&self, cx: &ExtensionContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.initialize(cx).await {
                self.report_error(ext.name(), "initialize", &e);
            }
        }
    }

    pub async fn shutdown(&self, cx: &ExtensionContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_session_shutdown(cx).await {
                self.report_error(ext.name(), "session_shutdown", &e);
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Gating / transforming dispatch
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `tool_call`: first `{block:true}` wins; remaining handlers still run
    /// for observation. Returns the winning block reason.
    pub async fn dispatch_tool_call(
        &self,
        event: &ToolCallEvent,
        cx: &ExtensionContext,
    ) -> Option<String> {
        let mut block_reason: Option<String> = None;
        for ext in &self.extensions {
            match ext.on_tool_call(event, cx).await {
                Ok(Some(decision)) if decision.block && block_reason.is_none() => {
                    block_reason = Some(
                        decision
                            .reason
                            .unwrap_or_else(|| format!("blocked by extension '{}'", ext.name())),
                    );
                }
                Ok(_) => {}
                Err(e) => self.report_error(ext.name(), "tool_call", &e),
            }
        }
        block_reason
    }

    /// `tool_result`: later handlers see and can further modify the result
    /// (chained transform). Returns the final value.
    pub async fn dispatch_tool_result(
        &self,
        mut event: ToolResultEvent,
        cx: &ExtensionContext,
    ) -> ToolResultEvent {
        for ext in &self.extensions {
            match ext.on_tool_result(&event, cx).await {
                Ok(Some(patch)) => {
                    if let Some(content) = patch.content {
                        event.content = content;
                    }
                    if let Some(details) = patch.details {
                        event.details = details;
                    }
                    if let Some(is_error) = patch.is_error {
                        event.is_error = is_error;
                    }
                }
                Ok(None) => {}
                Err(e) => self.report_error(ext.name(), "tool_result", &e),
            }
        }
        event
    }

    /// `before_agent_start`: message injections accumulate; system-prompt
    /// replacements chain (each handler sees the previous output).
    pub async fn dispatch_before_agent_start(
        &self,
        event: &BeforeAgentStartEvent,
        cx: &ExtensionContext,
    ) -> BeforeAgentStartOutcome {
        let mut outcome = BeforeAgentStartOutcome::default();
        for ext in &self.extensions {
            match ext.on_before_agent_start(event, cx).await {
                Ok(Some(decision)) => {
                    if let Some(message) = decision.message {
                        outcome.messages.push(message);
                    }
                    if let Some(system_prompt) = decision.system_prompt {
                        outcome.system_prompt = Some(system_prompt);
                    }
                }
                Ok(None) => {}
                Err(e) => self.report_error(ext.name(), "before_agent_start", &e),
            }
        }
        outcome
    }

    /// `context`: handlers receive the outgoing message list and may return
    /// a replacement; replacements chain.
    pub async fn dispatch_context(
        &self,
        mut messages: Vec<Message>,
        cx: &ExtensionContext,
    ) -> Vec<Message> {
        for ext in &self.extensions {
            match ext.on_context(&messages, cx).await {
                Ok(Some(replacement)) => messages = replacement,
                Ok(None) => {}
                Err(e) => self.report_error(ext.name(), "context", &e),
            }
        }
        messages
    }

    /// `input`: `handled` is terminal and first-wins; `transform` chains;
    /// `continue` passes through.
    pub async fn dispatch_input(&self, event: InputEvent, cx: &ExtensionContext) -> InputOutcome {
        let mut current = event;
        for ext in &self.extensions {
            match ext.on_input(&current, cx).await {
                Ok(InputAction::Handled) => return InputOutcome::Handled,
                Ok(InputAction::Transform(replacement)) => current = replacement,
                Ok(InputAction::Continue) => {}
                Err(e) => self.report_error(ext.name(), "input", &e),
            }
        }
        InputOutcome::Continue(current)
    }

    /// `session_before_compact`: the first cancel or supplied compaction
    /// wins.
    pub async fn dispatch_before_compact(&self, cx: &ExtensionContext) -> Option<CompactDecision> {
        for ext in &self.extensions {
            match ext.on_before_compact(cx).await {
                Ok(Some(decision)) => return Some(decision),
                Ok(None) => {}
                Err(e) => self.report_error(ext.name(), "session_before_compact", &e),
            }
        }
        None
    }

    /// `session_before_switch`: first cancel wins.
    pub async fn dispatch_before_switch(
        &self,
        event: &SwitchEvent,
        cx: &ExtensionContext,
    ) -> GateDecision {
        for ext in &self.extensions {
            match ext.on_before_switch(event, cx).await {
                Ok(GateDecision::Cancel) => return GateDecision::Cancel,
                Ok(GateDecision::Continue) => {}
                Err(e) => self.report_error(ext.name(), "session_before_switch", &e),
            }
        }
        GateDecision::Continue
    }

    /// `session_before_fork`: first cancel wins.
    pub async fn dispatch_before_fork(
        &self,
        event: &ForkEvent,
        cx: &ExtensionContext,
    ) -> GateDecision {
        for ext in &self.extensions {
            match ext.on_before_fork(event, cx).await {
                Ok(GateDecision::Cancel) => return GateDecision::Cancel,
                Ok(GateDecision::Continue) => {}
                Err(e) => self.report_error(ext.name(), "session_before_fork", &e),
            }
        }
        GateDecision::Continue
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Observation dispatch
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn notify_agent_start(&self, cx: &ExtensionContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_agent_start(cx).await {
                self.report_error(ext.name(), "agent_start", &e);
            }
        }
    }

    pub async fn notify_agent_end(&self, cx: &ExtensionContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_agent_end(cx).await {
                self.report_error(ext.name(), "agent_end", &e);
            }
        }
    }

    pub async fn notify_turn_start(&self, turn_index: u32, cx: &ExtensionContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_turn_start(turn_index, cx).await {
                self.report_error(ext.name(), "turn_start", &e);
            }
        }
    }

    pub async fn notify_turn_end(&self, event: &TurnEndEvent, cx: &ExtensionContext) {
        for ext in &self.extensions {
            if let Err(e) = ext.on_turn_end(event, cx).await {
                self.report_error(ext.name(), "turn_end", &e);
            }
        }
    }
}
