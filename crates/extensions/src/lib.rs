//! Extension bus and host bridges.
//!
//! Extensions are compiled-in modules registered at session start. Each
//! contributes any subset of: event handlers, tools, and slash commands.
//! Events dispatch sequentially in registration order; handler faults are
//! isolated and surfaced as `extension_error` events, never aborting the
//! session.

pub mod bus;
pub mod context;
pub mod events;
pub mod ui;

pub use bus::ExtensionBus;
pub use context::{ExtensionContext, HostActions};
pub use events::*;
pub use ui::UiBridge;

use std::sync::Arc;

use coda_domain::error::Result;
use coda_domain::message::Message;
use coda_tools::Tool;

/// A compiled-in extension. Every handler defaults to a no-op; an
/// extension overrides only what it cares about.
#[async_trait::async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Tools this extension contributes. Overriding a built-in name is
    /// allowed and warned about.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Slash-command names this extension answers to (host-side surface).
    fn commands(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once at session start with the action set and UI bridge.
    async fn initialize(&self, _cx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Called during session teardown.
    async fn on_session_shutdown(&self, _cx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    // ── Gating / transforming hooks ─────────────────────────────────

    /// A tool call is about to execute. Returning `block: true` skips
    /// execution; the block reason becomes the synthetic error result.
    async fn on_tool_call(
        &self,
        _event: &ToolCallEvent,
        _cx: &ExtensionContext,
    ) -> Result<Option<ToolCallDecision>> {
        Ok(None)
    }

    /// A tool finished. Returning a patch replaces the result seen by the
    /// model; later handlers see the patched value (chained transform).
    async fn on_tool_result(
        &self,
        _event: &ToolResultEvent,
        _cx: &ExtensionContext,
    ) -> Result<Option<ToolResultPatch>> {
        Ok(None)
    }

    /// A prompt is about to start an agent cycle. Returned messages
    /// accumulate; system-prompt replacements chain.
    async fn on_before_agent_start(
        &self,
        _event: &BeforeAgentStartEvent,
        _cx: &ExtensionContext,
    ) -> Result<Option<BeforeAgentStartDecision>> {
        Ok(None)
    }

    /// The outgoing message list was materialized. Returning a replacement
    /// substitutes it; replacements chain.
    async fn on_context(
        &self,
        _messages: &[Message],
        _cx: &ExtensionContext,
    ) -> Result<Option<Vec<Message>>> {
        Ok(None)
    }

    /// Raw host input before it becomes a prompt.
    async fn on_input(&self, _event: &InputEvent, _cx: &ExtensionContext) -> Result<InputAction> {
        Ok(InputAction::Continue)
    }

    /// Compaction is about to run. First cancel wins; a supplied
    /// compaction skips the LLM call.
    async fn on_before_compact(
        &self,
        _cx: &ExtensionContext,
    ) -> Result<Option<CompactDecision>> {
        Ok(None)
    }

    /// The session is about to switch away. First cancel wins.
    async fn on_before_switch(
        &self,
        _event: &SwitchEvent,
        _cx: &ExtensionContext,
    ) -> Result<GateDecision> {
        Ok(GateDecision::Continue)
    }

    /// A fork is about to be created. First cancel wins.
    async fn on_before_fork(
        &self,
        _event: &ForkEvent,
        _cx: &ExtensionContext,
    ) -> Result<GateDecision> {
        Ok(GateDecision::Continue)
    }

    // ── Observation hooks ───────────────────────────────────────────

    async fn on_agent_start(&self, _cx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    async fn on_agent_end(&self, _cx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    async fn on_turn_start(&self, _turn_index: u32, _cx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    async fn on_turn_end(&self, _event: &TurnEndEvent, _cx: &ExtensionContext) -> Result<()> {
        Ok(())
    }
}
