//! The agent turn scheduler — a long-lived cooperative state machine per
//! session.
//!
//! One prompt chain runs at a time (guarded by an owned async mutex).
//! Within a chain: `before_agent_start` hooks fire, user messages append,
//! then the turn loops LLM streaming → sequential tool execution until the
//! assistant answers without tools. Steering restarts the loop with
//! injected user messages; aborting persists the partial message and
//! returns to Idle; overflow triggers compaction and a single retry;
//! transient provider errors back off and retry.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use coda_domain::config::{Config, ThinkingLevel};
use coda_domain::entry::{Entry, EntryPayload};
use coda_domain::error::{Error, Result};
use coda_domain::event::{AgentEvent, SchedulerState};
use coda_domain::message::{ContentPart, Message, ToolCall, ToolDefinition};
use coda_domain::stream::Usage;
use coda_extensions::{
    BeforeAgentStartEvent, ExtensionBus, ExtensionContext, HostActions, InputEvent, InputOutcome,
    ToolCallEvent, ToolResultEvent, TurnEndEvent, UiBridge,
};
use coda_providers::{ChatRequest, LlmProvider, ModelSpec, ProviderRegistry};
use coda_sessions::{materialize_branch, materialized_tokens, SessionLog};
use coda_tools::{ToolContext, ToolOutcome, ToolRegistry, ToolUpdate};

use crate::api::events::EventBroadcaster;

use super::cancel::TurnControl;
use super::compact::{self, CompactionDeps};
use super::retry;
use super::turn::{stream_assistant, Interrupt, StreamFailure, StreamedAssistant};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Coda, a coding assistant operating on the user's \
     machine through a terminal. You read, write and edit files, run shell commands, and search \
     the workspace with the provided tools. Prefer taking action with tools over describing what \
     the user could do. Keep answers terse.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt queueing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do with a prompt that arrives while a turn is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingBehavior {
    /// Interrupt after the in-flight tool; inject and restart.
    #[serde(rename = "steer")]
    Steer,
    /// Let the turn finish, then start a new one.
    #[serde(rename = "followUp")]
    FollowUp,
    /// Queue silently until the next manual prompt.
    #[serde(rename = "nextTurn")]
    NextTurn,
}

#[derive(Default)]
struct Queues {
    steer: Vec<String>,
    follow_up: Vec<String>,
    next_turn: Vec<String>,
}

/// How `prompt` disposed of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptDisposition {
    Started,
    QueuedSteer,
    QueuedFollowUp,
    QueuedNextTurn,
    /// An extension consumed the input.
    Handled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings & stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Settings {
    model: Option<ModelSpec>,
    thinking: ThinkingLevel,
    queue_mode: StreamingBehavior,
    auto_compact: bool,
    auto_retry: bool,
    active_tools: Option<HashSet<String>>,
}

#[derive(Default)]
struct UsageStats {
    total: Usage,
    last_context_tokens: u64,
    compaction_count: u64,
}

/// Host-visible scheduler snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub session_id: String,
    pub session_name: Option<String>,
    pub leaf_id: Option<Uuid>,
    pub state: SchedulerState,
    pub is_streaming: bool,
    pub model: Option<String>,
    pub thinking_level: ThinkingLevel,
    pub queue_mode: StreamingBehavior,
    pub auto_compaction: bool,
    pub auto_retry: bool,
    pub queued_steer: usize,
    pub queued_follow_up: usize,
    pub queued_next_turn: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub entries: usize,
    pub branch_length: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub last_context_tokens: u64,
    pub compaction_count: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Scheduler {
    config: Arc<Config>,
    providers: Arc<ProviderRegistry>,
    bus: Arc<ExtensionBus>,
    events: EventBroadcaster,
    tools: Arc<ToolRegistry>,
    log: Arc<Mutex<SessionLog>>,
    settings: RwLock<Settings>,
    state: RwLock<SchedulerState>,
    queues: Mutex<Queues>,
    turn: Mutex<Option<TurnControl>>,
    /// Held for the duration of one prompt chain. At most one per session.
    running: Arc<tokio::sync::Mutex<()>>,
    usage: RwLock<UsageStats>,
    ext_cx: ExtensionContext,
}

/// Action surface handed to extensions; routes back into the scheduler.
struct SchedulerActions {
    scheduler: std::sync::Weak<Scheduler>,
}

#[async_trait::async_trait]
impl HostActions for SchedulerActions {
    async fn send_message(&self, text: String) -> Result<()> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or(Error::ShuttingDown)?;
        scheduler
            .prompt(text, Some(StreamingBehavior::FollowUp))
            .await?;
        Ok(())
    }

    async fn append_entry(
        &self,
        custom_type: String,
        data: serde_json::Value,
        display: Option<String>,
        content: Option<String>,
    ) -> Result<()> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or(Error::ShuttingDown)?;
        let mut log = scheduler.log.lock();
        let leaf = log.leaf();
        log.append(Entry::new(
            leaf,
            EntryPayload::Custom {
                custom_type,
                data,
                display,
                content,
            },
        ))?;
        Ok(())
    }

    async fn set_active_tools(&self, names: Vec<String>) -> Result<()> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or(Error::ShuttingDown)?;
        scheduler.settings.write().active_tools = Some(names.into_iter().collect());
        Ok(())
    }

    async fn set_model(&self, spec: String) -> Result<()> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or(Error::ShuttingDown)?;
        scheduler.set_model(&spec)?;
        Ok(())
    }
}

/// Outcome of one agent cycle.
enum CycleEnd {
    Completed,
    Aborted,
}

impl Scheduler {
    /// Build a scheduler over an opened session log.
    pub fn new(
        config: Arc<Config>,
        providers: Arc<ProviderRegistry>,
        bus: Arc<ExtensionBus>,
        tools: Arc<ToolRegistry>,
        ui: Arc<UiBridge>,
        events: EventBroadcaster,
        log: SessionLog,
    ) -> Arc<Self> {
        let thinking = config.llm.thinking_level;
        Arc::new_cyclic(|weak| {
            let actions = Arc::new(SchedulerActions {
                scheduler: weak.clone(),
            });
            let ext_cx = ExtensionContext::new(ui, actions);
            Scheduler {
                config,
                providers,
                bus,
                events,
                tools,
                log: Arc::new(Mutex::new(log)),
                settings: RwLock::new(Settings {
                    model: None,
                    thinking,
                    queue_mode: StreamingBehavior::Steer,
                    auto_compact: true,
                    auto_retry: true,
                    active_tools: None,
                }),
                state: RwLock::new(SchedulerState::Idle),
                queues: Mutex::new(Queues::default()),
                turn: Mutex::new(None),
                running: Arc::new(tokio::sync::Mutex::new(())),
                usage: RwLock::new(UsageStats::default()),
                ext_cx,
            }
        })
    }

    pub fn extension_context(&self) -> &ExtensionContext {
        &self.ext_cx
    }

    pub fn log(&self) -> &Arc<Mutex<SessionLog>> {
        &self.log
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write() = state;
        self.events.emit_agent(AgentEvent::State { state });
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        *self.state.read()
    }

    pub fn is_streaming(&self) -> bool {
        self.scheduler_state().is_streaming()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Prompting
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Drive a prompt into the session.
    ///
    /// Idle: starts a prompt chain (prefixed by any `nextTurn` backlog).
    /// Busy: queues per `behavior`, defaulting to the session's queue
    /// mode; `steer` additionally interrupts the running turn.
    pub async fn prompt(
        self: &Arc<Self>,
        text: String,
        behavior: Option<StreamingBehavior>,
    ) -> Result<PromptDisposition> {
        // Host input passes through the extension bus first.
        let input = InputEvent {
            text,
            images: Vec::new(),
        };
        let text = match self.bus.dispatch_input(input, &self.ext_cx).await {
            InputOutcome::Handled => return Ok(PromptDisposition::Handled),
            InputOutcome::Continue(ev) => ev.text,
        };

        match self.running.clone().try_lock_owned() {
            Ok(guard) => {
                let mut prompts: Vec<String> = self.queues.lock().next_turn.drain(..).collect();
                prompts.push(text);
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.run_chain(prompts, guard).await;
                });
                Ok(PromptDisposition::Started)
            }
            Err(_) => {
                let behavior = behavior.unwrap_or(self.settings.read().queue_mode);
                match behavior {
                    StreamingBehavior::Steer => {
                        self.queues.lock().steer.push(text);
                        if let Some(control) = self.turn.lock().as_ref() {
                            control.request_steer();
                        }
                        // The chain may have ended between our failed lock
                        // and the push; don't strand the message.
                        self.pick_up_stranded_queues();
                        Ok(PromptDisposition::QueuedSteer)
                    }
                    StreamingBehavior::FollowUp => {
                        self.queues.lock().follow_up.push(text);
                        self.pick_up_stranded_queues();
                        Ok(PromptDisposition::QueuedFollowUp)
                    }
                    StreamingBehavior::NextTurn => {
                        self.queues.lock().next_turn.push(text);
                        Ok(PromptDisposition::QueuedNextTurn)
                    }
                }
            }
        }
    }

    /// If the chain finished while a message was being queued, drain the
    /// steer/follow-up backlog into a fresh chain.
    fn pick_up_stranded_queues(self: &Arc<Self>) {
        let Ok(guard) = self.running.clone().try_lock_owned() else {
            return;
        };
        let prompts: Vec<String> = {
            let mut queues = self.queues.lock();
            let mut prompts: Vec<String> = queues.steer.drain(..).collect();
            prompts.extend(queues.follow_up.drain(..));
            prompts
        };
        if prompts.is_empty() {
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_chain(prompts, guard).await;
        });
    }

    /// Abort the running turn. No-op when idle.
    pub fn abort(&self) -> bool {
        match self.turn.lock().as_ref() {
            Some(control) => {
                control.abort();
                true
            }
            None => false,
        }
    }

    /// Abort only when the turn is waiting out a retry backoff.
    pub fn abort_retry(&self) -> bool {
        match self.turn.lock().as_ref() {
            Some(control) if control.is_retrying() => {
                control.abort();
                true
            }
            _ => false,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // The prompt chain
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_chain(self: Arc<Self>, mut prompts: Vec<String>, _guard: OwnedMutexGuard<()>) {
        loop {
            let end = self.run_cycle(prompts).await;

            if matches!(end, CycleEnd::Aborted) {
                // Abort returns to Idle without draining queues.
                break;
            }

            // Threshold maintenance: compact before any follow-up turn
            // starts.
            self.maintenance_compaction().await;

            let next: Vec<String> = {
                let mut queues = self.queues.lock();
                queues.follow_up.drain(..).collect()
            };
            if next.is_empty() {
                break;
            }
            prompts = next;
        }

        *self.turn.lock() = None;
        self.set_state(SchedulerState::Idle);
    }

    /// One agent cycle: hooks, user entries, then the turn loop.
    async fn run_cycle(&self, prompts: Vec<String>) -> CycleEnd {
        // before_agent_start: message injections + system prompt chain.
        let hook = self
            .bus
            .dispatch_before_agent_start(
                &BeforeAgentStartEvent {
                    prompts: prompts.clone(),
                },
                &self.ext_cx,
            )
            .await;
        let system_prompt = hook
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned());

        {
            let mut log = self.log.lock();
            for injected in &hook.messages {
                let leaf = log.leaf();
                if let Err(e) = log.append(Entry::user_message(leaf, injected)) {
                    tracing::warn!(error = %e, "failed to append injected message");
                }
            }
            for prompt in &prompts {
                let leaf = log.leaf();
                if let Err(e) = log.append(Entry::user_message(leaf, prompt)) {
                    tracing::warn!(error = %e, "failed to append user message");
                }
            }
        }

        self.set_state(SchedulerState::Preparing);
        self.events.emit_agent(AgentEvent::AgentStart);
        self.bus.notify_agent_start(&self.ext_cx).await;
        self.events.emit_agent(AgentEvent::TurnStart { turn_index: 0 });
        self.bus.notify_turn_start(0, &self.ext_cx).await;

        let control = TurnControl::new();
        *self.turn.lock() = Some(control.clone());

        let end = self.turn_loop(system_prompt, control).await;

        let (entry_id, error) = match &end {
            TurnTermination::Final { entry_id } => (*entry_id, None),
            TurnTermination::Aborted => (None, Some("aborted".to_owned())),
            TurnTermination::Error(message) => (None, Some(message.clone())),
        };
        self.events.emit_agent(AgentEvent::TurnEnd {
            turn_index: 0,
            entry_id,
            error: error.clone(),
        });
        self.bus
            .notify_turn_end(
                &TurnEndEvent {
                    turn_index: 0,
                    error,
                },
                &self.ext_cx,
            )
            .await;
        self.events.emit_agent(AgentEvent::AgentEnd);
        self.bus.notify_agent_end(&self.ext_cx).await;

        match end {
            TurnTermination::Aborted => CycleEnd::Aborted,
            _ => CycleEnd::Completed,
        }
    }

    /// The streaming ⇄ tool-executing loop for one turn.
    async fn turn_loop(&self, system_prompt: String, mut control: TurnControl) -> TurnTermination {
        let mut attempts: u32 = 0;
        let mut compacted_for_overflow = false;

        loop {
            // Materialize the branch and let extensions transform it.
            let mut messages = vec![Message::system(&system_prompt)];
            {
                let log = self.log.lock();
                match log.active_branch() {
                    Ok(branch) => messages.extend(materialize_branch(&branch)),
                    Err(e) => return TurnTermination::Error(e.to_string()),
                }
            }
            let messages = self.bus.dispatch_context(messages, &self.ext_cx).await;
            let estimated_context = materialized_tokens(&messages);

            let (provider, model) = match self.resolve_provider() {
                Ok(p) => p,
                Err(e) => return TurnTermination::Error(e.to_string()),
            };
            let req = ChatRequest {
                messages,
                tools: self.tool_definitions(),
                max_tokens: None,
                temperature: None,
                thinking: Some(self.settings.read().thinking),
                model,
            };

            self.set_state(SchedulerState::Streaming);
            let streamed = match stream_assistant(provider.as_ref(), &req, &self.events, &control)
                .await
            {
                Ok(streamed) => streamed,
                Err(StreamFailure { error, partial_text }) => {
                    match self
                        .handle_stream_failure(
                            error,
                            partial_text,
                            &control,
                            &mut attempts,
                            &mut compacted_for_overflow,
                        )
                        .await
                    {
                        FailureVerdict::Retry => continue,
                        FailureVerdict::Aborted => return TurnTermination::Aborted,
                        FailureVerdict::Steered => {
                            if !self.absorb_steer(&mut control) {
                                return TurnTermination::Aborted;
                            }
                            self.set_state(SchedulerState::Preparing);
                            continue;
                        }
                        FailureVerdict::Fatal(message) => return TurnTermination::Error(message),
                    }
                }
            };
            attempts = 0;

            // Persist the assistant message (partial or complete).
            let assistant_id = {
                let mut log = self.log.lock();
                let leaf = log.leaf();
                let reasoning = if streamed.reasoning.is_empty() {
                    None
                } else {
                    Some(streamed.reasoning.clone())
                };
                match log.append(Entry::assistant_message(
                    leaf,
                    &streamed.text,
                    reasoning,
                    streamed.tool_calls.clone(),
                    streamed.usage.clone(),
                )) {
                    Ok(id) => id,
                    Err(e) => return TurnTermination::Error(e.to_string()),
                }
            };
            self.record_usage(&streamed, estimated_context);

            if streamed.interrupt == Interrupt::Abort {
                return TurnTermination::Aborted;
            }

            // Execute the announced tool calls strictly in order.
            let executed_any = if streamed.tool_calls.is_empty() {
                false
            } else {
                self.set_state(SchedulerState::ToolExecuting);
                self.execute_tool_calls(&streamed, &control).await
            };

            if control.is_aborted() {
                return TurnTermination::Aborted;
            }

            if control.steer_requested() {
                if !self.absorb_steer(&mut control) {
                    return TurnTermination::Aborted;
                }
                self.set_state(SchedulerState::Preparing);
                continue;
            }

            if executed_any {
                // Tool results exist: let the model observe them.
                continue;
            }

            return TurnTermination::Final {
                entry_id: Some(assistant_id),
            };
        }
    }

    /// Append the queued steer messages and swap in a fresh control so
    /// the turn loop can restart. Returns `false` when an abort raced in.
    fn absorb_steer(&self, control: &mut TurnControl) -> bool {
        let steer_msgs: Vec<String> = self.queues.lock().steer.drain(..).collect();
        {
            let mut log = self.log.lock();
            for msg in &steer_msgs {
                let leaf = log.leaf();
                if let Err(e) = log.append(Entry::user_message(leaf, msg)) {
                    tracing::warn!(error = %e, "failed to append steer message");
                }
            }
        }
        // The old token stays cancelled; swap under the turn lock so a
        // racing abort lands on exactly one of the two controls.
        let mut turn = self.turn.lock();
        if turn.as_ref().map(|c| c.is_aborted()).unwrap_or(false) {
            return false;
        }
        *control = TurnControl::new();
        *turn = Some(control.clone());
        true
    }

    /// Classify a stream failure and decide how the turn proceeds.
    async fn handle_stream_failure(
        &self,
        error: Error,
        partial_text: String,
        control: &TurnControl,
        attempts: &mut u32,
        compacted_for_overflow: &mut bool,
    ) -> FailureVerdict {
        let persist_partial = |text: &str| {
            if text.is_empty() {
                return;
            }
            let mut log = self.log.lock();
            let leaf = log.leaf();
            if let Err(e) =
                log.append(Entry::assistant_message(leaf, text, None, vec![], None))
            {
                tracing::warn!(error = %e, "failed to persist partial assistant message");
            }
        };

        if error.is_context_overflow() && !*compacted_for_overflow {
            *compacted_for_overflow = true;
            self.set_state(SchedulerState::OverflowCompact);
            tracing::info!("context overflow, compacting and retrying once");
            match self.run_engine_compaction(None).await {
                Ok(Some(_)) => return FailureVerdict::Retry,
                Ok(None) => {
                    return FailureVerdict::Fatal(format!(
                        "context overflow and nothing to compact: {error}"
                    ))
                }
                Err(e) => {
                    return FailureVerdict::Fatal(format!(
                        "context overflow and compaction failed: {e}"
                    ))
                }
            }
        }

        let auto_retry = self.settings.read().auto_retry;
        if error.is_transient() && auto_retry && *attempts < self.config.retry.max_retries {
            let delay_ms = retry::backoff_delay_ms(&self.config.retry, *attempts);
            *attempts += 1;
            self.events.emit_agent(AgentEvent::Retry {
                attempt: *attempts,
                delay_ms,
                error: error.to_string(),
            });
            tracing::warn!(attempt = *attempts, delay_ms, error = %error, "transient provider error, backing off");
            if retry::backoff_sleep(delay_ms, control).await {
                return FailureVerdict::Retry;
            }
            // Interrupted mid-backoff: the partial message is recorded.
            persist_partial(&partial_text);
            if control.steer_requested() && !control.is_aborted() {
                return FailureVerdict::Steered;
            }
            return FailureVerdict::Aborted;
        }

        persist_partial(&partial_text);
        FailureVerdict::Fatal(error.to_string())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tool dispatch
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the turn's tool calls sequentially, in the order the provider
    /// announced them. Returns whether any result was recorded.
    async fn execute_tool_calls(&self, streamed: &StreamedAssistant, control: &TurnControl) -> bool {
        let mut executed_any = false;

        for tc in &streamed.tool_calls {
            // Interruption between tools: drop the remaining calls.
            if control.interrupted() {
                break;
            }

            self.events.emit_agent(AgentEvent::ToolExecutionStart {
                call_id: tc.id.clone(),
                tool_name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            });

            // tool_call hook: a block synthesizes an error result.
            let block_reason = self
                .bus
                .dispatch_tool_call(
                    &ToolCallEvent {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                    &self.ext_cx,
                )
                .await;

            let outcome = match block_reason {
                Some(reason) => ToolOutcome::error(reason),
                None => self.run_one_tool(tc, control).await,
            };

            // tool_result hook: chained replacement.
            let event = self
                .bus
                .dispatch_tool_result(
                    ToolResultEvent {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                        content: outcome.content,
                        details: outcome.details,
                        is_error: outcome.is_error,
                    },
                    &self.ext_cx,
                )
                .await;

            {
                let mut log = self.log.lock();
                let leaf = log.leaf();
                if let Err(e) = log.append(Entry::tool_result(
                    leaf,
                    &event.tool_name,
                    &event.call_id,
                    vec![ContentPart::Text {
                        text: event.content.clone(),
                    }],
                    event.details.clone(),
                    event.is_error,
                )) {
                    tracing::warn!(error = %e, "failed to append tool result");
                }
            }
            executed_any = true;

            self.events.emit_agent(AgentEvent::ToolExecutionEnd {
                call_id: event.call_id,
                tool_name: event.tool_name,
                content: event.content,
                is_error: event.is_error,
            });
        }

        executed_any
    }

    async fn run_one_tool(&self, tc: &ToolCall, control: &TurnControl) -> ToolOutcome {
        let Some(tool) = self.lookup_tool(&tc.name) else {
            return ToolOutcome::error(format!("unknown tool '{}'", tc.name));
        };

        // Forward incremental updates to the event plane while the tool
        // runs.
        let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel::<ToolUpdate>();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                events.emit_agent(AgentEvent::ToolUpdate {
                    call_id: update.call_id,
                    content: update.content,
                    details: update.details,
                });
            }
        });

        let cx = ToolContext {
            updates: Some(update_tx),
            cancel: control.interrupt_token(),
        };
        // A tool that ignores its cancel token is still awaited.
        let result = tool.execute(&tc.id, tc.arguments.clone(), &cx).await;
        drop(cx);
        let _ = forwarder.await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::error(format!("tool failed: {e}")),
        }
    }

    fn lookup_tool(&self, name: &str) -> Option<Arc<dyn coda_tools::Tool>> {
        let settings = self.settings.read();
        if let Some(active) = &settings.active_tools {
            if !active.contains(name) {
                return None;
            }
        }
        self.tools.get(name)
    }

    /// Snapshot of the active tool definitions.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let settings = self.settings.read();
        let defs = self.tools.definitions();
        match &settings.active_tools {
            Some(active) => defs
                .into_iter()
                .filter(|d| active.contains(&d.name))
                .collect(),
            None => defs,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Compaction entry points
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_engine_compaction(
        &self,
        instructions: Option<&str>,
    ) -> Result<Option<compact::CompactionOutcome>> {
        let (provider, model) = self.resolve_provider()?;
        let outcome = compact::run_compaction(
            &self.log,
            CompactionDeps {
                provider,
                model,
                config: &self.config.compaction,
                bus: &self.bus,
                ext_cx: &self.ext_cx,
                events: &self.events,
            },
            instructions,
        )
        .await?;
        if outcome.is_some() {
            self.usage.write().compaction_count += 1;
        }
        Ok(outcome)
    }

    /// End-of-turn threshold maintenance.
    async fn maintenance_compaction(&self) {
        let auto = self.settings.read().auto_compact && self.config.compaction.auto;
        if !auto {
            return;
        }
        let context_window = match self.resolve_provider() {
            Ok((provider, _)) => provider.context_window(),
            Err(_) => return,
        };

        let used = self.usage.read().last_context_tokens;
        if used <= context_window.saturating_sub(self.config.compaction.reserve_tokens) {
            return;
        }

        tracing::info!(used, context_window, "token threshold crossed, compacting");
        if let Err(e) = self.run_engine_compaction(None).await {
            tracing::warn!(error = %e, "maintenance compaction failed");
        }
    }

    /// Explicit `compact` command. Fails when a turn is running.
    pub async fn compact_now(
        self: &Arc<Self>,
        instructions: Option<String>,
    ) -> Result<Option<compact::CompactionOutcome>> {
        let _guard = self
            .running
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Session("a turn is in progress".into()))?;
        self.run_engine_compaction(instructions.as_deref()).await
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Settings
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn resolve_provider(&self) -> Result<(Arc<dyn LlmProvider>, Option<String>)> {
        if let Some(spec) = &self.settings.read().model {
            if let Some(provider) = self.providers.get(&spec.provider) {
                return Ok((provider, Some(spec.model.clone())));
            }
            return Err(Error::Other(format!(
                "model provider '{}' is not configured",
                spec.provider
            )));
        }
        self.providers
            .default_provider()
            .map(|p| (p, None))
            .ok_or_else(|| {
                Error::Other(
                    "no_provider_configured: no LLM providers are available. Configure at \
                     least one provider in coda.toml under [[llm.providers]]."
                        .into(),
                )
            })
    }

    pub fn set_model(&self, spec: &str) -> Result<ModelSpec> {
        let (provider, model) = self
            .providers
            .resolve(spec)
            .ok_or_else(|| Error::Other(format!("unknown model '{spec}'")))?;
        let spec = ModelSpec {
            provider: provider.provider_id().to_owned(),
            model,
        };
        self.settings.write().model = Some(spec.clone());
        Ok(spec)
    }

    pub fn cycle_model(&self) -> Result<ModelSpec> {
        let current = self.settings.read().model.clone();
        let next = self
            .providers
            .cycle_model(current.as_ref())
            .ok_or_else(|| Error::Other("no models configured".into()))?;
        self.settings.write().model = Some(next.clone());
        Ok(next)
    }

    pub fn current_model(&self) -> Option<ModelSpec> {
        self.settings.read().model.clone()
    }

    pub fn set_thinking_level(&self, level: ThinkingLevel) {
        self.settings.write().thinking = level;
    }

    pub fn cycle_thinking_level(&self) -> ThinkingLevel {
        let mut settings = self.settings.write();
        settings.thinking = settings.thinking.next();
        settings.thinking
    }

    pub fn set_queue_mode(&self, mode: StreamingBehavior) {
        self.settings.write().queue_mode = mode;
    }

    pub fn set_auto_compaction(&self, enabled: bool) {
        self.settings.write().auto_compact = enabled;
    }

    pub fn set_auto_retry(&self, enabled: bool) {
        self.settings.write().auto_retry = enabled;
    }

    fn record_usage(&self, streamed: &StreamedAssistant, estimated_context: u64) {
        let mut usage = self.usage.write();
        match &streamed.usage {
            Some(u) => {
                usage.total.add(u);
                usage.last_context_tokens = u.prompt_tokens + u.completion_tokens;
            }
            None => {
                usage.last_context_tokens = estimated_context
                    + coda_domain::message::estimate_tokens(&streamed.text);
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Snapshots
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn state_snapshot(&self) -> StateSnapshot {
        let settings = self.settings.read();
        let queues = self.queues.lock();
        let log = self.log.lock();
        let state = *self.state.read();
        StateSnapshot {
            session_id: log.session_id().to_owned(),
            session_name: log.session_name(),
            leaf_id: log.leaf(),
            state,
            is_streaming: state.is_streaming(),
            model: settings.model.as_ref().map(|m| m.to_string()),
            thinking_level: settings.thinking,
            queue_mode: settings.queue_mode,
            auto_compaction: settings.auto_compact,
            auto_retry: settings.auto_retry,
            queued_steer: queues.steer.len(),
            queued_follow_up: queues.follow_up.len(),
            queued_next_turn: queues.next_turn.len(),
        }
    }

    pub fn session_stats(&self) -> SessionStats {
        let usage = self.usage.read();
        let log = self.log.lock();
        let branch_length = log.active_branch().map(|b| b.len()).unwrap_or(0);
        SessionStats {
            session_id: log.session_id().to_owned(),
            entries: log.len(),
            branch_length,
            prompt_tokens: usage.total.prompt_tokens,
            completion_tokens: usage.total.completion_tokens,
            total_tokens: usage.total.total_tokens,
            last_context_tokens: usage.last_context_tokens,
            compaction_count: usage.compaction_count,
        }
    }
}

/// How the turn loop ended.
enum TurnTermination {
    Final { entry_id: Option<Uuid> },
    Aborted,
    Error(String),
}

enum FailureVerdict {
    Retry,
    Aborted,
    /// A steer arrived during a retry backoff.
    Steered,
    Fatal(String),
}
