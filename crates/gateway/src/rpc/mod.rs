//! RPC command plane — a transport-agnostic, typed command dispatcher.
//!
//! Commands form a closed set, tagged on `type`. Every command returns one
//! `{id, type:"response", command, success, data?|error?}` object; unknown
//! or malformed commands return `success:false`. Asynchronous effects
//! (notably `prompt`) acknowledge synchronously and deliver outcomes via
//! the event plane.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use coda_domain::config::ThinkingLevel;
use coda_domain::entry::{Entry, EntryPayload};
use coda_domain::error::{Error, Result};
use coda_extensions::{ForkEvent, GateDecision, SwitchEvent};
use coda_sessions::{materialize_branch, SessionLog};

use crate::export;
use crate::runtime::StreamingBehavior;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // ── Prompting ───────────────────────────────────────────────────
    Prompt {
        message: String,
        #[serde(default)]
        streaming_behavior: Option<StreamingBehavior>,
    },
    Steer {
        message: String,
    },
    FollowUp {
        message: String,
    },
    Abort {},
    NewSession {
        #[serde(default)]
        name: Option<String>,
    },

    // ── State ───────────────────────────────────────────────────────
    GetState {},
    GetMessages {},
    GetSessionStats {},

    // ── Model ───────────────────────────────────────────────────────
    SetModel {
        model: String,
    },
    CycleModel {},
    GetAvailableModels {},

    // ── Thinking ────────────────────────────────────────────────────
    SetThinkingLevel {
        level: ThinkingLevel,
    },
    CycleThinkingLevel {},

    // ── Queuing ─────────────────────────────────────────────────────
    SetSteeringMode {
        enabled: bool,
    },
    SetFollowUpMode {
        enabled: bool,
    },

    // ── Compaction ──────────────────────────────────────────────────
    Compact {
        #[serde(default)]
        instructions: Option<String>,
    },
    SetAutoCompaction {
        enabled: bool,
    },

    // ── Retry ───────────────────────────────────────────────────────
    SetAutoRetry {
        enabled: bool,
    },
    AbortRetry {},

    // ── Bash ────────────────────────────────────────────────────────
    Bash {
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    AbortBash {},

    // ── Session ─────────────────────────────────────────────────────
    SwitchSession {
        session_id: String,
    },
    Fork {
        entry_id: Uuid,
    },
    GetForkMessages {
        entry_id: Uuid,
    },
    GetLastAssistantText {},
    ExportHtml {
        #[serde(default)]
        path: Option<String>,
    },
}

impl Command {
    /// The wire name echoed in responses.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Prompt { .. } => "prompt",
            Command::Steer { .. } => "steer",
            Command::FollowUp { .. } => "follow_up",
            Command::Abort {} => "abort",
            Command::NewSession { .. } => "new_session",
            Command::GetState {} => "get_state",
            Command::GetMessages {} => "get_messages",
            Command::GetSessionStats {} => "get_session_stats",
            Command::SetModel { .. } => "set_model",
            Command::CycleModel {} => "cycle_model",
            Command::GetAvailableModels {} => "get_available_models",
            Command::SetThinkingLevel { .. } => "set_thinking_level",
            Command::CycleThinkingLevel {} => "cycle_thinking_level",
            Command::SetSteeringMode { .. } => "set_steering_mode",
            Command::SetFollowUpMode { .. } => "set_follow_up_mode",
            Command::Compact { .. } => "compact",
            Command::SetAutoCompaction { .. } => "set_auto_compaction",
            Command::SetAutoRetry { .. } => "set_auto_retry",
            Command::AbortRetry {} => "abort_retry",
            Command::Bash { .. } => "bash",
            Command::AbortBash {} => "abort_bash",
            Command::SwitchSession { .. } => "switch_session",
            Command::Fork { .. } => "fork",
            Command::GetForkMessages { .. } => "get_fork_messages",
            Command::GetLastAssistantText {} => "get_last_assistant_text",
            Command::ExportHtml { .. } => "export_html",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    fn ok(id: Option<String>, command: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            kind: "response",
            command: command.into(),
            success: true,
            data: if data.is_null() { None } else { Some(data) },
            error: None,
        }
    }

    fn fail(id: Option<String>, command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            kind: "response",
            command: command.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatch one raw command object (any transport).
pub async fn dispatch_raw(state: &AppState, raw: Value) -> CommandResponse {
    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let command_name = raw
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_owned();

    let command: Command = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            return CommandResponse::fail(
                id,
                command_name,
                format!("unknown or malformed command: {e}"),
            );
        }
    };

    let timeout = std::time::Duration::from_secs(state.config.server.rpc_timeout_secs);
    let name = command.name();
    match tokio::time::timeout(timeout, handle(state, command)).await {
        Ok(Ok(data)) => CommandResponse::ok(id, name, data),
        Ok(Err(e)) => CommandResponse::fail(id, name, e.to_string()),
        Err(_) => CommandResponse::fail(id, name, "command timed out"),
    }
}

async fn handle(state: &AppState, command: Command) -> Result<Value> {
    match command {
        // ── Prompting ───────────────────────────────────────────────
        Command::Prompt {
            message,
            streaming_behavior,
        } => {
            let disposition = state
                .scheduler()
                .prompt(message, streaming_behavior)
                .await?;
            Ok(json!({ "disposition": disposition }))
        }
        Command::Steer { message } => {
            let disposition = state
                .scheduler()
                .prompt(message, Some(StreamingBehavior::Steer))
                .await?;
            Ok(json!({ "disposition": disposition }))
        }
        Command::FollowUp { message } => {
            let disposition = state
                .scheduler()
                .prompt(message, Some(StreamingBehavior::FollowUp))
                .await?;
            Ok(json!({ "disposition": disposition }))
        }
        Command::Abort {} => Ok(json!({ "aborted": state.scheduler().abort() })),
        Command::NewSession { name } => {
            let scheduler = state.scheduler();
            if scheduler.is_streaming() {
                return Err(Error::Session("a turn is in progress".into()));
            }
            let mut log = SessionLog::create(&state.state_dir())?;
            if let Some(name) = name {
                log.append(Entry::new(None, EntryPayload::SessionInfo { name }))?;
            }
            let session_id = log.session_id().to_owned();
            state.replace_scheduler(state.scheduler_for(log));
            Ok(json!({ "sessionId": session_id }))
        }

        // ── State ───────────────────────────────────────────────────
        Command::GetState {} => Ok(serde_json::to_value(state.scheduler().state_snapshot())?),
        Command::GetMessages {} => {
            let scheduler = state.scheduler();
            let log = scheduler.log().lock();
            let branch = log.active_branch()?;
            let entries: Vec<&Entry> = branch;
            Ok(serde_json::to_value(entries)?)
        }
        Command::GetSessionStats {} => {
            Ok(serde_json::to_value(state.scheduler().session_stats())?)
        }

        // ── Model ───────────────────────────────────────────────────
        Command::SetModel { model } => {
            let spec = state.scheduler().set_model(&model)?;
            Ok(json!({ "model": spec.to_string() }))
        }
        Command::CycleModel {} => {
            let spec = state.scheduler().cycle_model()?;
            Ok(json!({ "model": spec.to_string() }))
        }
        Command::GetAvailableModels {} => {
            let models: Vec<String> = state
                .providers
                .available_models()
                .iter()
                .map(|m| m.to_string())
                .collect();
            Ok(json!({ "models": models }))
        }

        // ── Thinking ────────────────────────────────────────────────
        Command::SetThinkingLevel { level } => {
            state.scheduler().set_thinking_level(level);
            Ok(json!({ "thinkingLevel": level }))
        }
        Command::CycleThinkingLevel {} => {
            let level = state.scheduler().cycle_thinking_level();
            Ok(json!({ "thinkingLevel": level }))
        }

        // ── Queuing ─────────────────────────────────────────────────
        Command::SetSteeringMode { enabled } => {
            let mode = if enabled {
                StreamingBehavior::Steer
            } else {
                StreamingBehavior::FollowUp
            };
            state.scheduler().set_queue_mode(mode);
            Ok(json!({ "queueMode": mode }))
        }
        Command::SetFollowUpMode { enabled } => {
            let mode = if enabled {
                StreamingBehavior::FollowUp
            } else {
                StreamingBehavior::Steer
            };
            state.scheduler().set_queue_mode(mode);
            Ok(json!({ "queueMode": mode }))
        }

        // ── Compaction ──────────────────────────────────────────────
        Command::Compact { instructions } => {
            match state.scheduler().compact_now(instructions).await? {
                Some(outcome) => Ok(json!({
                    "compacted": true,
                    "entryId": outcome.entry_id,
                    "firstKeptEntryId": outcome.first_kept_entry_id,
                    "tokensBefore": outcome.tokens_before,
                    "tokensAfter": outcome.tokens_after,
                })),
                None => Ok(json!({ "compacted": false })),
            }
        }
        Command::SetAutoCompaction { enabled } => {
            state.scheduler().set_auto_compaction(enabled);
            Ok(json!({ "autoCompaction": enabled }))
        }

        // ── Retry ───────────────────────────────────────────────────
        Command::SetAutoRetry { enabled } => {
            state.scheduler().set_auto_retry(enabled);
            Ok(json!({ "autoRetry": enabled }))
        }
        Command::AbortRetry {} => Ok(json!({ "aborted": state.scheduler().abort_retry() })),

        // ── Bash ────────────────────────────────────────────────────
        Command::Bash {
            command,
            timeout_secs,
        } => run_bash(state, &command, timeout_secs).await,
        Command::AbortBash {} => {
            let id = state.current_bash.lock().take();
            let aborted = match id {
                Some(id) => state.processes.kill(&id),
                None => false,
            };
            Ok(json!({ "aborted": aborted }))
        }

        // ── Session ─────────────────────────────────────────────────
        Command::SwitchSession { session_id } => switch_session(state, &session_id).await,
        Command::Fork { entry_id } => fork_session(state, entry_id).await,
        Command::GetForkMessages { entry_id } => {
            let scheduler = state.scheduler();
            let log = scheduler.log().lock();
            let branch = log.branch(entry_id)?;
            let messages = materialize_branch(&branch);
            Ok(serde_json::to_value(messages)?)
        }
        Command::GetLastAssistantText {} => {
            let scheduler = state.scheduler();
            let text = scheduler.log().lock().last_assistant_text();
            Ok(json!({ "text": text }))
        }
        Command::ExportHtml { path } => {
            let scheduler = state.scheduler();
            let out_path = {
                let log = scheduler.log().lock();
                let target = match path {
                    Some(p) => std::path::PathBuf::from(p),
                    None => state
                        .state_dir()
                        .join(format!("{}.html", log.session_id())),
                };
                export::export_html(&log, &target)?
            };
            Ok(json!({ "path": out_path }))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Longer handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_bash(state: &AppState, command: &str, timeout_secs: Option<u64>) -> Result<Value> {
    let timeout = timeout_secs.unwrap_or(state.config.tools.bash_timeout_secs);
    let spawned = state
        .processes
        .spawn(command, None, timeout)
        .map_err(Error::Io)?;
    *state.current_bash.lock() = Some(spawned.id.clone());

    loop {
        if spawned.session.read().status.is_terminal() {
            break;
        }
        tokio::select! {
            _ = spawned.done.notified() => {}
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    let (status, exit_code, output) = {
        let s = spawned.session.read();
        (s.status, s.exit_code, s.output.snapshot())
    };
    {
        let mut current = state.current_bash.lock();
        if current.as_deref() == Some(spawned.id.as_str()) {
            *current = None;
        }
    }
    state.processes.remove(&spawned.id);

    Ok(json!({
        "status": status,
        "exitCode": exit_code,
        "output": output,
    }))
}

async fn switch_session(state: &AppState, session_id: &str) -> Result<Value> {
    let scheduler = state.scheduler();
    if scheduler.is_streaming() {
        return Err(Error::Session("a turn is in progress".into()));
    }

    let from = scheduler.log().lock().session_id().to_owned();
    let gate = state
        .bus
        .dispatch_before_switch(
            &SwitchEvent {
                from_session: from,
                to_session: session_id.to_owned(),
            },
            scheduler.extension_context(),
        )
        .await;
    if gate == GateDecision::Cancel {
        return Err(Error::Session("switch cancelled by extension".into()));
    }

    let path = if session_id.ends_with(".jsonl") {
        std::path::PathBuf::from(session_id)
    } else {
        state.state_dir().join(format!("{session_id}.jsonl"))
    };
    let log = SessionLog::open(&path)?;
    let session_id = log.session_id().to_owned();
    state.replace_scheduler(state.scheduler_for(log));
    Ok(json!({ "sessionId": session_id }))
}

async fn fork_session(state: &AppState, entry_id: Uuid) -> Result<Value> {
    let scheduler = state.scheduler();

    let session = scheduler.log().lock().session_id().to_owned();
    let gate = state
        .bus
        .dispatch_before_fork(
            &ForkEvent {
                session,
                at_entry_id: entry_id,
            },
            scheduler.extension_context(),
        )
        .await;
    if gate == GateDecision::Cancel {
        return Err(Error::Session("fork cancelled by extension".into()));
    }

    let forked = {
        let log = scheduler.log().lock();
        log.fork(entry_id, &state.state_dir())?
    };
    Ok(json!({
        "sessionId": forked.session_id(),
        "path": forked.path().display().to_string(),
        "leafId": forked.leaf(),
    }))
}
