//! Compaction engine — collapses the old branch prefix into a summary so
//! the context budget recovers after many turns.
//!
//! Compaction appends a `compaction` entry (never rewrites). The branch
//! materializer treats everything before `first_kept_entry_id` as replaced
//! by the summary.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use coda_domain::config::CompactionConfig;
use coda_domain::entry::{Entry, EntryPayload};
use coda_domain::error::{Error, Result};
use coda_domain::event::AgentEvent;
use coda_domain::message::Message;
use coda_extensions::{CompactDecision, CompactionOverride, ExtensionBus, ExtensionContext};
use coda_providers::{ChatRequest, LlmProvider};
use coda_sessions::{estimate_entry_tokens, materialize_branch, SessionLog};

use crate::api::events::EventBroadcaster;

/// Result of a completed compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub entry_id: Uuid,
    pub first_kept_entry_id: Uuid,
    pub tokens_before: u64,
    pub tokens_after: u64,
}

/// Everything the engine needs besides the log itself.
pub struct CompactionDeps<'a> {
    pub provider: Arc<dyn LlmProvider>,
    pub model: Option<String>,
    pub config: &'a CompactionConfig,
    pub bus: &'a ExtensionBus,
    pub ext_cx: &'a ExtensionContext,
    pub events: &'a EventBroadcaster,
}

/// Run the full compaction flow.
///
/// Returns `Ok(None)` when there is nothing to compact or an extension
/// cancelled the operation; `Ok(Some(..))` once the compaction entry is
/// appended.
pub async fn run_compaction(
    log: &Mutex<SessionLog>,
    deps: CompactionDeps<'_>,
    instructions: Option<&str>,
) -> Result<Option<CompactionOutcome>> {
    // Extensions may cancel or supply the summary outright.
    match deps.bus.dispatch_before_compact(deps.ext_cx).await {
        Some(CompactDecision::Cancel) => {
            tracing::info!("compaction cancelled by extension");
            return Ok(None);
        }
        Some(CompactDecision::Supply(supplied)) => {
            return apply_supplied(log, &deps, supplied).map(Some);
        }
        None => {}
    }

    // Snapshot the branch so no lock is held across the LLM call.
    let (branch, leaf, tokens_before, first_kept, kept_tokens) = {
        let log = log.lock();
        let branch = log.active_branch()?;
        let Some(leaf) = log.leaf() else {
            return Ok(None);
        };
        let tokens_before: u64 = branch.iter().map(|e| estimate_entry_tokens(e)).sum();
        let Some((first_kept, kept_tokens)) =
            choose_boundary(&branch, deps.config.keep_recent_tokens)
        else {
            return Ok(None);
        };
        let owned: Vec<Entry> = branch.into_iter().cloned().collect();
        (owned, leaf, tokens_before, first_kept, kept_tokens)
    };

    deps.events.emit_agent(AgentEvent::CompactionStart);

    // Materialize the prefix and summarize it.
    let cut = branch
        .iter()
        .position(|e| e.id == first_kept)
        .ok_or_else(|| Error::Session("compaction boundary vanished".into()))?;
    let prefix: Vec<&Entry> = branch[..cut].iter().collect();
    let messages = materialize_branch(&prefix);
    let summary = generate_summary(&deps, &messages, instructions).await?;
    if summary.trim().is_empty() {
        return Err(Error::Session("summarizer returned an empty summary".into()));
    }

    let tokens_after = coda_domain::message::estimate_tokens(&summary) + kept_tokens;
    let entry_id = {
        let mut log = log.lock();
        log.append(Entry::new(
            Some(leaf),
            EntryPayload::Compaction {
                summary,
                first_kept_entry_id: first_kept,
                tokens_before,
                tokens_after,
            },
        ))?
    };

    let outcome = CompactionOutcome {
        entry_id,
        first_kept_entry_id: first_kept,
        tokens_before,
        tokens_after,
    };
    deps.events.emit_agent(AgentEvent::CompactionEnd {
        entry_id,
        tokens_before,
        tokens_after,
    });
    tracing::info!(
        entry_id = %entry_id,
        tokens_before,
        tokens_after,
        "branch compacted"
    );
    Ok(Some(outcome))
}

/// Apply an extension-supplied compaction after validating it.
fn apply_supplied(
    log: &Mutex<SessionLog>,
    deps: &CompactionDeps<'_>,
    supplied: CompactionOverride,
) -> Result<CompactionOutcome> {
    if supplied.summary.trim().is_empty() {
        return Err(Error::Session(
            "extension supplied an empty compaction summary".into(),
        ));
    }

    let mut log = log.lock();
    let branch = log.active_branch()?;
    let Some(leaf) = log.leaf() else {
        return Err(Error::Session("cannot compact an empty session".into()));
    };
    if !branch.iter().any(|e| e.id == supplied.first_kept_entry_id) {
        return Err(Error::Session(format!(
            "supplied firstKeptEntryId {} is not on the active branch",
            supplied.first_kept_entry_id
        )));
    }

    let tokens_before: u64 = branch.iter().map(|e| estimate_entry_tokens(e)).sum();
    let kept_tokens: u64 = branch
        .iter()
        .skip_while(|e| e.id != supplied.first_kept_entry_id)
        .map(|e| estimate_entry_tokens(e))
        .sum();
    let tokens_after = coda_domain::message::estimate_tokens(&supplied.summary) + kept_tokens;

    let entry_id = log.append(Entry::new(
        Some(leaf),
        EntryPayload::Compaction {
            summary: supplied.summary,
            first_kept_entry_id: supplied.first_kept_entry_id,
            tokens_before,
            tokens_after,
        },
    ))?;

    deps.events.emit_agent(AgentEvent::CompactionEnd {
        entry_id,
        tokens_before,
        tokens_after,
    });
    Ok(CompactionOutcome {
        entry_id,
        first_kept_entry_id: supplied.first_kept_entry_id,
        tokens_before,
        tokens_after,
    })
}

/// Scan from the leaf backwards, retaining entries until the budget is
/// spent. Returns `(first_kept_entry_id, kept_tokens)`, or `None` when the
/// whole branch already fits (nothing worth compacting).
fn choose_boundary(branch: &[&Entry], keep_recent_tokens: u64) -> Option<(Uuid, u64)> {
    if branch.len() < 2 {
        return None;
    }

    let mut kept: u64 = 0;
    let mut first_kept_idx = branch.len();
    for i in (0..branch.len()).rev() {
        let tokens = estimate_entry_tokens(branch[i]);
        if first_kept_idx < branch.len() && kept + tokens > keep_recent_tokens {
            break;
        }
        kept += tokens;
        first_kept_idx = i;
        if kept > keep_recent_tokens {
            break;
        }
    }

    if first_kept_idx == 0 {
        // Everything fits in the keep budget.
        return None;
    }
    if first_kept_idx >= branch.len() {
        first_kept_idx = branch.len() - 1;
    }
    Some((branch[first_kept_idx].id, kept))
}

/// Summarize the prefix with a dedicated (non-streaming) LLM call.
async fn generate_summary(
    deps: &CompactionDeps<'_>,
    prefix: &[Message],
    instructions: Option<&str>,
) -> Result<String> {
    let conversation = build_conversation_text(prefix);

    let mut prompt = String::from(
        "You are a conversation summarizer. Summarize the following \
         conversation history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user, files, or environment\n\
         5. Tool state (running processes, modified files, pending work)\n\n\
         Be concise but preserve all actionable context. Write in present \
         tense. Omit greetings and pleasantries.\n",
    );
    if let Some(extra) = instructions {
        prompt.push_str("\nAdditional instructions from the user:\n");
        prompt.push_str(extra);
        prompt.push('\n');
    }
    prompt.push_str("\nCONVERSATION:\n");
    prompt.push_str(&conversation);

    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        tools: vec![],
        max_tokens: Some(deps.config.reserve_tokens),
        temperature: Some(0.1),
        thinking: None,
        model: deps.model.clone(),
    };

    let resp = deps.provider.chat(&req).await?;
    Ok(resp.content)
}

fn build_conversation_text(messages: &[Message]) -> String {
    use coda_domain::message::Role;

    let mut buf = String::new();
    for msg in messages {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        let content = msg.content.extract_all_text();
        buf.push_str(label);
        buf.push_str(": ");
        // Long tool results are clipped to keep the summary prompt sane.
        if content.len() > 2000 {
            let head_end = floor_char_boundary(&content, 1000);
            let tail_start = ceil_char_boundary(&content, content.len() - 500);
            buf.push_str(&content[..head_end]);
            buf.push_str(" [...] ");
            buf.push_str(&content[tail_start..]);
        } else {
            buf.push_str(&content);
        }
        buf.push('\n');
    }
    buf
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
