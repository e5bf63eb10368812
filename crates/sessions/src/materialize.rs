//! Branch materialization — turning an entry branch into the message list
//! sent to the LLM.
//!
//! Two rules make the result well-formed regardless of session history:
//! - the prefix before the latest compaction entry collapses into a
//!   synthetic user/assistant exchange carrying the summary;
//! - assistant tool calls that never received a result (a steer or abort
//!   dropped them) get synthetic error tool-results, so the provider never
//!   sees an unanswered call.

use std::collections::HashSet;

use coda_domain::entry::{Entry, EntryPayload, SessionMessage};
use coda_domain::message::{
    estimate_message_tokens, ContentPart, Message, MessageContent, Role,
};

/// Convert a root-to-leaf branch into LLM messages.
pub fn materialize_branch(branch: &[&Entry]) -> Vec<Message> {
    // Find the latest compaction entry and where its kept suffix begins.
    let mut start = 0;
    let mut summary: Option<&str> = None;
    for (i, entry) in branch.iter().enumerate().rev() {
        if let EntryPayload::Compaction {
            summary: s,
            first_kept_entry_id,
            ..
        } = &entry.payload
        {
            summary = Some(s);
            start = branch
                .iter()
                .position(|e| e.id == *first_kept_entry_id)
                .unwrap_or(i + 1);
            break;
        }
    }

    let mut messages = Vec::new();
    if let Some(summary) = summary {
        messages.push(Message::user(format!(
            "The earlier part of this conversation was summarized to stay \
             within the context window:\n\n{summary}"
        )));
        messages.push(Message::assistant(
            "Understood. Continuing from that summary.",
        ));
    }

    // Which tool calls already have results anywhere on the branch.
    let answered: HashSet<&str> = branch
        .iter()
        .filter_map(|e| match &e.payload {
            EntryPayload::Message {
                message: SessionMessage::ToolResult { tool_call_id, .. },
            } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    for entry in &branch[start..] {
        match &entry.payload {
            EntryPayload::Message { message } => match message {
                SessionMessage::User { content } => messages.push(Message::user(content)),
                SessionMessage::System { content } => messages.push(Message::system(content)),
                SessionMessage::Assistant {
                    content,
                    tool_calls,
                    ..
                } => {
                    if tool_calls.is_empty() {
                        messages.push(Message::assistant(content));
                    } else {
                        let mut parts = Vec::new();
                        if !content.is_empty() {
                            parts.push(ContentPart::Text {
                                text: content.clone(),
                            });
                        }
                        for tc in tool_calls {
                            parts.push(ContentPart::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input: tc.arguments.clone(),
                            });
                        }
                        messages.push(Message {
                            role: Role::Assistant,
                            content: MessageContent::Parts(parts),
                        });
                        // Answer dropped calls immediately so the wire
                        // history stays consistent.
                        for tc in tool_calls {
                            if !answered.contains(tc.id.as_str()) {
                                messages.push(Message::tool_error(
                                    &tc.id,
                                    "tool execution was skipped",
                                ));
                            }
                        }
                    }
                }
                SessionMessage::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                    ..
                } => {
                    let text = flatten_parts(content);
                    let msg = if *is_error {
                        Message::tool_error(tool_call_id, text)
                    } else {
                        Message::tool_result(tool_call_id, text)
                    };
                    messages.push(msg);
                }
            },
            // Extension entries may carry text intended for the model.
            EntryPayload::Custom {
                content: Some(content),
                ..
            } => messages.push(Message::system(content)),
            // Everything else is host-side bookkeeping.
            EntryPayload::Compaction { .. }
            | EntryPayload::BranchSummary { .. }
            | EntryPayload::LabelChange { .. }
            | EntryPayload::SessionInfo { .. }
            | EntryPayload::Custom { .. } => {}
        }
    }

    messages
}

/// Estimated token footprint of a materialized branch.
pub fn materialized_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimated token footprint of a single entry, as the model would see it.
pub fn estimate_entry_tokens(entry: &Entry) -> u64 {
    use coda_domain::message::estimate_tokens;
    match &entry.payload {
        EntryPayload::Message { message } => match message {
            SessionMessage::User { content } | SessionMessage::System { content } => {
                estimate_tokens(content)
            }
            SessionMessage::Assistant {
                content,
                reasoning,
                tool_calls,
                ..
            } => {
                estimate_tokens(content)
                    + reasoning.as_deref().map(estimate_tokens).unwrap_or(0)
                    + tool_calls
                        .iter()
                        .map(|tc| estimate_tokens(&tc.arguments.to_string()))
                        .sum::<u64>()
            }
            SessionMessage::ToolResult { content, .. } => content
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => estimate_tokens(text),
                    ContentPart::Image { .. } => 768,
                    _ => 0,
                })
                .sum(),
        },
        EntryPayload::Compaction { summary, .. } => estimate_tokens(summary),
        EntryPayload::Custom {
            content: Some(content),
            ..
        } => estimate_tokens(content),
        _ => 0,
    }
}

fn flatten_parts(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
