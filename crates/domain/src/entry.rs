//! Session entry model — the unit of persistence.
//!
//! Every session is an append-only sequence of entries forming a tree:
//! each entry points at its parent, multiple entries may share a parent
//! (forks), and the active branch is the unique root-to-leaf path. Entries
//! are immutable once written; edits happen by appending on a new branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ContentPart, ToolCall};
use crate::stream::Usage;

/// One persisted session entry: tree position plus a kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

/// Kind-specific entry payload, tagged on `type` in the session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EntryPayload {
    #[serde(rename = "message")]
    Message { message: SessionMessage },

    /// Lossy summary of the branch prefix ending just before
    /// `first_kept_entry_id`.
    #[serde(rename = "compaction", rename_all = "camelCase")]
    Compaction {
        summary: String,
        first_kept_entry_id: Uuid,
        tokens_before: u64,
        tokens_after: u64,
    },

    /// Written when the user navigates away from a branch and asks for a
    /// summary of what was abandoned. Never sent to the LLM.
    #[serde(rename = "branchSummary", rename_all = "camelCase")]
    BranchSummary {
        summary: String,
        from_leaf_id: Uuid,
        to_leaf_id: Uuid,
    },

    /// Late-binding label for an entry; the last matching entry on the
    /// active branch wins. `label: None` clears.
    #[serde(rename = "label-change", rename_all = "camelCase")]
    LabelChange {
        target_entry_id: Uuid,
        label: Option<String>,
    },

    /// Late-binding human-chosen name for the whole session.
    #[serde(rename = "session-info")]
    SessionInfo { name: String },

    /// Extension-owned payload, opaque to the core.
    #[serde(rename = "custom", rename_all = "camelCase")]
    Custom {
        custom_type: String,
        data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

/// A conversation message as persisted in the session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum SessionMessage {
    User { content: String },

    System { content: String },

    #[serde(rename_all = "camelCase")]
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_name: String,
        tool_call_id: String,
        /// Parts shown to the LLM.
        content: Vec<ContentPart>,
        /// Opaque state for hosts (rendering, diffs, process ids).
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        details: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Entry {
    /// Build a new entry with a fresh id and the current timestamp.
    pub fn new(parent_id: Option<Uuid>, payload: EntryPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn user_message(parent_id: Option<Uuid>, content: impl Into<String>) -> Self {
        Self::new(
            parent_id,
            EntryPayload::Message {
                message: SessionMessage::User {
                    content: content.into(),
                },
            },
        )
    }

    pub fn assistant_message(
        parent_id: Option<Uuid>,
        content: impl Into<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCall>,
        usage: Option<Usage>,
    ) -> Self {
        Self::new(
            parent_id,
            EntryPayload::Message {
                message: SessionMessage::Assistant {
                    content: content.into(),
                    reasoning,
                    tool_calls,
                    usage,
                },
            },
        )
    }

    pub fn tool_result(
        parent_id: Option<Uuid>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: Vec<ContentPart>,
        details: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self::new(
            parent_id,
            EntryPayload::Message {
                message: SessionMessage::ToolResult {
                    tool_name: tool_name.into(),
                    tool_call_id: tool_call_id.into(),
                    content,
                    details,
                    is_error,
                },
            },
        )
    }

    /// True for `message` entries.
    pub fn is_message(&self) -> bool {
        matches!(self.payload, EntryPayload::Message { .. })
    }

    /// The assistant message payload, if this entry carries one.
    pub fn as_assistant(&self) -> Option<(&str, &[ToolCall])> {
        match &self.payload {
            EntryPayload::Message {
                message:
                    SessionMessage::Assistant {
                        content,
                        tool_calls,
                        ..
                    },
            } => Some((content.as_str(), tool_calls.as_slice())),
            _ => None,
        }
    }
}
