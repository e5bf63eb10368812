//! File tools — `read`, `write`, `edit`, `ls` — confined to a workspace
//! root. Paths containing `..` or resolving outside the root are rejected.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use coda_domain::error::Result;

use crate::truncate::{truncate_output, MAX_CONTENT_LINES};
use crate::{Tool, ToolContext, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within a workspace root.
///
/// 1. Rejects absolute paths and raw `..` components.
/// 2. Joins the requested path onto the canonicalized root.
/// 3. For existing targets, canonicalizes and checks containment (covers
///    symlinks pointing out of the workspace).
pub fn validate_path(workspace_root: &Path, requested: &str) -> std::result::Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"
        ));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    let canonical_root = workspace_root.canonicalize().map_err(|e| {
        format!(
            "cannot resolve workspace root '{}': {e}",
            workspace_root.display()
        )
    })?;
    let candidate = canonical_root.join(requested_path);

    if candidate.exists() {
        let resolved = candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?;
        if !resolved.starts_with(&canonical_root) {
            return Err(format!(
                "path '{requested}' resolves outside the workspace root"
            ));
        }
        Ok(resolved)
    } else {
        Ok(candidate)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadParams {
    path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool {
    root: PathBuf,
}

impl ReadTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Returns at most 2000 lines; use offset/limit for more."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"},
                "offset": {"type": "integer", "description": "First line to return (0-indexed)"},
                "limit": {"type": "integer", "description": "Maximum number of lines"}
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        _cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: ReadParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let path = match validate_path(&self.root, &params.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        let raw = match fs::read_to_string(&path).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::error(format!("cannot read '{}': {e}", params.path))),
        };

        let total_lines = raw.lines().count();
        let offset = params.offset.unwrap_or(0);
        let limit = params.limit.unwrap_or(MAX_CONTENT_LINES);
        let window: Vec<&str> = raw.lines().skip(offset).take(limit).collect();
        let content = window.join("\n");

        let truncated = truncate_output(&content, None);
        Ok(ToolOutcome::text(truncated.text).with_details(json!({
            "path": params.path,
            "totalLines": total_lines,
            "offset": offset,
            "returnedLines": window.len(),
            "truncated": truncated.truncated,
        })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

pub struct WriteTool {
    root: PathBuf,
}

impl WriteTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write a file in the workspace, creating parent directories and overwriting any existing content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        _cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: WriteParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let path = match validate_path(&self.root, &params.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        let existed = path.exists();
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return Ok(ToolOutcome::error(format!(
                    "cannot create '{}': {e}",
                    parent.display()
                )));
            }
        }
        if let Err(e) = fs::write(&path, &params.content).await {
            return Ok(ToolOutcome::error(format!(
                "cannot write '{}': {e}",
                params.path
            )));
        }

        Ok(
            ToolOutcome::text(format!("wrote {} bytes to {}", params.content.len(), params.path))
                .with_details(json!({
                    "path": params.path,
                    "bytes": params.content.len(),
                    "created": !existed,
                })),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct EditParams {
    path: String,
    old_text: String,
    new_text: String,
    #[serde(default)]
    replace_all: bool,
}

pub struct EditTool {
    root: PathBuf,
}

impl EditTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file. The snippet must match exactly once unless replace_all is set."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_text": {"type": "string"},
                "new_text": {"type": "string"},
                "replace_all": {"type": "boolean", "default": false}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        _cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: EditParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let path = match validate_path(&self.root, &params.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        let raw = match fs::read_to_string(&path).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::error(format!("cannot read '{}': {e}", params.path))),
        };

        let occurrences = raw.matches(&params.old_text).count();
        if occurrences == 0 {
            return Ok(ToolOutcome::error(format!(
                "old_text not found in '{}'",
                params.path
            )));
        }
        if occurrences > 1 && !params.replace_all {
            return Ok(ToolOutcome::error(format!(
                "old_text matches {occurrences} times in '{}'; provide more context or set replace_all",
                params.path
            )));
        }

        let (updated, replacements) = if params.replace_all {
            (raw.replace(&params.old_text, &params.new_text), occurrences)
        } else {
            (raw.replacen(&params.old_text, &params.new_text, 1), 1)
        };

        if let Err(e) = fs::write(&path, &updated).await {
            return Ok(ToolOutcome::error(format!(
                "cannot write '{}': {e}",
                params.path
            )));
        }

        Ok(
            ToolOutcome::text(format!("replaced {replacements} occurrence(s) in {}", params.path))
                .with_details(json!({
                    "path": params.path,
                    "replacements": replacements,
                })),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct LsParams {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct LsTool {
    root: PathBuf,
}

impl LsTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory in the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "default": "."}
            }
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        _cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: LsParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let path = match validate_path(&self.root, &params.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        let mut read_dir = match fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolOutcome::error(format!("cannot list '{}': {e}", params.path))),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().await.ok();
            let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            let size = meta.map(|m| m.len()).unwrap_or(0);
            entries.push((name, is_dir, size));
        }
        entries.sort_by(|a, b| (!a.1, a.0.clone()).cmp(&(!b.1, b.0.clone())));

        let listing = entries
            .iter()
            .map(|(name, is_dir, size)| {
                if *is_dir {
                    format!("{name}/")
                } else {
                    format!("{name} ({size} bytes)")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let details: Vec<Value> = entries
            .iter()
            .map(|(name, is_dir, size)| json!({"name": name, "isDir": is_dir, "size": size}))
            .collect();

        Ok(ToolOutcome::text(listing).with_details(json!({
            "path": params.path,
            "entries": details,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::detached()
    }

    #[tokio::test]
    async fn read_write_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let write = WriteTool::new(tmp.path().to_path_buf());
        let read = ReadTool::new(tmp.path().to_path_buf());

        let out = write
            .execute(
                "c1",
                json!({"path": "notes/hello.txt", "content": "line a\nline b"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.details["created"], true);

        let out = read
            .execute("c2", json!({"path": "notes/hello.txt"}), &ctx())
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content, "line a\nline b");
        assert_eq!(out.details["totalLines"], 2);
    }

    #[tokio::test]
    async fn read_window_with_offset_and_limit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "0\n1\n2\n3\n4").unwrap();
        let read = ReadTool::new(tmp.path().to_path_buf());
        let out = read
            .execute("c", json!({"path": "f.txt", "offset": 1, "limit": 2}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, "1\n2");
    }

    #[tokio::test]
    async fn edit_requires_unique_match() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "aaa bbb aaa").unwrap();
        let edit = EditTool::new(tmp.path().to_path_buf());

        let out = edit
            .execute(
                "c",
                json!({"path": "f.txt", "old_text": "aaa", "new_text": "x"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("2 times"));

        let out = edit
            .execute(
                "c",
                json!({"path": "f.txt", "old_text": "aaa", "new_text": "x", "replace_all": true}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "x bbb x"
        );
    }

    #[tokio::test]
    async fn edit_missing_snippet_is_an_error_result() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "content").unwrap();
        let edit = EditTool::new(tmp.path().to_path_buf());
        let out = edit
            .execute(
                "c",
                json!({"path": "f.txt", "old_text": "absent", "new_text": "x"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn ls_lists_directories_first() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        let ls = LsTool::new(tmp.path().to_path_buf());
        let out = ls.execute("c", json!({}), &ctx()).await.unwrap();
        let lines: Vec<&str> = out.content.lines().collect();
        assert_eq!(lines[0], "sub/");
        assert!(lines[1].starts_with("a.txt"));
    }

    #[test]
    fn validate_path_rejects_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(validate_path(tmp.path(), "../etc/passwd").is_err());
        assert!(validate_path(tmp.path(), "/etc/passwd").is_err());
        assert!(validate_path(tmp.path(), "ok/inner.txt").is_ok());
    }
}
