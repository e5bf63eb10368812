//! Search tools — `grep` (content search) and `find` (name search) over
//! the workspace tree.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use coda_domain::error::Result;

use crate::file_ops::validate_path;
use crate::truncate::truncate_output;
use crate::{Tool, ToolContext, ToolOutcome};

const DEFAULT_MAX_MATCHES: usize = 500;

/// Directories never worth descending into.
const SKIP_DIRS: [&str; 5] = [".git", "node_modules", "target", ".hg", ".svn"];

fn should_skip(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIP_DIRS.contains(&n))
            .unwrap_or(false)
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(1024).any(|&b| b == 0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// grep
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct GrepParams {
    pattern: String,
    #[serde(default = "default_dot")]
    path: String,
    #[serde(default)]
    max_matches: Option<usize>,
}

fn default_dot() -> String {
    ".".into()
}

pub struct GrepTool {
    root: PathBuf,
    spill_dir: Option<PathBuf>,
}

impl GrepTool {
    pub fn new(root: PathBuf, spill_dir: Option<PathBuf>) -> Self {
        Self { root, spill_dir }
    }
}

#[async_trait::async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents under a workspace path with a regular expression. \
         Returns `path:line: text` matches."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression"},
                "path": {"type": "string", "default": "."},
                "max_matches": {"type": "integer"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: GrepParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let regex = match regex::Regex::new(&params.pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid pattern: {e}"))),
        };
        let base = match validate_path(&self.root, &params.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        let max = params.max_matches.unwrap_or(DEFAULT_MAX_MATCHES);
        let mut lines = Vec::new();
        let mut files_scanned = 0usize;
        let mut capped = false;

        'walk: for entry in WalkDir::new(&base)
            .into_iter()
            .filter_entry(|e| !should_skip(e))
            .filter_map(|e| e.ok())
        {
            if cx.cancel.is_cancelled() {
                return Ok(ToolOutcome::error("search cancelled"));
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            if looks_binary(&bytes) {
                continue;
            }
            files_scanned += 1;
            let text = String::from_utf8_lossy(&bytes);
            let rel = entry
                .path()
                .strip_prefix(&base)
                .unwrap_or(entry.path())
                .display();
            for (lineno, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    lines.push(format!("{rel}:{}: {line}", lineno + 1));
                    if lines.len() >= max {
                        capped = true;
                        break 'walk;
                    }
                }
            }
        }

        let match_count = lines.len();
        let body = if lines.is_empty() {
            format!("no matches for /{}/", params.pattern)
        } else {
            lines.join("\n")
        };
        let truncated = truncate_output(&body, self.spill_dir.as_deref());
        Ok(ToolOutcome::text(truncated.text).with_details(json!({
            "pattern": params.pattern,
            "path": params.path,
            "matches": match_count,
            "filesScanned": files_scanned,
            "capped": capped,
        })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// find
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct FindParams {
    /// Glob-style name pattern (`*` and `?` wildcards).
    pattern: String,
    #[serde(default = "default_dot")]
    path: String,
}

pub struct FindTool {
    root: PathBuf,
}

impl FindTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

/// Translate a glob pattern into an anchored regex.
fn glob_to_regex(pattern: &str) -> std::result::Result<regex::Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    regex::Regex::new(&out)
}

#[async_trait::async_trait]
impl Tool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn description(&self) -> &str {
        "Find files by name under a workspace path. Pattern supports `*` and `?` wildcards."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "path": {"type": "string", "default": "."}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        params: Value,
        cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: FindParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let regex = match glob_to_regex(&params.pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid pattern: {e}"))),
        };
        let base = match validate_path(&self.root, &params.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(&base)
            .into_iter()
            .filter_entry(|e| !should_skip(e))
            .filter_map(|e| e.ok())
        {
            if cx.cancel.is_cancelled() {
                return Ok(ToolOutcome::error("search cancelled"));
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if regex.is_match(&name) {
                files.push(
                    entry
                        .path()
                        .strip_prefix(&base)
                        .unwrap_or(entry.path())
                        .display()
                        .to_string(),
                );
            }
        }
        files.sort();

        let file_count = files.len();
        let body = if files.is_empty() {
            format!("no files matching '{}'", params.pattern)
        } else {
            files.join("\n")
        };
        let truncated = truncate_output(&body, None);
        Ok(ToolOutcome::text(truncated.text).with_details(json!({
            "pattern": params.pattern,
            "path": params.path,
            "files": file_count,
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
    async fn grep_finds_matching_lines() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.rs"), "fn main() {}\nlet x = 1;").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "nothing here").unwrap();

        let grep = GrepTool::new(tmp.path().to_path_buf(), None);
        let out = grep
            .execute("c", json!({"pattern": "fn \\w+"}), &ctx())
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("a.rs:1: fn main() {}"));
        assert_eq!(out.details["matches"], 1);
    }

    #[tokio::test]
    async fn grep_reports_no_matches() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        let grep = GrepTool::new(tmp.path().to_path_buf(), None);
        let out = grep
            .execute("c", json!({"pattern": "absent_symbol"}), &ctx())
            .await
            .unwrap();
        assert!(out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn grep_caps_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let body: String = (0..50).map(|i| format!("match {i}\n")).collect();
        std::fs::write(tmp.path().join("a.txt"), body).unwrap();
        let grep = GrepTool::new(tmp.path().to_path_buf(), None);
        let out = grep
            .execute("c", json!({"pattern": "match", "max_matches": 10}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.details["matches"], 10);
        assert_eq!(out.details["capped"], true);
    }

    #[tokio::test]
    async fn find_matches_globs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("main.rs"), "").unwrap();
        std::fs::write(tmp.path().join("sub/lib.rs"), "").unwrap();
        std::fs::write(tmp.path().join("readme.md"), "").unwrap();

        let find = FindTool::new(tmp.path().to_path_buf());
        let out = find
            .execute("c", json!({"pattern": "*.rs"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.details["files"], 2);
        assert!(out.content.contains("main.rs"));
        assert!(out.content.contains("sub/lib.rs"));
        assert!(!out.content.contains("readme.md"));
    }

    #[test]
    fn glob_translation() {
        assert!(glob_to_regex("*.rs").unwrap().is_match("main.rs"));
        assert!(!glob_to_regex("*.rs").unwrap().is_match("main.rss"));
        assert!(glob_to_regex("lib?.rs").unwrap().is_match("lib1.rs"));
        // Regex metacharacters in the glob are literal.
        assert!(glob_to_regex("a+b.txt").unwrap().is_match("a+b.txt"));
        assert!(!glob_to_regex("a+b.txt").unwrap().is_match("aab.txt"));
    }
}
