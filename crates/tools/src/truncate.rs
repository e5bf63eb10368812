//! Shared output truncation.
//!
//! Every tool is required to cap the text it returns to the LLM at 50 KB
//! or 2000 lines, whichever limit is hit first. Oversized output keeps its
//! head and tail and spills the full copy to a file the model can read
//! later with the `read` tool.

use std::path::{Path, PathBuf};

/// Byte cap for tool content returned to the LLM.
pub const MAX_CONTENT_BYTES: usize = 50 * 1024;
/// Line cap for tool content returned to the LLM.
pub const MAX_CONTENT_LINES: usize = 2000;

/// Result of applying the truncation contract.
#[derive(Debug, Clone)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
    /// Where the full output was spilled, when truncation happened and a
    /// spill directory was available.
    pub spill_path: Option<PathBuf>,
}

/// Apply the shared truncation contract to tool output.
pub fn truncate_output(full: &str, spill_dir: Option<&Path>) -> Truncated {
    if full.len() <= MAX_CONTENT_BYTES && full.lines().count() <= MAX_CONTENT_LINES {
        return Truncated {
            text: full.to_owned(),
            truncated: false,
            spill_path: None,
        };
    }

    let spill_path = spill_dir.and_then(|dir| {
        let path = dir.join(format!("{}.txt", uuid::Uuid::new_v4()));
        match std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, full)) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), "failed to spill full tool output");
                None
            }
        }
    });

    // Head gets three quarters of each budget, tail the rest.
    let head_budget = MAX_CONTENT_BYTES * 3 / 4;
    let tail_budget = MAX_CONTENT_BYTES / 4;
    let head_lines = MAX_CONTENT_LINES * 3 / 4;
    let tail_lines = MAX_CONTENT_LINES / 4;

    let head = take_lines_front(full, head_lines, head_budget);
    let tail = take_lines_back(full, tail_lines, tail_budget);

    let pointer = match &spill_path {
        Some(p) => format!("full output saved to {}", p.display()),
        None => "remainder dropped".to_owned(),
    };
    let omitted_lines = full
        .lines()
        .count()
        .saturating_sub(head.lines().count() + tail.lines().count());
    let text = format!(
        "{head}\n[... {omitted_lines} lines truncated; {pointer} ...]\n{tail}"
    );

    Truncated {
        text,
        truncated: true,
        spill_path,
    }
}

/// Truncate a string for previews, backing up to a char boundary.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn take_lines_front(s: &str, max_lines: usize, max_bytes: usize) -> &str {
    let mut end = 0;
    for (count, line) in s.lines().enumerate() {
        let line_end = (line.as_ptr() as usize - s.as_ptr() as usize) + line.len();
        if count >= max_lines || line_end > max_bytes {
            break;
        }
        end = line_end;
    }
    &s[..end]
}

fn take_lines_back(s: &str, max_lines: usize, max_bytes: usize) -> &str {
    let lines: Vec<&str> = s.lines().collect();
    let mut start_line = lines.len();
    let mut bytes = 0;
    let mut taken = 0;
    while start_line > 0 && taken < max_lines {
        let candidate = lines[start_line - 1];
        if bytes + candidate.len() + 1 > max_bytes {
            break;
        }
        bytes += candidate.len() + 1;
        start_line -= 1;
        taken += 1;
    }
    if start_line >= lines.len() {
        return "";
    }
    let offset = lines[start_line].as_ptr() as usize - s.as_ptr() as usize;
    s[offset..].trim_end_matches('\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_output_passes_through() {
        let out = truncate_output("hello\nworld", None);
        assert!(!out.truncated);
        assert_eq!(out.text, "hello\nworld");
        assert!(out.spill_path.is_none());
    }

    #[test]
    fn line_cap_triggers_truncation() {
        let full: String = (0..3000).map(|i| format!("line {i}\n")).collect();
        let out = truncate_output(&full, None);
        assert!(out.truncated);
        assert!(out.text.lines().count() <= MAX_CONTENT_LINES + 1);
        assert!(out.text.starts_with("line 0"));
        assert!(out.text.contains("truncated"));
        assert!(out.text.trim_end().ends_with("line 2999"));
    }

    #[test]
    fn byte_cap_triggers_truncation() {
        let full = "x".repeat(MAX_CONTENT_BYTES * 2);
        let out = truncate_output(&full, None);
        assert!(out.truncated);
        assert!(out.text.len() < full.len());
    }

    #[test]
    fn spill_file_holds_the_full_output() {
        let tmp = tempfile::tempdir().unwrap();
        let full: String = (0..3000).map(|i| format!("line {i}\n")).collect();
        let out = truncate_output(&full, Some(tmp.path()));
        let spill = out.spill_path.expect("spill path");
        assert_eq!(std::fs::read_to_string(spill).unwrap(), full);
        assert!(out.text.contains("full output saved to"));
    }

    #[test]
    fn truncate_str_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello...");
        // 4-byte emoji; max falls inside it.
        assert_eq!(truncate_str("\u{1F600}abc", 3), "...");
    }
}
