//! Minimal self-contained HTML export of the active branch.
//!
//! Deliberately plain: rich transcript converters live outside the core.

use std::path::Path;

use coda_domain::entry::{EntryPayload, SessionMessage};
use coda_domain::error::{Error, Result};
use coda_sessions::SessionLog;

/// Render the active branch to `path`. Returns the written path.
pub fn export_html(log: &SessionLog, path: &Path) -> Result<String> {
    let branch = log.active_branch()?;
    let title = log
        .session_name()
        .unwrap_or_else(|| log.session_id().to_owned());

    let mut body = String::new();
    for entry in branch {
        match &entry.payload {
            EntryPayload::Message { message } => match message {
                SessionMessage::User { content } => {
                    push_block(&mut body, "user", "User", content);
                }
                SessionMessage::System { content } => {
                    push_block(&mut body, "system", "System", content);
                }
                SessionMessage::Assistant {
                    content,
                    tool_calls,
                    ..
                } => {
                    push_block(&mut body, "assistant", "Assistant", content);
                    for tc in tool_calls {
                        push_block(
                            &mut body,
                            "tool-call",
                            &format!("→ {}", tc.name),
                            &tc.arguments.to_string(),
                        );
                    }
                }
                SessionMessage::ToolResult {
                    tool_name,
                    content,
                    is_error,
                    ..
                } => {
                    let text: String = content
                        .iter()
                        .filter_map(|p| match p {
                            coda_domain::message::ContentPart::Text { text } => {
                                Some(text.as_str())
                            }
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    let label = if *is_error {
                        format!("✗ {tool_name}")
                    } else {
                        format!("✓ {tool_name}")
                    };
                    push_block(&mut body, "tool-result", &label, &text);
                }
            },
            EntryPayload::Compaction { summary, .. } => {
                push_block(&mut body, "compaction", "Compacted summary", summary);
            }
            _ => {}
        }
    }

    let html = format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         <style>\n\
         body {{ font-family: monospace; max-width: 60rem; margin: 2rem auto; }}\n\
         .block {{ margin: 1rem 0; padding: 0.5rem 1rem; border-left: 3px solid #888; }}\n\
         .user {{ border-color: #2a7; }}\n\
         .assistant {{ border-color: #27a; }}\n\
         .tool-result {{ border-color: #aa2; }}\n\
         .compaction {{ border-color: #a2a; }}\n\
         h4 {{ margin: 0 0 0.3rem 0; }}\n\
         pre {{ white-space: pre-wrap; margin: 0; }}\n\
         </style></head><body>\n<h2>{title}</h2>\n{body}</body></html>\n",
        title = escape(&title),
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    std::fs::write(path, html).map_err(Error::Io)?;
    Ok(path.display().to_string())
}

fn push_block(body: &mut String, class: &str, label: &str, content: &str) {
    body.push_str(&format!(
        "<div class=\"block {class}\"><h4>{}</h4><pre>{}</pre></div>\n",
        escape(label),
        escape(content)
    ));
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
