//! The `bash` tool — shell execution with streamed output and observable
//! cancellation.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use coda_domain::error::Result;

use crate::process::{ProcessManager, ProcessStatus};
use crate::truncate::truncate_output;
use crate::{Tool, ToolContext, ToolOutcome, ToolUpdate};

/// How often streamed output snapshots are pushed while the command runs.
const UPDATE_INTERVAL_MS: u64 = 250;

#[derive(Debug, Deserialize)]
struct BashParams {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

pub struct BashTool {
    processes: Arc<ProcessManager>,
    default_timeout_secs: u64,
    spill_dir: Option<PathBuf>,
}

impl BashTool {
    pub fn new(
        processes: Arc<ProcessManager>,
        default_timeout_secs: u64,
        spill_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            processes,
            default_timeout_secs,
            spill_dir,
        }
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command. Output streams while the command runs; long \
         output is truncated with a pointer to the full copy."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_secs": {"type": "integer"}
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        call_id: &str,
        params: Value,
        cx: &ToolContext,
    ) -> Result<ToolOutcome> {
        let params: BashParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid parameters: {e}"))),
        };
        let timeout = params.timeout_secs.unwrap_or(self.default_timeout_secs);

        let spawned = match self.processes.spawn(&params.command, None, timeout) {
            Ok(s) => s,
            Err(e) => return Ok(ToolOutcome::error(format!("failed to spawn: {e}"))),
        };

        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(UPDATE_INTERVAL_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_len = 0usize;
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = spawned.done.notified() => {}
                _ = interval.tick() => {}
                _ = cx.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    self.processes.kill(&spawned.id);
                    // Keep looping until the monitor records the kill.
                }
            }

            let (status, len, snapshot) = {
                let s = spawned.session.read();
                (s.status, s.output.len(), s.output.snapshot())
            };

            if len > last_len && !status.is_terminal() {
                last_len = len;
                cx.send_update(ToolUpdate {
                    call_id: call_id.to_owned(),
                    content: snapshot,
                    details: json!({"processId": spawned.id, "running": true}),
                });
                continue;
            }

            if status.is_terminal() {
                break;
            }
        }

        let (status, exit_code, output, started_at, finished_at) = {
            let s = spawned.session.read();
            (
                s.status,
                s.exit_code,
                s.output.snapshot(),
                s.started_at,
                s.finished_at,
            )
        };
        self.processes.remove(&spawned.id);

        let duration_ms = finished_at
            .map(|f| (f - started_at).num_milliseconds().max(0))
            .unwrap_or(0);
        let truncated = truncate_output(&output, self.spill_dir.as_deref());
        let details = json!({
            "exitCode": exit_code,
            "status": status,
            "durationMs": duration_ms,
            "truncated": truncated.truncated,
            "fullOutputPath": truncated.spill_path.as_ref().map(|p| p.display().to_string()),
        });

        let outcome = match status {
            ProcessStatus::Finished if exit_code == Some(0) => {
                ToolOutcome::text(truncated.text)
            }
            ProcessStatus::Finished => ToolOutcome {
                content: format!(
                    "{}\n[exit code: {}]",
                    truncated.text,
                    exit_code.map(|c| c.to_string()).unwrap_or_else(|| "?".into())
                ),
                details: Value::Null,
                is_error: true,
            },
            ProcessStatus::Killed => ToolOutcome::error(format!(
                "command cancelled\n{}",
                truncated.text
            )),
            ProcessStatus::TimedOut => ToolOutcome::error(format!(
                "command timed out after {timeout}s\n{}",
                truncated.text
            )),
            ProcessStatus::Failed | ProcessStatus::Running => {
                ToolOutcome::error(truncated.text)
            }
        };

        Ok(ToolOutcome {
            details,
            ..outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn tool() -> BashTool {
        BashTool::new(Arc::new(ProcessManager::new()), 30, None)
    }

    #[tokio::test]
    async fn echo_returns_output() {
        let out = tool()
            .execute("c1", json!({"command": "echo hello"}), &ToolContext::detached())
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "hello");
        assert_eq!(out.details["exitCode"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_result() {
        let out = tool()
            .execute("c1", json!({"command": "echo oops; exit 2"}), &ToolContext::detached())
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("oops"));
        assert!(out.content.contains("[exit code: 2]"));
        assert_eq!(out.details["exitCode"], 2);
    }

    #[tokio::test]
    async fn cancellation_kills_the_command() {
        let cancel = CancellationToken::new();
        let cx = ToolContext {
            updates: None,
            cancel: cancel.clone(),
        };
        let tool = tool();
        let handle = tokio::spawn(async move {
            tool.execute("c1", json!({"command": "sleep 30"}), &cx).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();

        let out = handle.await.unwrap().unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn long_running_command_streams_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cx = ToolContext {
            updates: Some(tx),
            cancel: CancellationToken::new(),
        };
        let out = tool()
            .execute(
                "c1",
                json!({"command": "echo first; sleep 1; echo second"}),
                &cx,
            )
            .await
            .unwrap();
        assert!(!out.is_error);

        let mut saw_partial = false;
        while let Ok(update) = rx.try_recv() {
            assert_eq!(update.call_id, "c1");
            if update.content.contains("first") && !update.content.contains("second") {
                saw_partial = true;
            }
        }
        assert!(saw_partial, "expected a partial snapshot before completion");
    }

    #[tokio::test]
    async fn timeout_is_an_error_result() {
        let tool = BashTool::new(Arc::new(ProcessManager::new()), 1, None);
        let out = tool
            .execute("c1", json!({"command": "sleep 30"}), &ToolContext::detached())
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("timed out"));
    }
}
