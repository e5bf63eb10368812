//! In-memory process manager.
//!
//! Tracks spawned shell commands, their output buffers, and lifecycle.
//! Each spawn creates a background monitor task that owns the child and
//! writes into the shared `ProcessSession`. Cancellation kills the whole
//! process group, not just the shell.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Finished,
    Killed,
    TimedOut,
    Failed,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }
}

/// Bounded combined stdout+stderr buffer. When full, the oldest quarter
/// is dropped at a char boundary.
pub struct OutputBuffer {
    combined: String,
    max_chars: usize,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            combined: String::new(),
            max_chars,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let drain_count = self.combined.len() - keep;
            let mut boundary = drain_count;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }

    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn snapshot(&self) -> String {
        self.combined.clone()
    }
}

/// Shared mutable state for one spawned command.
pub struct ProcessSession {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub output: OutputBuffer,
    kill_tx: Option<mpsc::Sender<()>>,
}

/// Handle returned from [`ProcessManager::spawn`].
pub struct SpawnedProcess {
    pub id: String,
    pub session: Arc<RwLock<ProcessSession>>,
    /// Notified when the monitor finishes (any terminal status).
    pub done: Arc<Notify>,
}

const MAX_OUTPUT_CHARS: usize = 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProcessManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of active and recently-finished processes.
#[derive(Default)]
pub struct ProcessManager {
    sessions: RwLock<HashMap<String, Arc<RwLock<ProcessSession>>>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `sh -c command` in its own process group and start the
    /// monitor task.
    pub fn spawn(
        &self,
        command: &str,
        workdir: Option<&std::path::Path>,
        timeout_secs: u64,
    ) -> std::io::Result<SpawnedProcess> {
        let id = uuid::Uuid::new_v4().to_string();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;

        let (kill_tx, kill_rx) = mpsc::channel::<()>(1);
        let session = Arc::new(RwLock::new(ProcessSession {
            id: id.clone(),
            command: command.to_owned(),
            started_at: Utc::now(),
            finished_at: None,
            status: ProcessStatus::Running,
            exit_code: None,
            output: OutputBuffer::new(MAX_OUTPUT_CHARS),
            kill_tx: Some(kill_tx),
        }));
        let done = Arc::new(Notify::new());

        self.sessions.write().insert(id.clone(), session.clone());
        spawn_monitor(child, session.clone(), kill_rx, timeout_secs, done.clone());

        Ok(SpawnedProcess { id, session, done })
    }

    pub fn get(&self, id: &str) -> Option<Arc<RwLock<ProcessSession>>> {
        self.sessions.read().get(id).cloned()
    }

    /// Request a kill. Returns false when the process is unknown or
    /// already finished.
    pub fn kill(&self, id: &str) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        let tx = session.read().kill_tx.clone();
        match tx {
            Some(tx) => tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Drop bookkeeping for a finished process.
    pub fn remove(&self, id: &str) {
        self.sessions.write().remove(id);
    }
}

/// Kill the child's whole process group, falling back to the child alone.
async fn kill_child(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() {
            let _ = child.wait().await;
            return;
        }
    }
    let _ = child.kill().await;
}

fn spawn_monitor(
    mut child: tokio::process::Child,
    session: Arc<RwLock<ProcessSession>>,
    mut kill_rx: mpsc::Receiver<()>,
    timeout_secs: u64,
    done: Arc<Notify>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        let session_out = session.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = session_out.write();
                    s.output.push(&line);
                    s.output.push("\n");
                }
            }
        });

        let session_err = session.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = session_err.write();
                    s.output.push(&line);
                    s.output.push("\n");
                }
            }
        });

        let timeout_dur = std::time::Duration::from_secs(timeout_secs);
        let status;

        tokio::select! {
            result = child.wait() => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                match result {
                    Ok(exit) => {
                        let mut s = session.write();
                        s.exit_code = exit.code();
                        s.status = ProcessStatus::Finished;
                        status = ProcessStatus::Finished;
                    }
                    Err(e) => {
                        let mut s = session.write();
                        s.output.push(&format!("\n[process error: {e}]"));
                        s.status = ProcessStatus::Failed;
                        status = ProcessStatus::Failed;
                    }
                }
            }
            _ = kill_rx.recv() => {
                kill_child(&mut child).await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let mut s = session.write();
                s.output.push("\n[killed]");
                s.status = ProcessStatus::Killed;
                status = ProcessStatus::Killed;
            }
            _ = tokio::time::sleep(timeout_dur) => {
                kill_child(&mut child).await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let mut s = session.write();
                s.output.push("\n[timed out]");
                s.status = ProcessStatus::TimedOut;
                status = ProcessStatus::TimedOut;
            }
        }

        {
            let mut s = session.write();
            s.finished_at = Some(Utc::now());
            s.kill_tx = None;
        }
        done.notify_waiters();

        tracing::debug!(
            process_id = %session.read().id,
            status = ?status,
            "process monitor completed"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_terminal(session: &Arc<RwLock<ProcessSession>>) {
        for _ in 0..200 {
            if session.read().status.is_terminal() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("process never reached a terminal status");
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let manager = ProcessManager::new();
        let spawned = manager.spawn("echo one; echo two 1>&2", None, 30).unwrap();
        wait_terminal(&spawned.session).await;

        let s = spawned.session.read();
        assert_eq!(s.status, ProcessStatus::Finished);
        assert_eq!(s.exit_code, Some(0));
        assert!(s.output.snapshot().contains("one"));
        assert!(s.output.snapshot().contains("two"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let manager = ProcessManager::new();
        let spawned = manager.spawn("exit 3", None, 30).unwrap();
        wait_terminal(&spawned.session).await;
        assert_eq!(spawned.session.read().exit_code, Some(3));
    }

    #[tokio::test]
    async fn kill_terminates_a_long_running_command() {
        let manager = ProcessManager::new();
        let spawned = manager.spawn("sleep 30", None, 60).unwrap();
        assert!(manager.kill(&spawned.id));
        wait_terminal(&spawned.session).await;
        assert_eq!(spawned.session.read().status, ProcessStatus::Killed);
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let manager = ProcessManager::new();
        let spawned = manager.spawn("sleep 30", None, 1).unwrap();
        wait_terminal(&spawned.session).await;
        assert_eq!(spawned.session.read().status, ProcessStatus::TimedOut);
    }

    #[tokio::test]
    async fn kill_unknown_process_is_false() {
        let manager = ProcessManager::new();
        assert!(!manager.kill("nope"));
    }

    #[test]
    fn output_buffer_drops_oldest() {
        let mut buf = OutputBuffer::new(100);
        buf.push(&"a".repeat(80));
        buf.push(&"b".repeat(80));
        assert!(buf.len() <= 100);
        assert!(buf.snapshot().ends_with(&"b".repeat(80)));
    }
}
