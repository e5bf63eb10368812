//! Stdin/stdout control plane — the line-delimited JSON equivalent of the
//! HTTP surface.
//!
//! Stdin carries commands and `extension_ui_response` messages; stdout
//! carries command responses, every session event, and every UI request.
//! One JSON object per line in both directions. Logs must go to stderr in
//! this mode — stdout is the wire.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::rpc;
use crate::state::AppState;

/// Run the stdio transport until stdin closes or shutdown fires.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));

    // Event pump: forward every session event as one line.
    let pump = {
        let stdout = stdout.clone();
        let mut rx = state.events.subscribe();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    frame = rx.recv() => frame,
                };
                match frame {
                    Ok(frame) => {
                        let line =
                            format!("{{\"event\":\"{}\",\"data\":{}}}\n", frame.name, frame.data);
                        let mut out = stdout.lock().await;
                        if out.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                        let _ = out.flush().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "stdio subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let Some(line) = line? else {
            // Stdin closed: the host is gone.
            state.begin_shutdown().await;
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let raw: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                write_line(
                    &stdout,
                    &serde_json::json!({
                        "type": "response",
                        "command": "unknown",
                        "success": false,
                        "error": format!("malformed JSON: {e}"),
                    }),
                )
                .await;
                continue;
            }
        };

        // UI round-trip answers ride the same channel as commands.
        if raw.get("type").and_then(|v| v.as_str()) == Some("extension_ui_response") {
            if let Some(id) = raw
                .get("id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                state
                    .ui
                    .resolve(id, raw.get("value").cloned().unwrap_or(Value::Null));
            }
            continue;
        }

        let response = rpc::dispatch_raw(&state, raw).await;
        match serde_json::to_value(&response) {
            Ok(v) => write_line(&stdout, &v).await,
            Err(e) => tracing::warn!(error = %e, "failed to serialize rpc response"),
        }
    }

    pump.abort();
    Ok(())
}

async fn write_line(stdout: &Arc<Mutex<tokio::io::Stdout>>, value: &Value) {
    let mut line = value.to_string();
    line.push('\n');
    let mut out = stdout.lock().await;
    if let Err(e) = out.write_all(line.as_bytes()).await {
        tracing::warn!(error = %e, "stdout write failed");
    }
    let _ = out.flush().await;
}
