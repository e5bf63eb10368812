//! Extension UI bridge — round-trip correlation between extension-issued
//! dialogs and host responses.
//!
//! A dialog call allocates a correlation id, emits an
//! `extension_ui_request` event, and parks on a oneshot until the host
//! answers, a timeout fires, the turn aborts, or the session shuts down.
//! Notifications are fire-and-forget: emitted without a correlation id.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use coda_domain::error::{Error, Result};
use coda_domain::event::{EventSink, SessionEvent};

pub struct UiBridge {
    events: EventSink,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Value>>>,
    shutdown: CancellationToken,
}

impl UiBridge {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            pending: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Round-trips
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Issue a UI round-trip and wait for the host's answer.
    ///
    /// Resolves with `Value::Null` on timeout or abort (the caller maps
    /// that to its default), and fails only on session shutdown.
    pub async fn request(
        &self,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
        abort: Option<CancellationToken>,
    ) -> Result<Value> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        (self.events)(SessionEvent::ExtensionUiRequest(json!({
            "id": id,
            "method": method,
            "payload": payload,
        })));

        let abort = abort.unwrap_or_default();
        let timeout_sleep = async {
            match timeout {
                Some(dur) => tokio::time::sleep(dur).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            answer = rx => match answer {
                Ok(value) => Ok(value),
                // Sender dropped: shutdown cleared the pending map.
                Err(_) => Err(Error::ShuttingDown),
            },
            _ = timeout_sleep => {
                self.pending.lock().remove(&id);
                Ok(Value::Null)
            }
            _ = abort.cancelled() => {
                self.pending.lock().remove(&id);
                Ok(Value::Null)
            }
            _ = self.shutdown.cancelled() => {
                self.pending.lock().remove(&id);
                Err(Error::ShuttingDown)
            }
        }
    }

    /// Resolve a pending round-trip. Unknown ids are treated as already
    /// timed out and reported as `false`.
    pub fn resolve(&self, id: Uuid, value: Value) -> bool {
        match self.pending.lock().remove(&id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Fire-and-forget notification (notify, status, widget, title, …).
    pub fn notify(&self, method: &str, payload: Value) {
        (self.events)(SessionEvent::ExtensionUiRequest(json!({
            "method": method,
            "payload": payload,
        })));
    }

    /// Reject every pending round-trip and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.pending.lock().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Dialog conveniences
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Yes/no dialog. Timeout or abort resolves to `false`.
    pub async fn confirm(
        &self,
        title: &str,
        message: &str,
        timeout: Option<Duration>,
        abort: Option<CancellationToken>,
    ) -> Result<bool> {
        let value = self
            .request(
                "confirm",
                json!({"title": title, "message": message}),
                timeout,
                abort,
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Pick one of `options`. Timeout or abort resolves to `None`.
    pub async fn select(
        &self,
        title: &str,
        options: &[String],
        timeout: Option<Duration>,
        abort: Option<CancellationToken>,
    ) -> Result<Option<String>> {
        let value = self
            .request(
                "select",
                json!({"title": title, "options": options}),
                timeout,
                abort,
            )
            .await?;
        Ok(value.as_str().map(str::to_owned))
    }

    /// Free-form text input. Timeout or abort resolves to `None`.
    pub async fn input(
        &self,
        title: &str,
        placeholder: Option<&str>,
        timeout: Option<Duration>,
        abort: Option<CancellationToken>,
    ) -> Result<Option<String>> {
        let value = self
            .request(
                "input",
                json!({"title": title, "placeholder": placeholder}),
                timeout,
                abort,
            )
            .await?;
        Ok(value.as_str().map(str::to_owned))
    }

    /// Open the host's editor with seed text. Timeout or abort resolves
    /// to `None`.
    pub async fn editor(
        &self,
        title: &str,
        seed: &str,
        timeout: Option<Duration>,
        abort: Option<CancellationToken>,
    ) -> Result<Option<String>> {
        let value = self
            .request("editor", json!({"title": title, "seed": seed}), timeout, abort)
            .await?;
        Ok(value.as_str().map(str::to_owned))
    }
}
