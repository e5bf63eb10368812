//! The context handed to every extension handler: UI primitives plus the
//! action surface back into the session.

use std::sync::Arc;

use serde_json::Value;

use coda_domain::error::Result;

use crate::ui::UiBridge;

/// Actions an extension may take against the running session. Implemented
/// by the gateway; handlers receive it behind a trait object so the bus
/// stays decoupled from the scheduler.
#[async_trait::async_trait]
pub trait HostActions: Send + Sync {
    /// Enqueue a user message (delivered with follow-up semantics).
    async fn send_message(&self, text: String) -> Result<()>;

    /// Append a `custom` entry to the session log.
    async fn append_entry(
        &self,
        custom_type: String,
        data: Value,
        display: Option<String>,
        content: Option<String>,
    ) -> Result<()>;

    /// Restrict the active tool set to the named tools.
    async fn set_active_tools(&self, names: Vec<String>) -> Result<()>;

    /// Switch the session's model (`provider/model` spec).
    async fn set_model(&self, spec: String) -> Result<()>;
}

/// Handler context: UI bridge + host actions.
#[derive(Clone)]
pub struct ExtensionContext {
    pub ui: Arc<UiBridge>,
    pub actions: Arc<dyn HostActions>,
}

impl ExtensionContext {
    pub fn new(ui: Arc<UiBridge>, actions: Arc<dyn HostActions>) -> Self {
        Self { ui, actions }
    }
}
