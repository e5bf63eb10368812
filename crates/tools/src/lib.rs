//! Built-in tools and the tool registry.
//!
//! A tool is a named function with a JSON-schema parameter shape and an
//! async executor. Execution receives an update channel for incremental
//! output and a cancellation token it is expected to observe.

pub mod file_ops;
pub mod process;
pub mod search;
pub mod shell;
pub mod truncate;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use coda_domain::config::ToolsConfig;
use coda_domain::error::Result;
use coda_domain::message::ToolDefinition;

use crate::process::ProcessManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a tool returns: text for the LLM, opaque details for hosts.
///
/// `content` must respect the shared truncation contract (50 KB / 2000
/// lines, see [`truncate`]); the executor does not enforce it.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub details: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            details: Value::Null,
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            details: Value::Null,
            is_error: true,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Incremental output snapshot delivered while a tool runs.
#[derive(Debug, Clone)]
pub struct ToolUpdate {
    pub call_id: String,
    pub content: String,
    pub details: Value,
}

/// Per-invocation context handed to `execute`.
pub struct ToolContext {
    /// Sink for incremental updates; `None` when nobody is listening.
    pub updates: Option<mpsc::UnboundedSender<ToolUpdate>>,
    /// Observable cancellation for this invocation.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn detached() -> Self {
        Self {
            updates: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn send_update(&self, update: ToolUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

/// A named function the LLM can invoke.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    async fn execute(&self, call_id: &str, params: Value, cx: &ToolContext)
        -> Result<ToolOutcome>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Names reserved for the built-in tool set.
pub const BUILTIN_NAMES: [&str; 7] = ["read", "write", "edit", "bash", "grep", "find", "ls"];

/// Holds the active tools, built-ins plus extension-contributed ones.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// An empty registry (tests, bespoke hosts).
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// The built-in tool set over a workspace root.
    pub fn builtin(config: &ToolsConfig, processes: Arc<ProcessManager>) -> Self {
        let mut registry = Self::empty();
        let root = config.workspace_root.clone();
        let spill = config.spill_dir.clone();

        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(file_ops::ReadTool::new(root.clone())),
            Arc::new(file_ops::WriteTool::new(root.clone())),
            Arc::new(file_ops::EditTool::new(root.clone())),
            Arc::new(shell::BashTool::new(
                processes,
                config.bash_timeout_secs,
                spill.clone(),
            )),
            Arc::new(search::GrepTool::new(root.clone(), spill)),
            Arc::new(search::FindTool::new(root.clone())),
            Arc::new(file_ops::LsTool::new(root)),
        ];
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. Returns a warning message when the name overrides
    /// an existing registration (extension shadowing a built-in).
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<String> {
        let name = tool.name().to_owned();
        if let Some(&index) = self.by_name.get(&name) {
            self.tools[index] = tool;
            let warning = format!("tool '{name}' overrides an existing registration");
            tracing::warn!(tool = %name, "tool override");
            return Some(warning);
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        None
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_owned()).collect()
    }

    /// Snapshot of the active tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTool(&'static str);

    #[async_trait::async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _call_id: &str,
            _params: Value,
            _cx: &ToolContext,
        ) -> Result<ToolOutcome> {
            Ok(ToolOutcome::text("ok"))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::empty();
        assert!(registry.register(Arc::new(FakeTool("alpha"))).is_none());
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn overriding_a_name_warns() {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(FakeTool("bash")));
        let warning = registry.register(Arc::new(FakeTool("bash")));
        assert!(warning.is_some());
        // Still exactly one definition for the name.
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn definitions_preserve_registration_order() {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(FakeTool("one")));
        registry.register(Arc::new(FakeTool("two")));
        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["one", "two"]);
    }
}
