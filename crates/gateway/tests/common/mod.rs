//! Shared fixtures: a scripted LLM provider and an app-state harness over
//! temporary directories.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use coda_domain::config::Config;
use coda_domain::error::{Error, ProviderErrorKind, Result};
use coda_domain::stream::{BoxStream, StreamEvent, Usage};
use coda_gateway::state::AppState;
use coda_providers::{
    ChatRequest, ChatResponse, CredentialCache, LlmProvider, ProviderRegistry,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted reply to a `chat_stream` call.
pub enum ScriptStep {
    /// Replay these events.
    Events(Vec<StreamEvent>),
    /// Fail the request with a classified provider error.
    Fail(ProviderErrorKind, &'static str),
}

/// An in-process provider that replays a script, one step per request.
/// When the script runs dry it answers with a plain "done" message.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    /// Captured requests, for assertions on what the scheduler sent.
    pub requests: Mutex<Vec<ChatRequest>>,
    context_window: u64,
    models: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            context_window: 128_000,
            models: vec!["scripted-small".into(), "scripted-large".into()],
        })
    }

    pub fn with_context_window(steps: Vec<ScriptStep>, context_window: u64) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            context_window,
            models: vec!["scripted-small".into()],
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

/// Convenience: a final text answer.
pub fn text_reply(text: &str) -> ScriptStep {
    ScriptStep::Events(vec![
        StreamEvent::Token { text: text.into() },
        StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            finish_reason: Some("stop".into()),
        },
    ])
}

/// Convenience: a single tool call.
pub fn tool_call_reply(call_id: &str, tool: &str, arguments: serde_json::Value) -> ScriptStep {
    ScriptStep::Events(vec![
        StreamEvent::ToolCallStarted {
            call_id: call_id.into(),
            tool_name: tool.into(),
        },
        StreamEvent::ToolCallFinished {
            call_id: call_id.into(),
            tool_name: tool.into(),
            arguments,
        },
        StreamEvent::Done {
            usage: None,
            finish_reason: Some("tool_calls".into()),
        },
    ])
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        Ok(ChatResponse {
            content: "Summary of the earlier conversation.".into(),
            reasoning: None,
            tool_calls: vec![],
            usage: None,
            model: "scripted-small".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let step = self.steps.lock().pop_front();
        match step {
            Some(ScriptStep::Events(events)) => {
                let items: Vec<Result<StreamEvent>> = events.into_iter().map(Ok).collect();
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            Some(ScriptStep::Fail(kind, message)) => {
                Err(Error::provider("scripted", kind, message))
            }
            None => {
                let items: Vec<Result<StreamEvent>> = vec![
                    Ok(StreamEvent::Token { text: "done".into() }),
                    Ok(StreamEvent::Done {
                        usage: None,
                        finish_reason: Some("stop".into()),
                    }),
                ];
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn context_window(&self) -> u64 {
        self.context_window
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    fn default_model(&self) -> &str {
        "scripted-small"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: AppState,
    pub provider: Arc<ScriptedProvider>,
    // Held for the lifetime of the test; dropping removes the dirs.
    _state_dir: tempfile::TempDir,
    _workspace: tempfile::TempDir,
}

impl Harness {
    pub async fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self::with_extensions(provider, Vec::new()).await
    }

    pub async fn with_extensions(
        provider: Arc<ScriptedProvider>,
        extensions: Vec<Arc<dyn coda_extensions::Extension>>,
    ) -> Self {
        let state_dir = tempfile::tempdir().expect("state dir");
        let workspace = tempfile::tempdir().expect("workspace dir");

        let mut config = Config::default();
        config.session.state_dir = Some(state_dir.path().to_path_buf());
        config.tools.workspace_root = workspace.path().to_path_buf();
        // Keep retry backoffs short so failure tests stay fast.
        config.retry.base_delay_ms = 10;
        config.compaction.keep_recent_tokens = 50;

        let registry = Arc::new(ProviderRegistry::from_providers(vec![provider.clone()
            as Arc<dyn LlmProvider>]));
        let state = AppState::build_with_providers(
            Arc::new(config),
            extensions,
            registry,
            Arc::new(CredentialCache::new()),
        )
        .await
        .expect("app state");

        Self {
            state,
            provider,
            _state_dir: state_dir,
            _workspace: workspace,
        }
    }

    /// Poll until the scheduler returns to Idle.
    pub async fn wait_idle(&self) {
        for _ in 0..600 {
            if !self.state.scheduler().is_streaming() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("scheduler never returned to Idle");
    }

    /// Dispatch a raw RPC command object.
    pub async fn rpc(&self, raw: serde_json::Value) -> coda_gateway::rpc::CommandResponse {
        coda_gateway::rpc::dispatch_raw(&self.state, raw).await
    }
}

/// Drain frames from a subscriber until `agent_end` arrives (bounded).
pub async fn collect_until_agent_end(
    rx: &mut tokio::sync::broadcast::Receiver<Arc<coda_gateway::api::events::EventFrame>>,
) -> Vec<Arc<coda_gateway::api::events::EventFrame>> {
    let mut frames = Vec::new();
    let deadline = std::time::Duration::from_secs(10);
    loop {
        let frame = tokio::time::timeout(deadline, rx.recv())
            .await
            .expect("timed out waiting for agent_end")
            .expect("event channel closed");
        let is_end = frame.name == "agent_event" && frame.data.contains("\"agent_end\"");
        frames.push(frame);
        if is_end {
            return frames;
        }
    }
}

/// Positions of the given agent-event types within the frame list.
pub fn event_order(
    frames: &[Arc<coda_gateway::api::events::EventFrame>],
    needles: &[&str],
) -> Vec<Option<usize>> {
    needles
        .iter()
        .map(|needle| {
            let tag = format!("\"type\":\"{needle}\"");
            frames.iter().position(|f| f.data.contains(&tag))
        })
        .collect()
}
