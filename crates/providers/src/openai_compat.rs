//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the OpenAI chat completions contract
//! (OpenAI, Azure-style gateways, Ollama, vLLM, LM Studio, Together, …).
//! This is also where wire failures are classified into the shared error
//! taxonomy: the scheduler never inspects status codes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use coda_domain::config::{ProviderConfig, ThinkingLevel};
use coda_domain::error::{Error, ProviderErrorKind, Result};
use coda_domain::message::{ContentPart, Message, MessageContent, Role, ToolCall};
use coda_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::auth::CredentialCache;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key_env: String,
    creds: Arc<CredentialCache>,
    models: Vec<String>,
    default_model: String,
    context_window: u64,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig, creds: Arc<CredentialCache>) -> Result<Self> {
        let default_model = cfg
            .default_model
            .clone()
            .or_else(|| cfg.models.first().cloned())
            .unwrap_or_else(|| "default".into());

        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::provider(&cfg.id, ProviderErrorKind::Fatal, e.to_string()))?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key_env: cfg.api_key_env.clone(),
            creds,
            models: cfg.models.clone(),
            default_model,
            context_window: cfg.context_window,
            client,
        })
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(level) = req.thinking {
            if level != ThinkingLevel::Off {
                body["reasoning_effort"] = Value::String(level.as_str().into());
            }
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let key = self.creds.resolve(&self.id, &self.api_key_env).await?;
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify_reqwest(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let kind = classify_status(status.as_u16(), &text);
            if kind == ProviderErrorKind::Auth {
                self.creds.invalidate(&self.id);
            }
            return Err(Error::provider(
                &self.id,
                kind,
                format!("HTTP {}: {}", status.as_u16(), truncate(&text, 500)),
            ));
        }
        Ok(response)
    }

    fn classify_reqwest(&self, e: reqwest::Error) -> Error {
        let kind = if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            ProviderErrorKind::Transient
        } else {
            ProviderErrorKind::Fatal
        };
        Error::provider(&self.id, kind, e.to_string())
    }
}

/// Map an HTTP status (plus body text) onto the error taxonomy.
fn classify_status(status: u16, body: &str) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::Auth,
        408 | 429 => ProviderErrorKind::Transient,
        500..=599 => ProviderErrorKind::Transient,
        400 | 413 | 422 => {
            let lower = body.to_ascii_lowercase();
            if lower.contains("context length")
                || lower.contains("context window")
                || lower.contains("maximum context")
                || (lower.contains("too many") && lower.contains("token"))
            {
                ProviderErrorKind::ContextOverflow
            } else {
                ProviderErrorKind::Fatal
            }
        }
        _ => ProviderErrorKind::Fatal,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message lowering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lower one provider-agnostic [`Message`] to the chat-completions wire
/// shape.
///
/// Assistant messages carry their tool calls in a dedicated array with
/// stringified arguments, and an assistant that emitted only tool calls
/// sends `content: null`. Tool messages bind the result text to its call
/// id. Everything else is a flat role + text object.
fn to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => {
            let mut wire = serde_json::Map::new();
            wire.insert("role".into(), "assistant".into());

            let mut calls: Vec<Value> = Vec::new();
            if let MessageContent::Parts(parts) = &msg.content {
                for part in parts {
                    if let ContentPart::ToolUse { id, name, input } = part {
                        calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                }
            }

            let text = msg.content.extract_all_text();
            wire.insert(
                "content".into(),
                if text.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                },
            );
            if !calls.is_empty() {
                wire.insert("tool_calls".into(), Value::Array(calls));
            }
            Value::Object(wire)
        }
        Role::Tool => {
            // A tool message holds exactly one result part; a text-only
            // fallback still serializes rather than being dropped.
            let (call_id, text) = match &msg.content {
                MessageContent::Parts(parts) => parts
                    .iter()
                    .find_map(|p| match p {
                        ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .unwrap_or_default(),
                MessageContent::Text(t) => (String::new(), t.clone()),
            };
            serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": text,
            })
        }
        Role::System | Role::User => serde_json::json!({
            "role": if msg.role == Role::System { "system" } else { "user" },
            "content": msg.content.extract_all_text(),
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response body reading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cut one complete line (newline stripped, CRLF tolerated) off the
/// front of the buffer.
fn take_line(buffer: &mut String) -> Option<String> {
    let pos = buffer.find('\n')?;
    let mut line: String = buffer.drain(..=pos).collect();
    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Some(line)
}

/// The payload of a `data:` field line. Blank payloads, comments, and
/// other SSE fields (`event:`, `id:`, `retry:`) yield nothing.
fn data_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Incremental reader that cuts `data:` payloads out of a streaming
/// response body. OpenAI-compatible endpoints put a whole JSON chunk on
/// each `data:` line, so payloads are cut line-by-line as bytes arrive.
struct SseBody {
    response: reqwest::Response,
    buffer: String,
    body_done: bool,
}

impl SseBody {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: String::new(),
            body_done: false,
        }
    }

    /// The next `data:` payload, or `None` once the body is exhausted.
    async fn next_data(&mut self) -> Option<std::result::Result<String, reqwest::Error>> {
        loop {
            while let Some(line) = take_line(&mut self.buffer) {
                if let Some(payload) = data_payload(&line) {
                    return Some(Ok(payload.to_owned()));
                }
            }
            if self.body_done {
                // A final line may arrive without its trailing newline.
                let rest = std::mem::take(&mut self.buffer);
                return data_payload(rest.trim()).map(|p| Ok(p.to_owned()));
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Ok(None) => self.body_done = true,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-call assembly state for a streaming response. OpenAI announces a
/// call with `index` + `id` + `function.name`, then streams argument
/// fragments keyed by `index`.
#[derive(Default)]
struct StreamState {
    calls: HashMap<u64, PartialCall>,
    order: Vec<u64>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    flushed: bool,
}

struct PartialCall {
    id: String,
    name: String,
    args: String,
}

impl StreamState {
    /// Emit `ToolCallFinished` for every assembled call, once.
    fn flush_calls(&mut self) -> Vec<Result<StreamEvent>> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;
        let mut events = Vec::new();
        for index in self.order.clone() {
            let Some(call) = self.calls.remove(&index) else {
                continue;
            };
            let arguments = if call.args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(&call.args) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            call_id = %call.id,
                            tool = %call.name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    }
                }
            };
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: call.id,
                tool_name: call.name,
                arguments,
            }));
        }
        events
    }
}

fn parse_stream_data(state: &mut StreamState, data: &str) -> Vec<Result<StreamEvent>> {
    if data == "[DONE]" {
        let mut events = state.flush_calls();
        events.push(Ok(StreamEvent::Done {
            usage: state.usage.take(),
            finish_reason: state.finish_reason.take(),
        }));
        return events;
    }

    let chunk: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparsable stream chunk");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
        state.usage = Some(Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        });
    }

    let Some(choice) = chunk["choices"].get(0) else {
        return events;
    };

    if let Some(reason) = choice["finish_reason"].as_str() {
        state.finish_reason = Some(reason.to_owned());
    }

    let delta = &choice["delta"];
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token { text: text.into() }));
        }
    }
    if let Some(text) = delta["reasoning_content"].as_str() {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Reasoning { text: text.into() }));
        }
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0);
            if !state.calls.contains_key(&index) {
                state.order.push(index);
                state.calls.insert(
                    index,
                    PartialCall {
                        id: String::new(),
                        name: String::new(),
                        args: String::new(),
                    },
                );
            }
            let Some(entry) = state.calls.get_mut(&index) else {
                continue;
            };
            let announced = !entry.id.is_empty();
            if let Some(id) = tc["id"].as_str() {
                entry.id = id.to_owned();
            }
            if let Some(name) = tc["function"]["name"].as_str() {
                entry.name.push_str(name);
            }
            if !announced && !entry.id.is_empty() {
                events.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: entry.id.clone(),
                    tool_name: entry.name.clone(),
                }));
            }
            if let Some(args) = tc["function"]["arguments"].as_str() {
                if !args.is_empty() {
                    entry.args.push_str(args);
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id: entry.id.clone(),
                        delta: args.to_owned(),
                    }));
                }
            }
        }
    }

    // Some gateways never send [DONE]; flush assembled calls as soon as the
    // finish reason arrives so no call is lost.
    if state.finish_reason.is_some() && !state.calls.is_empty() {
        events.extend(state.flush_calls());
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_chat_body(req, false);
        let response = self.send(&body).await?;
        let v: Value = response
            .json()
            .await
            .map_err(|e| self.classify_reqwest(e))?;

        let message = &v["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or("").to_owned();
        let reasoning = message["reasoning_content"]
            .as_str()
            .map(str::to_owned);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for tc in calls {
                let args_raw = tc["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments = serde_json::from_str(args_raw)
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                tool_calls.push(ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_owned(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_owned(),
                    arguments,
                });
            }
        }

        let usage = v.get("usage").filter(|u| !u.is_null()).map(|u| Usage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
        });

        Ok(ChatResponse {
            content,
            reasoning,
            tool_calls,
            usage,
            model: v["model"]
                .as_str()
                .unwrap_or(&self.effective_model(req))
                .to_owned(),
            finish_reason: v["choices"][0]["finish_reason"].as_str().map(str::to_owned),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_chat_body(req, true);
        let response = self.send(&body).await?;
        let provider_id = self.id.clone();

        let stream = async_stream::stream! {
            let mut body = SseBody::new(response);
            let mut state = StreamState::default();
            let mut done_emitted = false;

            loop {
                match body.next_data().await {
                    Some(Ok(data)) => {
                        for event in parse_stream_data(&mut state, &data) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                    Some(Err(e)) => {
                        yield Err(Error::provider(
                            &provider_id,
                            ProviderErrorKind::Transient,
                            e.to_string(),
                        ));
                        // The error is terminal; no synthetic Done after it.
                        done_emitted = true;
                        break;
                    }
                    None => break,
                }
            }

            // Endpoints that close without `[DONE]` still owe the caller
            // assembled calls and a terminal event.
            if !done_emitted {
                for event in state.flush_calls() {
                    yield event;
                }
                yield Ok(StreamEvent::Done {
                    usage: state.usage.take(),
                    finish_reason: state.finish_reason.take(),
                });
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn context_window(&self) -> u64 {
        self.context_window
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_statuses() {
        assert_eq!(classify_status(401, ""), ProviderErrorKind::Auth);
        assert_eq!(classify_status(403, ""), ProviderErrorKind::Auth);
    }

    #[test]
    fn classify_transient_statuses() {
        assert_eq!(classify_status(429, ""), ProviderErrorKind::Transient);
        assert_eq!(classify_status(500, ""), ProviderErrorKind::Transient);
        assert_eq!(classify_status(503, ""), ProviderErrorKind::Transient);
        assert_eq!(classify_status(408, ""), ProviderErrorKind::Transient);
    }

    #[test]
    fn classify_context_overflow_from_body() {
        let body = r#"{"error":{"message":"This model's maximum context length is 128000 tokens"}}"#;
        assert_eq!(classify_status(400, body), ProviderErrorKind::ContextOverflow);
        assert_eq!(classify_status(400, "bad request"), ProviderErrorKind::Fatal);
    }

    // ── SSE line cutting ───────────────────────────────────────────

    #[test]
    fn take_line_cuts_at_newlines_and_keeps_the_remainder() {
        let mut buf = String::from("first\nsecond\r\ntail");
        assert_eq!(take_line(&mut buf).as_deref(), Some("first"));
        assert_eq!(take_line(&mut buf).as_deref(), Some("second"));
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(buf, "tail");
    }

    #[test]
    fn take_line_handles_empty_lines() {
        let mut buf = String::from("\n\ndata: x\n");
        assert_eq!(take_line(&mut buf).as_deref(), Some(""));
        assert_eq!(take_line(&mut buf).as_deref(), Some(""));
        assert_eq!(take_line(&mut buf).as_deref(), Some("data: x"));
        assert_eq!(take_line(&mut buf), None);
    }

    #[test]
    fn data_payload_filters_other_sse_fields() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("data:   padded   "), Some("padded"));
        assert_eq!(data_payload("event: ping"), None);
        assert_eq!(data_payload("id: 42"), None);
        assert_eq!(data_payload("retry: 3000"), None);
        assert_eq!(data_payload(": keepalive comment"), None);
        assert_eq!(data_payload("data:"), None);
        assert_eq!(data_payload(""), None);
    }

    // ── Stream parsing ─────────────────────────────────────────────

    #[test]
    fn stream_parser_assembles_tool_calls() {
        let mut state = StreamState::default();

        let announce = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"bash","arguments":""}}]}}]}"#;
        let events = parse_stream_data(&mut state, announce);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::ToolCallStarted { ref call_id, .. }) if call_id == "call_1"
        ));

        let args = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"command\":\"ls\"}"}}]}}]}"#;
        let events = parse_stream_data(&mut state, args);
        assert!(matches!(events[0], Ok(StreamEvent::ToolCallDelta { .. })));

        let done = parse_stream_data(&mut state, "[DONE]");
        let finished = done
            .iter()
            .find_map(|e| match e {
                Ok(StreamEvent::ToolCallFinished {
                    call_id, arguments, ..
                }) => Some((call_id.clone(), arguments.clone())),
                _ => None,
            })
            .expect("tool call finished");
        assert_eq!(finished.0, "call_1");
        assert_eq!(finished.1["command"], "ls");
        assert!(matches!(done.last(), Some(Ok(StreamEvent::Done { .. }))));
    }

    #[test]
    fn stream_parser_reads_text_and_usage() {
        let mut state = StreamState::default();
        let chunk = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        let events = parse_stream_data(&mut state, chunk);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::Token { ref text }) if text == "hel"
        ));

        let usage_chunk = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        parse_stream_data(&mut state, usage_chunk);
        let done = parse_stream_data(&mut state, "[DONE]");
        match done.last() {
            Some(Ok(StreamEvent::Done { usage: Some(u), .. })) => {
                assert_eq!(u.total_tokens, 15);
            }
            other => panic!("expected Done with usage, got {other:?}"),
        }
    }

    #[test]
    fn flush_on_finish_reason_without_done_sentinel() {
        let mut state = StreamState::default();
        let announce = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"ls","arguments":"{}"}}]}}]}"#;
        parse_stream_data(&mut state, announce);
        let finish = r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#;
        let events = parse_stream_data(&mut state, finish);
        assert!(events
            .iter()
            .any(|e| matches!(e, Ok(StreamEvent::ToolCallFinished { .. }))));
    }

    // ── Message lowering ───────────────────────────────────────────

    #[test]
    fn wire_assistant_carries_text_and_calls() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "running".into(),
                },
                ContentPart::ToolUse {
                    id: "c1".into(),
                    name: "bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                },
            ]),
        };
        let v = to_wire(&msg);
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"], "running");
        assert_eq!(v["tool_calls"][0]["function"]["name"], "bash");
        // Arguments go over the wire stringified.
        assert_eq!(
            v["tool_calls"][0]["function"]["arguments"],
            "{\"command\":\"ls\"}"
        );
    }

    #[test]
    fn wire_assistant_with_only_calls_sends_null_content() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::ToolUse {
                id: "c1".into(),
                name: "read".into(),
                input: serde_json::json!({}),
            }]),
        };
        let v = to_wire(&msg);
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn wire_tool_result_binds_its_call_id() {
        let msg = Message::tool_result("c9", "done");
        let v = to_wire(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "c9");
        assert_eq!(v["content"], "done");
        assert!(v.get("tool_calls").is_none());
    }

    #[test]
    fn wire_user_and_system_flatten_to_text() {
        let v = to_wire(&Message::user("hello"));
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hello");

        let v = to_wire(&Message::system("be terse"));
        assert_eq!(v["role"], "system");
        assert_eq!(v["content"], "be terse");
    }
}
