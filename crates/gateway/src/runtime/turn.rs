//! Stream consumption for one LLM request: accumulate the assistant
//! message, forward deltas to the event plane, and honor both levels of
//! interruption.

use futures_util::StreamExt;

use coda_domain::error::Error;
use coda_domain::event::AgentEvent;
use coda_domain::message::ToolCall;
use coda_domain::stream::{StreamEvent, Usage};
use coda_providers::{ChatRequest, LlmProvider};

use crate::api::events::EventBroadcaster;

use super::cancel::TurnControl;

/// How a stream was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    None,
    /// Steering: stop reading, let the current tool finish, drop the rest.
    Steer,
    /// Hard abort: stop everything, persist the partial message.
    Abort,
}

/// The assistant message assembled from one stream.
#[derive(Debug, Default)]
pub struct StreamedAssistant {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub interrupt: Interrupt,
}

impl Default for Interrupt {
    fn default() -> Self {
        Interrupt::None
    }
}

/// A failed stream, carrying whatever text arrived before the failure so
/// an aborted retry can still persist the partial assistant message.
#[derive(Debug)]
pub struct StreamFailure {
    pub error: Error,
    pub partial_text: String,
}

/// Issue the request and consume the stream.
///
/// Returns the assembled assistant message; `interrupt` records whether
/// (and how) consumption was cut short. Provider failures, including a
/// rejected request, come back as [`StreamFailure`].
pub async fn stream_assistant(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    events: &EventBroadcaster,
    control: &TurnControl,
) -> Result<StreamedAssistant, StreamFailure> {
    let mut stream = match provider.chat_stream(req).await {
        Ok(s) => s,
        Err(error) => {
            return Err(StreamFailure {
                error,
                partial_text: String::new(),
            })
        }
    };

    let mut out = StreamedAssistant::default();
    let interrupt = control.interrupt_token();

    loop {
        if control.interrupted() {
            out.interrupt = if control.is_aborted() {
                Interrupt::Abort
            } else {
                Interrupt::Steer
            };
            break;
        }

        let event = tokio::select! {
            _ = interrupt.cancelled() => {
                out.interrupt = if control.is_aborted() {
                    Interrupt::Abort
                } else {
                    Interrupt::Steer
                };
                break;
            }
            event = stream.next() => event,
        };

        let Some(event) = event else {
            break;
        };
        let event = match event {
            Ok(e) => e,
            Err(error) => {
                return Err(StreamFailure {
                    error,
                    partial_text: out.text,
                });
            }
        };

        match event {
            StreamEvent::Token { text } => {
                out.text.push_str(&text);
                events.emit_agent(AgentEvent::TextDelta { text });
            }
            StreamEvent::Reasoning { text } => {
                out.reasoning.push_str(&text);
                events.emit_agent(AgentEvent::ReasoningDelta { text });
            }
            StreamEvent::ToolCallStarted { .. } => {}
            StreamEvent::ToolCallDelta { call_id, delta } => {
                events.emit_agent(AgentEvent::ToolCallDelta { call_id, delta });
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                out.tool_calls.push(ToolCall {
                    id: call_id,
                    name: tool_name,
                    arguments,
                });
            }
            StreamEvent::Done { usage, .. } => {
                if let Some(usage) = &usage {
                    events.emit_agent(AgentEvent::Usage {
                        usage: usage.clone(),
                    });
                }
                out.usage = usage;
                break;
            }
        }
    }

    // The stream (and its HTTP connection) drops here; on abort/steer that
    // is what cancels the in-flight request.
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coda_domain::error::Result;
    use coda_domain::stream::BoxStream;
    use coda_providers::ChatResponse;

    /// A provider that replays a fixed script of stream events.
    struct Replay {
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl LlmProvider for Replay {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            unimplemented!("not used")
        }

        async fn chat_stream(
            &self,
            _req: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let events: Vec<Result<StreamEvent>> =
                self.events.clone().into_iter().map(Ok).collect();
            Ok(Box::pin(futures_util::stream::iter(events)))
        }

        fn provider_id(&self) -> &str {
            "replay"
        }
        fn context_window(&self) -> u64 {
            128_000
        }
        fn models(&self) -> &[String] {
            &[]
        }
        fn default_model(&self) -> &str {
            "replay-model"
        }
    }

    #[tokio::test]
    async fn assembles_text_and_tool_calls() {
        let provider = Replay {
            events: vec![
                StreamEvent::Token { text: "let me ".into() },
                StreamEvent::Token { text: "check".into() },
                StreamEvent::ToolCallFinished {
                    call_id: "c1".into(),
                    tool_name: "ls".into(),
                    arguments: serde_json::json!({}),
                },
                StreamEvent::Done {
                    usage: Some(Usage {
                        prompt_tokens: 5,
                        completion_tokens: 3,
                        total_tokens: 8,
                    }),
                    finish_reason: Some("tool_calls".into()),
                },
            ],
        };

        let events = EventBroadcaster::new();
        let control = TurnControl::new();
        let out = stream_assistant(&provider, &ChatRequest::default(), &events, &control)
            .await
            .unwrap();

        assert_eq!(out.text, "let me check");
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].name, "ls");
        assert_eq!(out.usage.unwrap().total_tokens, 8);
        assert_eq!(out.interrupt, Interrupt::None);
    }

    #[tokio::test]
    async fn steer_stops_consumption() {
        let provider = Replay {
            events: vec![
                StreamEvent::Token { text: "a".into() },
                StreamEvent::Token { text: "b".into() },
                StreamEvent::Done {
                    usage: None,
                    finish_reason: None,
                },
            ],
        };
        let events = EventBroadcaster::new();
        let control = TurnControl::new();
        control.request_steer();

        let out = stream_assistant(&provider, &ChatRequest::default(), &events, &control)
            .await
            .unwrap();
        assert_eq!(out.interrupt, Interrupt::Steer);
        assert!(out.text.is_empty());
    }

    #[tokio::test]
    async fn deltas_reach_subscribers() {
        let provider = Replay {
            events: vec![
                StreamEvent::Token { text: "hi".into() },
                StreamEvent::Done {
                    usage: None,
                    finish_reason: None,
                },
            ],
        };
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let control = TurnControl::new();

        stream_assistant(&provider, &ChatRequest::default(), &events, &control)
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(frame.data.contains("text_delta"));
    }
}
