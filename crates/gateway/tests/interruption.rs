//! Interruption and recovery: follow-ups, aborts, and transient-error
//! retries.

mod common;

use serde_json::json;

use coda_domain::entry::{EntryPayload, SessionMessage};
use coda_domain::error::ProviderErrorKind;

use common::{
    collect_until_agent_end, text_reply, tool_call_reply, Harness, ScriptStep, ScriptedProvider,
};

#[tokio::test]
async fn follow_up_runs_after_the_current_turn() {
    let provider = ScriptedProvider::new(vec![
        tool_call_reply("c1", "bash", json!({"command": "sleep 1"})),
        text_reply("first done"),
        text_reply("second done"),
    ]);
    let harness = Harness::new(provider.clone()).await;
    let mut rx = harness.state.events.subscribe();

    harness
        .rpc(json!({"type": "prompt", "message": "first"}))
        .await;

    // Wait until the first turn is busy in its tool.
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        if frame.data.contains("\"tool_execution_start\"") {
            break;
        }
    }

    let response = harness
        .rpc(json!({
            "type": "prompt",
            "message": "second",
            "streaming_behavior": "followUp"
        }))
        .await;
    assert_eq!(
        response.data.unwrap()["disposition"],
        json!("queued_follow_up")
    );

    // Two full agent cycles complete, in order.
    collect_until_agent_end(&mut rx).await;
    collect_until_agent_end(&mut rx).await;
    harness.wait_idle().await;

    let scheduler = harness.state.scheduler();
    let log = scheduler.log().lock();
    let branch = log.active_branch().unwrap();
    let texts: Vec<String> = branch
        .iter()
        .filter_map(|e| match &e.payload {
            EntryPayload::Message {
                message: SessionMessage::User { content },
            } => Some(content.clone()),
            EntryPayload::Message {
                message: SessionMessage::Assistant { content, .. },
            } if !content.is_empty() => Some(format!("a:{content}")),
            _ => None,
        })
        .collect();

    // "first" turn (tool + answer) fully precedes the follow-up turn.
    assert_eq!(texts[0], "first");
    assert!(texts.contains(&"a:first done".to_owned()));
    let first_pos = texts.iter().position(|t| t == "a:first done").unwrap();
    let second_pos = texts.iter().position(|t| t == "second").unwrap();
    assert!(first_pos < second_pos);
    assert_eq!(texts.last().unwrap(), "a:second done");
}

#[tokio::test]
async fn abort_persists_partial_and_keeps_queues() {
    let provider = ScriptedProvider::new(vec![tool_call_reply(
        "c1",
        "bash",
        json!({"command": "sleep 10"}),
    )]);
    let harness = Harness::new(provider.clone()).await;
    let mut rx = harness.state.events.subscribe();

    harness
        .rpc(json!({"type": "prompt", "message": "slow work"}))
        .await;
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        if frame.data.contains("\"tool_execution_start\"") {
            break;
        }
    }

    // Queue a follow-up, then abort: the queue must survive.
    harness
        .rpc(json!({
            "type": "prompt",
            "message": "later",
            "streaming_behavior": "followUp"
        }))
        .await;
    let aborted = harness.rpc(json!({"type": "abort"})).await;
    assert_eq!(aborted.data.unwrap()["aborted"], true);

    let frames = collect_until_agent_end(&mut rx).await;
    harness.wait_idle().await;
    assert!(frames
        .iter()
        .any(|f| f.data.contains("\"turn_end\"") && f.data.contains("aborted")));

    let scheduler = harness.state.scheduler();
    {
        let log = scheduler.log().lock();
        let branch = log.active_branch().unwrap();
        // Partial state persisted: assistant (with the tool call) and the
        // cancelled tool-result pair.
        assert!(branch.iter().any(|e| matches!(
            &e.payload,
            EntryPayload::Message { message: SessionMessage::Assistant { tool_calls, .. } }
                if !tool_calls.is_empty()
        )));
        assert!(branch.iter().any(|e| matches!(
            &e.payload,
            EntryPayload::Message { message: SessionMessage::ToolResult { is_error: true, .. } }
        )));
    }

    // Abort does not drain queues.
    let state = harness.rpc(json!({"type": "get_state"})).await.data.unwrap();
    assert_eq!(state["queuedFollowUp"], 1);
    assert_eq!(state["isStreaming"], false);
}

#[tokio::test]
async fn transient_error_retries_with_backoff() {
    let provider = ScriptedProvider::new(vec![
        ScriptStep::Fail(ProviderErrorKind::Transient, "upstream 503"),
        text_reply("after retry"),
    ]);
    let harness = Harness::new(provider.clone()).await;
    let mut rx = harness.state.events.subscribe();

    harness.rpc(json!({"type": "prompt", "message": "go"})).await;
    let frames = collect_until_agent_end(&mut rx).await;
    harness.wait_idle().await;

    assert!(frames
        .iter()
        .any(|f| f.data.contains("\"retry\"") && f.data.contains("upstream 503")));
    assert_eq!(provider.request_count(), 2);

    let scheduler = harness.state.scheduler();
    let log = scheduler.log().lock();
    match &log.active_branch().unwrap().last().unwrap().payload {
        EntryPayload::Message {
            message: SessionMessage::Assistant { content, .. },
        } => assert_eq!(content, "after retry"),
        other => panic!("expected assistant entry, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_retries_surface_a_turn_error() {
    let provider = ScriptedProvider::new(vec![
        ScriptStep::Fail(ProviderErrorKind::Transient, "503"),
        ScriptStep::Fail(ProviderErrorKind::Transient, "503"),
        ScriptStep::Fail(ProviderErrorKind::Transient, "503"),
        ScriptStep::Fail(ProviderErrorKind::Transient, "503"),
    ]);
    let harness = Harness::new(provider.clone()).await;
    let mut rx = harness.state.events.subscribe();

    harness.rpc(json!({"type": "prompt", "message": "doomed"})).await;
    let frames = collect_until_agent_end(&mut rx).await;
    harness.wait_idle().await;

    // max_retries = 3 → four requests total, then a turn-level error.
    assert_eq!(provider.request_count(), 4);
    let turn_end = frames
        .iter()
        .find(|f| f.data.contains("\"turn_end\""))
        .expect("turn_end missing");
    assert!(turn_end.data.contains("error"));
}

#[tokio::test]
async fn auth_errors_are_not_retried() {
    let provider = ScriptedProvider::new(vec![ScriptStep::Fail(
        ProviderErrorKind::Auth,
        "invalid api key",
    )]);
    let harness = Harness::new(provider.clone()).await;
    let mut rx = harness.state.events.subscribe();

    harness.rpc(json!({"type": "prompt", "message": "go"})).await;
    let frames = collect_until_agent_end(&mut rx).await;
    harness.wait_idle().await;

    assert_eq!(provider.request_count(), 1);
    assert!(frames
        .iter()
        .any(|f| f.data.contains("\"turn_end\"") && f.data.contains("invalid api key")));
    // No retry events for non-transient failures.
    assert!(!frames.iter().any(|f| f.data.contains("\"retry\"")));
}

#[tokio::test]
async fn tool_results_loop_back_into_the_stream() {
    let provider = ScriptedProvider::new(vec![
        tool_call_reply("c1", "bash", json!({"command": "echo looped-output"})),
        text_reply("saw it"),
    ]);
    let harness = Harness::new(provider.clone()).await;
    let mut rx = harness.state.events.subscribe();

    harness.rpc(json!({"type": "prompt", "message": "run echo"})).await;
    collect_until_agent_end(&mut rx).await;
    harness.wait_idle().await;

    // The second request's messages contain the tool result.
    let requests = provider.requests.lock();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    let all_text: String = second
        .messages
        .iter()
        .map(|m| m.content.extract_all_text())
        .collect::<Vec<_>>()
        .join("\n");
    let has_tool_result = second.messages.iter().any(|m| {
        matches!(&m.content, coda_domain::message::MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, coda_domain::message::ContentPart::ToolResult { content, .. } if content.contains("looped-output"))))
    });
    assert!(has_tool_result, "tool result missing from: {all_text}");
}
