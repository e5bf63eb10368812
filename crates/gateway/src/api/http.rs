//! HTTP control surface.
//!
//! - `GET  /health`                  — liveness (+`?ready=true` readiness)
//! - `GET  /events`                  — SSE event stream
//! - `POST /rpc`                     — one command per request
//! - `POST /extension_ui_response`   — resolve a pending UI round-trip
//! - `POST /shutdown`                — graceful shutdown

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_core::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::rpc::{self, Command};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/rpc", post(rpc_handler))
        .route("/extension_ui_response", post(extension_ui_response))
        .route("/shutdown", post(shutdown))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(remap_body_too_large))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.bind, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "http control plane listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// The body cap rejects with 413; the control-plane contract wants 400.
async fn remap_body_too_large(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        *response.status_mut() = StatusCode::BAD_REQUEST;
    }
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct HealthQuery {
    #[serde(default)]
    ready: Option<bool>,
}

async fn health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> impl IntoResponse {
    let ready = state.is_ready();
    let body = json!({
        "status": "ok",
        "ready": ready,
        "version": env!("CARGO_PKG_VERSION"),
        "sessionId": state.scheduler().log().lock().session_id(),
        "isStreaming": state.scheduler().is_streaming(),
    });

    if query.ready == Some(true) && !ready {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    Json(body).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    Sse::new(event_stream(state))
}

fn event_stream(
    state: AppState,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let mut rx = state.events.subscribe();
        let shutdown = state.shutdown.clone();
        let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(
            state.config.server.heartbeat_secs,
        ));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    yield Ok(Event::default().event("heartbeat").data("{}"));
                }
                frame = rx.recv() => match frame {
                    Ok(frame) => {
                        yield Ok(Event::default().event(frame.name).data(frame.data.clone()));
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Slow subscriber: events are lossy by contract.
                        tracing::debug!(skipped, "sse subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /rpc
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn rpc_handler(State(state): State<AppState>, body: Result<Json<Value>, axum::extract::rejection::JsonRejection>) -> Response {
    let Json(raw) = match body {
        Ok(json) => json,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("malformed body: {e}")).into_response(),
    };

    // Unknown type / missing type field are 400-class on this transport.
    if serde_json::from_value::<Command>(raw.clone()).is_err() {
        let type_field = raw.get("type").and_then(|v| v.as_str());
        let message = match type_field {
            Some(t) => format!("unknown command type '{t}'"),
            None => "missing type field".to_owned(),
        };
        return (StatusCode::BAD_REQUEST, message).into_response();
    }

    let response = rpc::dispatch_raw(&state, raw).await;
    Json(response).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /extension_ui_response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct UiResponseBody {
    id: Uuid,
    #[serde(default)]
    value: Value,
}

async fn extension_ui_response(
    State(state): State<AppState>,
    body: Result<Json<UiResponseBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(json) => json,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("malformed body: {e}")).into_response(),
    };

    // Unknown ids already timed out; answering them is not an error.
    let resolved = state.ui.resolve(body.id, body.value);
    Json(json!({ "resolved": resolved })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /shutdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn shutdown(State(state): State<AppState>) -> StatusCode {
    let state = state.clone();
    tokio::spawn(async move {
        state.begin_shutdown().await;
    });
    StatusCode::NO_CONTENT
}
