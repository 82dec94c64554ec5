//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::anthropic::{self, MessagesRequest};
use super::content::{self, ContentKind};
use super::server::AppState;
use super::stream::{relay, Protocol, RelayContext, RelayOutcome};
use super::types::{CanonicalRequest, ChatCompletionRequest, Message};
use crate::error::{Error, Result};

/// Header carrying the shared token for Claude-style clients.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Check the inbound shared token, when one is configured.
///
/// Accepts `Authorization: Bearer <token>`, a bare `Authorization: <token>`,
/// or `x-api-key: <token>`.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = &state.config.server.auth_token else {
        return Ok(());
    };
    let expected = expected.expose_secret();

    let presented = [header::AUTHORIZATION.as_str(), API_KEY_HEADER]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.trim())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim());

    for token in presented {
        if token == expected {
            return Ok(());
        }
    }
    tracing::warn!("Rejected request with missing or invalid token");
    Err(Error::Unauthorized)
}

/// Turn an unreadable request body into a validation error.
fn body_error(rejection: JsonRejection) -> Error {
    Error::Validation(format!("Invalid request body: {}", rejection.body_text()))
}

/// Select, dispatch and relay one canonical request.
///
/// Session history is prepended before dispatch and the new turns are
/// remembered immediately; the assistant turn is added by the relay once the
/// upstream completes.
async fn execute_request(
    state: &AppState,
    request: CanonicalRequest,
    protocol: Protocol,
) -> Result<RelayOutcome> {
    state.selector.refresh().await;

    let kind = ContentKind::of(&request.messages);
    let model = state.selector.select(request.model.as_deref(), kind)?;

    let session_key = request.session_key();
    let prompt: Vec<Message> = match &session_key {
        Some(key) => {
            let mut history = state.sessions.get(key);
            tracing::debug!(session = %key, prior = history.len(), "Loaded session history");
            state.sessions.append(key, request.messages.iter().cloned());
            history.extend(request.messages);
            history
        }
        None => request.messages,
    };

    tracing::info!(
        model = %model,
        requested = request.model.as_deref().unwrap_or("auto"),
        kind = ?kind,
        stream = request.stream,
        messages = prompt.len(),
        "Dispatching chat request"
    );

    let upstream = state
        .upstream
        .dispatch(&model, &prompt, &request.params)
        .await?;

    let ctx = RelayContext {
        model,
        protocol,
        prompt,
        session: session_key.map(|key| (state.sessions.clone(), key)),
        health: state.selector.health().clone(),
        completion_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        created: chrono::Utc::now().timestamp(),
    };
    relay(upstream, ctx, request.stream).await
}

async fn handle_chat(
    state: &AppState,
    headers: &HeaderMap,
    request: ChatCompletionRequest,
) -> Result<Response> {
    authorize(state, headers)?;
    let request = content::to_canonical(request)?;
    match execute_request(state, request, Protocol::OpenAi).await? {
        RelayOutcome::Streaming(response) => Ok(response),
        RelayOutcome::Buffered(completion) => Ok(Json(completion).into_response()),
    }
}

async fn handle_messages(
    state: &AppState,
    headers: &HeaderMap,
    request: MessagesRequest,
) -> Result<Response> {
    authorize(state, headers)?;
    let request = anthropic::to_canonical(request)?;
    match execute_request(state, request, Protocol::Anthropic).await? {
        RelayOutcome::Streaming(response) => Ok(response),
        RelayOutcome::Buffered(completion) => {
            Ok(Json(anthropic::to_claude_response(&completion)).into_response())
        }
    }
}

/// Handle POST on the configured chat completion paths
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => handle_chat(&state, &headers, request).await,
        Err(rejection) => authorize(&state, &headers).and(Err(body_error(rejection))),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Handle POST /v1/messages
pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<MessagesRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => handle_messages(&state, &headers, request).await,
        Err(rejection) => authorize(&state, &headers).and(Err(body_error(rejection))),
    };
    result.unwrap_or_else(anthropic::error_response)
}

/// Handle GET /v1/models
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    state.selector.refresh().await;
    Json(state.selector.registry().snapshot())
}

#[derive(Debug, Deserialize)]
pub struct ClearSessionRequest {
    #[serde(default)]
    session_id: Option<String>,
}

/// Handle POST /v1/session/clear
pub async fn clear_session(
    State(state): State<AppState>,
    Json(request): Json<ClearSessionRequest>,
) -> Result<Json<serde_json::Value>> {
    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Validation("session_id is required".to_string()))?;

    state.sessions.clear(&session_id);
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("Session {} cleared", session_id)
    })))
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "working",
        "service": "degpt-gateway",
        "active_endpoint": state.upstream.active_endpoint(),
        "sessions": state.sessions.len(),
        "models": state.selector.health().snapshot(),
    }))
}
