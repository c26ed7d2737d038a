//! Handlers for the `/mcp` endpoint.

use super::ErrorResponse;
use crate::config::AppState;
use crate::session::SessionError;
use axum::{
    extract::State,
    http::{header::ACCEPT, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use orats_mcp::protocol::{JsonRpcError, JsonRpcResponse};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Header carrying the session id
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// POST /mcp: client-to-server messages
pub async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            let reply = JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e.to_string()));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    let outcome = match state.sessions.handle_post(session_id(&headers), message).await {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    let mut response = match outcome.reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    if let Some(id) = outcome.session_id {
        match HeaderValue::from_str(&id) {
            Ok(value) => {
                response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
            }
            Err(e) => tracing::error!(session_id = %id, error = %e, "Session id is not a valid header value"),
        }
    }

    response
}

/// GET /mcp: server-to-client notification stream
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let rx = match state.sessions.open_stream(session_id(&headers)) {
        Ok(rx) => rx,
        Err(e) => return e.into_response(),
    };

    let accepts_sse = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));
    if !accepts_sse {
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(ErrorResponse::new("Not Acceptable: client must accept text/event-stream")),
        )
            .into_response();
    }

    let stream = BroadcastStream::new(rx).filter_map(|message| match message {
        Ok(data) => Some(Ok::<_, Infallible>(Event::default().event("message").data(data))),
        Err(e) => {
            tracing::warn!(error = %e, "Notification stream lagged");
            None
        }
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
        .into_response()
}

/// DELETE /mcp: explicit session termination
pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.sessions.close(session_id(&headers)) {
        Ok(()) => Json(json!({"status": "session closed"})).into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SessionError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Handler(e) => {
                tracing::error!(error = %e, "Error handling MCP request");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Internal server error")),
                )
                    .into_response();
            }
            _ => StatusCode::BAD_REQUEST,
        };

        match self {
            SessionError::InitializationFailed(Some(reply)) => (status, Json(reply)).into_response(),
            other => (status, Json(ErrorResponse::new(other.to_string()))).into_response(),
        }
    }
}
