use crate::config::AppState;
use crate::middleware::{auth, rate_limit};
use anyhow::{Context, Result};
use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use orats_mcp::SERVER_NAME;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod mcp;

/// Start the HTTP server and run until interrupted
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let reaper = state.sessions.spawn_reaper();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("ORATS MCP Server (HTTP) listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);
    tracing::info!("MCP endpoint: http://{}/mcp", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let mcp_routes = Router::new()
        .route(
            "/mcp",
            post(mcp::handle_post)
                .get(mcp::handle_get)
                .delete(mcp::handle_delete),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .merge(mcp_routes)
        // Middleware
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit::enforce,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mcp::MCP_SESSION_ID_HEADER;
    use super::*;
    use crate::config::{RateLimitSettings, ServerConfig};
    use crate::middleware::rate_limit::RATELIMIT_REMAINING;
    use axum::body::{to_bytes, Body};
    use axum::extract::ConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use orats_core::UpstreamConfig;
    use serde_json::{json, Value};
    use tokio_stream::StreamExt;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "test-secret";

    fn offline_upstream() -> UpstreamConfig {
        UpstreamConfig::new(url::Url::parse("http://127.0.0.1:9/datav2").unwrap())
    }

    fn create_state(auth_token: Option<&str>, upstream: UpstreamConfig) -> AppState {
        AppState::new(
            &ServerConfig::default(),
            upstream,
            auth_token.map(str::to_string),
        )
        .unwrap()
    }

    fn initialize_body() -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            }
        })
        .to_string()
    }

    fn post_mcp(body: impl Into<String>, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, id);
        }
        builder.body(Body::from(body.into())).unwrap()
    }

    fn request(method: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri("/mcp")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(header::ACCEPT, "text/event-stream");
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn initialize(app: &Router) -> String {
        let response = app.clone().oneshot(post_mcp(initialize_body(), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[MCP_SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health_without_auth() {
        let app = create_router(create_state(Some(TOKEN), offline_upstream()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["server"], "orats-mcp-server");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_bearer_auth_on_mcp() {
        let app = create_router(create_state(Some(TOKEN), offline_upstream()));

        let missing = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(initialize_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(missing).await, json!({"error": "Unauthorized"}));

        let wrong = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::from(initialize_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app.oneshot(post_mcp(initialize_body(), None)).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_no_auth_token_accepts_all() {
        let app = create_router(create_state(None, offline_upstream()));

        let response = app
            .oneshot(
                Request::post("/mcp")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(initialize_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(MCP_SESSION_ID_HEADER));
    }

    #[tokio::test]
    async fn test_rate_limit_applies_before_auth() {
        let app = create_router(create_state(Some(TOKEN), offline_upstream()));
        let client = ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 40000)));

        for i in 0..60 {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/mcp")
                        .extension(client)
                        .body(Body::from(initialize_body()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(response.headers()[RATELIMIT_REMAINING], (59 - i).to_string().as_str());
        }

        let limited = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .extension(client)
                    .body(Body::from(initialize_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.headers().contains_key(header::RETRY_AFTER));

        // Other clients keep their own budget.
        let other = app
            .oneshot(
                Request::get("/health")
                    .extension(ConnectInfo(SocketAddr::from(([192, 0, 2, 8], 40000))))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_from_config() {
        let config = ServerConfig {
            rate_limit: RateLimitSettings {
                window_secs: 60,
                max_requests: 1,
            },
            ..Default::default()
        };
        let state = AppState::new(&config, offline_upstream(), None).unwrap();
        let app = create_router(state);

        let first = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_session_flow() {
        let app = create_router(create_state(Some(TOKEN), offline_upstream()));
        let id = initialize(&app).await;

        let initialized = app
            .clone()
            .oneshot(post_mcp(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        assert_eq!(initialized.status(), StatusCode::ACCEPTED);

        let list = app
            .clone()
            .oneshot(post_mcp(
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        assert!(!list.headers().contains_key(MCP_SESSION_ID_HEADER));
        let body = json_body(list).await;
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 26);

        let stream = app.clone().oneshot(request("GET", Some(&id))).await.unwrap();
        assert_eq!(stream.status(), StatusCode::OK);
        assert!(stream.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let deleted = app.clone().oneshot(request("DELETE", Some(&id))).await.unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);
        assert_eq!(json_body(deleted).await, json!({"status": "session closed"}));

        let after = app
            .oneshot(post_mcp(
                json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}).to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        assert_eq!(after.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_without_valid_session() {
        let state = create_state(Some(TOKEN), offline_upstream());
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_mcp(
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string(),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Bad request: no valid session"})
        );

        let response = app
            .clone()
            .oneshot(post_mcp(
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string(),
                Some("unknown-session"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(post_mcp("{not json", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], -32700);

        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_get_and_delete_require_known_session() {
        let state = create_state(Some(TOKEN), offline_upstream());
        let app = create_router(state.clone());

        for method in ["GET", "DELETE"] {
            for session in [None, Some("never-created")] {
                let response = app.clone().oneshot(request(method, session)).await.unwrap();
                assert_eq!(response.status(), StatusCode::BAD_REQUEST);
                assert_eq!(
                    json_body(response).await,
                    json!({"error": "Invalid or missing session ID"})
                );
            }
        }
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_log_notification_delivered_over_sse() {
        let app = create_router(create_state(Some(TOKEN), offline_upstream()));
        let id = initialize(&app).await;

        let set_level = app
            .clone()
            .oneshot(post_mcp(
                json!({
                    "jsonrpc": "2.0", "id": 2, "method": "logging/setLevel",
                    "params": {"level": "error"}
                })
                .to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        assert_eq!(set_level.status(), StatusCode::OK);

        let stream = app.clone().oneshot(request("GET", Some(&id))).await.unwrap();
        assert_eq!(stream.status(), StatusCode::OK);

        // No upstream token configured, so the call fails and logs at error level.
        let call = app
            .oneshot(post_mcp(
                json!({
                    "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                    "params": {"name": "cores", "arguments": {"ticker": "AAPL"}}
                })
                .to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(call).await["result"]["isError"], true);

        let mut frames = stream.into_body().into_data_stream();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let frame = String::from_utf8(frame.to_vec()).unwrap();

        assert!(frame.starts_with("event: message\n"));
        let data = frame
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let notification: Value = serde_json::from_str(data).unwrap();
        assert_eq!(notification["method"], "notifications/message");
        assert_eq!(notification["params"]["level"], "error");
        assert_eq!(notification["params"]["data"]["tool"], "cores");
    }

    #[tokio::test]
    async fn test_get_requires_event_stream_accept() {
        let app = create_router(create_state(Some(TOKEN), offline_upstream()));
        let id = initialize(&app).await;

        let response = app
            .oneshot(
                Request::get("/mcp")
                    .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                    .header(MCP_SESSION_ID_HEADER, id.as_str())
                    .header(header::ACCEPT, "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let state = create_state(Some(TOKEN), offline_upstream());
        let app = create_router(state.clone());

        let first = initialize(&app).await;
        let second = initialize(&app).await;
        assert_ne!(first, second);
        assert_eq!(state.sessions.len(), 2);

        app.clone().oneshot(request("DELETE", Some(&first))).await.unwrap();

        let response = app
            .oneshot(post_mcp(
                json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}).to_string(),
                Some(&second),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["result"], json!({}));
    }

    #[tokio::test]
    async fn test_tool_call_through_session() {
        let mock_server = MockServer::start().await;
        let body = json!({"data": [{"ticker": "AAPL", "strike": 190.0}]});

        Mock::given(method("GET"))
            .and(path("/datav2/live/strikes"))
            .and(query_param("token", "orats-token"))
            .and(query_param("ticker", "AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datav2/cores"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let upstream = UpstreamConfig::new(
            url::Url::parse(&format!("{}/datav2", mock_server.uri())).unwrap(),
        )
        .with_api_token("orats-token");
        let app = create_router(create_state(Some(TOKEN), upstream));
        let id = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post_mcp(
                json!({
                    "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": {"name": "live_strikes", "arguments": {"ticker": "AAPL"}}
                })
                .to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        let reply = json_body(response).await;
        assert!(reply["result"].get("isError").is_none());
        assert_eq!(
            reply["result"]["content"][0]["text"],
            serde_json::to_string_pretty(&body).unwrap()
        );

        let response = app
            .oneshot(post_mcp(
                json!({
                    "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                    "params": {"name": "cores", "arguments": {"ticker": "AAPL"}}
                })
                .to_string(),
                Some(&id),
            ))
            .await
            .unwrap();
        let reply = json_body(response).await;
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(
            reply["result"]["content"][0]["text"],
            "Error: API request failed: 503 Service Unavailable"
        );
    }
}
