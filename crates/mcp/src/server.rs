// MCP protocol handler: one instance per client session

use crate::dispatch::CallDispatcher;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, LoggingLevel, LoggingMessageParams, ServerCapabilities,
    ServerInfo, SetLevelParams, ToolsCapability, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Name reported in `serverInfo` and the health endpoint.
pub const SERVER_NAME: &str = "orats-mcp-server";

/// Buffered server-to-client notifications per session.
const NOTIFICATION_BUFFER: usize = 100;

type SessionIdGenerator = Box<dyn Fn() -> String + Send + Sync>;
type CloseCallback = Box<dyn FnOnce() + Send>;

/// Stateful JSON-RPC handler for a single session.
///
/// The handler owns the session id it hands out during `initialize`, the push channel
/// used for server-initiated notifications, and the close hook its owner registers.
/// Handlers never share mutable state; only the dispatcher is shared.
pub struct McpServer {
    dispatcher: Arc<CallDispatcher>,
    server_info: ServerInfo,
    session_ids: Option<SessionIdGenerator>,
    session_id: OnceLock<String>,
    initialized: AtomicBool,
    closed: AtomicBool,
    log_level: Mutex<Option<LoggingLevel>>,
    notifier: Mutex<Option<broadcast::Sender<String>>>,
    on_close: Mutex<Option<CloseCallback>>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<CallDispatcher>) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            dispatcher,
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            session_ids: None,
            session_id: OnceLock::new(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            log_level: Mutex::new(None),
            notifier: Mutex::new(Some(notifier)),
            on_close: Mutex::new(None),
        }
    }

    /// Assign a session id from `generator` when the client initializes.
    pub fn with_session_ids(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.session_ids = Some(Box::new(generator));
        self
    }

    /// Session id assigned by `initialize`, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.get().map(String::as_str)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register the hook fired once when this handler closes.
    ///
    /// Runs immediately if the handler is already closed.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        let mut slot = lock(&self.on_close);
        if self.is_closed() {
            drop(slot);
            callback();
            return;
        }
        *slot = Some(Box::new(callback));
    }

    /// Receive serialized server-initiated notifications.
    pub fn subscribe(&self) -> McpResult<broadcast::Receiver<String>> {
        lock(&self.notifier)
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(McpError::Closed)
    }

    /// Number of live notification receivers, 0 once closed.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.notifier)
            .as_ref()
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Push a `notifications/message` entry if the client asked for this level.
    pub fn notify_log(&self, level: LoggingLevel, data: Value) {
        match *lock(&self.log_level) {
            Some(min) if level >= min => {}
            _ => return,
        }

        let params = LoggingMessageParams {
            level,
            logger: Some(SERVER_NAME.to_string()),
            data,
        };
        let Ok(params) = serde_json::to_value(params) else {
            return;
        };
        let Ok(message) =
            serde_json::to_string(&JsonRpcRequest::notification("notifications/message", params))
        else {
            return;
        };

        if let Some(tx) = lock(&self.notifier).as_ref() {
            // No subscriber is not an error.
            let _ = tx.send(message);
        }
    }

    /// Close the handler: drop the push channel and fire the close hook.
    pub fn close(&self) -> McpResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(McpError::AlreadyClosed);
        }

        lock(&self.notifier).take();
        let callback = lock(&self.on_close).take();
        if let Some(callback) = callback {
            callback();
        }

        info!(session_id = ?self.session_id(), "Session closed");
        Ok(())
    }

    /// Handle a single JSON-RPC message or a batch.
    ///
    /// Returns `None` when nothing needs to be sent back (notifications only).
    pub async fn handle_message(&self, message: Value) -> McpResult<Option<Value>> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }

        match message {
            Value::Array(batch) => {
                if batch.is_empty() {
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::invalid_request("empty batch"),
                    );
                    return Ok(Some(serde_json::to_value(response)?));
                }

                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = self.handle_single(item).await {
                        responses.push(response);
                    }
                }

                if responses.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(serde_json::to_value(responses)?))
                }
            }
            single => match self.handle_single(single).await {
                Some(response) => Ok(Some(serde_json::to_value(response)?)),
                None => Ok(None),
            },
        }
    }

    async fn handle_single(&self, message: Value) -> Option<JsonRpcResponse> {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(e.to_string()),
            )),
        }
    }

    /// Handle one request or notification.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            self.handle_notification(&request);
            return None;
        };

        debug!(method = %request.method, session_id = ?self.session_id(), "Handling request");

        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(request.params).await,
            "logging/setLevel" => self.set_level(request.params),
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn handle_notification(&self, notification: &JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                debug!(session_id = ?self.session_id(), "Client finished initialization")
            }
            "notifications/cancelled" => debug!("Client cancelled a request"),
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid initialize params: {}", e)))?;

        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(JsonRpcError::invalid_request("Server already initialized"));
        }

        if let Some(generate) = &self.session_ids {
            let _ = self.session_id.set(generate());
        }

        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version
        } else {
            LATEST_PROTOCOL_VERSION.to_string()
        };

        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol = %protocol_version,
            session_id = ?self.session_id(),
            "Client initialized"
        );

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                logging: Some(json!({})),
            },
            server_info: self.server_info.clone(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.dispatcher.list_tools(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)))?;

        let result = self.dispatcher.dispatch(&params.name, &params.arguments).await;

        if result.is_error() {
            self.notify_log(
                LoggingLevel::Error,
                json!({"tool": params.name, "error": result.joined_text()}),
            );
        } else {
            self.notify_log(LoggingLevel::Debug, json!({"tool": params.name, "status": "ok"}));
        }

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn set_level(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: SetLevelParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid logging level: {}", e)))?;
        *lock(&self.log_level) = Some(params.level);
        Ok(json!({}))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
