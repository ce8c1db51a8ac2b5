//! # tabmux-rpc — JSON-RPC 2.0 method dispatcher and tool registry
//!
//! Routes framed JSON-RPC requests to a fixed method set: `initialize`,
//! `tools/list`, `tools/call`, `sessions/list`, `sessions/create`,
//! `sessions/delete`. Tool handlers are object-safe ([`ToolHandler`]) so
//! any tool source can be registered behind `Arc<dyn ToolHandler>`, the
//! same shape `neuron-tool`'s `ToolDyn` uses for model-facing tools.
//!
//! Tool-level failures never become RPC errors: a handler reports failure
//! by returning a [`ToolResult`] with `is_error: true`. Only protocol-level
//! violations (unknown method, malformed params) become an [`RpcError`].

#![deny(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabmux_core::ToolResult;
use tabmux_sessions::{CreateSessionOpts, SessionError, SessionRegistry};
use thiserror::Error;

/// Numeric JSON-RPC 2.0 error codes, plus the domain-specific codes this
/// dispatcher adds on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum RpcErrorCode {
    /// Invalid JSON was received.
    Parse = -32700,
    /// The JSON sent is not a valid request object.
    InvalidRequest = -32600,
    /// The requested method does not exist.
    MethodNotFound = -32601,
    /// Invalid method parameters.
    InvalidParams = -32602,
    /// Internal error.
    Internal = -32603,
    /// No session exists with the given id.
    SessionNotFound = -32001,
    /// No tab exists with the given id.
    TabNotFound = -32002,
    /// The browser backend rejected a CDP call.
    CdpError = -32003,
    /// The caller is not permitted to perform this operation.
    PermissionDenied = -32004,
}

/// A dispatcher-level error, convertible straight into a JSON-RPC `error`
/// object.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request body did not parse as JSON-RPC.
    #[error("parse error: {0}")]
    Parse(String),

    /// `method` did not match any registered route.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// `params` was missing a required field or had the wrong shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// `sessionId` did not resolve (only returned by routes that require
    /// an existing session, e.g. `sessions/delete`).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Something else went wrong inside a route handler.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// The numeric code this error maps to.
    pub fn code(&self) -> RpcErrorCode {
        match self {
            RpcError::Parse(_) => RpcErrorCode::Parse,
            RpcError::MethodNotFound(_) => RpcErrorCode::MethodNotFound,
            RpcError::InvalidParams(_) => RpcErrorCode::InvalidParams,
            RpcError::Session(SessionError::NotFound(_)) => RpcErrorCode::SessionNotFound,
            RpcError::Session(_) => RpcErrorCode::CdpError,
            RpcError::Internal(_) => RpcErrorCode::Internal,
        }
    }

    fn into_response_error(self) -> ResponseError {
        let code = self.code() as i64;
        ResponseError {
            code,
            message: self.to_string(),
            data: None,
        }
    }
}

/// A JSON-RPC 2.0 request object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id, echoed back on the response.
    pub id: Value,
    /// The method name to invoke.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default)]
    pub params: Value,
}

/// The `error` field of a JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseError {
    /// Numeric error code (see [`RpcErrorCode`]).
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response object. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoes the request id.
    pub id: Value,
    /// The method's result, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: None,
            error: Some(error.into_response_error()),
        }
    }
}

/// Object-safe trait for one registered tool. Handlers receive the calling
/// session's id (auto-created if unknown) plus raw JSON arguments, and
/// must not mutate session-registry state directly — they reach the
/// browser through whatever collaborator services the core exposes to
/// them (e.g. `SessionRegistry::execute_cdp`).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool's unique name, as exposed via `tools/list`.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input arguments.
    fn input_schema(&self) -> Value;

    /// Invoke the tool. Failures the caller should see are reported as
    /// `ToolResult::error(...)`, not as an `Err` — only a handler bug that
    /// truly can't produce a result should return `Err`.
    async fn call(&self, session_id: &str, args: Value) -> Result<ToolResult, RpcError>;
}

/// Registry of tools available to the dispatcher, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, overwriting any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.get(name)
    }

    /// Definitions of every registered tool, in `tools/list` shape.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.input_schema(),
                })
            })
            .collect()
    }
}

/// Routes JSON-RPC requests to the fixed `initialize`/`tools/*`/`sessions/*`
/// method set, over a [`ToolRegistry`] and a [`SessionRegistry`].
pub struct RpcDispatcher {
    tools: ToolRegistry,
    sessions: Arc<SessionRegistry>,
    server_name: String,
    server_version: String,
    protocol_version: &'static str,
}

impl RpcDispatcher {
    /// Build a dispatcher over the given tool and session registries.
    pub fn new(tools: ToolRegistry, sessions: Arc<SessionRegistry>, config: &tabmux_core::CoreConfig) -> Self {
        Self {
            tools,
            sessions,
            server_name: "tabmux".to_owned(),
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
            protocol_version: config.protocol_version,
        }
    }

    /// Handle one already-parsed JSON-RPC request, producing a response
    /// that always carries the original request id.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        if request.jsonrpc != "2.0" {
            return RpcResponse::err(
                request.id,
                RpcError::InvalidParams("jsonrpc must be \"2.0\"".to_owned()),
            );
        }
        let id = request.id.clone();
        match self.route(request).await {
            Ok(result) => RpcResponse::ok(id, result),
            Err(e) => RpcResponse::err(id, e),
        }
    }

    /// Parse one line-delimited JSON-RPC request and handle it, combining
    /// [`RpcDispatcher::handle`] with the parse step so transports don't
    /// have to special-case malformed bodies.
    pub async fn handle_raw(&self, raw: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => RpcResponse::err(Value::Null, RpcError::Parse(e.to_string())),
        }
    }

    async fn route(&self, request: RpcRequest) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "tools/list" => Ok(json!({ "tools": self.tools.definitions() })),
            "tools/call" => self.tools_call(request.params).await,
            "sessions/list" => Ok(self.sessions_list().await),
            "sessions/create" => Ok(self.sessions_create(request.params).await),
            "sessions/delete" => self.sessions_delete(request.params).await,
            other => Err(RpcError::MethodNotFound(other.to_owned())),
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": self.protocol_version,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": self.server_name, "version": self.server_version },
        })
    }

    async fn tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidParams("missing \"name\"".to_owned()))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let session_id = arguments
            .get("sessionId")
            .and_then(Value::as_str)
            .or_else(|| params.get("sessionId").and_then(Value::as_str))
            .ok_or_else(|| RpcError::InvalidParams("missing \"sessionId\"".to_owned()))?;

        // unknown sessionId is not an error: tools/call auto-creates it.
        self.sessions.get_or_create(&tabmux_core::SessionId::from(session_id)).await;

        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RpcError::MethodNotFound(format!("tool {name}")))?;

        let result = tool.call(session_id, arguments).await?;
        Ok(serde_json::to_value(result).map_err(|e| RpcError::Internal(e.to_string()))?)
    }

    async fn sessions_list(&self) -> Value {
        let sessions: Vec<Value> = self
            .sessions
            .list()
            .await
            .into_iter()
            .map(|s| json!({ "id": s.id.as_str(), "name": s.name }))
            .collect();
        json!({ "sessions": sessions })
    }

    async fn sessions_create(&self, params: Value) -> Value {
        let opts = CreateSessionOpts {
            id: params.get("id").and_then(Value::as_str).map(str::to_owned),
            name: params.get("name").and_then(Value::as_str).map(str::to_owned),
        };
        let session = self.sessions.create(opts).await;
        json!({ "id": session.id.as_str(), "name": session.name })
    }

    async fn sessions_delete(&self, params: Value) -> Result<Value, RpcError> {
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidParams("missing \"id\"".to_owned()))?;
        let session_id = tabmux_core::SessionId::from(id);
        if self.sessions.get(&session_id).await.is_none() {
            return Err(RpcError::Session(SessionError::NotFound(session_id)));
        }
        self.sessions.delete(&session_id).await;
        Ok(json!({ "deleted": true }))
    }
}
