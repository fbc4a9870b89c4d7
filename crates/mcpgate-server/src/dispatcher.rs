//! MCP Dispatcher (C7, spec.md §4.7): routes JSON-RPC methods/notifications,
//! owns the per-request cancellation handle, and negotiates protocol
//! version at `initialize`.

use crate::request_context::ContextRegistry;
use crate::session::{SessionPatch, SessionStore};
use crate::tools::{CallToolResult, ToolRegistry, validate_input_schema};
use mcpgate_auth::ResolvedAuth;
use mcpgate_core::GateError;
use mcpgate_protocol::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use mcpgate_protocol::pagination::paginate_array;
use mcpgate_protocol::versions::negotiate_version;
use serde_json::{Value, json};
use std::sync::Arc;

/// Static server identity advertised at `initialize`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub title: String,
    pub version: String,
    pub instructions: Option<String>,
}

const LOG_LEVELS: &[&str] = &["debug", "info", "notice", "warning", "error", "critical", "alert", "emergency"];

/// Outcome of dispatching one JSON-RPC item: a response to send, or nothing
/// for a notification (spec.md §4.7, §4.8 step 1).
pub enum DispatchOutcome {
    Response(JsonRpcResponse),
    NoResponse,
}

pub struct Dispatcher {
    pub sessions: Arc<SessionStore>,
    pub contexts: Arc<ContextRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub info: ServerInfo,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionStore>, contexts: Arc<ContextRegistry>, tools: Arc<ToolRegistry>, info: ServerInfo) -> Self {
        Self {
            sessions,
            contexts,
            tools,
            info,
        }
    }

    /// Dispatches a single JSON-RPC item. `session_id` is `None` only for a
    /// pre-session `initialize` call (spec.md §4.8 step 3).
    pub async fn dispatch(&self, request: JsonRpcRequest, session_id: Option<String>, auth: ResolvedAuth) -> DispatchOutcome {
        let Some(id) = request.id.clone() else {
            self.dispatch_notification(&request.method, request.params, session_id.as_deref());
            return DispatchOutcome::NoResponse;
        };

        let ctx = self.contexts.create(id.to_string(), session_id.clone(), auth);
        let result = ctx
            .clone()
            .scope(self.dispatch_method(&request.method, request.params, session_id.as_deref(), &ctx))
            .await;
        self.contexts.delete(&id.to_string());

        let response = match result {
            Ok(value) => JsonRpcResponse::success(value, id),
            Err(err) => JsonRpcResponse::error_response(JsonRpcError::from(&err), Some(id)),
        };
        DispatchOutcome::Response(response)
    }

    fn dispatch_notification(&self, method: &str, params: Option<Value>, session_id: Option<&str>) {
        match method {
            "notifications/initialized" => {
                if let Some(sid) = session_id
                    && let Err(e) = self.sessions.update(
                        sid,
                        SessionPatch {
                            initialized: Some(true),
                            protocol_version: None,
                        },
                    )
                {
                    tracing::debug!(error = %e, session_id = sid, "initialized notification for unknown session");
                }
            }
            "notifications/cancelled" => {
                let request_id = params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                let reason = params.as_ref().and_then(|p| p.get("reason")).and_then(|v| v.as_str()).map(str::to_string);
                match request_id {
                    Some(rid) if self.contexts.cancel(&rid, reason) => {}
                    Some(rid) => tracing::debug!(request_id = rid, "notifications/cancelled for unknown requestId"),
                    None => tracing::debug!("notifications/cancelled missing requestId"),
                }
            }
            other => tracing::debug!(method = other, "unhandled notification"),
        }
    }

    async fn dispatch_method(&self, method: &str, params: Option<Value>, session_id: Option<&str>, ctx: &crate::request_context::RequestContext) -> Result<Value, GateError> {
        match method {
            "initialize" => self.handle_initialize(params, session_id),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools.list() })),
            "tools/call" => self.handle_tools_call(params, ctx).await,
            "resources/list" => self.handle_paginated_list(params, &[] as &[Value], 100),
            "resources/templates/list" => self.handle_paginated_list(params, &[] as &[Value], 100),
            "prompts/list" => self.handle_paginated_list(params, &[] as &[Value], 50),
            "logging/setLevel" => self.handle_set_level(params),
            other => Err(GateError::method_not_found(other)),
        }
    }

    fn handle_initialize(&self, params: Option<Value>, session_id: Option<&str>) -> Result<Value, GateError> {
        let params = params.ok_or_else(|| GateError::invalid_params("initialize requires params"))?;
        let requested = params.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("");
        let negotiated = negotiate_version(requested);

        if let Some(sid) = session_id {
            let _ = self.sessions.update(
                sid,
                SessionPatch {
                    initialized: None,
                    protocol_version: Some(negotiated.to_string()),
                },
            );
        }

        Ok(json!({
            "protocolVersion": negotiated,
            "capabilities": {
                "logging": {},
                "prompts": { "listChanged": true },
                "resources": { "listChanged": true, "subscribe": true },
                "tools": { "listChanged": true },
            },
            "serverInfo": {
                "name": self.info.title,
                "version": self.info.version,
            },
            "instructions": self.info.instructions,
        }))
    }

    /// spec.md §4.7 `tools/call` contract: install the cancellation handle
    /// (already done by [`Dispatcher::dispatch`]'s `ContextRegistry::create`
    /// before this runs), validate input, invoke, map cancellation to the
    /// canonical error, and always let the caller's `contexts.delete` finally
    /// clause remove the handle.
    async fn handle_tools_call(&self, params: Option<Value>, ctx: &crate::request_context::RequestContext) -> Result<Value, GateError> {
        let params = params.ok_or_else(|| GateError::invalid_params("tools/call requires params"))?;
        let name = params.get("name").and_then(|v| v.as_str()).ok_or_else(|| GateError::invalid_params("tools/call requires a tool name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let Some(tool) = self.tools.get(name) else {
            return Err(GateError::invalid_params(format!("unknown tool: {name}")));
        };

        if let Err(e) = validate_input_schema(&tool.tool_definition().input_schema, &arguments) {
            return Ok(serde_json::to_value(CallToolResult::error(format!("Invalid input: {e}"))).expect("result serializes"));
        }

        ctx.cancellation.throw_if_cancelled()?;

        let call = tool.call(arguments, ctx);
        let result = tokio::select! {
            biased;
            () = ctx.cancellation.cancelled() => {
                return Err(GateError::cancelled());
            }
            result = call => result,
        };

        let has_output_schema = tool.tool_definition().output_schema.is_some();
        let mut result = result?;
        if has_output_schema && result.structured_content.is_none() {
            result.is_error = true;
        }

        serde_json::to_value(&result).map_err(GateError::from)
    }

    fn handle_paginated_list<T: Clone + serde::Serialize>(&self, params: Option<Value>, items: &[T], default_limit: usize) -> Result<Value, GateError> {
        let cursor = params.as_ref().and_then(|p| p.get("cursor")).and_then(|v| v.as_str());
        let page = paginate_array(items, cursor, default_limit)?;
        Ok(json!({
            "items": page.items,
            "nextCursor": page.next_cursor,
        }))
    }

    fn handle_set_level(&self, params: Option<Value>) -> Result<Value, GateError> {
        let level = params.as_ref().and_then(|p| p.get("level")).and_then(|v| v.as_str()).ok_or_else(|| GateError::invalid_params("logging/setLevel requires a level"))?;
        if !LOG_LEVELS.contains(&level) {
            return Err(GateError::invalid_params(format!("unknown log level: {level}")));
        }
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::new_session_id;
    use async_trait::async_trait;
    use mcpgate_protocol::jsonrpc::JsonRpcVersion;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(SessionStore::new()),
            Arc::new(ContextRegistry::new()),
            Arc::new(ToolRegistry::new()),
            ServerInfo {
                title: "test-gate".into(),
                version: "0.1.0".into(),
                instructions: None,
            },
        )
    }

    #[tokio::test]
    async fn initialize_negotiates_down_unknown_versions() {
        let dispatcher = dispatcher();
        let sid = new_session_id();
        dispatcher.sessions.create(sid.clone(), None);
        let request = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: "initialize".into(),
            params: Some(json!({ "protocolVersion": "2099-01-01", "clientInfo": { "name": "t", "version": "0" } })),
            id: Some(RequestId::Number(1)),
        };
        let DispatchOutcome::Response(resp) = dispatcher.dispatch(request, Some(sid), ResolvedAuth::default()).await else {
            panic!("expected a response");
        };
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dispatcher = dispatcher();
        let request = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: "nope/nope".into(),
            params: None,
            id: Some(RequestId::Number(1)),
        };
        let DispatchOutcome::Response(resp) = dispatcher.dispatch(request, None, ResolvedAuth::default()).await else {
            panic!("expected a response");
        };
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn notification_produces_no_response() {
        let dispatcher = dispatcher();
        let request = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: "notifications/initialized".into(),
            params: None,
            id: None,
        };
        match dispatcher.dispatch(request, None, ResolvedAuth::default()).await {
            DispatchOutcome::NoResponse => {}
            DispatchOutcome::Response(_) => panic!("notifications must not produce a response"),
        }
    }

    #[tokio::test]
    async fn tools_call_rejects_invalid_arguments() {
        struct NeedsX;
        #[async_trait]
        impl crate::tools::ToolHandler for NeedsX {
            async fn call(&self, _arguments: Value, _ctx: &crate::request_context::RequestContext) -> mcpgate_core::GateResult<CallToolResult> {
                Ok(CallToolResult::text("ok"))
            }
            fn tool_definition(&self) -> crate::tools::Tool {
                crate::tools::Tool {
                    name: "needs-x".into(),
                    description: None,
                    input_schema: json!({"type": "object", "required": ["x"]}),
                    output_schema: None,
                    annotations: None,
                }
            }
        }
        let dispatcher = dispatcher();
        dispatcher.tools.register(Arc::new(NeedsX));
        let request = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: "tools/call".into(),
            params: Some(json!({ "name": "needs-x", "arguments": {} })),
            id: Some(RequestId::Number(1)),
        };
        let DispatchOutcome::Response(resp) = dispatcher.dispatch(request, None, ResolvedAuth::default()).await else {
            panic!("expected a response");
        };
        assert!(resp.is_success());
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["result"]["isError"], json!(true));
    }

    #[tokio::test]
    async fn cancellation_races_are_reported_canonically() {
        struct Sleepy;
        #[async_trait]
        impl crate::tools::ToolHandler for Sleepy {
            async fn call(&self, _arguments: Value, _ctx: &crate::request_context::RequestContext) -> mcpgate_core::GateResult<CallToolResult> {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                Ok(CallToolResult::text("too slow"))
            }
            fn tool_definition(&self) -> crate::tools::Tool {
                crate::tools::Tool {
                    name: "sleepy".into(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                    output_schema: None,
                    annotations: None,
                }
            }
        }
        let dispatcher = Arc::new(dispatcher());
        dispatcher.tools.register(Arc::new(Sleepy));
        let request = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: "tools/call".into(),
            params: Some(json!({ "name": "sleepy", "arguments": {} })),
            id: Some(RequestId::Number(7)),
        };

        let dispatcher2 = Arc::clone(&dispatcher);
        let handle = tokio::spawn(async move { dispatcher2.dispatch(request, None, ResolvedAuth::default()).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(dispatcher.contexts.cancel("7", Some("abort".into())));

        let DispatchOutcome::Response(resp) = handle.await.unwrap() else {
            panic!("expected a response");
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["code"], json!(-32603));
        assert_eq!(value["error"]["message"], json!("Request was cancelled"));
    }
}
