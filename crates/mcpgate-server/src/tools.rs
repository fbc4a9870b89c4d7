//! The tool registry's dispatch contract (spec.md §1 "Explicitly out of
//! scope": tool/prompt/resource *content* is a trivial external registry
//! that calls into the core; only the `tools/call` contract in §4.7 is
//! specified here). Concrete tools are a collaborator's problem; this module
//! only defines the seam the dispatcher calls through.

use crate::request_context::RequestContext;
use async_trait::async_trait;
use dashmap::DashMap;
use mcpgate_core::GateResult;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// A single content block in a tool result. Only text is needed for the
/// dispatch contract; richer content types are a collaborator concern.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// `tools/call` result shape (spec.md §4.7).
#[derive(Debug, Clone, Serialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: message.into() }],
            is_error: true,
            structured_content: None,
        }
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: message.into() }],
            is_error: false,
            structured_content: None,
        }
    }
}

/// The JSON-Schema-convertible tool definition returned by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

/// A registered tool handler (spec.md §4.7 `tools/call` contract). Input
/// validation against `tool_definition().input_schema` happens in the
/// dispatcher, not here, so every handler gets it uniformly.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: &RequestContext) -> GateResult<CallToolResult>;

    fn tool_definition(&self) -> Tool;
}

/// A trivial in-memory registry. Concrete deployments populate this with
/// their own tools; the dispatcher only needs `list`/`get`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.tool_definition().name.clone();
        self.tools.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|e| e.value().tool_definition()).collect()
    }
}

/// Validates `arguments` against a tool's declared JSON Schema (spec.md
/// §4.7: "Validate input args against the tool's declared schema; on
/// failure return `{content: [text: "Invalid input: …"], isError: true}`").
pub fn validate_input_schema(schema: &Value, arguments: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return Err(format!("invalid tool schema: {e}")),
    };
    let errors: Vec<String> = validator.iter_errors(arguments).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value, _ctx: &RequestContext) -> GateResult<CallToolResult> {
            Ok(CallToolResult::text(arguments.to_string()))
        }

        fn tool_definition(&self) -> Tool {
            Tool {
                name: "echo".into(),
                description: Some("echoes its input".into()),
                input_schema: serde_json::json!({"type": "object"}),
                output_schema: None,
                annotations: None,
            }
        }
    }

    #[test]
    fn registry_round_trips_a_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn schema_validation_rejects_wrong_type() {
        let schema = serde_json::json!({"type": "object", "required": ["x"]});
        assert!(validate_input_schema(&schema, &serde_json::json!({"x": 1})).is_ok());
        assert!(validate_input_schema(&schema, &serde_json::json!([])).is_err());
        assert!(validate_input_schema(&schema, &serde_json::json!({})).is_err());
    }
}
