//! Tool abstraction for ReAct agents.
//!
//! Tools are black boxes to the runtime: a name, a JSON schema describing
//! the expected input and an async `invoke`. Inputs are validated against
//! the schema before invocation; a mismatch becomes coaching feedback to
//! the agent rather than a tool call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Reserved action name: the agent asks itself a question instead of
/// calling a tool.
pub const SELF_QUESTION: &str = "self_question";

/// Reserved action name: the agent refuses the task and blocks it.
pub const BLOCK_TASK: &str = "block_task";

/// Tool errors surfaced to the ReAct loop as recoverable feedback.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Tool trait - an external capability bound to an agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, matched against the agent's `action` field.
    fn name(&self) -> &str;

    /// Description shown in the agent's tool catalog.
    fn description(&self) -> &str;

    /// JSON schema for the tool input object.
    fn schema(&self) -> Value;

    /// Invoke the tool with a schema-valid input.
    async fn invoke(&self, input: Value) -> Result<Value, ToolError>;
}

/// Registry of tools available to a team.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Validate a tool input against its declared schema.
///
/// Supports the subset the runtime relies on: `type`, `required`,
/// `properties`, `enum`, `const`, `items` and `additionalProperties:false`.
/// A null schema accepts anything.
pub fn check_input(input: &Value, schema: &Value) -> Result<(), ToolError> {
    if schema.is_null() {
        return Ok(());
    }
    check_node(input, schema, "$").map_err(ToolError::InvalidInput)
}

fn check_node(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let spec = schema
        .as_object()
        .ok_or_else(|| format!("schema at '{}' must be an object", path))?;

    if let Some(expected) = spec.get("type") {
        check_type(value, expected, path)?;
    }

    if let Some(constant) = spec.get("const") {
        if value != constant {
            return Err(format!("{} must equal const {}", path, constant));
        }
    }

    if let Some(allowed) = spec.get("enum").and_then(|v| v.as_array()) {
        if !allowed.iter().any(|candidate| candidate == value) {
            return Err(format!("{} is not one of the allowed enum values", path));
        }
    }

    if let Some(required) = spec.get("required").and_then(|v| v.as_array()) {
        let object = value
            .as_object()
            .ok_or_else(|| format!("{} must be an object", path))?;
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !object.contains_key(field) {
                return Err(format!("{} missing required field '{}'", path, field));
            }
        }
    }

    if let Some(properties) = spec.get("properties").and_then(|v| v.as_object()) {
        let object = value
            .as_object()
            .ok_or_else(|| format!("{} must be an object", path))?;
        for (field, field_schema) in properties {
            if let Some(child) = object.get(field) {
                check_node(child, field_schema, &format!("{}.{}", path, field))?;
            }
        }
        if spec.get("additionalProperties").and_then(|v| v.as_bool()) == Some(false) {
            for field in object.keys() {
                if !properties.contains_key(field) {
                    return Err(format!("{} contains unknown field '{}'", path, field));
                }
            }
        }
    }

    if let Some(item_schema) = spec.get("items") {
        let array = value
            .as_array()
            .ok_or_else(|| format!("{} must be an array", path))?;
        for (idx, item) in array.iter().enumerate() {
            check_node(item, item_schema, &format!("{}[{}]", path, idx))?;
        }
    }

    Ok(())
}

fn check_type(value: &Value, expected: &Value, path: &str) -> Result<(), String> {
    fn matches(name: &str, value: &Value) -> bool {
        match name {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => false,
        }
    }

    match expected {
        Value::String(name) if matches(name, value) => Ok(()),
        Value::String(name) => Err(format!("{} expected type '{}'", path, name)),
        Value::Array(names) => {
            if names
                .iter()
                .filter_map(|n| n.as_str())
                .any(|n| matches(n, value))
            {
                Ok(())
            } else {
                Err(format!("{} did not match any allowed type", path))
            }
        }
        _ => Err(format!("{} schema.type must be string or array", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "repeat the message"
        }

        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            })
        }

        async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
            Ok(input["message"].clone())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("ghost").is_none());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_check_input_accepts_valid_object() {
        let schema = EchoTool.schema();
        assert!(check_input(&json!({"message": "hi"}), &schema).is_ok());
    }

    #[test]
    fn test_check_input_rejects_missing_required() {
        let schema = EchoTool.schema();
        let err = check_input(&json!({}), &schema).unwrap_err();
        assert!(err.to_string().contains("missing required field 'message'"));
    }

    #[test]
    fn test_check_input_rejects_wrong_type() {
        let schema = EchoTool.schema();
        let err = check_input(&json!({"message": 42}), &schema).unwrap_err();
        assert!(err.to_string().contains("expected type 'string'"));
    }

    #[test]
    fn test_check_input_rejects_unknown_field_when_closed() {
        let schema = json!({
            "type": "object",
            "properties": { "q": { "type": "string" } },
            "additionalProperties": false
        });
        let err = check_input(&json!({"q": "x", "extra": 1}), &schema).unwrap_err();
        assert!(err.to_string().contains("unknown field 'extra'"));
    }

    #[test]
    fn test_check_input_validates_array_items_and_enum() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": { "enum": ["fast", "slow"] },
                "values": { "type": "array", "items": { "type": "integer" } }
            }
        });
        assert!(check_input(&json!({"mode": "fast", "values": [1, 2]}), &schema).is_ok());
        assert!(check_input(&json!({"mode": "warp"}), &schema).is_err());
        assert!(check_input(&json!({"values": [1, "x"]}), &schema).is_err());
    }

    #[test]
    fn test_null_schema_accepts_anything() {
        assert!(check_input(&json!({"anything": true}), &Value::Null).is_ok());
    }

    #[test]
    fn test_invoke_echo() {
        tokio_test::block_on(async {
            let out = EchoTool.invoke(json!({"message": "hello"})).await.unwrap();
            assert_eq!(out, json!("hello"));
        });
    }
}
