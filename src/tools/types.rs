use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

/// A tool as configured: what the model is told about it plus the script
/// that backs it. The script reference never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: FunctionSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script: String,
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn to_openai_schema(&self) -> Value {
        serde_json::json!({
            "type": self.tool_type,
            "function": {
                "name": self.function.name,
                "description": self.function.description,
                "parameters": self.function.parameters
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

fn default_tool_type() -> String {
    "function".to_string()
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOKUP: &str = r#"{
        "type": "function",
        "function": {
            "name": "lookup",
            "description": "Look a term up",
            "parameters": {
                "type": "object",
                "properties": {"q": {"type": "string"}},
                "required": ["q"]
            }
        },
        "script": "lookup.sh"
    }"#;

    #[test]
    fn test_parse_definition() {
        let tool: ToolDefinition = serde_json::from_str(LOOKUP).unwrap();
        assert_eq!(tool.name(), "lookup");
        assert_eq!(tool.script, "lookup.sh");
        assert_eq!(tool.function.parameters["required"][0], "q");
    }

    #[test]
    fn test_defaults() {
        let tool: ToolDefinition =
            serde_json::from_str(r#"{"function":{"name":"ping"}}"#).unwrap();
        assert_eq!(tool.tool_type, "function");
        assert!(tool.function.description.is_empty());
        assert_eq!(tool.function.parameters["type"], "object");
        assert!(tool.script.is_empty());
    }

    #[test]
    fn test_openai_schema_strips_script() {
        let tool: ToolDefinition = serde_json::from_str(LOOKUP).unwrap();
        let schema = tool.to_openai_schema();

        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "lookup");
        assert_eq!(schema["function"]["description"], "Look a term up");
        assert!(schema.get("script").is_none());
        assert!(!schema.to_string().contains("lookup.sh"));
    }
}
