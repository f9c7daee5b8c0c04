use serde_json::Value;
use std::sync::Arc;

use async_trait::async_trait;

/// A capability the ReAct executor may call between model turns.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn call(&self, input: &str) -> String;
}

struct CodeInterpreter;

#[async_trait]
impl Tool for CodeInterpreter {
    fn name(&self) -> &str {
        "code_interpreter"
    }

    fn description(&self) -> &str {
        "Execute code snippets"
    }

    async fn call(&self, _input: &str) -> String {
        "Code execution not implemented".to_string()
    }
}

/// Resolve the ordered tool descriptors of an agent config. A descriptor is
/// either a bare type string or an object with a non-empty `type`.
pub fn resolve_tools(descriptors: &[Value]) -> Result<Vec<Arc<dyn Tool>>, String> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(descriptors.len());
    for (idx, descriptor) in descriptors.iter().enumerate() {
        let tool_type = match descriptor {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj.get("type").and_then(Value::as_str).unwrap_or(""),
            _ => "",
        };
        let tool: Arc<dyn Tool> = match tool_type.trim() {
            "" => return Err(format!("tool #{idx} has no type: {descriptor}")),
            "code_interpreter" => Arc::new(CodeInterpreter),
            other => return Err(format!("tool #{idx} has unsupported type '{other}'")),
        };
        if tools.iter().any(|t| t.name() == tool.name()) {
            return Err(format!("tool '{}' is listed twice", tool.name()));
        }
        tools.push(tool);
    }
    Ok(tools)
}
