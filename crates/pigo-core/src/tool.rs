use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::as_integer;
use crate::context::Ctx;
use crate::result::ToolResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// The OpenAI function-calling wire shape.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(
        mut self,
        name: impl Into<String>,
        schema: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl PropertySchema {
    fn typed(schema_type: &str, description: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: Some(description.into()),
            enum_values: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn enum_string(description: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            schema_type: "string".to_string(),
            description: Some(description.into()),
            enum_values: Some(values),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self.schema_type.as_str() {
            "string" => {
                let Some(s) = value.as_str() else { return false };
                match &self.enum_values {
                    Some(allowed) => allowed.iter().any(|v| v == s),
                    None => true,
                }
            }
            "integer" => as_integer(value).is_some(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    /// Execute with validated arguments. Failures come back as
    /// `ToolResult::error(..)`; implementations never panic on purpose and
    /// never return `Err` through the registry.
    async fn execute(&self, ctx: &Ctx, args: Value) -> ToolResult;
}

/// Thread-safe name -> tool map. Dispatch takes a read lock only long enough
/// to clone the `Arc` out; registration write-locks (normally startup only).
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("tool registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let guard = self.tools.read().expect("tool registry lock poisoned");
        let mut defs: Vec<ToolDefinition> = guard.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Parse, validate, and dispatch a raw tool-call payload.
    ///
    /// Every failure mode (unknown tool, malformed JSON, schema violation,
    /// tool panic) is converted into a `ToolResult::error`, keeping the
    /// agent loop free of exceptional paths.
    pub async fn execute(&self, ctx: &Ctx, name: &str, raw_args: &str) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("unknown tool '{}'", name));
        };

        let args: Value = if raw_args.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(raw_args) {
                Ok(v) => v,
                Err(e) => {
                    return ToolResult::error(format!(
                        "{}: invalid arguments JSON: {}",
                        name, e
                    ));
                }
            }
        };

        let definition = tool.definition();
        if let Err(msg) = validate_args(&definition.parameters, &args) {
            return ToolResult::error(format!("{}: {}", name, msg));
        }

        match std::panic::AssertUnwindSafe(tool.execute(ctx, args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = name, panic = %detail, "Tool panicked");
                ToolResult::error(format!("{}: internal error: {}", name, detail))
            }
        }
    }
}

fn validate_args(schema: &ToolParameters, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    for field in &schema.required {
        match obj.get(field) {
            None | Some(Value::Null) => {
                return Err(format!("missing required field '{}'", field));
            }
            Some(_) => {}
        }
    }

    for (field, value) in obj {
        if value.is_null() {
            continue;
        }
        if let Some(prop) = schema.properties.get(field) {
            if !prop.matches(value) {
                return Err(format!(
                    "field '{}' must be of type {}",
                    field, prop.schema_type
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument back"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name(), self.description()).with_parameters(
                ToolParameters::new()
                    .add_property("text", PropertySchema::string("Text to echo"), true)
                    .add_property("count", PropertySchema::integer("Repeat count"), false),
            )
        }

        async fn execute(&self, _ctx: &Ctx, args: Value) -> ToolResult {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            ToolResult::result(text.to_string())
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name(), self.description())
        }

        async fn execute(&self, _ctx: &Ctx, _args: Value) -> ToolResult {
            panic!("deliberate");
        }
    }

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(PanicTool));
        registry
    }

    #[test]
    fn test_definitions_wire_shape() {
        let defs = registry().definitions();
        let echo = defs.iter().find(|d| d.name == "echo").unwrap();
        let wire = echo.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "echo");
        assert_eq!(wire["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let ctx = Ctx::new();
        let result = registry().execute(&ctx, "echo", r#"{"text":"hi"}"#).await;
        assert!(!result.is_error);
        assert_eq!(result.for_llm, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let ctx = Ctx::new();
        let result = registry().execute(&ctx, "nope", "{}").await;
        assert!(result.is_error);
        assert!(result.for_llm.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let ctx = Ctx::new();
        let result = registry().execute(&ctx, "echo", "{not json").await;
        assert!(result.is_error);
        assert!(result.for_llm.contains("invalid arguments JSON"));
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let ctx = Ctx::new();
        let result = registry().execute(&ctx, "echo", "{}").await;
        assert!(result.is_error);
        assert!(result.for_llm.contains("text"));
    }

    #[tokio::test]
    async fn test_type_mismatch_names_field() {
        let ctx = Ctx::new();
        let result = registry()
            .execute(&ctx, "echo", r#"{"text":"hi","count":"three"}"#)
            .await;
        assert!(result.is_error);
        assert!(result.for_llm.contains("count"));
    }

    #[tokio::test]
    async fn test_integer_accepts_integral_float() {
        let ctx = Ctx::new();
        let result = registry()
            .execute(&ctx, "echo", r#"{"text":"hi","count":3.0}"#)
            .await;
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_integer_rejects_fractional() {
        let ctx = Ctx::new();
        let result = registry()
            .execute(&ctx, "echo", r#"{"text":"hi","count":3.5}"#)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_panic_contained() {
        let ctx = Ctx::new();
        let result = registry().execute(&ctx, "panic", "{}").await;
        assert!(result.is_error);
        assert!(result.for_llm.contains("internal error"));
    }

    #[tokio::test]
    async fn test_empty_arguments_treated_as_empty_object() {
        let ctx = Ctx::new();
        let result = registry().execute(&ctx, "panic", "").await;
        // Reaches dispatch (and the contained panic), not a JSON error.
        assert!(result.for_llm.contains("internal error"));
    }
}
