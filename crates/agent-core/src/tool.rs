//! Tool System
//!
//! Closed tool framework for agent capabilities. The set of tools the model
//! may call is the [`ToolKind`] enum; a [`ToolTable`] maps each kind to its
//! handler and is fixed once the agent is built.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Every tool the agent knows about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    KnowledgeBase,
    NpkCalculator,
    PhCalculator,
}

impl ToolKind {
    pub const ALL: [Self; 3] = [Self::KnowledgeBase, Self::NpkCalculator, Self::PhCalculator];

    /// Name the model uses to call the tool
    pub const fn name(self) -> &'static str {
        match self {
            Self::KnowledgeBase => "knowledge_base",
            Self::NpkCalculator => "npk_calculator",
            Self::PhCalculator => "ph_calculator",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name.trim())
    }

    const fn index(self) -> usize {
        match self {
            Self::KnowledgeBase => 0,
            Self::NpkCalculator => 1,
            Self::PhCalculator => 2,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tool call request from the LLM
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    #[serde(rename = "tool", alias = "name")]
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,

    /// Optional call ID for tracking
    #[serde(default)]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    /// Non-empty string argument
    pub fn text(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric argument; numeric strings like `"6.5"` are accepted
    pub fn number(&self, key: &str) -> Result<Option<f64>> {
        match self.arguments.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| AgentError::ToolValidation(format!("{key} is not a number"))),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| AgentError::ToolValidation(format!("{key} is not a number: {s:?}"))),
            Some(other) => Err(AgentError::ToolValidation(format!(
                "{key} must be a number, got {other}"
            ))),
        }
    }
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Call ID (if provided in request)
    pub id: Option<String>,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (success message or error)
    pub output: String,

    /// Backend was unreachable and the output is a stand-in
    #[serde(default)]
    pub degraded: bool,

    /// Structured data (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: true,
            output: output.into(),
            degraded: false,
            data: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: false,
            output: error.into(),
            degraded: false,
            data: None,
        }
    }

    /// Failure caused by an unavailable dependency rather than bad input
    pub fn degraded(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            degraded: true,
            ..Self::failure(name, output)
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Audit entry for one executed tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: ToolKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,

    /// Text handed back to the model
    pub result: String,

    pub success: bool,
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
}

impl ParameterSchema {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| serde_json::json!(v)).collect());
        self
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

/// Tool trait - implement to back one [`ToolKind`]
#[async_trait]
pub trait Tool: Send + Sync {
    /// The table slot this tool fills
    fn kind(&self) -> ToolKind;

    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<ToolResult>;

    /// Validate arguments before execution (optional)
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let schema = self.schema();

        for param in &schema.parameters {
            let present = call
                .arguments
                .get(&param.name)
                .is_some_and(|v| !v.is_null());
            if param.required && !present {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

/// Fixed dispatch table from [`ToolKind`] to handler
#[derive(Clone, Default)]
pub struct ToolTable {
    handlers: [Option<Arc<dyn Tool>>; ToolKind::ALL.len()],
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler in its kind's slot, replacing any previous one
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let slot = tool.kind().index();
        self.handlers[slot] = Some(tool);
    }

    #[must_use]
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get the handler for a kind
    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.handlers[kind.index()].clone()
    }

    /// Resolve a model-supplied tool name to a kind with a handler
    pub fn resolve(&self, name: &str) -> Result<ToolKind> {
        ToolKind::from_name(name)
            .filter(|kind| self.handlers[kind.index()].is_some())
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    /// Validate and run a call against the handler for `kind`
    pub async fn execute(&self, kind: ToolKind, call: &ToolCall) -> Result<ToolResult> {
        let tool = self
            .get(kind)
            .ok_or_else(|| AgentError::ToolNotFound(kind.name().to_string()))?;

        tool.validate(call)?;
        tool.execute(call).await
    }

    /// Installed kinds, in declaration order
    pub fn kinds(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| self.handlers[k.index()].is_some())
            .collect()
    }

    /// Tool schemas, in declaration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.handlers.iter().flatten().map(|t| t.schema()).collect()
    }

    /// Names the model may call, comma separated
    pub fn names(&self) -> String {
        self.kinds()
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.handlers.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generate system prompt section describing available tools
    pub fn generate_prompt_section(&self) -> String {
        use std::fmt::Write;

        let mut prompt = String::from("## Available Tools\n\n");
        prompt.push_str("You can use the following tools by responding with a JSON block:\n\n");
        prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");
        prompt.push_str("Call one tool at a time and wait for its result.\n\n");

        for schema in self.schemas() {
            let _ = writeln!(prompt, "### {}", schema.name);
            let _ = writeln!(prompt, "{}", schema.description);

            if !schema.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    let _ = write!(
                        prompt,
                        "- `{}` ({}){}: {}",
                        param.name, param.param_type, required, param.description
                    );
                    if let Some(values) = &param.enum_values {
                        let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                        let _ = write!(prompt, " One of: {}.", values.join(", "));
                    }
                    prompt.push('\n');
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}

impl fmt::Debug for ToolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolTable").field("kinds", &self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn kind(&self) -> ToolKind {
            ToolKind::PhCalculator
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.kind().name().into(),
                description: "Echo the pH back".into(),
                parameters: vec![ParameterSchema::required("current_ph", "number", "Measured pH")],
            }
        }

        async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
            let ph = call.number("current_ph")?.unwrap_or_default();
            Ok(ToolResult::success(self.kind().name(), format!("pH {ph}")))
        }
    }

    #[test]
    fn test_tool_kind_names() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("calculate"), None);
        assert_eq!(
            serde_json::to_value(ToolKind::NpkCalculator).unwrap(),
            serde_json::json!("npk_calculator")
        );
    }

    #[test]
    fn test_tool_call_accepts_tool_and_name_keys() {
        let a: ToolCall = serde_json::from_str(r#"{"tool": "ph_calculator", "arguments": {"current_ph": 5}}"#).unwrap();
        let b: ToolCall = serde_json::from_str(r#"{"name": "ph_calculator"}"#).unwrap();
        assert_eq!(a.name, "ph_calculator");
        assert_eq!(b.name, "ph_calculator");
        assert!(b.arguments.is_empty());
    }

    #[test]
    fn test_number_argument_parsing() {
        let call = ToolCall::new(
            "ph_calculator",
            serde_json::json!({"a": 6.5, "b": " 7 ", "c": "acidic", "d": [1]}),
        );
        assert_eq!(call.number("a").unwrap(), Some(6.5));
        assert_eq!(call.number("b").unwrap(), Some(7.0));
        assert!(call.number("c").is_err());
        assert!(call.number("d").is_err());
        assert_eq!(call.number("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_tool_table_dispatch() {
        let table = ToolTable::new().with(Arc::new(EchoTool));

        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("ph_calculator").unwrap(), ToolKind::PhCalculator);
        assert!(matches!(table.resolve("npk_calculator"), Err(AgentError::ToolNotFound(_))));
        assert!(matches!(table.resolve("rm -rf"), Err(AgentError::ToolNotFound(_))));

        let ok = ToolCall::new("ph_calculator", serde_json::json!({"current_ph": 6.0}));
        let result = table.execute(ToolKind::PhCalculator, &ok).await.unwrap();
        assert_eq!(result.output, "pH 6");

        let missing = ToolCall::new("ph_calculator", serde_json::json!({"current_ph": null}));
        assert!(matches!(
            table.execute(ToolKind::PhCalculator, &missing).await,
            Err(AgentError::ToolValidation(_))
        ));
    }

    #[test]
    fn test_prompt_section_lists_tools() {
        let table = ToolTable::new().with(Arc::new(EchoTool));
        let section = table.generate_prompt_section();
        assert!(section.contains("### ph_calculator"));
        assert!(section.contains("`current_ph` (number) (required)"));
    }
}
