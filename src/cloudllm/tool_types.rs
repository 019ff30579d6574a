//! Self-describing tool parameter types shared by [`crate::cloudllm::agent_tools`] and
//! [`crate::cloudllm::text_tool_executor`].
//!
//! Every tool — the eleven typed coordination operations and any additional tool a host
//! registers with the text-based executor — carries a [`ToolMetadata`] descriptor so a
//! text-based dispatcher can reconstruct typed arguments from the stringly-typed extractions
//! produced by [`crate::cloudllm::tool_call_extractor`].

use std::error::Error;
use std::fmt;

/// Declared type of a single tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolParameterType {
    String,
    Integer,
    Boolean,
    Float,
    List(Box<ToolParameterType>),
    Object,
    /// A string constrained to one of a fixed set of values.
    Enum(Vec<String>),
}

/// Describes one named argument a tool accepts.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub required: bool,
    pub description: String,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Identity and parameter schema for a tool.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: output.into(),
        }
    }
}

/// Error types surfaced by tool dispatch. Never escapes a public API boundary on its own —
/// callers fold it into a failed [`ToolResult`].
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    InvalidParameters(String),
    ExecutionFailed(String),
    AccessDenied(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
        }
    }
}

impl Error for ToolError {}
