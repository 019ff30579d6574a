//! Text-based tool executor: dispatches [`ToolCall`]s extracted by
//! [`crate::cloudllm::tool_call_extractor`] against the built-in path-safe file tools plus any
//! additional typed tools a host registers, and formats the results back into the
//! `<tool_result>` wire form consumed by the next loop iteration.

use crate::cloudllm::tool_call_extractor::ToolCall;
use crate::cloudllm::tool_types::{ToolMetadata, ToolParameterType, ToolResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An additional typed tool a host registers alongside the built-in file tools. Implementors
/// describe themselves via [`metadata`](AdditionalTool::metadata) so the executor can
/// reconstruct typed JSON arguments from the raw strings a [`ToolCall`] carries.
#[async_trait]
pub trait AdditionalTool: Send + Sync {
    fn metadata(&self) -> &ToolMetadata;
    async fn invoke(&self, arguments: serde_json::Value) -> ToolResult;
}

/// Normalize `.`/`..` components without touching the filesystem, mirroring the approach the
/// built-in file system tool uses before canonicalizing.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            std::path::Component::Normal(c) => normalized.push(c),
            std::path::Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Resolve `path` relative to `cwd` and verify the normalized result stays within `cwd`.
fn resolve_within_cwd(cwd: &Path, path: &str) -> Result<PathBuf, String> {
    let joined = cwd.join(path);
    let normalized = normalize(&joined);
    let normalized_cwd = normalize(cwd);
    if !normalized.starts_with(&normalized_cwd) {
        return Err(format!("ACCESS_DENIED: path escapes cwd: {}", path));
    }
    Ok(normalized)
}

fn read_file(cwd: &Path, path: &str) -> ToolResult {
    let resolved = match resolve_within_cwd(cwd, path) {
        Ok(p) => p,
        Err(msg) => return ToolResult::failure("read_file", msg),
    };
    if !resolved.exists() {
        return ToolResult::failure("read_file", format!("NOT_FOUND: {}", path));
    }
    if !resolved.is_file() {
        return ToolResult::failure("read_file", format!("NOT_A_FILE: {}", path));
    }
    match std::fs::read_to_string(&resolved) {
        Ok(contents) => ToolResult::success("read_file", contents),
        Err(e) => ToolResult::failure("read_file", format!("NOT_FOUND: {}", e)),
    }
}

fn list_files(cwd: &Path, path: &str) -> ToolResult {
    let target = if path.is_empty() { "." } else { path };
    let resolved = match resolve_within_cwd(cwd, target) {
        Ok(p) => p,
        Err(msg) => return ToolResult::failure("list_files", msg),
    };
    if !resolved.exists() {
        return ToolResult::failure("list_files", format!("NOT_FOUND: {}", path));
    }
    if !resolved.is_dir() {
        return ToolResult::failure("list_files", format!("NOT_A_FILE: {} is not a directory", path));
    }
    let mut entries: Vec<(String, bool)> = match std::fs::read_dir(&resolved) {
        Ok(read_dir) => read_dir
            .filter_map(|e| e.ok())
            .map(|e| {
                let is_dir = e.path().is_dir();
                (e.file_name().to_string_lossy().to_string(), is_dir)
            })
            .collect(),
        Err(e) => return ToolResult::failure("list_files", e.to_string()),
    };
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let formatted = entries
        .into_iter()
        .map(|(name, is_dir)| {
            if is_dir {
                format!("[dir] {}", name)
            } else {
                format!("[file] {}", name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    ToolResult::success("list_files", formatted)
}

fn write_file_disabled() -> ToolResult {
    ToolResult::failure(
        "write_file",
        "write_file is disabled in the text-based tool loop; delegate the change via an \
         @@@task block instead of writing files directly."
            .to_string(),
    )
}

/// Rebuild a typed JSON argument object from a [`ToolCall`]'s raw string arguments by
/// consulting the tool's parameter descriptor.
fn coerce_arguments(metadata: &ToolMetadata, call: &ToolCall) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for param in &metadata.parameters {
        let Some(raw) = call.arguments.get(&param.name) else {
            continue;
        };
        let value = coerce_one(&param.param_type, raw);
        object.insert(param.name.clone(), value);
    }
    serde_json::Value::Object(object)
}

fn coerce_one(param_type: &ToolParameterType, raw: &str) -> serde_json::Value {
    match param_type {
        ToolParameterType::Boolean => {
            let parsed = raw.parse::<bool>().unwrap_or_else(|_| raw.eq_ignore_ascii_case("true"));
            serde_json::Value::Bool(parsed)
        }
        ToolParameterType::Integer => {
            let parsed = raw.trim().parse::<i64>().unwrap_or(0);
            serde_json::Value::Number(parsed.into())
        }
        ToolParameterType::Float => {
            let parsed = raw.trim().parse::<f64>().unwrap_or(0.0);
            serde_json::Number::from_f64(parsed)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)
        }
        ToolParameterType::List(_) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v @ serde_json::Value::Array(_)) => v,
            _ => serde_json::Value::Array(vec![serde_json::Value::String(raw.to_string())]),
        },
        ToolParameterType::Object => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v @ serde_json::Value::Object(_)) => v,
            _ => serde_json::Value::String(raw.to_string()),
        },
        ToolParameterType::String | ToolParameterType::Enum(_) => {
            serde_json::Value::String(raw.to_string())
        }
    }
}

/// Executes [`ToolCall`]s against the built-in, path-safe file tools and any registered
/// [`AdditionalTool`]s, never letting a failure abort the caller's loop.
pub struct TextBasedToolExecutor {
    cwd: PathBuf,
    additional_tools: Vec<Arc<dyn AdditionalTool>>,
}

impl TextBasedToolExecutor {
    pub fn new(cwd: impl Into<PathBuf>, additional_tools: Vec<Arc<dyn AdditionalTool>>) -> Self {
        Self {
            cwd: cwd.into(),
            additional_tools,
        }
    }

    fn find_additional(&self, name: &str) -> Option<&Arc<dyn AdditionalTool>> {
        self.additional_tools
            .iter()
            .find(|t| t.metadata().name == name)
    }

    /// Execute a single call. Built-in file tools are resolved first; anything else is
    /// matched against the registered additional tools by name.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match call.name.as_str() {
            "read_file" => {
                let path = call.arguments.get("path").map(String::as_str).unwrap_or("");
                read_file(&self.cwd, path)
            }
            "list_files" => {
                let path = call.arguments.get("path").map(String::as_str).unwrap_or("");
                list_files(&self.cwd, path)
            }
            "write_file" => write_file_disabled(),
            name => match self.find_additional(name) {
                Some(tool) => {
                    let args = coerce_arguments(tool.metadata(), call);
                    tool.invoke(args).await
                }
                None => {
                    let available: Vec<&str> = std::iter::once("read_file")
                        .chain(std::iter::once("list_files"))
                        .chain(self.additional_tools.iter().map(|t| t.metadata().name.as_str()))
                        .collect();
                    ToolResult::failure(
                        name,
                        format!(
                            "Error: unknown tool '{}'. Available tools: {}",
                            name,
                            available.join(", ")
                        ),
                    )
                }
            },
        }
    }

    /// Execute every call in order and return the results in the same order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }
}

/// Format a batch of results into the `<tool_result>` wire form the next assistant turn
/// receives.
pub fn format_results(results: &[ToolResult]) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str("<tool_result>\n");
        out.push_str(&format!("<tool_name>{}</tool_name>\n", result.tool_name));
        out.push_str(&format!(
            "<status>{}</status>\n",
            if result.success { "success" } else { "error" }
        ));
        out.push_str("<output>\n");
        out.push_str(&result.output);
        out.push_str("\n</output>\n");
        out.push_str("</tool_result>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tool_types::{ToolParameter, ToolParameterType};

    fn call(name: &str, args: &[(&str, &str)]) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments: args.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[tokio::test]
    async fn list_files_sorted_alphabetically() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("src/a.txt"), "a").unwrap();

        let executor = TextBasedToolExecutor::new(dir.path(), vec![]);
        let result = executor.execute(&call("list_files", &[("path", "src")])).await;
        assert!(result.success);
        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(lines, vec!["[file] a.txt", "[file] b.txt"]);
    }

    #[tokio::test]
    async fn read_file_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let executor = TextBasedToolExecutor::new(dir.path(), vec![]);
        let result = executor
            .execute(&call("read_file", &[("path", "../etc/passwd")]))
            .await;
        assert!(!result.success);
        assert!(result.output.contains("ACCESS_DENIED"));
    }

    #[tokio::test]
    async fn write_file_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let executor = TextBasedToolExecutor::new(dir.path(), vec![]);
        let result = executor
            .execute(&call("write_file", &[("path", "x.txt"), ("content", "hi")]))
            .await;
        assert!(!result.success);
        assert!(result.output.contains("@@@task"));
    }

    struct EchoTool {
        metadata: ToolMetadata,
    }

    #[async_trait]
    impl AdditionalTool for EchoTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }
        async fn invoke(&self, arguments: serde_json::Value) -> ToolResult {
            ToolResult::success("echo", arguments.to_string())
        }
    }

    #[tokio::test]
    async fn additional_tool_receives_coerced_typed_arguments() {
        let metadata = ToolMetadata::new("echo", "echoes its arguments").with_parameter(
            ToolParameter::new("count", ToolParameterType::Integer).required(),
        );
        let tool = Arc::new(EchoTool { metadata });
        let dir = tempfile::tempdir().unwrap();
        let executor = TextBasedToolExecutor::new(dir.path(), vec![tool]);
        let result = executor.execute(&call("echo", &[("count", "42")])).await;
        assert!(result.success);
        assert_eq!(result.output, r#"{"count":42}"#);
    }

    #[tokio::test]
    async fn unknown_tool_lists_available_set() {
        let dir = tempfile::tempdir().unwrap();
        let executor = TextBasedToolExecutor::new(dir.path(), vec![]);
        let result = executor.execute(&call("bogus", &[])).await;
        assert!(!result.success);
        assert!(result.output.contains("read_file"));
        assert!(result.output.contains("list_files"));
    }

    #[test]
    fn format_results_matches_wire_grammar() {
        let results = vec![ToolResult::success("list_files", "[file] a.txt\n[file] b.txt")];
        let formatted = format_results(&results);
        assert!(formatted.contains("<tool_name>list_files</tool_name>"));
        assert!(formatted.contains("<status>success</status>"));
        assert!(formatted.contains("[file] a.txt"));
    }
}
