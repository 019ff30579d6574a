//! Tool-call extractor: pulls structured [`ToolCall`]s out of free-form LLM
//! output, either from `<tool_call>` XML regions or fenced ```` ```json ```` / ```` ``` ````
//! code blocks. XML wins outright when present — the two forms are never combined.

use std::collections::HashMap;

/// A structured `{name, arguments}` request parsed out of an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    /// Raw string form of each argument; typed reconstruction happens in
    /// [`crate::cloudllm::text_tool_executor`].
    pub arguments: HashMap<String, String>,
}

/// Coerce a JSON value to the raw string form an extracted tool-call argument carries:
/// primitives keep their textual content, nested objects/arrays serialize back to JSON.
fn coerce_argument(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => value.to_string(),
    }
}

fn parse_call_object(json_str: &str) -> Option<ToolCall> {
    let parsed: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let name = parsed.get("name")?.as_str()?.to_string();
    let mut arguments = HashMap::new();
    if let Some(args) = parsed.get("arguments").and_then(|v| v.as_object()) {
        for (key, value) in args {
            arguments.insert(key.clone(), coerce_argument(value));
        }
    }
    Some(ToolCall { name, arguments })
}

/// Find every `<tool_call>...</tool_call>` region and parse its body as `{"name", "arguments"}`.
/// A malformed region is skipped, not fatal.
fn extract_xml_calls(response: &str) -> Vec<ToolCall> {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";
    let mut calls = Vec::new();
    let mut cursor = 0;
    while let Some(open_rel) = response[cursor..].find(OPEN) {
        let open_idx = cursor + open_rel + OPEN.len();
        let Some(close_rel) = response[open_idx..].find(CLOSE) else {
            break;
        };
        let close_idx = open_idx + close_rel;
        let body = response[open_idx..close_idx].trim();
        if let Some(call) = parse_call_object(body) {
            calls.push(call);
        }
        cursor = close_idx + CLOSE.len();
    }
    calls
}

/// Whether any `<tool_call>` regions are present at all, regardless of whether their JSON
/// parses successfully.
fn has_xml_region(response: &str) -> bool {
    response.contains("<tool_call>")
}

/// Find every fenced ```` ```json ```` or bare ```` ``` ```` block and parse its body as a
/// single call object, suppressing duplicate tool names (first occurrence wins).
fn extract_fenced_calls(response: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut seen_names = std::collections::HashSet::new();
    let bytes = response.as_bytes();
    let mut cursor = 0;
    while let Some(fence_rel) = response[cursor..].find("```") {
        let fence_start = cursor + fence_rel;
        let mut body_start = fence_start + 3;
        // Skip an optional language tag (e.g. "json") up to the end of that line.
        if let Some(newline_rel) = response[body_start..].find('\n') {
            let tag = response[body_start..body_start + newline_rel].trim();
            if tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                body_start += newline_rel + 1;
            }
        }
        let Some(close_rel) = response[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + close_rel;
        let body = response[body_start..body_end].trim();
        if let Some(call) = parse_call_object(body) {
            if seen_names.insert(call.name.clone()) {
                calls.push(call);
            }
        }
        cursor = body_end + 3;
        if cursor > bytes.len() {
            break;
        }
    }
    calls
}

/// Resolution order: XML first, fenced code second. The first form that produces any result
/// wins outright.
pub fn extract_tool_calls(response: &str) -> Vec<ToolCall> {
    if has_xml_region(response) {
        return extract_xml_calls(response);
    }
    extract_fenced_calls(response)
}

/// True iff the XML form is present at all, or the extractor otherwise yields at least one
/// call.
pub fn has_tool_calls(response: &str) -> bool {
    has_xml_region(response) || !extract_fenced_calls(response).is_empty()
}

/// Strip every `<tool_call>...</tool_call>` occurrence (including malformed ones) and trim
/// the remainder.
pub fn remove_tool_calls(response: &str) -> String {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";
    let mut result = String::new();
    let mut cursor = 0;
    while let Some(open_rel) = response[cursor..].find(OPEN) {
        let open_idx = cursor + open_rel;
        result.push_str(&response[cursor..open_idx]);
        match response[open_idx..].find(CLOSE) {
            Some(close_rel) => cursor = open_idx + close_rel + CLOSE.len(),
            None => {
                cursor = response.len();
                break;
            }
        }
    }
    result.push_str(&response[cursor..]);
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_xml_call() {
        let response = r#"I'll list the files now.
<tool_call>
{"name": "list_files", "arguments": {"path": "src"}}
</tool_call>"#;
        let calls = extract_tool_calls(response);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_files");
        assert_eq!(calls[0].arguments.get("path").unwrap(), "src");
    }

    #[test]
    fn xml_preference_over_fenced_blocks() {
        let response = r#"<tool_call>
{"name": "a", "arguments": {}}
</tool_call>
```json
{"name": "b", "arguments": {}}
```"#;
        let calls = extract_tool_calls(response);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "a");
    }

    #[test]
    fn fenced_fallback_dedupes_by_name() {
        let response = r#"```json
{"name": "list_files", "arguments": {"path": "a"}}
```
```json
{"name": "list_files", "arguments": {"path": "b"}}
```
```json
{"name": "read_file", "arguments": {"path": "x"}}
```"#;
        let calls = extract_tool_calls(response);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "list_files");
        assert_eq!(calls[0].arguments.get("path").unwrap(), "a");
        assert_eq!(calls[1].name, "read_file");
    }

    #[test]
    fn malformed_json_yields_no_call_not_an_error() {
        let response = "<tool_call>{not valid json</tool_call>";
        assert!(extract_tool_calls(response).is_empty());
    }

    #[test]
    fn nested_object_argument_round_trips_to_json_string() {
        let response = r#"<tool_call>
{"name": "create_agent", "arguments": {"name": "x", "metadata": {"nested": true}}}
</tool_call>"#;
        let calls = extract_tool_calls(response);
        assert_eq!(calls[0].arguments.get("metadata").unwrap(), "{\"nested\":true}");
    }

    #[test]
    fn remove_tool_calls_strips_xml_and_trims() {
        let response = "  before <tool_call>{\"name\":\"x\",\"arguments\":{}}</tool_call> after  ";
        assert_eq!(remove_tool_calls(response), "before  after");
    }

    #[test]
    fn has_tool_calls_true_for_bare_xml_tag_even_if_malformed() {
        assert!(has_tool_calls("<tool_call>garbage</tool_call>"));
        assert!(!has_tool_calls("no tool calls here"));
    }
}
