//! A2A command dispatcher: turns a JSON `{"command": "...", ...}` payload into a call
//! against [`AgentTools`] and renders the result (or error) back out as a plain string
//! reply, mirroring the shape a text-message-based agent-to-agent transport expects.

use crate::cloudllm::agent_tools::{dispatch, AgentTools};
use crate::cloudllm::domain::Task;
use crate::cloudllm::error::{CoreError, CoreResult};
use serde_json::Value;

const EXPECTED_FORMAT: &str = r#"{"command": "<name>", ...fields}"#;

/// Parses an inbound A2A payload and dispatches it against `tools`, returning the text to
/// send back. Never errors outward: malformed input and unknown commands both produce a
/// formatted error string rather than propagating a [`CoreError`].
pub async fn handle_message(tools: &AgentTools, payload: &str) -> String {
    let parsed: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            return format!("Error: {}\n\nExpected JSON format: {}", e, EXPECTED_FORMAT);
        }
    };

    let command = match parsed.get("command").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => {
            return format!(
                "Error: missing required field 'command'\n\nExpected JSON format: {}",
                EXPECTED_FORMAT
            );
        }
    };

    match route(tools, command, &parsed).await {
        Ok(data) => data,
        Err(e) => error_reply(&e.to_string()),
    }
}

fn error_reply(message: &str) -> String {
    serde_json::json!({ "success": false, "error": message }).to_string()
}

async fn route(tools: &AgentTools, command: &str, args: &Value) -> CoreResult<String> {
    match command {
        "initialize" => {
            let workspace_id = args
                .get("workspaceId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CoreError::BadInput("workspaceId is required".into()))?;
            tools.initialize(workspace_id).await
        }
        "create_task" => {
            let task: Task = serde_json::from_value(args.clone())
                .map_err(|e| CoreError::BadInput(format!("invalid task payload: {}", e)))?;
            let created = tools.create_task(task).await?;
            Ok(serde_json::to_string(&created).unwrap_or_default())
        }
        other => dispatch(tools, other, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::event_bus::EventBus;
    use crate::cloudllm::store::CoordinationStore;
    use std::sync::Arc;

    fn new_tools() -> AgentTools {
        AgentTools::new(Arc::new(CoordinationStore::new()), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn initialize_returns_routa_agent_id() {
        let tools = new_tools();
        let reply = handle_message(&tools, r#"{"command":"initialize","workspaceId":"ws1"}"#).await;
        assert!(!reply.is_empty());
        assert!(!reply.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn create_task_writes_a_task_record_directly() {
        let tools = new_tools();
        let payload = serde_json::json!({
            "command": "create_task",
            "id": "t-1",
            "title": "ship it",
            "objective": "",
            "scope": [],
            "acceptance_criteria": [],
            "verification_commands": [],
            "assigned_to": null,
            "status": "Pending",
            "workspace_id": "ws1",
            "created_at": chrono::Utc::now(),
            "updated_at": chrono::Utc::now(),
        });
        let reply = handle_message(&tools, &payload.to_string()).await;
        assert!(reply.contains("ship it"));
    }

    #[tokio::test]
    async fn unknown_command_yields_error_reply() {
        let tools = new_tools();
        let reply = handle_message(&tools, r#"{"command":"not_a_real_command"}"#).await;
        assert!(reply.contains("\"success\":false"));
        assert!(reply.contains("unknown tool"));
    }

    #[tokio::test]
    async fn malformed_json_yields_formatted_error() {
        let tools = new_tools();
        let reply = handle_message(&tools, "{not json").await;
        assert!(reply.starts_with("Error: "));
        assert!(reply.contains("Expected JSON format:"));
    }

    #[tokio::test]
    async fn missing_command_field_yields_formatted_error() {
        let tools = new_tools();
        let reply = handle_message(&tools, r#"{"workspaceId":"ws1"}"#).await;
        assert!(reply.starts_with("Error: missing required field"));
    }

    #[tokio::test]
    async fn list_agents_extra_command_is_exposed_by_name() {
        let tools = new_tools();
        tools.initialize("ws1").await.unwrap();
        let reply = handle_message(&tools, r#"{"command":"list_agents","workspaceId":"ws1"}"#).await;
        assert!(reply.contains("ROUTA") || !reply.is_empty());
    }
}
