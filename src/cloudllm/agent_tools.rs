//! Agent tools: the typed coordination surface backing both the A2A command
//! dispatcher ([`crate::cloudllm::a2a`]) and, wrapped as [`AdditionalTool`]s, the text-based
//! tool loop any CRAFTER runs.

use crate::cloudllm::domain::{
    Agent, AgentRole, AgentStatus, CompletionReport, ConversationMessage, MessageKind, Task,
    TaskStatus,
};
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::event_bus::EventBus;
use crate::cloudllm::store::CoordinationStore;
use crate::cloudllm::text_tool_executor::AdditionalTool;
use crate::cloudllm::tool_types::{ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle the eleven coordination tools dispatch against.
#[derive(Clone)]
pub struct AgentTools {
    store: Arc<CoordinationStore>,
    bus: Arc<EventBus>,
}

fn get_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn get_bool(args: &serde_json::Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn get_usize(args: &serde_json::Value, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|n| n as usize)
}

fn get_str_list(args: &serde_json::Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

impl AgentTools {
    pub fn new(store: Arc<CoordinationStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// `list_agents` — newline roster of `id, name, role, status`.
    pub async fn list_agents(&self, workspace_id: &str) -> CoreResult<String> {
        let agents = self.store.list_agents(workspace_id).await;
        Ok(agents
            .iter()
            .map(|a| format!("{}\t{}\t{}\t{:?}", a.id, a.name, a.role, a.status))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// `create_agent` — new agent in `Pending`; emits `agent.created`.
    pub async fn create_agent(
        &self,
        name: &str,
        role: &str,
        workspace_id: &str,
        parent_id: Option<&str>,
        model_tier: Option<&str>,
    ) -> CoreResult<Agent> {
        let role = AgentRole::parse(role)
            .ok_or_else(|| CoreError::BadInput(format!("unknown role: {}", role)))?;
        let mut agent = Agent::new(name, role, workspace_id);
        agent.parent_id = parent_id.map(String::from);
        agent.model_tier = model_tier.and_then(|t| match t {
            "FAST" => Some(crate::cloudllm::domain::ModelTier::Fast),
            "BALANCED" => Some(crate::cloudllm::domain::ModelTier::Balanced),
            "SMART" => Some(crate::cloudllm::domain::ModelTier::Smart),
            _ => None,
        });
        self.store.save_agent(agent.clone()).await?;
        self.bus
            .publish(
                crate::cloudllm::domain::CoordEvent::new("agent.created")
                    .with("agent_id", agent.id.clone())
                    .with("name", agent.name.clone())
                    .from_agent(agent.id.clone()),
            )
            .await;
        Ok(agent)
    }

    /// `get_agent_status` — status + role + parent.
    pub async fn get_agent_status(&self, agent_id: &str) -> CoreResult<Agent> {
        self.store.find_agent(agent_id).await
    }

    /// `get_agent_summary` — latest objective, last message, task count.
    pub async fn get_agent_summary(&self, agent_id: &str) -> CoreResult<String> {
        let agent = self.store.find_agent(agent_id).await?;
        let tasks = self.store.tasks_for_agent(&agent.workspace_id, agent_id).await;
        let last_message = self
            .store
            .read_conversation(&agent.workspace_id, agent_id, Some(1), true)
            .await
            .into_iter()
            .next()
            .map(|m| m.content)
            .unwrap_or_default();
        let objective = tasks.first().map(|t| t.objective.clone()).unwrap_or_default();
        Ok(format!(
            "objective: {}\nlast_message: {}\ntask_count: {}",
            objective,
            last_message,
            tasks.len()
        ))
    }

    /// `read_agent_conversation` — chronological messages.
    pub async fn read_agent_conversation(
        &self,
        agent_id: &str,
        last_n: Option<usize>,
        include_tool_calls: bool,
    ) -> CoreResult<Vec<ConversationMessage>> {
        self.store
            .read_conversation_by_agent(agent_id, last_n, include_tool_calls)
            .await
    }

    /// `message_agent` — appends a `User` message to the recipient; emits `message.sent`.
    pub async fn message_agent(
        &self,
        from_agent_id: &str,
        to_agent_id: &str,
        message: &str,
    ) -> CoreResult<()> {
        let to_agent = self.store.find_agent(to_agent_id).await?;
        let msg = ConversationMessage::new(to_agent_id, message, MessageKind::User)
            .from(from_agent_id);
        self.store.append_message(&to_agent.workspace_id, msg).await?;
        self.bus
            .publish(
                crate::cloudllm::domain::CoordEvent::new("message.sent")
                    .with("to", to_agent_id.to_string())
                    .with("from", from_agent_id.to_string())
                    .from_agent(from_agent_id),
            )
            .await;
        Ok(())
    }

    /// `delegate_task` — assigns; task -> `InProgress`; agent -> `Active`; emits `task.delegated`.
    pub async fn delegate_task(
        &self,
        agent_id: &str,
        task_id: &str,
        caller_agent_id: &str,
    ) -> CoreResult<()> {
        let mut agent = self.store.find_agent(agent_id).await?;
        let mut task = self.store.find_task(task_id).await?;
        task.assigned_to = Some(agent_id.to_string());
        task.status = TaskStatus::InProgress;
        task.updated_at = chrono::Utc::now();
        agent.status = AgentStatus::Active;
        agent.updated_at = chrono::Utc::now();
        self.store.save_agent(agent).await?;
        self.store.save_task(task).await?;
        self.bus
            .publish(
                crate::cloudllm::domain::CoordEvent::new("task.delegated")
                    .with("task_id", task_id.to_string())
                    .with("agent_id", agent_id.to_string())
                    .from_agent(caller_agent_id),
            )
            .await;
        Ok(())
    }

    /// `report_to_parent` — task -> `Completed`/`Failed`; agent -> `Completed`; writes the
    /// summary to the parent's conversation; emits `task.completed`.
    pub async fn report_to_parent(&self, report: CompletionReport) -> CoreResult<()> {
        let mut agent = self.store.find_agent(&report.agent_id).await?;
        let mut task = self.store.find_task(&report.task_id).await?;
        task.status = if report.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.updated_at = chrono::Utc::now();
        agent.status = AgentStatus::Completed;
        agent.updated_at = chrono::Utc::now();
        self.store.save_task(task).await?;
        let parent_id = agent.parent_id.clone();
        self.store.save_agent(agent).await?;
        if let Some(parent_id) = parent_id {
            let msg = ConversationMessage::new(
                &parent_id,
                format!(
                    "Task '{}' completed by {}: {}",
                    report.task_id, report.agent_id, report.summary
                ),
                MessageKind::System,
            )
            .from(report.agent_id.clone());
            if let Ok(parent) = self.store.find_agent(&parent_id).await {
                let _ = self.store.append_message(&parent.workspace_id, msg).await;
            }
        }
        self.bus
            .publish(
                crate::cloudllm::domain::CoordEvent::new("task.completed")
                    .with("task_id", report.task_id.clone())
                    .with("success", report.success.to_string())
                    .from_agent(report.agent_id.clone()),
            )
            .await;
        Ok(())
    }

    /// `wake_or_create_task_agent` — if the task already has an assignee, append a message to
    /// it and report `woke`; otherwise spawn a CRAFTER, delegate, and report `created_new`.
    pub async fn wake_or_create_task_agent(
        &self,
        task_id: &str,
        context_message: &str,
        caller_agent_id: &str,
        workspace_id: &str,
        agent_name: Option<&str>,
        model_tier: Option<&str>,
    ) -> CoreResult<(Agent, &'static str)> {
        let task = self.store.find_task(task_id).await?;
        if let Some(assigned_to) = &task.assigned_to {
            let agent = self.store.find_agent(assigned_to).await?;
            self.message_agent(caller_agent_id, &agent.id, context_message)
                .await?;
            return Ok((agent, "woke"));
        }
        let name = agent_name.unwrap_or("crafter");
        let agent = self
            .create_agent(name, "CRAFTER", workspace_id, None, model_tier)
            .await?;
        self.delegate_task(&agent.id, task_id, caller_agent_id).await?;
        self.message_agent(caller_agent_id, &agent.id, context_message)
            .await?;
        Ok((agent, "created_new"))
    }

    /// `send_message_to_task_agent` — routes to `task.assignedTo` or fails `NOT_ASSIGNED`.
    pub async fn send_message_to_task_agent(
        &self,
        task_id: &str,
        message: &str,
        caller_agent_id: &str,
    ) -> CoreResult<()> {
        let task = self.store.find_task(task_id).await?;
        match &task.assigned_to {
            Some(assignee) => self.message_agent(caller_agent_id, assignee, message).await,
            None => Err(CoreError::InvalidState(format!(
                "NOT_ASSIGNED: task {} has no assignee",
                task_id
            ))),
        }
    }

    /// `subscribe_to_events` — returns a subscription id.
    pub async fn subscribe_to_events(
        &self,
        agent_id: &str,
        agent_name: &str,
        event_types: Vec<String>,
        exclude_self: bool,
    ) -> crate::cloudllm::event_bus::Subscriber {
        self.bus
            .subscribe(agent_id, agent_name, event_types, exclude_self)
            .await
    }

    /// `unsubscribe_from_events` — idempotent.
    pub async fn unsubscribe_from_events(&self, subscription_id: &str) {
        self.bus.unsubscribe(subscription_id).await;
    }

    /// `create_task` (A2A extra) — writes a task record directly.
    pub async fn create_task(&self, mut task: Task) -> CoreResult<Task> {
        task.status = TaskStatus::Pending;
        self.store.save_task(task.clone()).await?;
        Ok(task)
    }

    /// `initialize` (A2A extra) — creates/returns the workspace ROUTA id.
    pub async fn initialize(&self, workspace_id: &str) -> CoreResult<String> {
        self.store.initialize_workspace(workspace_id).await
    }
}

/// Descriptors for every coordination tool, in canonical order, used both to build the
/// CRAFTER system prompt and to back the A2A command surface's argument reconstruction.
pub fn tool_descriptors() -> Vec<ToolMetadata> {
    vec![
        ToolMetadata::new("list_agents", "List every agent registered in a workspace.")
            .with_parameter(ToolParameter::new("workspaceId", ToolParameterType::String).required()),
        ToolMetadata::new("create_agent", "Create a new agent in PENDING status.")
            .with_parameter(ToolParameter::new("name", ToolParameterType::String).required())
            .with_parameter(
                ToolParameter::new(
                    "role",
                    ToolParameterType::Enum(vec!["ROUTA".into(), "CRAFTER".into(), "GATE".into()]),
                )
                .required(),
            )
            .with_parameter(ToolParameter::new("workspaceId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("parentId", ToolParameterType::String))
            .with_parameter(ToolParameter::new(
                "modelTier",
                ToolParameterType::Enum(vec!["FAST".into(), "BALANCED".into(), "SMART".into()]),
            )),
        ToolMetadata::new("get_agent_status", "Return an agent's status, role and parent.")
            .with_parameter(ToolParameter::new("agentId", ToolParameterType::String).required()),
        ToolMetadata::new(
            "get_agent_summary",
            "Return an agent's latest objective, last message and task count.",
        )
        .with_parameter(ToolParameter::new("agentId", ToolParameterType::String).required()),
        ToolMetadata::new("read_agent_conversation", "Read an agent's conversation in order.")
            .with_parameter(ToolParameter::new("agentId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("lastN", ToolParameterType::Integer))
            .with_parameter(ToolParameter::new("includeToolCalls", ToolParameterType::Boolean)),
        ToolMetadata::new("message_agent", "Append a USER message to another agent.")
            .with_parameter(ToolParameter::new("fromAgentId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("toAgentId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("message", ToolParameterType::String).required()),
        ToolMetadata::new("delegate_task", "Assign a task to an agent.")
            .with_parameter(ToolParameter::new("agentId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("taskId", ToolParameterType::String).required())
            .with_parameter(
                ToolParameter::new("callerAgentId", ToolParameterType::String).required(),
            ),
        ToolMetadata::new("report_to_parent", "Report task completion to the parent agent.")
            .with_parameter(ToolParameter::new("agentId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("taskId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("summary", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new(
                "filesModified",
                ToolParameterType::List(Box::new(ToolParameterType::String)),
            ))
            .with_parameter(ToolParameter::new("success", ToolParameterType::Boolean).required()),
        ToolMetadata::new(
            "wake_or_create_task_agent",
            "Wake the task's existing assignee or spawn a new CRAFTER for it.",
        )
        .with_parameter(ToolParameter::new("taskId", ToolParameterType::String).required())
        .with_parameter(
            ToolParameter::new("contextMessage", ToolParameterType::String).required(),
        )
        .with_parameter(
            ToolParameter::new("callerAgentId", ToolParameterType::String).required(),
        )
        .with_parameter(
            ToolParameter::new("workspaceId", ToolParameterType::String).required(),
        )
        .with_parameter(ToolParameter::new("agentName", ToolParameterType::String))
        .with_parameter(ToolParameter::new(
            "modelTier",
            ToolParameterType::Enum(vec!["FAST".into(), "BALANCED".into(), "SMART".into()]),
        )),
        ToolMetadata::new(
            "send_message_to_task_agent",
            "Send a message to whichever agent a task is assigned to.",
        )
        .with_parameter(ToolParameter::new("taskId", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("message", ToolParameterType::String).required())
        .with_parameter(
            ToolParameter::new("callerAgentId", ToolParameterType::String).required(),
        ),
        ToolMetadata::new("subscribe_to_events", "Subscribe to coordination events by glob.")
            .with_parameter(ToolParameter::new("agentId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("agentName", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new(
                "eventTypes",
                ToolParameterType::List(Box::new(ToolParameterType::String)),
            ))
            .with_parameter(ToolParameter::new("excludeSelf", ToolParameterType::Boolean)),
        ToolMetadata::new("unsubscribe_from_events", "Cancel an event subscription.").with_parameter(
            ToolParameter::new("subscriptionId", ToolParameterType::String).required(),
        ),
    ]
}

/// Wraps a single named tool from [`AgentTools`] as an [`AdditionalTool`] so it can be
/// registered with [`crate::cloudllm::text_tool_executor::TextBasedToolExecutor`].
pub struct AgentToolAdapter {
    name: String,
    metadata: ToolMetadata,
    tools: AgentTools,
}

impl AgentToolAdapter {
    /// Build adapters for every coordination tool, in canonical order.
    pub fn all(tools: AgentTools) -> Vec<Arc<dyn AdditionalTool>> {
        tool_descriptors()
            .into_iter()
            .map(|metadata| {
                Arc::new(AgentToolAdapter {
                    name: metadata.name.clone(),
                    metadata,
                    tools: tools.clone(),
                }) as Arc<dyn AdditionalTool>
            })
            .collect()
    }
}

#[async_trait]
impl AdditionalTool for AgentToolAdapter {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn invoke(&self, args: serde_json::Value) -> ToolResult {
        let result = dispatch(&self.tools, &self.name, &args).await;
        match result {
            Ok(output) => ToolResult::success(self.name.clone(), output),
            Err(e) => ToolResult::failure(self.name.clone(), e.to_string()),
        }
    }
}

/// Route a single named call (as used by both the CRAFTER tool adapter and the A2A
/// dispatcher) to the matching [`AgentTools`] method and render its result as text/JSON.
pub async fn dispatch(
    tools: &AgentTools,
    name: &str,
    args: &serde_json::Value,
) -> CoreResult<String> {
    match name {
        "list_agents" => {
            let workspace_id = get_str(args, "workspaceId")
                .ok_or_else(|| CoreError::BadInput("workspaceId is required".into()))?;
            tools.list_agents(workspace_id).await
        }
        "create_agent" => {
            let agent = tools
                .create_agent(
                    get_str(args, "name")
                        .ok_or_else(|| CoreError::BadInput("name is required".into()))?,
                    get_str(args, "role")
                        .ok_or_else(|| CoreError::BadInput("role is required".into()))?,
                    get_str(args, "workspaceId")
                        .ok_or_else(|| CoreError::BadInput("workspaceId is required".into()))?,
                    get_str(args, "parentId"),
                    get_str(args, "modelTier"),
                )
                .await?;
            Ok(serde_json::to_string(&agent).unwrap_or_default())
        }
        "get_agent_status" => {
            let agent_id = get_str(args, "agentId")
                .ok_or_else(|| CoreError::BadInput("agentId is required".into()))?;
            let agent = tools.get_agent_status(agent_id).await?;
            Ok(format!(
                "status: {:?}\nrole: {}\nparent: {}",
                agent.status,
                agent.role,
                agent.parent_id.unwrap_or_else(|| "none".into())
            ))
        }
        "get_agent_summary" => {
            let agent_id = get_str(args, "agentId")
                .ok_or_else(|| CoreError::BadInput("agentId is required".into()))?;
            tools.get_agent_summary(agent_id).await
        }
        "read_agent_conversation" => {
            let agent_id = get_str(args, "agentId")
                .ok_or_else(|| CoreError::BadInput("agentId is required".into()))?;
            let messages = tools
                .read_agent_conversation(
                    agent_id,
                    get_usize(args, "lastN"),
                    get_bool(args, "includeToolCalls", false),
                )
                .await?;
            Ok(messages
                .iter()
                .map(|m| format!("[{:?}] {}", m.kind, m.content))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "message_agent" => {
            tools
                .message_agent(
                    get_str(args, "fromAgentId")
                        .ok_or_else(|| CoreError::BadInput("fromAgentId is required".into()))?,
                    get_str(args, "toAgentId")
                        .ok_or_else(|| CoreError::BadInput("toAgentId is required".into()))?,
                    get_str(args, "message")
                        .ok_or_else(|| CoreError::BadInput("message is required".into()))?,
                )
                .await?;
            Ok("ok".to_string())
        }
        "delegate_task" => {
            tools
                .delegate_task(
                    get_str(args, "agentId")
                        .ok_or_else(|| CoreError::BadInput("agentId is required".into()))?,
                    get_str(args, "taskId")
                        .ok_or_else(|| CoreError::BadInput("taskId is required".into()))?,
                    get_str(args, "callerAgentId")
                        .ok_or_else(|| CoreError::BadInput("callerAgentId is required".into()))?,
                )
                .await?;
            Ok("ok".to_string())
        }
        "report_to_parent" => {
            let report = CompletionReport {
                agent_id: get_str(args, "agentId")
                    .ok_or_else(|| CoreError::BadInput("agentId is required".into()))?
                    .to_string(),
                task_id: get_str(args, "taskId")
                    .ok_or_else(|| CoreError::BadInput("taskId is required".into()))?
                    .to_string(),
                summary: get_str(args, "summary").unwrap_or_default().to_string(),
                files_modified: get_str_list(args, "filesModified"),
                success: get_bool(args, "success", false),
            };
            tools.report_to_parent(report).await?;
            Ok("ok".to_string())
        }
        "wake_or_create_task_agent" => {
            let (agent, outcome) = tools
                .wake_or_create_task_agent(
                    get_str(args, "taskId")
                        .ok_or_else(|| CoreError::BadInput("taskId is required".into()))?,
                    get_str(args, "contextMessage")
                        .ok_or_else(|| CoreError::BadInput("contextMessage is required".into()))?,
                    get_str(args, "callerAgentId")
                        .ok_or_else(|| CoreError::BadInput("callerAgentId is required".into()))?,
                    get_str(args, "workspaceId")
                        .ok_or_else(|| CoreError::BadInput("workspaceId is required".into()))?,
                    get_str(args, "agentName"),
                    get_str(args, "modelTier"),
                )
                .await?;
            Ok(format!("{{\"agentId\":\"{}\",\"outcome\":\"{}\"}}", agent.id, outcome))
        }
        "send_message_to_task_agent" => {
            tools
                .send_message_to_task_agent(
                    get_str(args, "taskId")
                        .ok_or_else(|| CoreError::BadInput("taskId is required".into()))?,
                    get_str(args, "message")
                        .ok_or_else(|| CoreError::BadInput("message is required".into()))?,
                    get_str(args, "callerAgentId")
                        .ok_or_else(|| CoreError::BadInput("callerAgentId is required".into()))?,
                )
                .await?;
            Ok("ok".to_string())
        }
        "subscribe_to_events" => {
            let sub = tools
                .subscribe_to_events(
                    get_str(args, "agentId")
                        .ok_or_else(|| CoreError::BadInput("agentId is required".into()))?,
                    get_str(args, "agentName")
                        .ok_or_else(|| CoreError::BadInput("agentName is required".into()))?,
                    get_str_list(args, "eventTypes"),
                    get_bool(args, "excludeSelf", false),
                )
                .await;
            Ok(sub.subscription_id)
        }
        "unsubscribe_from_events" => {
            let subscription_id = get_str(args, "subscriptionId")
                .ok_or_else(|| CoreError::BadInput("subscriptionId is required".into()))?;
            tools.unsubscribe_from_events(subscription_id).await;
            Ok("ok".to_string())
        }
        other => Err(CoreError::BadInput(format!("unknown tool: {}", other))),
    }
}
