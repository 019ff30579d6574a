//! Coordination store.
//!
//! An in-memory, workspace-scoped store for agents, tasks and conversations. Each table is
//! guarded by its own `tokio::sync::RwLock` so that readers never block readers; per-agent
//! conversation appends serialize through that same lock to give wall-clock append ordering.
//!
//! The store is the only storage backend the core ships: persistence across processes is an
//! explicit non-goal.

use crate::cloudllm::domain::{
    Agent, AgentRole, AgentStatus, ConversationMessage, Id, Task, TaskStatus,
};
use crate::cloudllm::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct WorkspaceTables {
    agents: HashMap<Id, Agent>,
    agent_order: Vec<Id>,
    tasks: HashMap<Id, Task>,
    task_order: Vec<Id>,
    conversations: HashMap<Id, Vec<ConversationMessage>>,
    routa_id: Option<Id>,
}

/// The synchronous-within-a-workspace coordination store.
///
/// All operations are `async fn` because they take a lock, but none of them suspend on
/// anything but that lock — there is no I/O here: every store is in-memory and non-suspending.
pub struct CoordinationStore {
    workspaces: RwLock<HashMap<Id, Arc<RwLock<WorkspaceTables>>>>,
}

impl CoordinationStore {
    pub fn new() -> Self {
        Self {
            workspaces: RwLock::new(HashMap::new()),
        }
    }

    async fn workspace(&self, workspace_id: &str) -> Arc<RwLock<WorkspaceTables>> {
        if let Some(ws) = self.workspaces.read().await.get(workspace_id) {
            return ws.clone();
        }
        let mut write = self.workspaces.write().await;
        write
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(WorkspaceTables::default())))
            .clone()
    }

    /// Idempotent: creates the singleton ROUTA agent on first call and returns its id on
    /// every subsequent call.
    pub async fn initialize_workspace(&self, workspace_id: &str) -> CoreResult<Id> {
        let ws = self.workspace(workspace_id).await;
        let mut tables = ws.write().await;
        if let Some(id) = tables.routa_id.clone() {
            return Ok(id);
        }
        let mut routa = Agent::new("routa", AgentRole::Routa, workspace_id);
        routa.status = AgentStatus::Active;
        let id = routa.id.clone();
        tables.agent_order.push(id.clone());
        tables.agents.insert(id.clone(), routa);
        tables.routa_id = Some(id.clone());
        Ok(id)
    }

    /// Insert or update an agent. Rejects a dangling `parent_id` and enforces status
    /// monotonicity.
    pub async fn save_agent(&self, agent: Agent) -> CoreResult<()> {
        let ws = self.workspace(&agent.workspace_id).await;
        let mut tables = ws.write().await;
        if let Some(parent_id) = &agent.parent_id {
            if !tables.agents.contains_key(parent_id) {
                return Err(CoreError::NotFound(format!(
                    "parent agent {} does not exist",
                    parent_id
                )));
            }
        }
        if let Some(existing) = tables.agents.get(&agent.id) {
            if !existing.status.can_transition_to(agent.status) {
                return Err(CoreError::InvalidState(format!(
                    "agent {} cannot move from {:?} to {:?}",
                    agent.id, existing.status, agent.status
                )));
            }
        } else {
            tables.agent_order.push(agent.id.clone());
        }
        tables.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    pub async fn get_agent(&self, workspace_id: &str, agent_id: &str) -> CoreResult<Agent> {
        let ws = self.workspace(workspace_id).await;
        let tables = ws.read().await;
        tables
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("agent {} not found", agent_id)))
    }

    /// Looks up an agent across all workspaces (callers frequently only have an agent id).
    pub async fn find_agent(&self, agent_id: &str) -> CoreResult<Agent> {
        let workspaces = self.workspaces.read().await;
        for ws in workspaces.values() {
            let tables = ws.read().await;
            if let Some(agent) = tables.agents.get(agent_id) {
                return Ok(agent.clone());
            }
        }
        Err(CoreError::NotFound(format!("agent {} not found", agent_id)))
    }

    /// Ordered by creation time.
    pub async fn list_agents(&self, workspace_id: &str) -> Vec<Agent> {
        let ws = self.workspace(workspace_id).await;
        let tables = ws.read().await;
        tables
            .agent_order
            .iter()
            .filter_map(|id| tables.agents.get(id).cloned())
            .collect()
    }

    pub async fn save_task(&self, task: Task) -> CoreResult<()> {
        let ws = self.workspace(&task.workspace_id).await;
        let mut tables = ws.write().await;
        if let Some(assigned_to) = &task.assigned_to {
            if !tables.agents.contains_key(assigned_to) {
                return Err(CoreError::NotFound(format!(
                    "assigned agent {} does not exist",
                    assigned_to
                )));
            }
        }
        if let Some(existing) = tables.tasks.get(&task.id) {
            if !existing.status.can_transition_to(task.status) {
                return Err(CoreError::InvalidState(format!(
                    "task {} cannot move from {:?} to {:?}",
                    task.id, existing.status, task.status
                )));
            }
        } else {
            tables.task_order.push(task.id.clone());
        }
        tables.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub async fn get_task(&self, workspace_id: &str, task_id: &str) -> CoreResult<Task> {
        let ws = self.workspace(workspace_id).await;
        let tables = ws.read().await;
        tables
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("task {} not found", task_id)))
    }

    pub async fn find_task(&self, task_id: &str) -> CoreResult<Task> {
        let workspaces = self.workspaces.read().await;
        for ws in workspaces.values() {
            let tables = ws.read().await;
            if let Some(task) = tables.tasks.get(task_id) {
                return Ok(task.clone());
            }
        }
        Err(CoreError::NotFound(format!("task {} not found", task_id)))
    }

    pub async fn tasks_for_agent(&self, workspace_id: &str, agent_id: &str) -> Vec<Task> {
        let ws = self.workspace(workspace_id).await;
        let tables = ws.read().await;
        tables
            .task_order
            .iter()
            .filter_map(|id| tables.tasks.get(id))
            .filter(|t| t.assigned_to.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    /// Newest tasks in parse/creation order.
    pub async fn list_tasks(&self, workspace_id: &str) -> Vec<Task> {
        let ws = self.workspace(workspace_id).await;
        let tables = ws.read().await;
        tables
            .task_order
            .iter()
            .filter_map(|id| tables.tasks.get(id).cloned())
            .collect()
    }

    /// Appends a message to an agent's conversation. The per-workspace write lock is the
    /// serialization point that gives wall-clock append ordering under concurrent callers.
    pub async fn append_message(
        &self,
        workspace_id: &str,
        msg: ConversationMessage,
    ) -> CoreResult<()> {
        let ws = self.workspace(workspace_id).await;
        let mut tables = ws.write().await;
        if !tables.agents.contains_key(&msg.agent_id) {
            return Err(CoreError::NotFound(format!(
                "agent {} not found",
                msg.agent_id
            )));
        }
        tables
            .conversations
            .entry(msg.agent_id.clone())
            .or_default()
            .push(msg);
        Ok(())
    }

    /// Same as [`Self::append_message`] but resolves the owning workspace by scanning —
    /// used by tools that only carry an agent id.
    pub async fn append_message_by_agent(&self, msg: ConversationMessage) -> CoreResult<()> {
        let workspace_id = self.find_agent(&msg.agent_id).await?.workspace_id;
        self.append_message(&workspace_id, msg).await
    }

    /// Most-recent-last ordering; `last_n` caps the tail returned, `include_tool_calls`
    /// controls whether `ToolCall`/`ToolResult` turns are filtered out.
    pub async fn read_conversation(
        &self,
        workspace_id: &str,
        agent_id: &str,
        last_n: Option<usize>,
        include_tool_calls: bool,
    ) -> Vec<ConversationMessage> {
        use crate::cloudllm::domain::MessageKind;
        let ws = self.workspace(workspace_id).await;
        let tables = ws.read().await;
        let mut messages: Vec<ConversationMessage> = tables
            .conversations
            .get(agent_id)
            .cloned()
            .unwrap_or_default();
        if !include_tool_calls {
            messages.retain(|m| !matches!(m.kind, MessageKind::ToolCall | MessageKind::ToolResult));
        }
        if let Some(n) = last_n {
            let len = messages.len();
            if len > n {
                messages = messages.split_off(len - n);
            }
        }
        messages
    }

    /// Convenience wrapper resolving the owning workspace for an agent id.
    pub async fn read_conversation_by_agent(
        &self,
        agent_id: &str,
        last_n: Option<usize>,
        include_tool_calls: bool,
    ) -> CoreResult<Vec<ConversationMessage>> {
        let workspace_id = self.find_agent(agent_id).await?.workspace_id;
        Ok(self
            .read_conversation(&workspace_id, agent_id, last_n, include_tool_calls)
            .await)
    }
}

impl Default for CoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}
