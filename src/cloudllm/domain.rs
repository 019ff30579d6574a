//! Shared data model for the coordination runtime: agents, tasks, conversations,
//! subscriptions, events, and completion reports.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Opaque identifier. All entity ids are UUIDv4 strings rendered via [`new_id`].
pub type Id = String;

/// Generate a fresh opaque id for an agent, task, subscription, etc.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// The three agent roles that share the coordination surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AgentRole {
    /// Plans the request and emits `@@@task` blocks.
    Routa,
    /// Implements a single delegated task via the text-based tool loop.
    Crafter,
    /// Reviews task definitions plus CRAFTER outputs and issues a verdict.
    Gate,
}

impl AgentRole {
    /// Strict parse of the three role tags; unknown values are [`None`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROUTA" => Some(AgentRole::Routa),
            "CRAFTER" => Some(AgentRole::Crafter),
            "GATE" => Some(AgentRole::Gate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Routa => "ROUTA",
            AgentRole::Crafter => "CRAFTER",
            AgentRole::Gate => "GATE",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relative sizing hint used when the LLM executor facade picks a model for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelTier {
    Fast,
    Balanced,
    Smart,
}

/// Lifecycle state of an [`Agent`]. Transitions only ever move forward:
/// `Pending -> Active -> {Completed|Error|Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AgentStatus {
    Pending,
    Active,
    Completed,
    Error,
    Cancelled,
}

impl AgentStatus {
    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (*self, next) {
            (s, n) if s == n => true,
            (Pending, Active) => true,
            (Active, Completed) | (Active, Error) | (Active, Cancelled) => true,
            (Pending, Completed) | (Pending, Error) | (Pending, Cancelled) => true,
            _ => false,
        }
    }
}

/// A participant in the coordination runtime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Agent {
    pub id: Id,
    pub name: String,
    pub role: AgentRole,
    pub workspace_id: Id,
    pub parent_id: Option<Id>,
    pub model_tier: Option<ModelTier>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: AgentRole, workspace_id: impl Into<Id>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            role,
            workspace_id: workspace_id.into(),
            parent_id: None,
            model_tier: None,
            status: AgentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle state of a [`Task`]. Transitions only move forward:
/// `Pending -> InProgress -> {Completed|Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (*self, next) {
            (s, n) if s == n => true,
            (Pending, InProgress) => true,
            (InProgress, Completed) | (InProgress, Failed) => true,
            (Pending, Completed) | (Pending, Failed) => true,
            _ => false,
        }
    }
}

/// A discrete unit of work extracted by the task parser, or created directly
/// via the A2A `create_task` command.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Task {
    pub id: Id,
    pub title: String,
    pub objective: String,
    pub scope: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub verification_commands: Vec<String>,
    pub assigned_to: Option<Id>,
    pub status: TaskStatus,
    pub workspace_id: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: impl Into<String>, workspace_id: impl Into<Id>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            objective: String::new(),
            scope: Vec::new(),
            acceptance_criteria: Vec::new(),
            verification_commands: Vec::new(),
            assigned_to: None,
            status: TaskStatus::Pending,
            workspace_id: workspace_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single turn in an agent's append-only conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationMessage {
    pub agent_id: Id,
    pub from_agent_id: Option<Id>,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(agent_id: impl Into<Id>, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            agent_id: agent_id.into(),
            from_agent_id: None,
            content: content.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn from(mut self, from_agent_id: impl Into<Id>) -> Self {
        self.from_agent_id = Some(from_agent_id.into());
        self
    }
}

/// A live registration for filtered event delivery.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Id,
    pub subscriber_agent_id: Id,
    pub subscriber_name: String,
    pub event_type_globs: Vec<String>,
    pub exclude_self: bool,
}

/// An ephemeral coordination event, delivered only to live matching subscribers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoordEvent {
    pub event_type: String,
    pub payload: HashMap<String, String>,
    pub source_agent_id: Option<Id>,
    pub timestamp: DateTime<Utc>,
}

impl CoordEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: HashMap::new(),
            source_agent_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn from_agent(mut self, agent_id: impl Into<Id>) -> Self {
        self.source_agent_id = Some(agent_id.into());
        self
    }
}

/// A worker agent's report back to its parent.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompletionReport {
    pub agent_id: Id,
    pub task_id: Id,
    pub summary: String,
    pub files_modified: Vec<String>,
    pub success: bool,
}
