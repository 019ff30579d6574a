// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// Re-export the most commonly used items so embedders don't have to navigate the full module
// hierarchy for day-to-day use.
pub use cloudllm::client_wrapper::{
    ClientWrapper, Message, MessageChunk, MessageChunkStream, NativeToolCall, Role, TokenUsage,
    ToolDefinition,
};
pub use cloudllm::domain::{
    Agent, AgentRole, AgentStatus, CompletionReport, ConversationMessage, CoordEvent, Id,
    MessageKind, ModelTier, Subscription, Task, TaskStatus,
};
pub use cloudllm::error::{CoreError, CoreResult};
pub use cloudllm::event_bus::EventBus;
pub use cloudllm::store::CoordinationStore;
pub use cloudllm::agent_tools::{AgentToolAdapter, AgentTools};
pub use cloudllm::llm_executor::{build_executor, Executor, NamedModelConfig, Provider};
pub use cloudllm::orchestrator::{Orchestrator, RunOutcome};
pub use cloudllm::workspace_agent::{StreamChunk, WorkspaceAgentLoop};

// Individual provider clients live under `cloudllm::clients` and are left unexported at the
// crate root since most callers go through `cloudllm::llm_executor::build_executor` instead of
// constructing a concrete client directly.
