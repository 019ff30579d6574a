//! Orchestrator: drives the fixed `PLAN -> DISPATCH -> CRAFT -> VERIFY -> DONE` pipeline for
//! one user request, coordinating a ROUTA, a CRAFTER per parsed task, and a closing GATE
//! agent over the [`CoordinationStore`]/[`EventBus`]/[`WorkspaceAgentLoop`] primitives.

use crate::cloudllm::domain::{Agent, AgentRole, AgentStatus, CoordEvent, Id, Task, TaskStatus};
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::event_bus::EventBus;
use crate::cloudllm::llm_executor::Executor;
use crate::cloudllm::store::CoordinationStore;
use crate::cloudllm::task_parser::parse_tasks;
use crate::cloudllm::text_tool_executor::TextBasedToolExecutor;
use crate::cloudllm::workspace_agent::{CancellationRegistry, WorkspaceAgentLoop};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cap on the ring-buffered debug log kept per orchestrator run.
pub const DEBUG_LOG_CAPACITY: usize = 500;

/// Cooperative-exit grace period observed after a cancellation is requested before the run
/// gives up and reports whichever phase it had reached.
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Whether CRAFTER agents run one after another or concurrently up to a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CraftMode {
    Sequential,
    Parallel { max_concurrent: usize },
}

/// One phase of the pipeline, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Plan,
    Dispatch,
    Craft,
    Verify,
    Done,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "PLAN",
            Phase::Dispatch => "DISPATCH",
            Phase::Craft => "CRAFT",
            Phase::Verify => "VERIFY",
            Phase::Done => "DONE",
        }
    }
}

/// One entry in the bounded debug log: every phase transition, task parse, agent start and
/// completion, prompt preview, stream open/close, stop/interrupt, and error.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub phase: Phase,
    pub message: String,
}

/// A 500-entry ring buffer recording a run's progress; the oldest entry is dropped once full.
#[derive(Default)]
struct DebugLog {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl DebugLog {
    fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(DEBUG_LOG_CAPACITY)),
        }
    }

    fn push(&self, phase: Phase, message: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= DEBUG_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            phase,
            message: message.into(),
        });
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

/// The outcome of a run that reached `DONE`.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Success {
        verdict: String,
        tasks: Vec<Task>,
        crafter_outputs: Vec<(Id, String)>,
    },
    Failure {
        reason: String,
        partial: Vec<(Id, String)>,
    },
    /// DISPATCH parsed zero tasks from ROUTA's plan.
    NoTasks,
    /// A cancellation was observed and the grace period elapsed (or every running agent
    /// converged) before reaching `DONE`.
    Cancelled { reached_phase: Phase },
}

/// Drives one end-to-end `PLAN -> DISPATCH -> CRAFT -> VERIFY -> DONE` run.
pub struct Orchestrator {
    store: Arc<CoordinationStore>,
    bus: Arc<EventBus>,
    executor: Arc<dyn Executor>,
    tools: Arc<TextBasedToolExecutor>,
    cancellation: CancellationRegistry,
    craft_mode: CraftMode,
    debug_log: DebugLog,
}

impl Orchestrator {
    pub fn new(
        store: Arc<CoordinationStore>,
        bus: Arc<EventBus>,
        executor: Arc<dyn Executor>,
        tools: Arc<TextBasedToolExecutor>,
    ) -> Self {
        Self {
            store,
            bus,
            executor,
            tools,
            cancellation: CancellationRegistry::new(),
            craft_mode: CraftMode::Sequential,
            debug_log: DebugLog::new(),
        }
    }

    pub fn with_craft_mode(mut self, mode: CraftMode) -> Self {
        self.craft_mode = mode;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationRegistry) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> &CancellationRegistry {
        &self.cancellation
    }

    /// The run's debug log, newest entries last. Cloned out of the internal ring buffer.
    pub fn debug_log(&self) -> Vec<LogEntry> {
        self.debug_log.snapshot()
    }

    fn new_loop(&self) -> WorkspaceAgentLoop {
        WorkspaceAgentLoop::new(self.executor.clone(), self.tools.clone())
            .with_cancellation(self.cancellation.clone())
    }

    async fn spawn_agent(&self, name: &str, role: AgentRole, workspace_id: &str) -> CoreResult<Agent> {
        let mut agent = Agent::new(name, role, workspace_id);
        agent.status = AgentStatus::Active;
        self.store.save_agent(agent.clone()).await?;
        self.bus
            .publish(
                CoordEvent::new("agent.created")
                    .with("agent_id", agent.id.clone())
                    .with("role", role.as_str())
                    .from_agent(agent.id.clone()),
            )
            .await;
        Ok(agent)
    }

    async fn complete_agent(&self, mut agent: Agent) -> CoreResult<()> {
        agent.status = AgentStatus::Completed;
        agent.updated_at = chrono::Utc::now();
        self.store.save_agent(agent).await
    }

    /// Run the full pipeline for `user_request` inside `workspace_id`, returning once `DONE`
    /// is reached, `DISPATCH` finds no tasks, or a cancellation converges.
    pub async fn run(&self, workspace_id: &str, user_request: &str) -> CoreResult<RunOutcome> {
        // PLAN
        self.debug_log.push(Phase::Plan, "phase started");
        if self.cancellation_hit(workspace_id, Phase::Plan).await {
            return Ok(RunOutcome::Cancelled {
                reached_phase: Phase::Plan,
            });
        }
        let routa = self.spawn_agent("routa", AgentRole::Routa, workspace_id).await?;
        self.debug_log.push(
            Phase::Plan,
            format!("ROUTA running, prompt preview: {}", preview(user_request)),
        );
        let plan = self
            .new_loop()
            .run(&routa.id, ROUTA_SYSTEM_PROMPT, user_request)
            .await?;
        self.complete_agent(routa.clone()).await?;
        self.debug_log.push(Phase::Plan, "ROUTA completed");

        // DISPATCH
        self.debug_log.push(Phase::Dispatch, "phase started");
        if self.cancellation_hit(workspace_id, Phase::Dispatch).await {
            return Ok(RunOutcome::Cancelled {
                reached_phase: Phase::Dispatch,
            });
        }
        let mut tasks = parse_tasks(&plan, workspace_id);
        if tasks.is_empty() {
            self.debug_log.push(Phase::Dispatch, "NO_TASKS");
            return Ok(RunOutcome::NoTasks);
        }
        for task in &mut tasks {
            self.store.save_task(task.clone()).await?;
            self.debug_log
                .push(Phase::Dispatch, format!("TASK planned: {}", task.title));
        }

        // CRAFT
        self.debug_log.push(Phase::Craft, "phase started");
        let craft_result = self.craft(workspace_id, &tasks).await?;
        if let CraftResult::Cancelled = craft_result {
            return Ok(RunOutcome::Cancelled {
                reached_phase: Phase::Craft,
            });
        }
        let crafter_outputs = match craft_result {
            CraftResult::Done(outputs) => outputs,
            CraftResult::Cancelled => unreachable!(),
        };

        // VERIFY
        self.debug_log.push(Phase::Verify, "phase started");
        if self.cancellation_hit(workspace_id, Phase::Verify).await {
            return Ok(RunOutcome::Cancelled {
                reached_phase: Phase::Verify,
            });
        }
        let gate = self.spawn_agent("gate", AgentRole::Gate, workspace_id).await?;
        self.debug_log.push(Phase::Verify, "GATE running");
        let verify_prompt = build_verify_prompt(&tasks, &crafter_outputs);
        let verdict = self
            .new_loop()
            .run(&gate.id, GATE_SYSTEM_PROMPT, &verify_prompt)
            .await?;
        self.complete_agent(gate).await?;
        self.debug_log.push(Phase::Verify, "GATE completed");

        // DONE
        self.debug_log.push(Phase::Done, "phase started");
        let approved = verdict.trim_start().starts_with("\u{2705}")
            || verdict.to_ascii_uppercase().contains("APPROVED");
        let outcome = if approved {
            RunOutcome::Success {
                verdict,
                tasks,
                crafter_outputs,
            }
        } else {
            RunOutcome::Failure {
                reason: verdict,
                partial: crafter_outputs,
            }
        };
        self.debug_log.push(Phase::Done, "run finished");
        Ok(outcome)
    }

    /// Runs every task's CRAFTER agent. In sequential mode, task N+1 only starts once task
    /// N's agent has reported completion, in parse order.
    async fn craft(&self, workspace_id: &str, tasks: &[Task]) -> CoreResult<CraftResult> {
        match self.craft_mode {
            CraftMode::Sequential => {
                let mut outputs = Vec::with_capacity(tasks.len());
                for task in tasks {
                    if self.cancellation_hit(workspace_id, Phase::Craft).await {
                        return Ok(CraftResult::Cancelled);
                    }
                    let output = self.run_one_crafter(workspace_id, task).await?;
                    outputs.push(output);
                }
                Ok(CraftResult::Done(outputs))
            }
            CraftMode::Parallel { max_concurrent } => {
                let bound = max_concurrent.max(1);
                let mut outputs = Vec::with_capacity(tasks.len());
                for chunk in tasks.chunks(bound) {
                    if self.cancellation_hit(workspace_id, Phase::Craft).await {
                        return Ok(CraftResult::Cancelled);
                    }
                    let futures = chunk.iter().map(|task| self.run_one_crafter(workspace_id, task));
                    let results = futures_util::future::join_all(futures).await;
                    for result in results {
                        outputs.push(result?);
                    }
                }
                Ok(CraftResult::Done(outputs))
            }
        }
    }

    async fn run_one_crafter(&self, workspace_id: &str, task: &Task) -> CoreResult<(Id, String)> {
        let crafter = self
            .spawn_agent(&format!("crafter-{}", &task.id[..8.min(task.id.len())]), AgentRole::Crafter, workspace_id)
            .await?;
        let mut assigned = task.clone();
        assigned.assigned_to = Some(crafter.id.clone());
        assigned.status = TaskStatus::InProgress;
        assigned.updated_at = chrono::Utc::now();
        self.store.save_task(assigned.clone()).await?;
        self.debug_log
            .push(Phase::Craft, format!("CRAFTER running: {}", task.title));

        let prompt = build_task_prompt(task);
        let output = self
            .new_loop()
            .run(&crafter.id, CRAFTER_SYSTEM_PROMPT, &prompt)
            .await?;

        let mut completed = assigned;
        completed.status = TaskStatus::Completed;
        completed.updated_at = chrono::Utc::now();
        self.store.save_task(completed).await?;
        self.complete_agent(crafter.clone()).await?;
        self.debug_log
            .push(Phase::Craft, format!("CRAFTER completed: {}", task.title));

        Ok((crafter.id, output))
    }

    /// True when a cancellation is outstanding against any agent registered for this run.
    /// Waits up to [`CANCEL_GRACE_PERIOD`] for cooperative exit before reporting cancelled.
    async fn cancellation_hit(&self, _workspace_id: &str, phase: Phase) -> bool {
        if !self.cancellation.is_cancelled(RUN_SENTINEL).await {
            return false;
        }
        self.debug_log.push(phase, "cancellation observed, awaiting cooperative exit");
        tokio::time::sleep(CANCEL_GRACE_PERIOD).await;
        self.cancellation.clear(RUN_SENTINEL).await;
        self.debug_log.push(phase, "cancelled");
        true
    }

    /// Request cancellation of the whole run. Every in-flight agent's cooperative flag is set
    /// via the shared [`CancellationRegistry`]; callers typically also interrupt each agent id
    /// they know about directly.
    pub async fn interrupt(&self) {
        self.cancellation.interrupt(RUN_SENTINEL).await;
    }
}

/// A synthetic agent id the orchestrator uses to flag a whole-run cancellation, distinct from
/// any individual ROUTA/CRAFTER/GATE id, in the same [`CancellationRegistry`] those agents'
/// loops already consult at their own iteration boundaries.
const RUN_SENTINEL: &str = "__orchestrator_run__";

enum CraftResult {
    Done(Vec<(Id, String)>),
    Cancelled,
}

const ROUTA_SYSTEM_PROMPT: &str = "You are ROUTA. Break the user's request into @@@task blocks.";
const CRAFTER_SYSTEM_PROMPT: &str = "You are CRAFTER. Implement the assigned task using the available tools.";
const GATE_SYSTEM_PROMPT: &str = "You are GATE. Approve or reject the work against the task definitions.";

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let end = text.char_indices().nth(MAX).map_or(text.len(), |(i, _)| i);
        format!("{}...", &text[..end])
    }
}

fn build_task_prompt(task: &Task) -> String {
    format!(
        "# {}\n## Objective\n{}\n## Scope\n{}\n## Definition of Done\n{}\n## Verification\n{}",
        task.title,
        task.objective,
        bullet(&task.scope),
        bullet(&task.acceptance_criteria),
        bullet(&task.verification_commands),
    )
}

fn bullet(items: &[String]) -> String {
    items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
}

fn build_verify_prompt(tasks: &[Task], crafter_outputs: &[(Id, String)]) -> String {
    let mut out = String::from("Review the following tasks and their CRAFTER outputs, then reply with either a leading \u{2705} APPROVED or \u{274c} REJECTED verdict.\n\n");
    for (task, (agent_id, output)) in tasks.iter().zip(crafter_outputs.iter()) {
        out.push_str(&format!(
            "## Task: {}\nObjective: {}\nCRAFTER ({}) output:\n{}\n\n",
            task.title, task.objective, agent_id, output
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::MessageChunkStream;
    use crate::cloudllm::llm_executor::Turn;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    const TWO_TASK_PLAN: &str = r#"
@@@task
# Task One
## Objective
Do the first thing
## Scope
- step a
## Definition of Done
- works
## Verification
- cargo test
@@@

@@@task
# Task Two
## Objective
Do the second thing
## Scope
- step b
## Definition of Done
- works
## Verification
- cargo test
@@@
"#;

    /// A scripted executor that replies deterministically by role, keyed off the system
    /// prompt, and records the order in which agents called it.
    struct ScriptedRoleExecutor {
        order: AsyncMutex<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for ScriptedRoleExecutor {
        async fn execute(&self, system_prompt: &str, _turns: &[Turn]) -> CoreResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if system_prompt == ROUTA_SYSTEM_PROMPT {
                self.order.lock().await.push("ROUTA");
                Ok(TWO_TASK_PLAN.to_string())
            } else if system_prompt == CRAFTER_SYSTEM_PROMPT {
                self.order.lock().await.push("CRAFTER");
                Ok("Implemented the task.".to_string())
            } else {
                self.order.lock().await.push("GATE");
                Ok("\u{2705} APPROVED".to_string())
            }
        }

        async fn execute_stream(
            &self,
            _system_prompt: &str,
            _turns: &[Turn],
        ) -> CoreResult<Option<MessageChunkStream>> {
            Ok(None)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn new_orchestrator(executor: Arc<ScriptedRoleExecutor>) -> Orchestrator {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CoordinationStore::new());
        let bus = Arc::new(EventBus::new());
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        Orchestrator::new(store, bus, executor, tools)
    }

    #[tokio::test]
    async fn happy_path_runs_routa_then_two_crafters_then_gate() {
        let executor = Arc::new(ScriptedRoleExecutor {
            order: AsyncMutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = new_orchestrator(executor.clone());

        let outcome = orchestrator.run("ws-1", "Build the feature").await.unwrap();

        match outcome {
            RunOutcome::Success { verdict, tasks, crafter_outputs } => {
                assert!(verdict.contains("APPROVED"));
                assert_eq!(tasks.len(), 2);
                assert_eq!(crafter_outputs.len(), 2);
            }
            other => panic!("expected Success, got {:?}", other),
        }

        let order = executor.order.lock().await.clone();
        assert_eq!(order, vec!["ROUTA", "CRAFTER", "CRAFTER", "GATE"]);

        let log = orchestrator.debug_log();
        let planned = log.iter().filter(|e| e.message.starts_with("TASK planned")).count();
        let running = log.iter().filter(|e| e.message.starts_with("CRAFTER running")).count();
        let completed = log.iter().filter(|e| e.message.starts_with("CRAFTER completed")).count();
        assert_eq!(planned, 2);
        assert_eq!(running, 2);
        assert_eq!(completed, 2);
    }

    struct RejectingExecutor;

    #[async_trait]
    impl Executor for RejectingExecutor {
        async fn execute(&self, system_prompt: &str, _turns: &[Turn]) -> CoreResult<String> {
            if system_prompt == ROUTA_SYSTEM_PROMPT {
                Ok(TWO_TASK_PLAN.to_string())
            } else if system_prompt == CRAFTER_SYSTEM_PROMPT {
                Ok("Attempted the task.".to_string())
            } else {
                Ok("\u{274c} REJECTED: missing tests".to_string())
            }
        }

        async fn execute_stream(
            &self,
            _system_prompt: &str,
            _turns: &[Turn],
        ) -> CoreResult<Option<MessageChunkStream>> {
            Ok(None)
        }

        fn model_name(&self) -> &str {
            "rejecting"
        }
    }

    #[tokio::test]
    async fn gate_rejection_yields_failure_with_partial_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CoordinationStore::new());
        let bus = Arc::new(EventBus::new());
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let orchestrator = Orchestrator::new(store, bus, Arc::new(RejectingExecutor), tools);

        let outcome = orchestrator.run("ws-1", "Build the feature").await.unwrap();
        match outcome {
            RunOutcome::Failure { reason, partial } => {
                assert!(reason.contains("REJECTED"));
                assert_eq!(partial.len(), 2);
            }
            other => panic!("expected Failure, got {:?}", other),
        }
    }

    struct NoTasksExecutor;

    #[async_trait]
    impl Executor for NoTasksExecutor {
        async fn execute(&self, _system_prompt: &str, _turns: &[Turn]) -> CoreResult<String> {
            Ok("Nothing to do here, no tasks needed.".to_string())
        }

        async fn execute_stream(
            &self,
            _system_prompt: &str,
            _turns: &[Turn],
        ) -> CoreResult<Option<MessageChunkStream>> {
            Ok(None)
        }

        fn model_name(&self) -> &str {
            "no-tasks"
        }
    }

    #[tokio::test]
    async fn zero_tasks_short_circuits_to_no_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CoordinationStore::new());
        let bus = Arc::new(EventBus::new());
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let orchestrator = Orchestrator::new(store, bus, Arc::new(NoTasksExecutor), tools);

        let outcome = orchestrator.run("ws-1", "Nothing needed").await.unwrap();
        assert!(matches!(outcome, RunOutcome::NoTasks));
    }

    #[test]
    fn debug_log_ring_buffer_drops_oldest_past_capacity() {
        let log = DebugLog::new();
        for i in 0..DEBUG_LOG_CAPACITY + 10 {
            log.push(Phase::Craft, format!("entry {}", i));
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), DEBUG_LOG_CAPACITY);
        assert_eq!(snapshot.first().unwrap().message, "entry 10");
    }

    #[test]
    fn preview_truncates_on_a_char_boundary_for_cjk_text() {
        let text = "构建".repeat(100);
        let result = std::panic::catch_unwind(|| preview(&text));
        assert!(result.is_ok());
        assert!(result.unwrap().ends_with("..."));
    }
}
