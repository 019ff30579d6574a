//! Workspace agent loop: the iterative text-based tool-call loop any ROUTA, CRAFTER, or GATE
//! agent runs against its [`Executor`], in one-shot and streaming variants.
//!
//! Tool semantics ride entirely inside message text — the loop always passes no native tools
//! to the executor. This removes dependence on provider-specific function-calling quirks at
//! the cost of a slightly chattier wire format; see [`crate::cloudllm::tool_call_extractor`]
//! and [`crate::cloudllm::text_tool_executor`] for the two halves of that protocol.

use crate::cloudllm::client_wrapper::Role;
use crate::cloudllm::error::CoreResult;
use crate::cloudllm::llm_executor::{Executor, Turn};
use crate::cloudllm::text_tool_executor::{format_results, TextBasedToolExecutor};
use crate::cloudllm::tool_call_extractor::extract_tool_calls;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default cap on tool-loop iterations before the loop gives up and returns whatever it has.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// A chunk of progress emitted to an embedder driving the streaming variant of the loop.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Thinking { phase: ThinkingPhase, content: String },
    ToolCall {
        name: String,
        status: ToolCallStatus,
        arguments: Option<String>,
        result: Option<String>,
    },
    Error { message: String, recoverable: bool },
    Completed { stop_reason: String },
    Heartbeat,
    CompletionReport {
        summary: String,
        success: bool,
        files_modified: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingPhase {
    Start,
    Chunk,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

/// Cooperative cancellation flags keyed by agent id, checked at every iteration boundary and
/// before every emitted stream chunk.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    cancelled: Arc<RwLock<HashSet<String>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn interrupt(&self, agent_id: &str) {
        self.cancelled.write().await.insert(agent_id.to_string());
    }

    pub async fn is_cancelled(&self, agent_id: &str) -> bool {
        self.cancelled.read().await.contains(agent_id)
    }

    /// Drops the flag; called once a cancelled loop has converged and exited.
    pub async fn clear(&self, agent_id: &str) {
        self.cancelled.write().await.remove(agent_id);
    }
}

/// Drives one agent's conversation through its tool loop against an [`Executor`] and a
/// [`TextBasedToolExecutor`].
pub struct WorkspaceAgentLoop {
    executor: Arc<dyn Executor>,
    tools: Arc<TextBasedToolExecutor>,
    cancellation: CancellationRegistry,
    max_iterations: usize,
}

impl WorkspaceAgentLoop {
    pub fn new(executor: Arc<dyn Executor>, tools: Arc<TextBasedToolExecutor>) -> Self {
        Self {
            executor,
            tools,
            cancellation: CancellationRegistry::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationRegistry) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> &CancellationRegistry {
        &self.cancellation
    }

    /// Run the loop to completion (no intermediate chunks observed by the caller).
    ///
    /// Terminates as soon as a response contains no tool calls, returning that response. If
    /// `max_iterations` is exhausted first, returns the last response annotated accordingly.
    pub async fn run(
        &self,
        agent_id: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> CoreResult<String> {
        let mut conversation = vec![Turn::new(Role::User, user_prompt)];
        let mut last_response = String::new();

        for _iteration in 1..=self.max_iterations {
            if self.cancellation.is_cancelled(agent_id).await {
                self.cancellation.clear(agent_id).await;
                return Ok(if last_response.is_empty() {
                    "[Agent cancelled]".to_string()
                } else {
                    last_response
                });
            }

            let response = self.executor.execute(system_prompt, &conversation).await?;
            last_response = response.clone();

            let calls = extract_tool_calls(&response);
            if calls.is_empty() {
                return Ok(response);
            }

            conversation.push(Turn::new(Role::Assistant, response));

            let results = self.tools.execute_all(&calls).await;
            let formatted = format_results(&results);
            conversation.push(Turn::new(Role::User, formatted));
        }

        Ok(format!("{}\n\n[Agent reached max iterations]", last_response))
    }

    /// Streaming variant: emits [`StreamChunk::Text`] deltas as they arrive, a `ToolCall`
    /// chunk pair per executed call, and a final `Completed` chunk. Falls back to a single
    /// synthetic `Text` chunk per iteration when the executor has no streaming support.
    pub async fn run_streaming(
        &self,
        agent_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        on_chunk: impl Fn(StreamChunk) + Send + Sync,
    ) -> CoreResult<String> {
        let mut conversation = vec![Turn::new(Role::User, user_prompt)];
        let mut last_response = String::new();

        for _iteration in 1..=self.max_iterations {
            if self.cancellation.is_cancelled(agent_id).await {
                self.cancellation.clear(agent_id).await;
                on_chunk(StreamChunk::Completed {
                    stop_reason: "cancelled".to_string(),
                });
                return Ok(if last_response.is_empty() {
                    "[Agent cancelled]".to_string()
                } else {
                    last_response
                });
            }

            let mut accumulated = String::new();
            match self
                .executor
                .execute_stream(system_prompt, &conversation)
                .await?
            {
                Some(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        if self.cancellation.is_cancelled(agent_id).await {
                            self.cancellation.clear(agent_id).await;
                            on_chunk(StreamChunk::Completed {
                                stop_reason: "cancelled".to_string(),
                            });
                            return Ok(if accumulated.is_empty() {
                                last_response
                            } else {
                                accumulated
                            });
                        }
                        match chunk {
                            Ok(chunk) => {
                                if !chunk.content.is_empty() {
                                    accumulated.push_str(&chunk.content);
                                    on_chunk(StreamChunk::Text(chunk.content));
                                }
                            }
                            Err(e) => {
                                on_chunk(StreamChunk::Error {
                                    message: e.to_string(),
                                    recoverable: true,
                                });
                            }
                        }
                    }
                }
                None => {
                    accumulated = self.executor.execute(system_prompt, &conversation).await?;
                    on_chunk(StreamChunk::Text(accumulated.clone()));
                }
            }
            last_response = accumulated.clone();

            let calls = extract_tool_calls(&accumulated);
            if calls.is_empty() {
                on_chunk(StreamChunk::Completed {
                    stop_reason: "stop".to_string(),
                });
                return Ok(accumulated);
            }

            conversation.push(Turn::new(
                Role::Assistant,
                accumulated,
            ));

            for call in &calls {
                on_chunk(StreamChunk::ToolCall {
                    name: call.name.clone(),
                    status: ToolCallStatus::Started,
                    arguments: Some(serde_json::to_string(&call.arguments).unwrap_or_default()),
                    result: None,
                });
            }
            let results = self.tools.execute_all(&calls).await;
            for (call, result) in calls.iter().zip(results.iter()) {
                on_chunk(StreamChunk::ToolCall {
                    name: call.name.clone(),
                    status: if result.success {
                        ToolCallStatus::Completed
                    } else {
                        ToolCallStatus::Failed
                    },
                    arguments: None,
                    result: Some(result.output.clone()),
                });
            }

            let formatted = format_results(&results);
            conversation.push(Turn::new(
                Role::User,
                format!("\n\n{}", formatted),
            ));
        }

        on_chunk(StreamChunk::Completed {
            stop_reason: "max_iterations".to_string(),
        });
        Ok(format!("{}\n\n[Agent reached max iterations]", last_response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::MessageChunkStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedExecutor {
        responses: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, _system_prompt: &str, _turns: &[Turn]) -> CoreResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("Done.".to_string())
            } else {
                Ok(responses.remove(0))
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

    #[tokio::test]
    async fn terminates_on_second_iteration_with_tool_result_formatted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("src/b.txt"), "b").unwrap();

        let executor = Arc::new(ScriptedExecutor {
            responses: Mutex::new(vec![
                "<tool_call>{\"name\":\"list_files\",\"arguments\":{\"path\":\"src\"}}</tool_call>"
                    .to_string(),
                "Done.".to_string(),
            ]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let loop_ = WorkspaceAgentLoop::new(executor, tools);

        let result = loop_
            .run("agent-1", "system", "List files in src/")
            .await
            .unwrap();
        assert_eq!(result, "Done.");
    }

    #[tokio::test]
    async fn no_tool_calls_terminates_on_first_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor {
            responses: Mutex::new(vec!["Hello there.".to_string()]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let loop_ = WorkspaceAgentLoop::new(executor, tools);
        let result = loop_.run("agent-1", "system", "hi").await.unwrap();
        assert_eq!(result, "Hello there.");
    }

    #[tokio::test]
    async fn cancellation_converges_at_next_iteration_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor {
            responses: Mutex::new(vec![
                "<tool_call>{\"name\":\"list_files\",\"arguments\":{\"path\":\".\"}}</tool_call>"
                    .to_string(),
            ]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let loop_ = WorkspaceAgentLoop::new(executor, tools);
        loop_.cancellation().interrupt("agent-1").await;
        let result = loop_.run("agent-1", "system", "hi").await.unwrap();
        assert_eq!(result, "[Agent cancelled]");
        assert!(!loop_.cancellation().is_cancelled("agent-1").await);
    }

    #[tokio::test]
    async fn exhausting_max_iterations_annotates_last_response() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor {
            responses: Mutex::new(vec![
                "<tool_call>{\"name\":\"list_files\",\"arguments\":{\"path\":\".\"}}</tool_call>"
                    .to_string(),
                "<tool_call>{\"name\":\"list_files\",\"arguments\":{\"path\":\".\"}}</tool_call>"
                    .to_string(),
            ]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let loop_ = WorkspaceAgentLoop::new(executor, tools).with_max_iterations(2);
        let result = loop_.run("agent-1", "system", "hi").await.unwrap();
        assert!(result.contains("[Agent reached max iterations]"));
    }

    #[tokio::test]
    async fn streaming_exhausting_max_iterations_returns_accumulated_output_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor {
            responses: Mutex::new(vec![
                "<tool_call>{\"name\":\"list_files\",\"arguments\":{\"path\":\".\"}}</tool_call>"
                    .to_string(),
                "<tool_call>{\"name\":\"list_files\",\"arguments\":{\"path\":\".\"}}</tool_call>"
                    .to_string(),
            ]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(TextBasedToolExecutor::new(dir.path(), vec![]));
        let loop_ = WorkspaceAgentLoop::new(executor, tools).with_max_iterations(2);

        let chunks = Mutex::new(Vec::new());
        let result = loop_
            .run_streaming("agent-1", "system", "hi", |chunk| {
                chunks.lock().unwrap().push(chunk);
            })
            .await
            .unwrap();

        assert!(result.contains("[Agent reached max iterations]"));
        let chunks = chunks.into_inner().unwrap();
        assert!(chunks.iter().any(|c| matches!(
            c,
            StreamChunk::Completed { stop_reason } if stop_reason == "max_iterations"
        )));
        assert!(!chunks.iter().any(|c| matches!(c, StreamChunk::Error { .. })));
    }
}
