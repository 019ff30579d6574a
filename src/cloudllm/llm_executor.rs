//! LLM executor façade and provider registry: given a `NamedModelConfig`, produce an
//! [`Executor`] wired to the right concrete client, and answer model-metadata questions
//! (capabilities, context length) from a fixed per-provider lookup table.

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, MessageChunkStream, Role as WireRole};
use crate::cloudllm::clients::claude::ClaudeClient;
use crate::cloudllm::clients::gemini::GeminiClient;
use crate::cloudllm::clients::grok::GrokClient;
use crate::cloudllm::clients::openai::OpenAIClient;
use crate::cloudllm::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One turn of a plain conversation fed to an [`Executor`]; the workspace agent loop builds
/// these out of its own `(role, text)` history before every call.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: WireRole,
    pub content: String,
}

impl Turn {
    pub fn new(role: WireRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A model-bound executor capable of a one-shot call or a streaming call. Tool calling is
/// never native here; callers pass `None` for tools and carry all tool semantics in message
/// text.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, system_prompt: &str, turns: &[Turn]) -> CoreResult<String>;

    async fn execute_stream(
        &self,
        system_prompt: &str,
        turns: &[Turn],
    ) -> CoreResult<Option<MessageChunkStream>>;

    fn model_name(&self) -> &str;
}

fn build_messages(system_prompt: &str, turns: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(Message {
            role: WireRole::System,
            content: Arc::from(system_prompt),
            tool_calls: vec![],
        });
    }
    for turn in turns {
        messages.push(Message {
            role: turn.role.clone(),
            content: Arc::from(turn.content.as_str()),
            tool_calls: vec![],
        });
    }
    messages
}

/// Wraps any [`ClientWrapper`] (OpenAI-compatible or otherwise) as an [`Executor`].
pub struct ClientExecutor {
    client: Arc<dyn ClientWrapper>,
}

impl ClientExecutor {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for ClientExecutor {
    async fn execute(&self, system_prompt: &str, turns: &[Turn]) -> CoreResult<String> {
        let messages = build_messages(system_prompt, turns);
        self.client
            .send_message(&messages, None)
            .await
            .map(|m| m.content.to_string())
            .map_err(|e| CoreError::UpstreamError(e.to_string()))
    }

    async fn execute_stream(
        &self,
        system_prompt: &str,
        turns: &[Turn],
    ) -> CoreResult<Option<MessageChunkStream>> {
        let messages = build_messages(system_prompt, turns);
        self.client
            .send_message_stream(&messages, None)
            .await
            .map_err(|e| CoreError::UpstreamError(e.to_string()))
    }

    fn model_name(&self) -> &str {
        self.client.model_name()
    }
}

/// Provider tags accepted by a `NamedModelConfig`. `Custom` names any provider registered at
/// runtime (e.g. GitHub Copilot).
///
/// Serialises as the plain tag string (`"OPENAI"`, `"CUSTOM_OPENAI_BASE"`, or the custom tag
/// itself) via [`Provider::tag`]/[`Provider::parse`] rather than the derived enum
/// representation, so a YAML config's `provider: OPENAI` round-trips without a nested tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Provider {
    Openai,
    Anthropic,
    Google,
    Deepseek,
    Ollama,
    Openrouter,
    Glm,
    Qwen,
    Kimi,
    Minimax,
    CustomOpenaiBase,
    Custom(String),
}

impl Provider {
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "OPENAI" => Provider::Openai,
            "ANTHROPIC" => Provider::Anthropic,
            "GOOGLE" => Provider::Google,
            "DEEPSEEK" => Provider::Deepseek,
            "OLLAMA" => Provider::Ollama,
            "OPENROUTER" => Provider::Openrouter,
            "GLM" => Provider::Glm,
            "QWEN" => Provider::Qwen,
            "KIMI" => Provider::Kimi,
            "MINIMAX" => Provider::Minimax,
            "CUSTOM_OPENAI_BASE" => Provider::CustomOpenaiBase,
            other => Provider::Custom(other.to_string()),
        }
    }

    pub fn tag(&self) -> String {
        match self {
            Provider::Openai => "OPENAI".into(),
            Provider::Anthropic => "ANTHROPIC".into(),
            Provider::Google => "GOOGLE".into(),
            Provider::Deepseek => "DEEPSEEK".into(),
            Provider::Ollama => "OLLAMA".into(),
            Provider::Openrouter => "OPENROUTER".into(),
            Provider::Glm => "GLM".into(),
            Provider::Qwen => "QWEN".into(),
            Provider::Kimi => "KIMI".into(),
            Provider::Minimax => "MINIMAX".into(),
            Provider::CustomOpenaiBase => "CUSTOM_OPENAI_BASE".into(),
            Provider::Custom(tag) => tag.clone(),
        }
    }
}

impl serde::Serialize for Provider {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.tag())
    }
}

impl<'de> serde::Deserialize<'de> for Provider {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = <String as serde::Deserialize>::deserialize(deserializer)?;
        Ok(Provider::parse(&tag))
    }
}

/// One named entry in the user's model configuration file.
///
/// Field names serialise as `camelCase` (`apiKey`, `baseUrl`) to match the YAML configuration
/// surface's documented shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedModelConfig {
    pub name: String,
    pub provider: Provider,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
}

/// A runtime-registrable provider handler. Built-in providers never implement this trait —
/// they are dispatched directly by [`build_executor`] — but dynamically attached providers
/// (GitHub Copilot, a custom gateway) register one to participate in `build_executor`'s first
/// lookup step.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    fn is_available(&self) -> bool;
    async fn create_executor(&self, config: &NamedModelConfig) -> CoreResult<Arc<dyn Executor>>;
    fn get_available_models(&self) -> Vec<String>;
    fn get_default_base_url(&self) -> Option<String>;

    /// Refresh the handler's model list from its upstream catalog, if it has one.
    ///
    /// Built-in handlers have no catalog to fetch and fall back to
    /// [`ProviderHandler::get_available_models`]; providers backed by a remote catalog (e.g.
    /// GitHub Copilot) override this to perform the network fetch.
    async fn fetch_available_models_async(&self) -> Vec<String> {
        self.get_available_models()
    }
}

/// Process-wide table of registered provider handlers, consulted before the built-in
/// dispatch table. Exposes `clear()` for test isolation since global state otherwise leaks
/// across test cases run in the same process.
pub struct ProviderRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ProviderHandler>>>,
}

impl ProviderRegistry {
    fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, provider_tag: impl Into<String>, handler: Arc<dyn ProviderHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(provider_tag.into(), handler);
    }

    pub fn get(&self, provider_tag: &str) -> Option<Arc<dyn ProviderHandler>> {
        self.handlers.read().unwrap().get(provider_tag).cloned()
    }

    /// Clears every registered handler. Intended for test isolation between cases that each
    /// register their own mock provider.
    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }
}

static REGISTRY: once_cell::sync::Lazy<ProviderRegistry> =
    once_cell::sync::Lazy::new(ProviderRegistry::new);

/// The single process-wide provider registry.
pub fn registry() -> &'static ProviderRegistry {
    &REGISTRY
}

fn ensure_trailing_slash(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    }
}

fn default_base_url(provider: &Provider) -> Option<&'static str> {
    match provider {
        Provider::Ollama => Some("http://localhost:11434/"),
        Provider::Openrouter => Some("https://openrouter.ai/api/v1/"),
        Provider::Glm => Some("https://open.bigmodel.cn/api/paas/v4/"),
        Provider::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1/"),
        Provider::Kimi => Some("https://api.moonshot.cn/v1/"),
        Provider::Minimax => Some("https://api.minimax.chat/v1/"),
        _ => None,
    }
}

/// Build an [`Executor`] for `config`, consulting the runtime registry first and falling
/// back to the built-in provider dispatch table.
///
/// Every listed provider tag dispatches to a real client; none of them are rejected outright.
pub async fn build_executor(config: &NamedModelConfig) -> CoreResult<Arc<dyn Executor>> {
    if let Some(handler) = registry().get(&config.provider.tag()) {
        if handler.is_available() {
            return handler.create_executor(config).await;
        }
        return Err(CoreError::ProviderUnavailable(format!(
            "registered provider {} is not available",
            config.provider.tag()
        )));
    }

    let base_url = config
        .base_url
        .clone()
        .or_else(|| default_base_url(&config.provider).map(String::from));

    let client: Arc<dyn ClientWrapper> = match &config.provider {
        Provider::Openai => Arc::new(OpenAIClient::new_with_model_string(
            &config.api_key,
            &config.model,
        )),
        Provider::Anthropic => Arc::new(ClaudeClient::new_with_model_str(
            &config.api_key,
            &config.model,
        )),
        Provider::Google => Arc::new(GeminiClient::new_with_model_string(
            &config.api_key,
            &config.model,
        )),
        Provider::Deepseek | Provider::Openrouter | Provider::Glm | Provider::Qwen
        | Provider::Kimi | Provider::Minimax | Provider::Ollama => {
            let base_url = base_url.ok_or_else(|| {
                CoreError::BadInput(format!(
                    "provider {} requires a base url",
                    config.provider.tag()
                ))
            })?;
            Arc::new(OpenAIClient::new_with_base_url(
                &config.api_key,
                &config.model,
                &ensure_trailing_slash(&base_url),
            ))
        }
        Provider::CustomOpenaiBase => {
            let base_url = base_url.ok_or_else(|| {
                CoreError::BadInput(
                    "CUSTOM_OPENAI_BASE requires an explicit base url".to_string(),
                )
            })?;
            Arc::new(OpenAIClient::new_with_base_url(
                &config.api_key,
                &config.model,
                &ensure_trailing_slash(&base_url),
            ))
        }
        Provider::Custom(tag) => {
            return Err(CoreError::ProviderUnavailable(format!(
                "no provider registered for {}",
                tag
            )))
        }
    };

    Ok(Arc::new(ClientExecutor::new(client)))
}

/// A Grok-flavored build path used when the config explicitly names the xAI model family;
/// kept distinct from [`build_executor`]'s Provider dispatch because Grok ships as its own
/// client rather than an OpenAI-compatible base url.
pub fn build_grok_executor(api_key: &str, model: &str) -> Arc<dyn Executor> {
    Arc::new(ClientExecutor::new(Arc::new(GrokClient::new_with_model_str(
        api_key, model,
    ))))
}

/// Capability tags a model may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Capability {
    Completion,
    Temperature,
    Tools,
    ToolChoice,
    VisionImage,
    VisionVideo,
    Audio,
    Document,
    MultipleChoices,
    Speculation,
    Embed,
}

/// Pure model-metadata lookup result.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub provider: Provider,
    pub id: String,
    pub capabilities: Vec<Capability>,
    pub context_length: usize,
    pub max_output_tokens: Option<usize>,
}

const DEFAULT_CONTEXT_LENGTH: usize = 128_000;

/// Derive capabilities and context length from fixed prefix/substring rules. Unknown names
/// fall back to a generic `{Completion, Temperature}` with the default context length.
///
/// The `provider` argument is echoed back verbatim in the returned [`ModelInfo`] rather than
/// being inferred from `name`.
pub fn create_model(provider: Provider, name: &str) -> ModelInfo {
    use Capability::*;
    let lower = name.to_ascii_lowercase();

    let (capabilities, context_length, max_output_tokens): (Vec<Capability>, usize, Option<usize>) =
        if lower.starts_with("o1") || lower.starts_with("o3") || lower.starts_with("o4-mini") {
            (vec![Completion, Tools, ToolChoice], 200_000, Some(100_000))
        } else if lower.starts_with("gpt-4.1") {
            (
                vec![Completion, Temperature, Tools, ToolChoice, VisionImage],
                1_047_576,
                Some(32_768),
            )
        } else if lower.starts_with("claude-3-5") || lower.starts_with("claude-3.5") {
            (
                vec![Completion, Temperature, Tools, ToolChoice, VisionImage, Document],
                200_000,
                Some(8_192),
            )
        } else if lower.starts_with("claude-3") {
            (
                vec![Completion, Temperature, Tools, ToolChoice, VisionImage],
                200_000,
                Some(4_096),
            )
        } else if lower.starts_with("gemini-1.5") || lower.starts_with("gemini-2") {
            (
                vec![Completion, Temperature, Tools, VisionImage, VisionVideo, Audio],
                1_000_000,
                Some(8_192),
            )
        } else if lower.contains("embed") {
            (vec![Embed], 8_192, None)
        } else if lower.starts_with("gpt-4o") {
            (
                vec![Completion, Temperature, Tools, ToolChoice, VisionImage, Audio],
                128_000,
                Some(16_384),
            )
        } else {
            (vec![Completion, Temperature], DEFAULT_CONTEXT_LENGTH, None)
        };

    ModelInfo {
        provider,
        id: name.to_string(),
        capabilities,
        context_length,
        max_output_tokens,
    }
}

/// A static per-provider list of commonly available model names. Used to populate UI pickers
/// and to validate a `NamedModelConfig.model` field before dispatch.
pub fn get_available_models(provider: &Provider) -> Vec<&'static str> {
    match provider {
        Provider::Openai => vec!["gpt-4.1", "gpt-4.1-mini", "gpt-4o", "o3", "o4-mini"],
        Provider::Anthropic => vec!["claude-3-5-sonnet-latest", "claude-3-opus-latest"],
        Provider::Google => vec!["gemini-1.5-pro", "gemini-2.0-flash"],
        Provider::Deepseek => vec!["deepseek-chat", "deepseek-reasoner"],
        Provider::Ollama => vec!["llama3.1", "qwen2.5"],
        Provider::Openrouter => vec!["openrouter/auto"],
        Provider::Glm => vec!["glm-4"],
        Provider::Qwen => vec!["qwen-max"],
        Provider::Kimi => vec!["moonshot-v1-128k"],
        Provider::Minimax => vec!["abab6.5-chat"],
        Provider::CustomOpenaiBase | Provider::Custom(_) => vec![],
    }
}

pub fn get_default_base_url(provider: &Provider) -> Option<&'static str> {
    default_base_url(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn o_series_gets_reasoning_context_window() {
        let info = create_model(Provider::Openai, "o3-mini");
        assert_eq!(info.context_length, 200_000);
        assert_eq!(info.max_output_tokens, Some(100_000));
    }

    #[test]
    fn gpt41_gets_million_token_window() {
        let info = create_model(Provider::Openai, "gpt-4.1");
        assert_eq!(info.context_length, 1_047_576);
    }

    #[test]
    fn claude_35_gets_expected_window() {
        let info = create_model(Provider::Anthropic, "claude-3-5-sonnet-latest");
        assert_eq!(info.context_length, 200_000);
        assert_eq!(info.max_output_tokens, Some(8_192));
    }

    #[test]
    fn unknown_model_falls_back_to_generic() {
        let info = create_model(Provider::Openai, "some-future-model");
        assert_eq!(info.capabilities, vec![Capability::Completion, Capability::Temperature]);
        assert_eq!(info.context_length, DEFAULT_CONTEXT_LENGTH);
    }

    #[test]
    fn requested_provider_is_honored_not_overridden_to_openai() {
        let info = create_model(Provider::Anthropic, "claude-3-5-sonnet-latest");
        assert_eq!(info.provider, Provider::Anthropic);
    }

    #[test]
    fn ollama_defaults_to_localhost() {
        assert_eq!(get_default_base_url(&Provider::Ollama), Some("http://localhost:11434/"));
    }

    #[tokio::test]
    async fn build_executor_rejects_custom_base_without_url() {
        let config = NamedModelConfig {
            name: "mine".into(),
            provider: Provider::CustomOpenaiBase,
            api_key: "key".into(),
            base_url: None,
            model: "any-model".into(),
        };
        let result = build_executor(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn build_executor_dispatches_openai() {
        let config = NamedModelConfig {
            name: "mine".into(),
            provider: Provider::Openai,
            api_key: "key".into(),
            base_url: None,
            model: "gpt-4.1-mini".into(),
        };
        let executor = build_executor(&config).await.unwrap();
        assert_eq!(executor.model_name(), "gpt-4.1-mini");
    }

    struct MockProvider;

    #[async_trait]
    impl ProviderHandler for MockProvider {
        fn is_available(&self) -> bool {
            true
        }
        async fn create_executor(&self, config: &NamedModelConfig) -> CoreResult<Arc<dyn Executor>> {
            Ok(Arc::new(ClientExecutor::new(Arc::new(OpenAIClient::new_with_model_string(
                &config.api_key,
                &config.model,
            )))))
        }
        fn get_available_models(&self) -> Vec<String> {
            vec!["mock-model".to_string()]
        }
        fn get_default_base_url(&self) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn registered_provider_is_consulted_before_built_in_dispatch() {
        registry().clear();
        registry().register("MOCK", Arc::new(MockProvider));
        let config = NamedModelConfig {
            name: "mine".into(),
            provider: Provider::Custom("MOCK".into()),
            api_key: "key".into(),
            base_url: None,
            model: "mock-model".into(),
        };
        let executor = build_executor(&config).await.unwrap();
        assert_eq!(executor.model_name(), "mock-model");
        registry().clear();
    }
}
