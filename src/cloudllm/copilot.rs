//! GitHub Copilot provider: exchanges a local OAuth token for a short-lived Copilot API token
//! and wires chat requests with the headers Copilot's backend expects.
//!
//! Unlike the built-in providers in [`crate::cloudllm::llm_executor`], which are plain OpenAI
//! compatible base-url dispatches, Copilot requires reading `apps.json` from the local
//! filesystem, a token-exchange round trip, and a distinct set of request headers. It therefore
//! registers itself as a [`ProviderHandler`] (see
//! [`crate::cloudllm::llm_executor::registry`]) instead of adding a built-in dispatch arm.

use crate::cloudllm::client_wrapper::{MessageChunkStream, Role};
use crate::cloudllm::clients::common::get_shared_http_client;
use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::llm_executor::{Executor, NamedModelConfig, ProviderHandler, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

const TOKEN_ENDPOINT: &str = "https://api.github.com/copilot_internal/v2/token";
const MODELS_ENDPOINT: &str = "https://api.githubcopilot.com/models";
const CHAT_ENDPOINT: &str = "https://api.githubcopilot.com/chat/completions";
const EDITOR_VERSION: &str = "Zed/Unknown";
const INTEGRATION_ID: &str = "vscode-chat";
const REFRESH_MARGIN: i64 = 5;
const MODELS_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
struct CachedApiToken {
    token: String,
    expires_at: DateTime<Utc>,
}

struct CachedModels {
    fetched_at: Instant,
    models: Vec<String>,
}

/// Resolve the Copilot client's `apps.json` location: `$APPDATA/github-copilot/apps.json` on
/// Windows, falling back to `$USERPROFILE` when `APPDATA` is unset; `$HOME/.config/github-copilot/apps.json`
/// everywhere else.
fn apps_json_path() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata).join("github-copilot").join("apps.json"));
        }
        std::env::var("USERPROFILE").ok().map(|profile| {
            PathBuf::from(profile)
                .join("AppData")
                .join("Roaming")
                .join("github-copilot")
                .join("apps.json")
        })
    } else {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config").join("github-copilot").join("apps.json"))
    }
}

/// Recursively search a JSON value for any `oauth_token` key, depth-first, returning the first
/// match. The Copilot client nests this under an opaque per-install key, so the exact shape of
/// `apps.json` is not assumed.
fn find_oauth_token(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(token)) = map.get("oauth_token") {
                return Some(token.clone());
            }
            map.values().find_map(find_oauth_token)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_oauth_token),
        _ => None,
    }
}

fn read_oauth_token() -> CoreResult<String> {
    let path = apps_json_path().ok_or_else(|| {
        CoreError::ProviderUnavailable(
            "could not determine github-copilot apps.json location from the environment".into(),
        )
    })?;
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        CoreError::ProviderUnavailable(format!("reading {}: {}", path.display(), e))
    })?;
    let parsed: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| CoreError::ProviderUnavailable(format!("parsing {}: {}", path.display(), e)))?;
    find_oauth_token(&parsed).ok_or_else(|| {
        CoreError::ProviderUnavailable(format!("no oauth_token found in {}", path.display()))
    })
}

fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - now < Duration::minutes(REFRESH_MARGIN)
}

#[derive(serde::Deserialize)]
struct TokenExchangeResponse {
    token: String,
    expires_at: i64,
}

async fn exchange_api_token(
    http: &reqwest::Client,
    oauth_token: &str,
) -> CoreResult<CachedApiToken> {
    let resp = http
        .get(TOKEN_ENDPOINT)
        .header("Authorization", format!("token {}", oauth_token))
        .send()
        .await
        .map_err(|e| CoreError::UpstreamError(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(CoreError::UpstreamError(format!(
            "copilot token exchange: HTTP {}",
            resp.status()
        )));
    }

    let body: TokenExchangeResponse = resp
        .json()
        .await
        .map_err(|e| CoreError::UpstreamError(format!("copilot token exchange body: {}", e)))?;

    let expires_at = DateTime::<Utc>::from_timestamp(body.expires_at, 0).unwrap_or_else(Utc::now);

    Ok(CachedApiToken {
        token: body.token,
        expires_at,
    })
}

async fn get_cached_or_refreshed_token(
    http: &reqwest::Client,
    cache: &Mutex<Option<CachedApiToken>>,
) -> CoreResult<String> {
    {
        let guard = cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if !needs_refresh(cached.expires_at, Utc::now()) {
                return Ok(cached.token.clone());
            }
        }
    }
    let oauth_token = read_oauth_token()?;
    let fresh = exchange_api_token(http, &oauth_token).await?;
    let token = fresh.token.clone();
    *cache.lock().await = Some(fresh);
    Ok(token)
}

/// Registrable [`ProviderHandler`] for GitHub Copilot.
///
/// The token cache and the model-list cache are guarded by two independent mutexes so that a
/// models-catalog refresh never blocks an in-flight chat request waiting on the token mutex.
pub struct CopilotProvider {
    http: reqwest::Client,
    token_cache: Arc<Mutex<Option<CachedApiToken>>>,
    models_cache: Arc<Mutex<Option<CachedModels>>>,
}

impl CopilotProvider {
    pub fn new() -> Self {
        Self {
            http: get_shared_http_client().clone(),
            token_cache: Arc::new(Mutex::new(None)),
            models_cache: Arc::new(Mutex::new(None)),
        }
    }

    async fn get_api_token(&self) -> CoreResult<String> {
        get_cached_or_refreshed_token(&self.http, &self.token_cache).await
    }

    async fn fetch_models(&self) -> CoreResult<Vec<String>> {
        {
            let guard = self.models_cache.lock().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed().as_secs() < MODELS_CACHE_TTL_SECS {
                    return Ok(cached.models.clone());
                }
            }
        }

        let token = self.get_api_token().await?;
        let resp = self
            .http
            .get(MODELS_ENDPOINT)
            .header("Authorization", format!("Bearer {}", token))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Copilot-Integration-Id", INTEGRATION_ID)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::UpstreamError(format!(
                "copilot models fetch: HTTP {}",
                resp.status()
            )));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::UpstreamError(format!("copilot models body: {}", e)))?;

        let models: Vec<String> = parsed
            .get("data")
            .and_then(|d| d.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|m| {
                        let enabled = m
                            .get("model_picker_enabled")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(true);
                        let is_embedding = m
                            .get("capabilities")
                            .and_then(|c| c.get("type"))
                            .and_then(|t| t.as_str())
                            == Some("embeddings");
                        enabled && !is_embedding
                    })
                    .filter_map(|m| m.get("id").and_then(|v| v.as_str()).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        *self.models_cache.lock().await = Some(CachedModels {
            fetched_at: Instant::now(),
            models: models.clone(),
        });

        Ok(models)
    }
}

impl Default for CopilotProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderHandler for CopilotProvider {
    fn is_available(&self) -> bool {
        apps_json_path().map(|p| p.exists()).unwrap_or(false)
    }

    async fn create_executor(
        &self,
        config: &NamedModelConfig,
    ) -> CoreResult<Arc<dyn Executor>> {
        // Exercise the token exchange eagerly so a missing/expired oauth_token surfaces here
        // rather than on the first chat call.
        self.get_api_token().await?;
        Ok(Arc::new(CopilotExecutor {
            http: self.http.clone(),
            token_cache: self.token_cache.clone(),
            model: config.model.clone(),
        }))
    }

    fn get_available_models(&self) -> Vec<String> {
        self.models_cache
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|cached| cached.models.clone()))
            .unwrap_or_default()
    }

    fn get_default_base_url(&self) -> Option<String> {
        None
    }

    async fn fetch_available_models_async(&self) -> Vec<String> {
        self.fetch_models().await.unwrap_or_default()
    }
}

/// [`Executor`] that posts chat requests directly to Copilot's chat-completions endpoint with
/// the headers GitHub's backend requires, refreshing the shared token cache as needed.
struct CopilotExecutor {
    http: reqwest::Client,
    token_cache: Arc<Mutex<Option<CachedApiToken>>>,
    model: String,
}

fn wire_messages(system_prompt: &str, turns: &[Turn]) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
    }
    for turn in turns {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool { .. } => "tool",
        };
        messages.push(serde_json::json!({"role": role, "content": turn.content}));
    }
    messages
}

#[async_trait]
impl Executor for CopilotExecutor {
    async fn execute(&self, system_prompt: &str, turns: &[Turn]) -> CoreResult<String> {
        let token = get_cached_or_refreshed_token(&self.http, &self.token_cache).await?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(system_prompt, turns),
        });

        let resp = self
            .http
            .post(CHAT_ENDPOINT)
            .header("Authorization", format!("Bearer {}", token))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Copilot-Integration-Id", INTEGRATION_ID)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::UpstreamError(format!(
                "copilot chat completion: HTTP {}",
                resp.status()
            )));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::UpstreamError(format!("copilot chat completion body: {}", e)))?;

        parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::UpstreamError("copilot response had no message content".into()))
    }

    async fn execute_stream(
        &self,
        _system_prompt: &str,
        _turns: &[Turn],
    ) -> CoreResult<Option<MessageChunkStream>> {
        Ok(None)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Register the Copilot provider handler under the `COPILOT` provider tag so that
/// `NamedModelConfig { provider: Provider::Custom("COPILOT".into()), .. }` dispatches through
/// [`crate::cloudllm::llm_executor::build_executor`]'s registry lookup.
pub fn register() {
    crate::cloudllm::llm_executor::registry().register("COPILOT", Arc::new(CopilotProvider::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_oauth_token_nested_under_opaque_keys() {
        let apps_json = serde_json::json!({
            "github.com:1234-abcd": {
                "user": "someone",
                "oauth_token": "gho_abc123"
            }
        });
        assert_eq!(find_oauth_token(&apps_json), Some("gho_abc123".to_string()));
    }

    #[test]
    fn missing_oauth_token_returns_none() {
        let apps_json = serde_json::json!({"github.com:1234": {"user": "someone"}});
        assert_eq!(find_oauth_token(&apps_json), None);
    }

    #[test]
    fn token_expiring_within_five_minutes_triggers_refresh() {
        let now = Utc::now();
        assert!(needs_refresh(now + Duration::minutes(4), now));
    }

    #[test]
    fn token_with_ten_minutes_left_is_reused() {
        let now = Utc::now();
        assert!(!needs_refresh(now + Duration::minutes(10), now));
    }

    #[tokio::test]
    async fn cached_fresh_token_short_circuits_without_reading_apps_json() {
        let cache: Mutex<Option<CachedApiToken>> = Mutex::new(Some(CachedApiToken {
            token: "cached-token".to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
        }));
        let http = get_shared_http_client().clone();
        let token = get_cached_or_refreshed_token(&http, &cache).await.unwrap();
        assert_eq!(token, "cached-token");
    }
}
