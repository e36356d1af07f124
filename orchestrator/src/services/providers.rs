//! Concrete provider clients
//!
//! One reqwest-backed `ProviderClient` per vendor, selected at
//! configuration time from available API keys. OpenAI and DeepInfra share
//! the chat-completions wire shape, so one client covers both with a
//! different base URL. The orchestrator core never sees any of this; it
//! only sees `generate(request) -> response | ApiFailure`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use shared::{ApiFailure, ChatTurn, ProviderId, ProviderResponse, TurnRole, UsageStats};

use crate::traits::{GenerationRequest, ProviderClient};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEEPINFRA_URL: &str = "https://api.deepinfra.com/v1/openai/chat/completions";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Map an HTTP status to the shared failure taxonomy
pub(crate) fn classify_status(status: u16) -> ApiFailure {
    match status {
        400 => ApiFailure::InvalidRequest("HTTP 400".to_string()),
        401 | 403 => ApiFailure::AuthenticationFailed,
        404 => ApiFailure::ModelUnavailable("HTTP 404".to_string()),
        408 => ApiFailure::Timeout,
        429 => ApiFailure::RateLimitExceeded,
        503 => ApiFailure::ServiceUnavailable,
        s if s >= 500 => ApiFailure::ServerError(format!("HTTP {s}")),
        s => ApiFailure::Unknown(format!("HTTP {s}")),
    }
}

/// Chat-completions message array (OpenAI, DeepInfra)
pub(crate) fn chat_messages(history: &[ChatTurn]) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = history
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                },
                "content": turn.content,
            })
        })
        .collect();
    serde_json::Value::Array(messages)
}

/// Gemini contents array; assistant turns use the "model" role
pub(crate) fn gemini_contents(history: &[ChatTurn]) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = history
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "model",
                },
                "parts": [{"text": turn.content}],
            })
        })
        .collect();
    serde_json::Value::Array(contents)
}

fn u32_field(value: Option<&serde_json::Value>) -> u32 {
    value.and_then(|v| v.as_u64()).unwrap_or(0) as u32
}

/// Anthropic messages API client
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ProviderResponse, ApiFailure> {
        let request_start = Instant::now();
        let body = serde_json::json!({
            "model": request.model_id,
            "max_tokens": request.max_output_tokens,
            "messages": chat_messages(&request.history),
        });

        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiFailure::NetworkError(e.to_string()))?;

        let response_time = request_start.elapsed();
        if !response.status().is_success() {
            return Err(classify_status(response.status().as_u16()));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiFailure::InvalidRequest(format!("Failed to parse response: {e}")))?;

        let content = response_json
            .get("content")
            .and_then(|content| content.get(0))
            .and_then(|item| item.get("text"))
            .and_then(|text| text.as_str())
            .ok_or_else(|| ApiFailure::InvalidRequest("No content in response".to_string()))?;

        let usage = response_json.get("usage");
        let prompt_tokens = u32_field(usage.and_then(|u| u.get("input_tokens")));
        let completion_tokens = u32_field(usage.and_then(|u| u.get("output_tokens")));

        Ok(ProviderResponse {
            content: content.to_string(),
            usage: UsageStats {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model_used: request.model_id,
            response_time_ms: response_time.as_millis() as u64,
        })
    }
}

/// Chat-completions client covering OpenAI and DeepInfra
pub struct ChatCompletionsClient {
    provider: ProviderId,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn openai(api_key: String) -> Self {
        Self {
            provider: ProviderId::OpenAI,
            base_url: OPENAI_URL.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn deepinfra(api_key: String) -> Self {
        Self {
            provider: ProviderId::DeepInfra,
            base_url: DEEPINFRA_URL.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderClient for ChatCompletionsClient {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ProviderResponse, ApiFailure> {
        let request_start = Instant::now();
        let body = serde_json::json!({
            "model": request.model_id,
            "messages": chat_messages(&request.history),
            "max_tokens": request.max_output_tokens,
        });

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiFailure::NetworkError(e.to_string()))?;

        let response_time = request_start.elapsed();
        if !response.status().is_success() {
            return Err(classify_status(response.status().as_u16()));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiFailure::InvalidRequest(format!("Failed to parse response: {e}")))?;

        let content = response_json
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| ApiFailure::InvalidRequest("No content in response".to_string()))?;

        let usage = response_json.get("usage");
        Ok(ProviderResponse {
            content: content.to_string(),
            usage: UsageStats {
                prompt_tokens: u32_field(usage.and_then(|u| u.get("prompt_tokens"))),
                completion_tokens: u32_field(usage.and_then(|u| u.get("completion_tokens"))),
                total_tokens: u32_field(usage.and_then(|u| u.get("total_tokens"))),
            },
            model_used: request.model_id,
            response_time_ms: response_time.as_millis() as u64,
        })
    }
}

/// Gemini generateContent client
pub struct GeminiClient {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ProviderResponse, ApiFailure> {
        let request_start = Instant::now();
        let body = serde_json::json!({
            "contents": gemini_contents(&request.history),
            "generationConfig": {
                "maxOutputTokens": request.max_output_tokens,
            },
        });

        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_BASE_URL, request.model_id, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiFailure::NetworkError(e.to_string()))?;

        let response_time = request_start.elapsed();
        if !response.status().is_success() {
            return Err(classify_status(response.status().as_u16()));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiFailure::InvalidRequest(format!("Failed to parse response: {e}")))?;

        let content = response_json
            .get("candidates")
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.get(0))
            .and_then(|part| part.get("text"))
            .and_then(|text| text.as_str())
            .ok_or_else(|| ApiFailure::InvalidRequest("No content in response".to_string()))?;

        // Gemini doesn't always report token counts
        let usage = response_json.get("usageMetadata");
        let prompt_tokens = u32_field(usage.and_then(|u| u.get("promptTokenCount")));
        let completion_tokens = u32_field(usage.and_then(|u| u.get("candidatesTokenCount")));

        Ok(ProviderResponse {
            content: content.to_string(),
            usage: UsageStats {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model_used: request.model_id,
            response_time_ms: response_time.as_millis() as u64,
        })
    }
}

/// Build the provider registry from API keys present in the environment.
///
/// Providers without keys are simply absent; orchestrator construction
/// rejects a config whose enabled models reference a missing provider.
pub fn registry_from_env() -> HashMap<ProviderId, Arc<dyn ProviderClient>> {
    let mut registry: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        registry.insert(ProviderId::Anthropic, Arc::new(AnthropicClient::new(key)));
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        registry.insert(ProviderId::OpenAI, Arc::new(ChatCompletionsClient::openai(key)));
    }
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        registry.insert(ProviderId::Gemini, Arc::new(GeminiClient::new(key)));
    }
    if let Ok(key) = std::env::var("DEEPINFRA_API_KEY") {
        registry.insert(
            ProviderId::DeepInfra,
            Arc::new(ChatCompletionsClient::deepinfra(key)),
        );
    }
    info!(
        "🔑 Provider clients configured: {:?}",
        registry.keys().map(|p| p.as_str()).collect::<Vec<_>>()
    );
    debug!("Providers without API keys are unavailable for this run");
    registry
}
