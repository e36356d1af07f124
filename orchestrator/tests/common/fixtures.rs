//! Scripted provider and config builders for integration tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use orchestrator::traits::{GenerationRequest, ProviderClient};
use orchestrator::{ModelConfig, RetryConfig, RunConfig, SequenceConfig};
use shared::{ApiFailure, ProviderId, ProviderResponse, UsageStats};

/// Deterministic in-process provider. Echoes the final user prompt back as
/// `reply-to:<prompt>` and can be scripted to fail on specific prompts.
pub struct ScriptedProvider {
    provider: ProviderId,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    /// Prompts that fail permanently (content-policy style)
    permanent_failures: Vec<String>,
    /// Remaining transient failures per prompt
    transient_failures: Arc<Mutex<HashMap<String, u32>>>,
}

impl ScriptedProvider {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            requests: Arc::new(Mutex::new(Vec::new())),
            permanent_failures: Vec::new(),
            transient_failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_permanent_failure_on(mut self, prompt: &str) -> Self {
        self.permanent_failures.push(prompt.to_string());
        self
    }

    pub fn with_transient_failures_on(self, prompt: &str, count: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(prompt.to_string(), count);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ProviderResponse, ApiFailure> {
        self.requests.lock().unwrap().push(request.clone());

        let prompt = request
            .history
            .last()
            .map(|turn| turn.content.clone())
            .unwrap_or_default();

        if self.permanent_failures.contains(&prompt) {
            return Err(ApiFailure::ContentPolicyViolation);
        }
        {
            let mut transient = self.transient_failures.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&prompt) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ApiFailure::ServiceUnavailable);
                }
            }
        }

        Ok(ProviderResponse {
            content: format!("reply-to:{prompt}"),
            usage: UsageStats {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
            model_used: request.model_id,
            response_time_ms: 3,
        })
    }
}

/// Run config with fast retries suited to tests
pub fn test_config(
    models: Vec<(ProviderId, &str)>,
    sequences: Vec<(&str, Vec<&str>)>,
) -> RunConfig {
    let mut config: RunConfig = serde_json::from_value(serde_json::json!({
        "models": [],
        "sequences": [{"name": "placeholder", "prompts": ["p"]}]
    }))
    .expect("base config");
    config.models = models
        .into_iter()
        .map(|(provider, model_id)| ModelConfig {
            provider,
            model_id: model_id.to_string(),
            max_context_tokens: 100_000,
            max_output_tokens: 256,
            enabled: true,
        })
        .collect();
    config.sequences = sequences
        .into_iter()
        .map(|(name, prompts)| SequenceConfig {
            name: name.to_string(),
            prompts: prompts.into_iter().map(String::from).collect(),
        })
        .collect();
    config.retry = RetryConfig {
        max_retries: 3,
        base_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter_ms: 0,
    };
    config
}

/// Registry from (provider, client) pairs
pub fn registry(
    clients: Vec<(ProviderId, Arc<dyn ProviderClient>)>,
) -> HashMap<ProviderId, Arc<dyn ProviderClient>> {
    clients.into_iter().collect()
}
