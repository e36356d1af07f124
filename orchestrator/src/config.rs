//! Run configuration loaded from a JSON file
//!
//! Everything the orchestrator needs for one run invocation: models,
//! sequences, per-provider budgets, retry/breaker policy, and timeouts.
//! All knobs carry serde defaults so a minimal config only names models
//! and sequences.

use serde::{Deserialize, Serialize};
use shared::ProviderId;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};

/// One evaluated model and its provider routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderId,
    pub model_id: String,
    /// Declared context ceiling used by the overflow check (estimated tokens)
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    /// Output cap sent with each generation request
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A named, ordered prompt list evaluated with accumulating context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub name: String,
    pub prompts: Vec<String>,
}

/// Per-provider concurrency and request-rate budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLimits {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

/// Bounded exponential-backoff retry policy for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to each backoff delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// Largest single backoff delay this policy can produce (before jitter)
    pub fn backoff_ceiling(&self) -> Duration {
        let max_exp = self.max_retries.saturating_sub(1);
        let ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(max_exp as i32);
        Duration::from_millis(ms as u64)
    }
}

/// Failure-triggered cooldown policy, per provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker from closed to open
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown before the open breaker admits a half-open trial.
    /// Must stay at or above twice the retry backoff ceiling.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Full configuration for one run invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub models: Vec<ModelConfig>,
    pub sequences: Vec<SequenceConfig>,
    #[serde(default = "default_runs_per_sequence")]
    pub runs_per_sequence: u32,
    #[serde(default)]
    pub provider_limits: HashMap<ProviderId, ProviderLimits>,
    /// Bound on concurrently executing sequence workers
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent_workers: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Keep going after a triple fails; report a partial result at the end
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    /// Consecutive triple failures per model before its remaining triples
    /// are skipped instead of attempted
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Total-run budget per model; remaining triples past it are timed out
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    /// Carry accumulated context from one sequence into the next within the
    /// same (model, run). Off by default: every sequence starts fresh.
    #[serde(default)]
    pub preserve_context_across_sequences: bool,
}

impl RunConfig {
    /// Load and validate a run configuration from a JSON file
    pub fn from_file(path: &Path) -> OrchestratorResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RunConfig =
            serde_json::from_str(&raw).map_err(|e| OrchestratorError::ConfigError {
                message: format!("invalid config {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if !self.models.iter().any(|m| m.enabled) {
            return Err(OrchestratorError::config("no enabled models"));
        }
        if self.sequences.is_empty() {
            return Err(OrchestratorError::config("no sequences"));
        }
        for sequence in &self.sequences {
            if sequence.prompts.is_empty() {
                return Err(OrchestratorError::config(format!(
                    "sequence '{}' has no prompts",
                    sequence.name
                )));
            }
        }
        if self.runs_per_sequence == 0 {
            return Err(OrchestratorError::config("runs_per_sequence must be >= 1"));
        }
        if self.max_concurrent_workers == 0 {
            return Err(OrchestratorError::config(
                "max_concurrent_workers must be >= 1",
            ));
        }
        for (provider, limits) in &self.provider_limits {
            if limits.max_concurrent == 0 || limits.requests_per_minute == 0 {
                return Err(OrchestratorError::config(format!(
                    "provider {provider} budget must be >= 1"
                )));
            }
        }
        let min_cooldown = self.retry.backoff_ceiling() * 2;
        if self.circuit_breaker.cooldown() < min_cooldown {
            return Err(OrchestratorError::config(format!(
                "circuit breaker cooldown {}s is below 2x the retry backoff ceiling",
                self.circuit_breaker.cooldown_secs
            )));
        }
        Ok(())
    }

    /// Budget for one provider, falling back to defaults when unconfigured
    pub fn limits_for(&self, provider: ProviderId) -> ProviderLimits {
        self.provider_limits
            .get(&provider)
            .cloned()
            .unwrap_or_default()
    }

    pub fn enabled_models(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.iter().filter(|m| m.enabled)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    /// Total work units across enabled models, sequences, and runs
    pub fn total_units(&self) -> usize {
        let prompts: usize = self.sequences.iter().map(|s| s.prompts.len()).sum();
        self.enabled_models().count() * prompts * self.runs_per_sequence as usize
    }
}

fn default_true() -> bool {
    true
}

fn default_max_context_tokens() -> u32 {
    100_000
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_max_concurrent() -> usize {
    2
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_runs_per_sequence() -> u32 {
    1
}

fn default_max_concurrent_workers() -> usize {
    8
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_total_timeout_secs() -> u64 {
    3600
}
