//! Core shared types and identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for downstream LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anthropic,
    OpenAI,
    Gemini,
    DeepInfra,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ProviderId {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" => Some(ProviderId::Anthropic),
            "openai" => Some(ProviderId::OpenAI),
            "gemini" => Some(ProviderId::Gemini),
            "deepinfra" => Some(ProviderId::DeepInfra),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "anthropic",
            ProviderId::OpenAI => "openai",
            ProviderId::Gemini => "gemini",
            ProviderId::DeepInfra => "deepinfra",
        }
    }

    pub fn all() -> [ProviderId; 4] {
        [
            ProviderId::Anthropic,
            ProviderId::OpenAI,
            ProviderId::Gemini,
            ProviderId::DeepInfra,
        ]
    }
}

/// API failure reasons for LLM provider requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiFailure {
    /// Authentication failed (invalid API key)
    AuthenticationFailed,
    /// Rate limit exceeded
    RateLimitExceeded,
    /// Request quota exceeded
    QuotaExceeded,
    /// Invalid request format or parameters
    InvalidRequest(String),
    /// Model not found or unavailable
    ModelUnavailable(String),
    /// Network/connection error
    NetworkError(String),
    /// Server error from provider
    ServerError(String),
    /// Request timeout
    Timeout,
    /// Content policy violation
    ContentPolicyViolation,
    /// Service temporarily unavailable
    ServiceUnavailable,
    /// Unknown or unhandled error
    Unknown(String),
}

impl ApiFailure {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Auth, malformed-request, and policy failures will fail identically on
    /// every attempt and must propagate immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiFailure::RateLimitExceeded
            | ApiFailure::NetworkError(_)
            | ApiFailure::ServerError(_)
            | ApiFailure::Timeout
            | ApiFailure::ServiceUnavailable
            | ApiFailure::Unknown(_) => true,
            ApiFailure::AuthenticationFailed
            | ApiFailure::QuotaExceeded
            | ApiFailure::InvalidRequest(_)
            | ApiFailure::ModelUnavailable(_)
            | ApiFailure::ContentPolicyViolation => false,
        }
    }
}

/// One turn of a rendered conversation, as sent to a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Token usage reported by a provider for one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider response data for one generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: UsageStats,
    pub model_used: String,
    pub response_time_ms: u64,
}

/// A (model, sequence, run) grouping whose prompts must execute in order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripleKey {
    pub model_id: String,
    pub provider: ProviderId,
    pub sequence_name: String,
    pub run_index: u32,
}

impl fmt::Display for TripleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/run{}",
            self.model_id, self.sequence_name, self.run_index
        )
    }
}

impl TripleKey {
    /// The work unit for one prompt of this triple
    pub fn unit(&self, prompt_index: u32) -> WorkUnit {
        WorkUnit {
            model_id: self.model_id.clone(),
            provider: self.provider,
            sequence_name: self.sequence_name.clone(),
            run_index: self.run_index,
            prompt_index,
        }
    }
}

/// The atomic execution item: one prompt of one (model, sequence, run)
///
/// Immutable once created. Presence of its key in the checkpoint store marks
/// the unit as completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub model_id: String,
    pub provider: ProviderId,
    pub sequence_name: String,
    pub run_index: u32,
    pub prompt_index: u32,
}

impl WorkUnit {
    /// Stable storage key for checkpoint lookups
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.model_id, self.sequence_name, self.run_index, self.prompt_index
        )
    }

    pub fn triple(&self) -> TripleKey {
        TripleKey {
            model_id: self.model_id.clone(),
            provider: self.provider,
            sequence_name: self.sequence_name.clone(),
            run_index: self.run_index,
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Durable record marking a work unit as completed
///
/// Writing the same record twice is harmless; the store keeps the latest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub unit: WorkUnit,
    pub response: String,
    pub usage: UsageStats,
    pub completed_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(unit: WorkUnit, response: &ProviderResponse) -> Self {
        Self {
            unit,
            response: response.content.clone(),
            usage: response.usage.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// Terminal status of one triple within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripleStatus {
    Completed,
    Failed,
    /// Not attempted because the model exceeded its consecutive-error budget
    Skipped,
    /// Not attempted because the model's total-run timeout elapsed
    TimedOut,
    /// Halted by a cooperative stop; resumable later
    Stopped,
}

impl fmt::Display for TripleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripleStatus::Completed => "completed",
            TripleStatus::Failed => "failed",
            TripleStatus::Skipped => "skipped",
            TripleStatus::TimedOut => "timed_out",
            TripleStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_round_trip() {
        for provider in ProviderId::all() {
            assert_eq!(ProviderId::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(ProviderId::from_str("OpenAI"), Some(ProviderId::OpenAI));
        assert_eq!(ProviderId::from_str("mistral"), None);
    }

    #[test]
    fn test_failure_classification() {
        assert!(ApiFailure::Timeout.is_transient());
        assert!(ApiFailure::RateLimitExceeded.is_transient());
        assert!(ApiFailure::ServerError("500".into()).is_transient());
        assert!(!ApiFailure::AuthenticationFailed.is_transient());
        assert!(!ApiFailure::ContentPolicyViolation.is_transient());
        assert!(!ApiFailure::InvalidRequest("bad".into()).is_transient());
    }

    #[test]
    fn test_work_unit_key_shape() {
        let triple = TripleKey {
            model_id: "claude-sonnet".into(),
            provider: ProviderId::Anthropic,
            sequence_name: "noir".into(),
            run_index: 2,
        };
        let unit = triple.unit(5);
        assert_eq!(unit.key(), "claude-sonnet/noir/2/5");
        assert_eq!(unit.triple(), triple);
    }
}
