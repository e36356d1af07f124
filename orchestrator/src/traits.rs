//! Trait definitions with mockall annotations for testing
//!
//! The two seams the orchestrator depends on: the provider capability
//! (one concrete implementation per LLM vendor) and the checkpoint store
//! (durable completion records). Both are injected, so tests swap in
//! mocks or scripted fakes.

use async_trait::async_trait;
use shared::{ApiFailure, ChatTurn, CheckpointRecord, ProviderId, ProviderResponse, TripleKey, WorkUnit};

use crate::error::OrchestratorResult;

/// Everything a provider needs for one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model_id: String,
    pub max_output_tokens: u32,
    /// Full rendered history, prior turns in order, ending with the next
    /// user prompt
    pub history: Vec<ChatTurn>,
}

/// Provider capability: `generate(rendered context) -> text + usage`
///
/// The orchestrator is agnostic to wire protocol details; each vendor gets
/// one implementation selected at configuration time.
#[mockall::automock]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client talks to
    fn provider(&self) -> ProviderId;

    /// Execute one generation call against the provider
    async fn generate(&self, request: GenerationRequest) -> Result<ProviderResponse, ApiFailure>;
}

/// Durable record of completed work units, enabling resume
///
/// Writes must be idempotent: persisting the same record twice is harmless.
#[mockall::automock]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether a completion record exists for this unit
    async fn has(&self, unit: &WorkUnit) -> OrchestratorResult<bool>;

    /// Persist a completion record
    async fn put(&self, record: CheckpointRecord) -> OrchestratorResult<()>;

    /// All completed records for one triple, ordered by prompt index.
    /// Returns full records rather than bare indices so resume can replay
    /// response payloads into a reconstructed context.
    async fn completed_records(&self, triple: &TripleKey)
        -> OrchestratorResult<Vec<CheckpointRecord>>;

    /// Total completed records across the run
    async fn completed_count(&self) -> OrchestratorResult<usize>;
}
