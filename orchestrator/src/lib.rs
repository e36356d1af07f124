//! Parallel evaluation orchestrator for multi-provider LLM prompt sequences
//!
//! Fans out independent (model, sequence, run) triples to a bounded pool of
//! workers, enforces per-provider concurrency/rate budgets with circuit
//! breaking, retries transient failures with backoff, and checkpoints every
//! completed unit so an interrupted run resumes without reissuing work.

pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod traits;

pub use config::{
    CircuitBreakerConfig, ModelConfig, ProviderLimits, RetryConfig, RunConfig, SequenceConfig,
};
pub use core::{
    CallOutcome, CircuitState, ContextValidation, Orchestrator, ProgressTracker, RateLimiter,
    RetryHandler, RunProgress, RunResult, RunStatus, SequenceContext, SequenceWorker, StopHandle,
    WorkerOutcome,
};
pub use error::{OrchestratorError, OrchestratorResult};
pub use traits::{CheckpointStore, GenerationRequest, ProviderClient};
