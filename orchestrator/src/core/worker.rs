//! Sequence worker: executes one (model, sequence, run) triple end-to-end
//!
//! Prompts run strictly in submission order because each call's context
//! causally depends on every earlier response. Checkpointed units are
//! skipped and replayed into the context instead of reissued. Any
//! propagated error fails this triple only; sibling triples keep running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use shared::{ApiFailure, CheckpointRecord, EvalError, TripleKey, TripleStatus};

use crate::config::ModelConfig;
use crate::core::context::{ContextValidation, SequenceContext};
use crate::core::limiter::{CallOutcome, RateLimiter};
use crate::core::progress::ProgressTracker;
use crate::core::retry::RetryHandler;
use crate::traits::{CheckpointStore, GenerationRequest, ProviderClient};

/// Terminal report for one triple
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub triple: TripleKey,
    pub status: TripleStatus,
    /// Units checkpointed for this triple, replayed ones included
    pub completed_units: u32,
    pub error: Option<String>,
}

/// Length of the gap-free prefix of completed records, by prompt index.
///
/// Records past a gap are ignored during replay; their units re-execute,
/// which is safe because checkpoint writes are idempotent.
pub fn contiguous_prefix_len(records: &[CheckpointRecord]) -> usize {
    records
        .iter()
        .enumerate()
        .take_while(|(i, record)| record.unit.prompt_index as usize == *i)
        .count()
}

pub struct SequenceWorker {
    pub triple: TripleKey,
    pub prompts: Vec<String>,
    pub model: ModelConfig,
    pub provider: Arc<dyn ProviderClient>,
    pub store: Arc<dyn CheckpointStore>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryHandler,
    pub progress: ProgressTracker,
    pub request_timeout: Duration,
    pub stop: Arc<AtomicBool>,
    /// Total-run budget; no new prompt starts past this point
    pub deadline: Instant,
    /// Replay checkpointed units instead of reissuing them
    pub resume: bool,
}

impl SequenceWorker {
    /// Process this triple's prompts in order against the given context.
    ///
    /// The context may already hold turns when sequences carry context
    /// forward within a run; checkpoint indices are per-sequence either way.
    pub async fn run(&self, context: &mut SequenceContext) -> WorkerOutcome {
        let prefix = if self.resume {
            let completed = match self.store.completed_records(&self.triple).await {
                Ok(records) => records,
                Err(e) => return self.failed(0, format!("checkpoint load failed: {e}")).await,
            };
            // A shortened prompt list can leave more records than prompts;
            // the surplus is ignored and the triple counts as complete.
            let prefix = contiguous_prefix_len(&completed).min(self.prompts.len());
            for record in &completed[..prefix] {
                context.append(
                    &self.prompts[record.unit.prompt_index as usize],
                    &record.response,
                );
            }
            if prefix > 0 {
                info!(
                    "⏩ {} resuming at prompt {} of {} (context fingerprint {})",
                    self.triple,
                    prefix,
                    self.prompts.len(),
                    context.fingerprint()
                );
            }
            prefix
        } else {
            0
        };

        let mut completed_units = prefix as u32;
        for (index, prompt) in self.prompts.iter().enumerate().skip(prefix) {
            // Stop only between prompts, never mid-call
            if self.stop.load(Ordering::SeqCst) {
                info!("🛑 {} halted by stop signal at prompt {}", self.triple, index);
                return WorkerOutcome {
                    triple: self.triple.clone(),
                    status: TripleStatus::Stopped,
                    completed_units,
                    error: None,
                };
            }
            if Instant::now() >= self.deadline {
                warn!("⏰ {} timed out at prompt {}", self.triple, index);
                return WorkerOutcome {
                    triple: self.triple.clone(),
                    status: TripleStatus::TimedOut,
                    completed_units,
                    error: None,
                };
            }

            if let ContextValidation::OverLimit {
                estimated_tokens,
                max_tokens,
            } = context.validate(prompt, self.model.max_context_tokens)
            {
                let overflow = EvalError::ContextOverflow {
                    estimated_tokens,
                    max_tokens,
                };
                return self.failed(completed_units, overflow.to_string()).await;
            }

            let unit = self.triple.unit(index as u32);
            let permit = match self.limiter.acquire(self.triple.provider).await {
                Ok(permit) => permit,
                Err(e) => return self.failed(completed_units, e.to_string()).await,
            };

            let request = GenerationRequest {
                model_id: self.model.model_id.clone(),
                max_output_tokens: self.model.max_output_tokens,
                history: context.render_for_next_call(prompt),
            };
            let provider = self.provider.clone();
            let timeout = self.request_timeout;
            let result = self
                .retry
                .execute(&unit.key(), move || {
                    let provider = provider.clone();
                    let request = request.clone();
                    async move {
                        match tokio::time::timeout(timeout, provider.generate(request)).await {
                            Ok(result) => result,
                            Err(_) => Err(ApiFailure::Timeout),
                        }
                    }
                })
                .await;

            match result {
                Ok(response) => {
                    self.limiter.release(permit, CallOutcome::Success).await;
                    context.append(prompt, &response.content);
                    let record = CheckpointRecord::new(unit, &response);
                    if let Err(e) = self.store.put(record).await {
                        return self
                            .failed(completed_units, format!("checkpoint write failed: {e}"))
                            .await;
                    }
                    self.progress
                        .record_unit_completed(&self.triple.model_id)
                        .await;
                    completed_units += 1;
                }
                Err(e) => {
                    self.limiter.release(permit, CallOutcome::Failure).await;
                    return self.failed(completed_units, e.to_string()).await;
                }
            }
        }

        info!(
            "✅ {} completed ({} units, context fingerprint {})",
            self.triple,
            completed_units,
            context.fingerprint()
        );
        WorkerOutcome {
            triple: self.triple.clone(),
            status: TripleStatus::Completed,
            completed_units,
            error: None,
        }
    }

    /// Convert a propagated error into a triple-level failure report.
    /// Later prompts causally depend on earlier responses, so the triple
    /// stops here; other triples are unaffected.
    async fn failed(&self, completed_units: u32, message: String) -> WorkerOutcome {
        error!("❌ {} failed: {}", self.triple, message);
        self.progress
            .record_unit_failed(&self.triple.model_id)
            .await;
        self.progress
            .record_triple_failed(self.triple.to_string())
            .await;
        WorkerOutcome {
            triple: self.triple.clone(),
            status: TripleStatus::Failed,
            completed_units,
            error: Some(message),
        }
    }
}
