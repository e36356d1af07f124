//! Top-level scheduler for one evaluation run
//!
//! Enumerates (model, sequence, run) triples, schedules them onto a bounded
//! worker pool, and merges worker outcomes into the final run result.
//! Per-provider concurrency is enforced transitively through the rate
//! limiter, not by the scheduler's own bookkeeping.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use shared::{ProviderId, TripleKey, TripleStatus};

use crate::config::{ModelConfig, RunConfig};
use crate::core::context::SequenceContext;
use crate::core::limiter::RateLimiter;
use crate::core::progress::{ProgressTracker, RunProgress};
use crate::core::retry::{RetryAttempt, RetryHandler};
use crate::core::worker::{contiguous_prefix_len, SequenceWorker, WorkerOutcome};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{CheckpointStore, ProviderClient};

/// Overall status of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every triple reached COMPLETED
    Success,
    /// Some triples failed, were skipped, or timed out; the rest completed
    Partial,
    /// Halted by a cooperative stop; resumable with `resume=true`
    Stopped,
}

/// Structured report of per-triple outcomes for one run
#[derive(Debug)]
pub struct RunResult {
    pub status: RunStatus,
    pub outcomes: Vec<WorkerOutcome>,
    pub progress: RunProgress,
}

impl RunResult {
    pub fn triples_with(&self, status: TripleStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failed_triples(&self) -> Vec<&WorkerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != TripleStatus::Completed)
            .collect()
    }
}

/// Cooperative stop signal. Workers finish their in-flight call and halt
/// before starting the next prompt; the run stays resumable.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// One triple plus everything needed to execute it
#[derive(Clone)]
struct TripleSpec {
    triple: TripleKey,
    prompts: Vec<String>,
    model: ModelConfig,
}

/// An ordered list of triples executed by one worker task. A chain holds a
/// single triple normally; with context carry-over enabled it holds every
/// sequence of one (model, run) in declared order.
type Chain = Vec<TripleSpec>;

pub struct Orchestrator {
    config: RunConfig,
    providers: HashMap<ProviderId, Arc<dyn ProviderClient>>,
    store: Arc<dyn CheckpointStore>,
    limiter: Arc<RateLimiter>,
    retry: RetryHandler,
    progress: ProgressTracker,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        providers: HashMap<ProviderId, Arc<dyn ProviderClient>>,
        store: Arc<dyn CheckpointStore>,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        for model in config.enabled_models() {
            if !providers.contains_key(&model.provider) {
                return Err(OrchestratorError::config(format!(
                    "no provider client configured for {} (model {})",
                    model.provider, model.model_id
                )));
            }
        }
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let retry = RetryHandler::new(config.retry.clone());
        Ok(Self {
            config,
            providers,
            store,
            limiter,
            retry,
            progress: ProgressTracker::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop.clone(),
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Retry analytics accumulated across all workers
    pub async fn retry_attempts(&self) -> Vec<RetryAttempt> {
        self.retry.attempt_log().await
    }

    fn build_chains(&self) -> Vec<Chain> {
        let mut chains = Vec::new();
        for model in self.config.enabled_models() {
            for run_index in 0..self.config.runs_per_sequence {
                let specs: Vec<TripleSpec> = self
                    .config
                    .sequences
                    .iter()
                    .map(|sequence| TripleSpec {
                        triple: TripleKey {
                            model_id: model.model_id.clone(),
                            provider: model.provider,
                            sequence_name: sequence.name.clone(),
                            run_index,
                        },
                        prompts: sequence.prompts.clone(),
                        model: model.clone(),
                    })
                    .collect();
                if self.config.preserve_context_across_sequences {
                    // Context carries forward, so the sequences of this
                    // (model, run) are causally ordered into one chain
                    chains.push(specs);
                } else {
                    chains.extend(specs.into_iter().map(|spec| vec![spec]));
                }
            }
        }
        chains
    }

    /// Execute the full run. With `resume=true`, units already present in
    /// the checkpoint store are excluded and partial contexts reconstructed
    /// before workers receive the remaining suffix.
    pub async fn run(&self, resume: bool) -> OrchestratorResult<RunResult> {
        let chains = self.build_chains();

        // Remaining-unit totals, excluding checkpointed work on resume
        let mut per_model: HashMap<String, usize> = HashMap::new();
        for spec in chains.iter().flatten() {
            let prefix = if resume {
                contiguous_prefix_len(&self.store.completed_records(&spec.triple).await?)
            } else {
                0
            };
            *per_model.entry(spec.model.model_id.clone()).or_default() +=
                spec.prompts.len().saturating_sub(prefix);
        }
        self.progress.init_totals(per_model).await;

        let total_triples: usize = chains.iter().map(|c| c.len()).sum();
        info!(
            "🚀 Run started: {} triples across {} chains ({} workers max, resume={})",
            total_triples,
            chains.len(),
            self.config.max_concurrent_workers,
            resume
        );

        let pool = Arc::new(Semaphore::new(self.config.max_concurrent_workers));
        let consecutive_failures: Arc<Mutex<HashMap<String, u32>>> =
            Arc::new(Mutex::new(HashMap::new()));
        // Per-model run budget; all models start at run start
        let deadline = Instant::now() + self.config.total_timeout();

        let mut tasks: JoinSet<Vec<WorkerOutcome>> = JoinSet::new();
        for chain in chains {
            let pool = pool.clone();
            let stop = self.stop.clone();
            let store = self.store.clone();
            let limiter = self.limiter.clone();
            let retry = self.retry.clone();
            let progress = self.progress.clone();
            let providers = self.providers.clone();
            let consecutive_failures = consecutive_failures.clone();
            let config = self.config.clone();

            tasks.spawn(async move {
                let _slot = pool
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore closed");
                let mut outcomes = Vec::with_capacity(chain.len());
                let mut context = SequenceContext::new();

                for spec in chain {
                    if stop.load(Ordering::SeqCst) {
                        outcomes.push(terminal(&spec.triple, TripleStatus::Stopped));
                        continue;
                    }
                    if Instant::now() >= deadline {
                        warn!("⏰ {} timed out before starting", spec.triple);
                        outcomes.push(terminal(&spec.triple, TripleStatus::TimedOut));
                        continue;
                    }
                    let model_failures = *consecutive_failures
                        .lock()
                        .await
                        .get(&spec.triple.model_id)
                        .unwrap_or(&0);
                    if model_failures >= config.max_consecutive_errors {
                        warn!(
                            "⏭️ {} skipped after {} consecutive failures for model {}",
                            spec.triple, model_failures, spec.triple.model_id
                        );
                        outcomes.push(terminal(&spec.triple, TripleStatus::Skipped));
                        continue;
                    }

                    if !config.preserve_context_across_sequences {
                        context = SequenceContext::new();
                    }
                    let Some(provider) = providers.get(&spec.triple.provider).cloned() else {
                        outcomes.push(WorkerOutcome {
                            triple: spec.triple.clone(),
                            status: TripleStatus::Failed,
                            completed_units: 0,
                            error: Some("no provider client configured".into()),
                        });
                        continue;
                    };

                    let worker = SequenceWorker {
                        triple: spec.triple.clone(),
                        prompts: spec.prompts,
                        model: spec.model,
                        provider,
                        store: store.clone(),
                        limiter: limiter.clone(),
                        retry: retry.clone(),
                        progress: progress.clone(),
                        request_timeout: config.request_timeout(),
                        stop: stop.clone(),
                        deadline,
                        resume,
                    };
                    let outcome = worker.run(&mut context).await;

                    match outcome.status {
                        TripleStatus::Completed => {
                            consecutive_failures
                                .lock()
                                .await
                                .insert(outcome.triple.model_id.clone(), 0);
                        }
                        TripleStatus::Failed => {
                            *consecutive_failures
                                .lock()
                                .await
                                .entry(outcome.triple.model_id.clone())
                                .or_default() += 1;
                            if !config.continue_on_error {
                                warn!("🛑 Halting run: continue_on_error is disabled");
                                stop.store(true, Ordering::SeqCst);
                            }
                        }
                        _ => {}
                    }
                    outcomes.push(outcome);
                }
                outcomes
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.extend(joined?);
        }
        outcomes.sort_by(|a, b| a.triple.to_string().cmp(&b.triple.to_string()));

        let status = if outcomes
            .iter()
            .any(|o| o.status == TripleStatus::Stopped)
        {
            RunStatus::Stopped
        } else if outcomes
            .iter()
            .all(|o| o.status == TripleStatus::Completed)
        {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };

        let progress = self.progress.snapshot().await;
        info!(
            "🏁 Run finished: {:?} ({}/{} units, {} failed)",
            status, progress.completed_units, progress.total_units, progress.failed_units
        );
        Ok(RunResult {
            status,
            outcomes,
            progress,
        })
    }
}

fn terminal(triple: &TripleKey, status: TripleStatus) -> WorkerOutcome {
    WorkerOutcome {
        triple: triple.clone(),
        status,
        completed_units: 0,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::checkpoint::MemoryCheckpointStore;
    use crate::traits::MockProviderClient;

    fn config(preserve: bool) -> RunConfig {
        let mut config: RunConfig = serde_json::from_value(serde_json::json!({
            "models": [
                {"provider": "openai", "model_id": "m1"},
                {"provider": "openai", "model_id": "m2", "enabled": false}
            ],
            "sequences": [
                {"name": "a", "prompts": ["p1", "p2"]},
                {"name": "b", "prompts": ["p1"]}
            ],
            "runs_per_sequence": 2
        }))
        .unwrap();
        config.preserve_context_across_sequences = preserve;
        config
    }

    fn orchestrator(config: RunConfig) -> Orchestrator {
        let mut providers: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(ProviderId::OpenAI, Arc::new(MockProviderClient::new()));
        Orchestrator::new(config, providers, Arc::new(MemoryCheckpointStore::new())).unwrap()
    }

    #[test]
    fn test_chains_one_triple_each_by_default() {
        let orch = orchestrator(config(false));
        let chains = orch.build_chains();
        // 1 enabled model x 2 sequences x 2 runs
        assert_eq!(chains.len(), 4);
        assert!(chains.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_chains_group_sequences_when_preserving_context() {
        let orch = orchestrator(config(true));
        let chains = orch.build_chains();
        // One chain per (model, run), each holding both sequences in order
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|c| c.len() == 2));
        assert_eq!(chains[0][0].triple.sequence_name, "a");
        assert_eq!(chains[0][1].triple.sequence_name, "b");
    }

    #[test]
    fn test_new_rejects_missing_provider_client() {
        let mut config = config(false);
        config.models.push(crate::config::ModelConfig {
            provider: ProviderId::Gemini,
            model_id: "g1".into(),
            max_context_tokens: 1000,
            max_output_tokens: 100,
            enabled: true,
        });
        let mut providers: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(ProviderId::OpenAI, Arc::new(MockProviderClient::new()));
        let result = Orchestrator::new(config, providers, Arc::new(MemoryCheckpointStore::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_models_excluded() {
        let orch = orchestrator(config(false));
        let chains = orch.build_chains();
        assert!(chains
            .iter()
            .flatten()
            .all(|spec| spec.triple.model_id == "m1"));
    }
}
