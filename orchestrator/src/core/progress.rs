//! Thread-safe aggregation of per-worker status, throughput, and ETA
//!
//! Workers report unit completions and failures; consumers either pull a
//! snapshot or subscribe to the push channel. Nothing else mutates run
//! progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};

/// Per-model completion counters and throughput
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelProgress {
    pub total_units: usize,
    pub completed_units: usize,
    pub failed_units: usize,
    pub units_per_minute: f64,
}

/// Aggregate run progress snapshot
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub total_units: usize,
    pub completed_units: usize,
    pub failed_units: usize,
    pub per_model: HashMap<String, ModelProgress>,
    pub started_at: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Triples currently known to have failed, by display key
    pub failed_triples: Vec<String>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            total_units: 0,
            completed_units: 0,
            failed_units: 0,
            per_model: HashMap::new(),
            started_at: Utc::now(),
            estimated_completion: None,
            failed_triples: Vec::new(),
        }
    }
}

struct ProgressInner {
    progress: RunProgress,
    started: Instant,
}

/// Progress tracker shared across all workers of a run
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<RwLock<ProgressInner>>,
    push: watch::Sender<RunProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let progress = RunProgress::default();
        let (push, _) = watch::channel(progress.clone());
        Self {
            inner: Arc::new(RwLock::new(ProgressInner {
                progress,
                started: Instant::now(),
            })),
            push,
        }
    }

    /// Set the work-unit totals at run start. Units already checkpointed
    /// from a previous invocation are excluded by the caller.
    pub async fn init_totals(&self, per_model: HashMap<String, usize>) {
        let mut inner = self.inner.write().await;
        inner.started = Instant::now();
        inner.progress = RunProgress {
            total_units: per_model.values().sum(),
            per_model: per_model
                .into_iter()
                .map(|(model, total)| {
                    (
                        model,
                        ModelProgress {
                            total_units: total,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            ..Default::default()
        };
        let _ = self.push.send(inner.progress.clone());
    }

    pub async fn record_unit_completed(&self, model_id: &str) {
        let mut inner = self.inner.write().await;
        inner.progress.completed_units += 1;
        inner
            .progress
            .per_model
            .entry(model_id.to_string())
            .or_default()
            .completed_units += 1;
        Self::refresh_rates(&mut inner);
        let _ = self.push.send(inner.progress.clone());
    }

    pub async fn record_unit_failed(&self, model_id: &str) {
        let mut inner = self.inner.write().await;
        inner.progress.failed_units += 1;
        inner
            .progress
            .per_model
            .entry(model_id.to_string())
            .or_default()
            .failed_units += 1;
        Self::refresh_rates(&mut inner);
        let _ = self.push.send(inner.progress.clone());
    }

    pub async fn record_triple_failed(&self, triple_key: String) {
        let mut inner = self.inner.write().await;
        if !inner.progress.failed_triples.contains(&triple_key) {
            inner.progress.failed_triples.push(triple_key);
        }
        let _ = self.push.send(inner.progress.clone());
    }

    /// Current snapshot (pull API)
    pub async fn snapshot(&self) -> RunProgress {
        self.inner.read().await.progress.clone()
    }

    /// Push channel for external consumers (dashboard/CLI)
    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.push.subscribe()
    }

    fn refresh_rates(inner: &mut ProgressInner) {
        let elapsed_min = inner.started.elapsed().as_secs_f64() / 60.0;
        if elapsed_min <= f64::EPSILON {
            return;
        }
        let mut overall_rate = 0.0;
        for model in inner.progress.per_model.values_mut() {
            model.units_per_minute = model.completed_units as f64 / elapsed_min;
            overall_rate += model.units_per_minute;
        }
        let remaining = inner
            .progress
            .total_units
            .saturating_sub(inner.progress.completed_units + inner.progress.failed_units);
        inner.progress.estimated_completion = if overall_rate > 0.0 && remaining > 0 {
            let minutes_left = remaining as f64 / overall_rate;
            Some(Utc::now() + chrono::Duration::milliseconds((minutes_left * 60_000.0) as i64))
        } else {
            None
        };
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
