//! Bounded exponential-backoff retry around a single provider call
//!
//! Transient failures are absorbed up to the retry budget with
//! base * multiplier^n backoff plus random jitter. Permanent failures
//! propagate immediately and are never retried. Every retry attempt is
//! recorded in an attempt log for later analytics.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use shared::{ApiFailure, EvalError, EvalResult};

use crate::config::RetryConfig;

/// One recorded retry attempt, kept for analytics
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// Which call this attempt belongs to (e.g. the work unit key)
    pub label: String,
    /// 1-based attempt number that failed
    pub attempt: u32,
    /// Backoff delay waited before the next attempt
    pub delay: Duration,
    pub failure: ApiFailure,
    pub at: DateTime<Utc>,
}

/// Retry handler shared by all workers of a run
#[derive(Clone)]
pub struct RetryHandler {
    policy: RetryConfig,
    attempts: Arc<RwLock<Vec<RetryAttempt>>>,
}

impl RetryHandler {
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            policy,
            attempts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Backoff delay before retry number `retry_index + 1`, with jitter
    fn backoff_delay(&self, retry_index: u32) -> Duration {
        let base = self.policy.base_delay_ms as f64
            * self.policy.backoff_multiplier.powi(retry_index as i32);
        let jitter = if self.policy.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.policy.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base as u64 + jitter)
    }

    /// Invoke `call` and retry classified-transient failures up to the
    /// policy budget. Permanent failures propagate on the first occurrence;
    /// exhausting the budget yields `RetryExhausted` carrying the last
    /// underlying failure.
    pub async fn execute<F, Fut, T>(&self, label: &str, mut call: F) -> EvalResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiFailure>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(failure) if failure.is_transient() => {
                    attempt += 1;
                    if attempt > self.policy.max_retries {
                        return Err(EvalError::RetryExhausted {
                            attempts: attempt,
                            last: failure,
                        });
                    }
                    let delay = self.backoff_delay(attempt - 1);
                    warn!(
                        "🔁 Transient failure on {} (attempt {}/{}), retrying in {:?}: {:?}",
                        label,
                        attempt,
                        self.policy.max_retries,
                        delay,
                        failure
                    );
                    self.attempts.write().await.push(RetryAttempt {
                        label: label.to_string(),
                        attempt,
                        delay,
                        failure,
                        at: Utc::now(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(EvalError::Permanent(failure)),
            }
        }
    }

    /// Snapshot of every recorded retry attempt so far
    pub async fn attempt_log(&self) -> Vec<RetryAttempt> {
        self.attempts.read().await.clone()
    }
}
