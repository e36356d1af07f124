//! Error taxonomy for evaluation calls
//!
//! Everything that can go wrong between a worker and a provider lands in
//! `EvalError`. The retry handler absorbs `Transient` internally up to its
//! budget; everything else propagates to the sequence worker, which converts
//! it into a triple-level failure rather than letting it escape the run.

use crate::types::{ApiFailure, ProviderId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("transient provider failure: {0:?}")]
    Transient(ApiFailure),

    #[error("permanent provider failure: {0:?}")]
    Permanent(ApiFailure),

    #[error("context exceeds model limit: ~{estimated_tokens} tokens > {max_tokens} max")]
    ContextOverflow {
        estimated_tokens: u32,
        max_tokens: u32,
    },

    #[error("circuit open for provider {provider}")]
    CircuitOpen { provider: ProviderId },

    #[error("retries exhausted after {attempts} attempts, last failure: {last:?}")]
    RetryExhausted { attempts: u32, last: ApiFailure },
}

impl EvalError {
    /// Classify a raw provider failure into the retryable/terminal split
    pub fn from_failure(failure: ApiFailure) -> Self {
        if failure.is_transient() {
            EvalError::Transient(failure)
        } else {
            EvalError::Permanent(failure)
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
