//! Core evaluation components
//!
//! Leaves first: context accumulation, rate limiting, retry; then the
//! sequence worker and progress tracking; the orchestrator sits on top.

pub mod context;
pub mod limiter;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod worker;

pub use context::{ContextValidation, SequenceContext};
pub use limiter::{CallOutcome, CircuitState, Permit, RateLimiter};
pub use orchestrator::{Orchestrator, RunResult, RunStatus, StopHandle};
pub use progress::{ModelProgress, ProgressTracker, RunProgress};
pub use retry::{RetryAttempt, RetryHandler};
pub use worker::{SequenceWorker, WorkerOutcome};
