//! Per-provider concurrency and request-rate gate with circuit breaking
//!
//! All shared provider-budget state lives here, behind one gate per
//! provider. Workers acquire a permit before every call; acquisition
//! suspends cooperatively until both a concurrency slot and a rate token
//! are free. Failures feed the breaker: a misbehaving provider gets its
//! calls rejected up front instead of starving the worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use shared::{EvalError, EvalResult, ProviderId};

use crate::config::{CircuitBreakerConfig, ProviderLimits, RunConfig};

/// Fixed rate-limit window. Issued requests per window never exceed the
/// provider's configured requests-per-minute.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Circuit breaker state machine per provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome reported back when a permit is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Grant for one in-flight provider call. Holding it occupies one of the
/// provider's concurrency slots; dropping it frees the slot.
#[derive(Debug)]
pub struct Permit {
    provider: ProviderId,
    /// Whether this permit is the single half-open trial request
    trial: bool,
    _slot: OwnedSemaphorePermit,
}

impl Permit {
    pub fn provider(&self) -> ProviderId {
        self.provider
    }
}

/// Mutable budget state, only ever touched under the gate's mutex
#[derive(Debug)]
struct GateState {
    window_start: Instant,
    issued_in_window: u32,
    circuit: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    trial_in_flight: bool,
}

struct ProviderGate {
    provider: ProviderId,
    limits: ProviderLimits,
    breaker: CircuitBreakerConfig,
    slots: Arc<Semaphore>,
    state: Mutex<GateState>,
}

impl ProviderGate {
    fn new(provider: ProviderId, limits: ProviderLimits, breaker: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            slots: Arc::new(Semaphore::new(limits.max_concurrent)),
            state: Mutex::new(GateState {
                window_start: Instant::now(),
                issued_in_window: 0,
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                open_until: None,
                trial_in_flight: false,
            }),
            limits,
            breaker,
        }
    }

    /// Circuit check. Returns whether the granted permit is the half-open
    /// trial, or rejects immediately when the breaker is open.
    async fn check_circuit(&self) -> EvalResult<bool> {
        let mut state = self.state.lock().await;
        if state.circuit == CircuitState::Open {
            let cooled_down = state
                .open_until
                .map(|until| Instant::now() >= until)
                .unwrap_or(true);
            if !cooled_down {
                return Err(EvalError::CircuitOpen {
                    provider: self.provider,
                });
            }
            state.circuit = CircuitState::HalfOpen;
            state.trial_in_flight = false;
            info!("🔌 Circuit for {} entering half-open trial", self.provider);
        }
        if state.circuit == CircuitState::HalfOpen {
            // Exactly one trial request is admitted while half-open
            if state.trial_in_flight {
                return Err(EvalError::CircuitOpen {
                    provider: self.provider,
                });
            }
            state.trial_in_flight = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Take a rate token, sleeping out the window when the ceiling is hit
    async fn take_rate_token(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.window_start) >= RATE_WINDOW {
                    state.window_start = now;
                    state.issued_in_window = 0;
                }
                if state.issued_in_window < self.limits.requests_per_minute {
                    state.issued_in_window += 1;
                    None
                } else {
                    Some(RATE_WINDOW - now.duration_since(state.window_start))
                }
            };
            match wait {
                None => return,
                Some(delay) => {
                    warn!(
                        "⏳ Rate ceiling hit for {}, waiting {:?} for next window",
                        self.provider, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn record_outcome(&self, trial: bool, outcome: CallOutcome) {
        let mut state = self.state.lock().await;
        match outcome {
            CallOutcome::Success => {
                state.consecutive_failures = 0;
                if state.circuit == CircuitState::HalfOpen && trial {
                    state.circuit = CircuitState::Closed;
                    state.trial_in_flight = false;
                    state.open_until = None;
                    info!("✅ Circuit for {} closed after trial success", self.provider);
                }
            }
            CallOutcome::Failure => {
                state.consecutive_failures += 1;
                if state.circuit == CircuitState::HalfOpen {
                    state.circuit = CircuitState::Open;
                    state.open_until = Some(Instant::now() + self.breaker.cooldown());
                    state.trial_in_flight = false;
                    warn!(
                        "🔴 Circuit for {} re-opened after trial failure, cooldown {:?}",
                        self.provider,
                        self.breaker.cooldown()
                    );
                } else if state.circuit == CircuitState::Closed
                    && state.consecutive_failures >= self.breaker.failure_threshold
                {
                    state.circuit = CircuitState::Open;
                    state.open_until = Some(Instant::now() + self.breaker.cooldown());
                    warn!(
                        "🔴 Circuit for {} opened after {} consecutive failures",
                        self.provider, state.consecutive_failures
                    );
                }
            }
        }
    }
}

/// Provider-keyed rate limiter and circuit breaker
///
/// The single synchronized owner of all `ProviderBudget` state; workers
/// reach it only through `acquire`/`release`.
pub struct RateLimiter {
    gates: HashMap<ProviderId, Arc<ProviderGate>>,
}

impl RateLimiter {
    /// Build one gate per provider referenced by an enabled model
    pub fn from_config(config: &RunConfig) -> Self {
        let mut gates = HashMap::new();
        for model in config.enabled_models() {
            gates.entry(model.provider).or_insert_with(|| {
                Arc::new(ProviderGate::new(
                    model.provider,
                    config.limits_for(model.provider),
                    config.circuit_breaker.clone(),
                ))
            });
        }
        Self { gates }
    }

    #[cfg(test)]
    pub fn single(
        provider: ProviderId,
        limits: ProviderLimits,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let mut gates = HashMap::new();
        gates.insert(provider, Arc::new(ProviderGate::new(provider, limits, breaker)));
        Self { gates }
    }

    fn gate(&self, provider: ProviderId) -> EvalResult<&Arc<ProviderGate>> {
        // A missing gate means the provider was never configured; treat it
        // as permanently unavailable rather than panicking in a worker.
        self.gates.get(&provider).ok_or(EvalError::CircuitOpen { provider })
    }

    /// Block cooperatively until both a concurrency slot and a rate token
    /// are available for this provider, or reject if its circuit is open.
    pub async fn acquire(&self, provider: ProviderId) -> EvalResult<Permit> {
        let gate = self.gate(provider)?;
        let trial = gate.check_circuit().await?;
        let slot = gate
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("provider gate semaphore closed");
        gate.take_rate_token().await;
        Ok(Permit {
            provider,
            trial,
            _slot: slot,
        })
    }

    /// Return the slot and feed the breaker with the call outcome
    pub async fn release(&self, permit: Permit, outcome: CallOutcome) {
        if let Ok(gate) = self.gate(permit.provider) {
            gate.record_outcome(permit.trial, outcome).await;
        }
        // Slot frees when the permit drops
    }

    /// Current breaker state, for reporting and tests
    pub async fn circuit_state(&self, provider: ProviderId) -> Option<CircuitState> {
        match self.gates.get(&provider) {
            Some(gate) => Some(gate.state.lock().await.circuit),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(max_concurrent: usize, rpm: u32, threshold: u32, cooldown_secs: u64) -> RateLimiter {
        RateLimiter::single(
            ProviderId::OpenAI,
            ProviderLimits {
                max_concurrent,
                requests_per_minute: rpm,
            },
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown_secs,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_budget_never_exceeded() {
        let limiter = Arc::new(limiter(2, 1000, 3, 30));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire(ProviderId::OpenAI).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                limiter.release(permit, CallOutcome::Success).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_ceiling_defers_to_next_window() {
        let limiter = limiter(10, 2, 3, 30);

        let p1 = limiter.acquire(ProviderId::OpenAI).await.unwrap();
        let p2 = limiter.acquire(ProviderId::OpenAI).await.unwrap();
        limiter.release(p1, CallOutcome::Success).await;
        limiter.release(p2, CallOutcome::Success).await;

        // Third acquire in the same window must wait for the window to roll
        let start = Instant::now();
        let p3 = limiter.acquire(ProviderId::OpenAI).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(59));
        limiter.release(p3, CallOutcome::Success).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_consecutive_failures() {
        let limiter = limiter(5, 1000, 3, 30);

        for _ in 0..3 {
            let permit = limiter.acquire(ProviderId::OpenAI).await.unwrap();
            limiter.release(permit, CallOutcome::Failure).await;
        }
        assert_eq!(
            limiter.circuit_state(ProviderId::OpenAI).await,
            Some(CircuitState::Open)
        );
        assert!(matches!(
            limiter.acquire(ProviderId::OpenAI).await,
            Err(EvalError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let limiter = limiter(5, 1000, 2, 10);

        for _ in 0..2 {
            let permit = limiter.acquire(ProviderId::OpenAI).await.unwrap();
            limiter.release(permit, CallOutcome::Failure).await;
        }
        assert!(limiter.acquire(ProviderId::OpenAI).await.is_err());

        // After the cooldown exactly one trial is admitted
        tokio::time::sleep(Duration::from_secs(11)).await;
        let trial = limiter.acquire(ProviderId::OpenAI).await.unwrap();
        assert_eq!(
            limiter.circuit_state(ProviderId::OpenAI).await,
            Some(CircuitState::HalfOpen)
        );
        assert!(limiter.acquire(ProviderId::OpenAI).await.is_err());

        limiter.release(trial, CallOutcome::Success).await;
        assert_eq!(
            limiter.circuit_state(ProviderId::OpenAI).await,
            Some(CircuitState::Closed)
        );
        assert!(limiter.acquire(ProviderId::OpenAI).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let limiter = limiter(5, 1000, 2, 10);

        for _ in 0..2 {
            let permit = limiter.acquire(ProviderId::OpenAI).await.unwrap();
            limiter.release(permit, CallOutcome::Failure).await;
        }
        tokio::time::sleep(Duration::from_secs(11)).await;

        let trial = limiter.acquire(ProviderId::OpenAI).await.unwrap();
        limiter.release(trial, CallOutcome::Failure).await;
        assert_eq!(
            limiter.circuit_state(ProviderId::OpenAI).await,
            Some(CircuitState::Open)
        );
        // Cooldown restarted; still rejected well into the new window
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(limiter.acquire(ProviderId::OpenAI).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_provider_rejected() {
        let limiter = limiter(1, 10, 3, 30);
        assert!(limiter.acquire(ProviderId::Gemini).await.is_err());
    }
}
