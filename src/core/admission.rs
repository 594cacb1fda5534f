//! Admission control: a one-minute rate window plus a circuit breaker.
//!
//! Both live in one [`AdmissionManager`] behind a single `parking_lot::RwLock`.
//! Mutations (`record_success`, `record_failure`, `reset`) take the write lock;
//! admission checks and statistics take the read lock. Time is read from
//! `tokio::time::Instant` so paused-clock tests can drive the window.
//!
//! Circuit states:
//!
//! - **Closed**: `open == false`.
//! - **Open**: `failure_threshold` consecutive failures were recorded; every
//!   admission check is denied until the cool-down elapses.
//! - **Half-open**: still `open == true`, but the cool-down has elapsed, so
//!   checks are allowed. The next recorded outcome decides: success closes the
//!   circuit, failure re-stamps `last_failure_at` and restarts the cool-down.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::QuotaConfig;
use crate::core::error::{AdmissionDenied, SchedulerError};

/// Length of the rolling accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Longest single sleep inside [`AdmissionManager::await_admission`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on any backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

const MAX_BACKOFF_SHIFT: u32 = 20;

/// Exponential backoff: `base << attempt`, clamped to [`MAX_BACKOFF`].
pub fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(MAX_BACKOFF_SHIFT);
    base.checked_mul(factor).map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    request_count: u32,
    token_count: u64,
}

impl RateWindow {
    const fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            request_count: 0,
            token_count: 0,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= WINDOW
    }

    fn remaining(&self, now: Instant) -> Duration {
        WINDOW.saturating_sub(now.saturating_duration_since(self.window_start))
    }

    fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}

#[derive(Debug, Default)]
struct CircuitBreaker {
    failure_count: u32,
    open: bool,
    last_failure_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Cool-down left while open, `None` when closed or half-open.
    fn remaining_cooldown(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        if !self.open {
            return None;
        }
        let since = self
            .last_failure_at
            .map_or(cooldown, |at| now.saturating_duration_since(at));
        let remaining = cooldown.saturating_sub(since);
        (!remaining.is_zero()).then_some(remaining)
    }
}

#[derive(Debug, Default)]
struct LifetimeTotals {
    requests: u64,
    tokens: u64,
    failures: u64,
}

#[derive(Debug)]
struct AdmissionState {
    window: RateWindow,
    circuit: CircuitBreaker,
    totals: LifetimeTotals,
}

impl AdmissionState {
    fn new(now: Instant) -> Self {
        Self {
            window: RateWindow::new(now),
            circuit: CircuitBreaker::default(),
            totals: LifetimeTotals::default(),
        }
    }
}

/// Observable circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the cool-down elapses.
    Open,
    /// Cool-down elapsed; the next call is a trial.
    HalfOpen,
}

/// Read-only projection of admission state. Never used for decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    /// Requests counted in the current window.
    pub window_requests: u32,
    /// Tokens counted in the current window.
    pub window_tokens: u64,
    /// Milliseconds until the current window rolls over.
    pub window_remaining_ms: u64,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Whether the open flag is set.
    pub circuit_open: bool,
    /// Derived circuit state.
    pub circuit_state: CircuitState,
    /// Milliseconds of cool-down left.
    pub cooldown_remaining_ms: u64,
    /// Successful requests since construction or reset.
    pub total_requests: u64,
    /// Tokens consumed since construction or reset.
    pub total_tokens: u64,
    /// Failures recorded since construction or reset.
    pub total_failures: u64,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Tracks quota consumption and circuit state for one generation backend.
#[derive(Debug)]
pub struct AdmissionManager {
    config: QuotaConfig,
    state: RwLock<AdmissionState>,
}

impl AdmissionManager {
    /// Create a manager with a fresh window and a closed circuit.
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            state: RwLock::new(AdmissionState::new(Instant::now())),
        }
    }

    /// Quota configuration this manager enforces.
    pub const fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Decide whether a call estimated at `estimated_tokens` may proceed now.
    ///
    /// Checks run in order: open circuit, window quotas (skipped once the
    /// window has expired), then the per-call ceiling. The ceiling is the only
    /// denial that waiting cannot cure, so it is checked even when an expired
    /// window would otherwise allow the call.
    pub fn can_admit(&self, estimated_tokens: u64) -> Result<(), AdmissionDenied> {
        let now = Instant::now();
        let state = self.state.read();

        if let Some(retry_after) = state
            .circuit
            .remaining_cooldown(now, self.config.cooldown())
        {
            return Err(AdmissionDenied::CircuitOpen { retry_after });
        }

        if !state.window.expired(now) {
            let retry_after = state.window.remaining(now);
            if state.window.request_count >= self.config.max_requests_per_minute {
                return Err(AdmissionDenied::RequestQuota { retry_after });
            }
            let projected = state.window.token_count.saturating_add(estimated_tokens);
            if projected > self.config.max_tokens_per_minute {
                return Err(AdmissionDenied::TokenQuota { retry_after });
            }
        }

        if estimated_tokens > self.config.max_tokens_per_call {
            return Err(AdmissionDenied::OversizedCall {
                estimated: estimated_tokens,
                ceiling: self.config.max_tokens_per_call,
            });
        }
        Ok(())
    }

    /// Wait until a call of `estimated_tokens` is admitted.
    ///
    /// Sleeps for the lesser of the denial's wait and [`POLL_INTERVAL`]
    /// between checks. Returns [`SchedulerError::Cancelled`] as soon as
    /// `cancel` fires and fails fast on the per-call ceiling. State is never
    /// mutated here.
    pub async fn await_admission(
        &self,
        estimated_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<(), SchedulerError> {
        if estimated_tokens > self.config.max_tokens_per_call {
            return Err(AdmissionDenied::OversizedCall {
                estimated: estimated_tokens,
                ceiling: self.config.max_tokens_per_call,
            }
            .into());
        }

        loop {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            let denied = match self.can_admit(estimated_tokens) {
                Ok(()) => return Ok(()),
                Err(denied) if !denied.is_retryable() => return Err(denied.into()),
                Err(denied) => denied,
            };

            let wait = denied
                .retry_after()
                .unwrap_or(POLL_INTERVAL)
                .min(POLL_INTERVAL)
                .max(Duration::from_millis(1));
            tracing::debug!(
                tokens = estimated_tokens,
                retry_after_ms = millis(wait),
                reason = %denied,
                "waiting for admission"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(SchedulerError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Record a successful call consuming `actual_tokens`.
    pub fn record_success(&self, actual_tokens: u64) {
        let now = Instant::now();
        let mut state = self.state.write();

        if state.window.expired(now) {
            state.window.reset(now);
        }
        state.window.request_count = state.window.request_count.saturating_add(1);
        state.window.token_count = state.window.token_count.saturating_add(actual_tokens);
        state.totals.requests = state.totals.requests.saturating_add(1);
        state.totals.tokens = state.totals.tokens.saturating_add(actual_tokens);

        if state.circuit.open {
            tracing::info!("circuit closed after successful trial call");
        }
        state.circuit.failure_count = 0;
        state.circuit.open = false;
    }

    /// Record a failed call. Opens the circuit once the threshold is reached.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.write();

        state.circuit.failure_count = state.circuit.failure_count.saturating_add(1);
        state.circuit.last_failure_at = Some(now);
        state.totals.failures = state.totals.failures.saturating_add(1);

        if state.circuit.failure_count >= self.config.failure_threshold {
            if !state.circuit.open {
                tracing::warn!(
                    failures = state.circuit.failure_count,
                    cooldown_secs = self.config.cooldown_secs,
                    "circuit opened"
                );
            }
            state.circuit.open = true;
        }
    }

    /// Whether the breaker is tripped (open or half-open). Cleared only by a
    /// successful call or [`Self::reset`].
    pub fn is_circuit_open(&self) -> bool {
        self.state.read().circuit.open
    }

    /// Backoff before retry attempt `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff(self.config.backoff_base(), attempt)
    }

    /// Restore the initial state: empty window, closed circuit, zero totals.
    pub fn reset(&self) {
        *self.state.write() = AdmissionState::new(Instant::now());
    }

    /// Snapshot counters for observability.
    pub fn stats(&self) -> AdmissionStats {
        let now = Instant::now();
        let state = self.state.read();

        let expired = state.window.expired(now);
        let cooldown = state
            .circuit
            .remaining_cooldown(now, self.config.cooldown())
            .unwrap_or_default();
        let circuit_state = match (state.circuit.open, cooldown.is_zero()) {
            (false, _) => CircuitState::Closed,
            (true, false) => CircuitState::Open,
            (true, true) => CircuitState::HalfOpen,
        };

        AdmissionStats {
            window_requests: if expired { 0 } else { state.window.request_count },
            window_tokens: if expired { 0 } else { state.window.token_count },
            window_remaining_ms: millis(state.window.remaining(now)),
            failure_count: state.circuit.failure_count,
            circuit_open: state.circuit.open,
            circuit_state,
            cooldown_remaining_ms: millis(cooldown),
            total_requests: state.totals.requests,
            total_tokens: state.totals.tokens,
            total_failures: state.totals.failures,
        }
    }
}
