use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealth {
    Healthy,
    /// Still called, but with a single attempt and no retries.
    Degraded,
    /// Skipped until the cool-down elapses.
    Open,
    /// Cool-down elapsed; one trial call decides the next state.
    HalfOpen,
}

/// What a caller is allowed to do with a provider right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal call with the full retry budget.
    Full,
    /// One attempt only (degraded provider or half-open trial).
    SingleAttempt,
    Rejected,
}

#[derive(Debug, Clone)]
struct BreakerState {
    health: ProviderHealth,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            health: ProviderHealth::Healthy,
            consecutive_failures: 0,
            opened_at: None,
            probe_started: None,
        }
    }
}

/// Per-provider circuit breaker. One failure is one failed provider call,
/// after that call's own retries.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, BreakerState>>,
    degraded_after: u32,
    open_after: u32,
    cool_down: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        let degraded_after = config.degraded_after.max(1);
        Self {
            states: Mutex::new(HashMap::new()),
            degraded_after,
            open_after: config.open_after.max(degraded_after),
            cool_down: config.cool_down(),
        }
    }

    /// Decides whether `provider` may be called. Moves an open circuit to
    /// half-open once the cool-down has elapsed and hands out the single
    /// trial slot.
    pub fn admit(&self, provider: &str) -> Admission {
        let mut states = self.states.lock();
        let state = states.entry(provider.to_string()).or_default();
        let now = Instant::now();

        match state.health {
            ProviderHealth::Healthy => Admission::Full,
            ProviderHealth::Degraded => Admission::SingleAttempt,
            ProviderHealth::Open => {
                let cooled = state
                    .opened_at
                    .map(|opened| now.duration_since(opened) >= self.cool_down)
                    .unwrap_or(true);
                if cooled {
                    tracing::info!(provider, "circuit half-open, admitting trial call");
                    state.health = ProviderHealth::HalfOpen;
                    state.probe_started = Some(now);
                    Admission::SingleAttempt
                } else {
                    Admission::Rejected
                }
            }
            ProviderHealth::HalfOpen => {
                // A trial that never reported back frees its slot after one cool-down.
                let stale = state
                    .probe_started
                    .map(|started| now.duration_since(started) >= self.cool_down)
                    .unwrap_or(true);
                if stale {
                    state.probe_started = Some(now);
                    Admission::SingleAttempt
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    pub fn record_success(&self, provider: &str) {
        let mut states = self.states.lock();
        let state = states.entry(provider.to_string()).or_default();
        if state.health != ProviderHealth::Healthy {
            tracing::info!(provider, from = ?state.health, "provider recovered");
        }
        *state = BreakerState::default();
    }

    pub fn record_failure(&self, provider: &str) {
        let mut states = self.states.lock();
        let state = states.entry(provider.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let next = match state.health {
            ProviderHealth::HalfOpen => ProviderHealth::Open,
            _ if state.consecutive_failures >= self.open_after => ProviderHealth::Open,
            _ if state.consecutive_failures >= self.degraded_after => ProviderHealth::Degraded,
            current => current,
        };

        if next == ProviderHealth::Open {
            state.opened_at = Some(Instant::now());
            state.probe_started = None;
        }

        if next != state.health {
            tracing::warn!(
                provider,
                from = ?state.health,
                to = ?next,
                consecutive_failures = state.consecutive_failures,
                "provider health changed"
            );
            state.health = next;
        }
    }

    pub fn state(&self, provider: &str) -> ProviderHealth {
        self.states
            .lock()
            .get(provider)
            .map(|s| s.health)
            .unwrap_or(ProviderHealth::Healthy)
    }

    pub fn consecutive_failures(&self, provider: &str) -> u32 {
        self.states
            .lock()
            .get(provider)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }
}
