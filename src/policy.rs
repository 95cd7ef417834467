//! Composable retry + circuit-breaker policy.
//!
//! A [`PolicyEngine`] guards any fallible async operation: failures are
//! retried with exponential backoff, and repeated consecutive failures
//! open a breaker that fails fast without invoking the operation until
//! a cooldown window elapses. One engine instance guards one class of
//! operation (connection attempts, publish attempts) and owns its own
//! breaker state.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::PolicyError;
use crate::types::PolicySettings;

/// Breaker modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerMode {
    /// Normal operation, attempts pass through
    Closed,
    /// Failing fast, attempts blocked until the open window elapses
    Open,
    /// Cooldown elapsed, exactly one probe attempt allowed
    HalfOpen,
}

/// Snapshot of the breaker guarding one operation class.
///
/// Mutated only by the engine itself, never by callers.
#[derive(Debug, Clone)]
pub struct PolicyState {
    pub mode: BreakerMode,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl PolicyState {
    fn new() -> Self {
        Self {
            mode: BreakerMode::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Per-instance policy configuration.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Consecutive failures before the breaker opens
    pub breaker_threshold: u32,
    /// How long the breaker stays open before a half-open probe
    pub breaker_open: Duration,
    /// Backoff base; attempt N sleeps `base^N`, capped at `max_backoff`
    pub backoff_base: Duration,
    /// Upper bound on a single backoff sleep
    pub max_backoff: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            breaker_threshold: 3,
            breaker_open: Duration::from_secs(30),
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl PolicyConfig {
    /// Exponential backoff for the given retry attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_secs_f64().max(1.0);
        let raw = Duration::from_secs_f64(base.powi(attempt.min(32) as i32));
        raw.min(self.max_backoff)
    }
}

impl From<&PolicySettings> for PolicyConfig {
    fn from(settings: &PolicySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            breaker_threshold: settings.breaker_threshold,
            breaker_open: Duration::from_secs(settings.breaker_open_secs),
            ..Self::default()
        }
    }
}

/// Observability events emitted on every retry and breaker transition.
#[derive(Debug, Clone)]
pub enum PolicyEvent {
    Retry {
        attempt: u32,
        wait: Duration,
        error: String,
    },
    BreakerOpened {
        failures: u32,
        open_for: Duration,
    },
    BreakerHalfOpen,
    BreakerClosed,
}

/// Sink for policy events. The interface is load-bearing; the log
/// format is not.
pub trait PolicyObserver: Send + Sync {
    fn on_event(&self, event: &PolicyEvent);
}

/// Default observer: structured log lines via `tracing`, tagged with
/// the operation class the engine guards.
pub struct TracingObserver {
    scope: &'static str,
}

impl TracingObserver {
    pub fn new(scope: &'static str) -> Self {
        Self { scope }
    }
}

impl PolicyObserver for TracingObserver {
    fn on_event(&self, event: &PolicyEvent) {
        match event {
            PolicyEvent::Retry { attempt, wait, error } => {
                warn!(scope = self.scope, attempt, wait_secs = wait.as_secs_f64(), %error, "retrying after failure");
            }
            PolicyEvent::BreakerOpened { failures, open_for } => {
                warn!(scope = self.scope, failures, open_secs = open_for.as_secs_f64(), "circuit opened");
            }
            PolicyEvent::BreakerHalfOpen => {
                info!(scope = self.scope, "circuit half-open, probing");
            }
            PolicyEvent::BreakerClosed => {
                info!(scope = self.scope, "circuit closed, normal operation resumed");
            }
        }
    }
}

/// Retry + circuit-breaker engine guarding one class of operation.
pub struct PolicyEngine {
    config: PolicyConfig,
    state: Mutex<PolicyState>,
    observer: Arc<dyn PolicyObserver>,
}

impl PolicyEngine {
    /// Engine with the default tracing observer.
    pub fn new(config: PolicyConfig, scope: &'static str) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver::new(scope)))
    }

    pub fn with_observer(config: PolicyConfig, observer: Arc<dyn PolicyObserver>) -> Self {
        Self {
            config,
            state: Mutex::new(PolicyState::new()),
            observer,
        }
    }

    /// Current breaker snapshot.
    pub fn state(&self) -> PolicyState {
        self.state.lock().unwrap().clone()
    }

    /// Run `operation` under this policy.
    ///
    /// The operation is invoked at most `max_retries + 1` times, and
    /// never while the breaker is open inside its cooldown window. A
    /// breaker trip mid-retry short-circuits the remaining attempts.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut attempt: u32 = 0;
        loop {
            if let Err(retry_in) = self.before_attempt() {
                return Err(PolicyError::CircuitOpen { retry_in });
            }

            match operation().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(error) => {
                    if self.record_failure() {
                        return Err(PolicyError::CircuitOpen {
                            retry_in: self.config.breaker_open,
                        });
                    }
                    if attempt >= self.config.max_retries {
                        return Err(PolicyError::RetriesExhausted {
                            attempts: attempt + 1,
                            source: error,
                        });
                    }
                    attempt += 1;
                    let wait = self.config.backoff(attempt);
                    self.observer.on_event(&PolicyEvent::Retry {
                        attempt,
                        wait,
                        error: error.to_string(),
                    });
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Gate an attempt on the current breaker mode. `Err` carries the
    /// time remaining in the open window.
    fn before_attempt(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap();
        match state.mode {
            BreakerMode::Closed => Ok(()),
            BreakerMode::HalfOpen => {
                if state.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
            BreakerMode::Open => {
                let opened_at = match state.opened_at {
                    Some(at) => at,
                    None => return Ok(()),
                };
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.breaker_open {
                    state.mode = BreakerMode::HalfOpen;
                    state.probe_in_flight = true;
                    drop(state);
                    self.observer.on_event(&PolicyEvent::BreakerHalfOpen);
                    Ok(())
                } else {
                    Err(self.config.breaker_open - elapsed)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        let was = state.mode;
        state.mode = BreakerMode::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
        drop(state);
        if was != BreakerMode::Closed {
            self.observer.on_event(&PolicyEvent::BreakerClosed);
        }
    }

    /// Returns `true` if this failure tripped (or re-tripped) the breaker.
    fn record_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.consecutive_failures += 1;
        let failures = state.consecutive_failures;
        let tripped = match state.mode {
            // A failed half-open probe reopens immediately
            BreakerMode::HalfOpen => true,
            BreakerMode::Closed => failures >= self.config.breaker_threshold,
            BreakerMode::Open => true,
        };
        if tripped {
            state.mode = BreakerMode::Open;
            state.opened_at = Some(Instant::now());
            state.probe_in_flight = false;
            drop(state);
            self.observer.on_event(&PolicyEvent::BreakerOpened {
                failures,
                open_for: self.config.breaker_open,
            });
        }
        tripped
    }
}
