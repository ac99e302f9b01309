//! Circuit breaker guarding background queue submissions.

use std::sync::{Mutex, PoisonError};

use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// The break has elapsed; the next submission is a trial.
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed {
        failures: u32,
        first_failure_at: Option<Instant>,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        trial_in_flight: bool,
    },
}

/// Process-wide breaker shared by every publish.
///
/// Opens after `failure_threshold` consecutive failures inside
/// `failure_window` and rejects requests for `break_duration`. After that a
/// single trial request is let through: success closes the circuit, failure
/// opens it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            phase: Mutex::new(Phase::Closed {
                failures: 0,
                first_failure_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Asks to send one request.
    ///
    /// The permit reports the outcome through
    /// [`succeeded`](CircuitPermit::succeeded) or
    /// [`failed`](CircuitPermit::failed). A permit dropped without a verdict
    /// frees the half-open trial slot, so a cancelled trial never wedges the
    /// circuit.
    pub fn try_acquire(&self) -> Option<CircuitPermit<'_>> {
        let mut phase = self.lock();
        let current = *phase;
        let trial = match current {
            Phase::Closed { .. } => false,
            Phase::Open { until } if Instant::now() < until => return None,
            Phase::Open { .. } => {
                tracing::info!("queue circuit half-open, allowing a trial submission");
                true
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => return None,
            Phase::HalfOpen {
                trial_in_flight: false,
            } => true,
        };
        if trial {
            *phase = Phase::HalfOpen {
                trial_in_flight: true,
            };
        }
        Some(CircuitPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut phase = self.lock();
        let current = *phase;
        match current {
            Phase::Closed { .. } => {
                *phase = Phase::Closed {
                    failures: 0,
                    first_failure_at: None,
                };
            }
            Phase::HalfOpen { .. } => {
                tracing::info!("queue circuit is closed");
                *phase = Phase::Closed {
                    failures: 0,
                    first_failure_at: None,
                };
            }
            // A request admitted before the circuit opened.
            Phase::Open { .. } => {}
        }
    }

    fn release_trial(&self) {
        if let Phase::HalfOpen { trial_in_flight } = &mut *self.lock() {
            *trial_in_flight = false;
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut phase = self.lock();
        let current = *phase;
        match current {
            Phase::Closed {
                failures,
                first_failure_at,
            } => {
                let (failures, first_failure_at) = match first_failure_at {
                    Some(started) if now.duration_since(started) <= self.config.failure_window => {
                        (failures + 1, started)
                    }
                    _ => (1, now),
                };
                if failures >= self.config.failure_threshold {
                    self.trip(&mut phase, now);
                } else {
                    *phase = Phase::Closed {
                        failures,
                        first_failure_at: Some(first_failure_at),
                    };
                }
            }
            Phase::HalfOpen { .. } => self.trip(&mut phase, now),
            Phase::Open { .. } => {}
        }
    }

    fn trip(&self, phase: &mut Phase, now: Instant) {
        tracing::error!(
            break_secs = self.config.break_duration.as_secs(),
            "queue circuit is open"
        );
        metrics::counter!("queue_circuit_opened_total").increment(1);
        *phase = Phase::Open {
            until: now + self.config.break_duration,
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission to send one request through a [`CircuitBreaker`].
#[must_use = "a dropped permit records no outcome"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this request is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        // Only the trial holds a slot; ordinary requests have nothing to free.
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
