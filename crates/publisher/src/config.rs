//! Delivery configuration loaded from environment variables.

use std::time::Duration;

/// Settings of the queue circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive submission failures that open the circuit.
    pub failure_threshold: u32,
    /// Failures further apart than this do not count as consecutive.
    pub failure_window: Duration,
    /// How long the circuit stays open before a trial submission.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            failure_window: Duration::from_secs(60),
            break_duration: Duration::from_secs(60),
        }
    }
}

/// Publisher configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `MAX_NEST_LEVEL` (default: `4`)
/// - `DEFAULT_LOCAL_TIMEOUT_MS` (default: `15000`)
/// - `SUPPRESS_LOCAL_TIMEOUTS` (default: `false`)
/// - `QUEUE_MAX_ATTEMPTS` (default: `3`)
/// - `CIRCUIT_FAILURE_THRESHOLD`, `CIRCUIT_FAILURE_WINDOW_SECS`,
///   `CIRCUIT_BREAK_SECS` (defaults: `2`, `60`, `60`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Publishes at or beyond this depth go to the queue first.
    pub max_nest_level: u32,
    /// Timeout for local handling when the handler sets none.
    pub default_local_timeout: Duration,
    /// Run local handlers without a deadline, e.g. while debugging.
    pub suppress_local_timeouts: bool,
    /// Deliveries of one queued job before it is dropped.
    pub queue_max_attempts: u32,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl PublisherConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let breaker = defaults.circuit_breaker;
        Self {
            max_nest_level: env_parse("MAX_NEST_LEVEL").unwrap_or(defaults.max_nest_level),
            default_local_timeout: env_parse("DEFAULT_LOCAL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_local_timeout),
            suppress_local_timeouts: env_parse("SUPPRESS_LOCAL_TIMEOUTS")
                .unwrap_or(defaults.suppress_local_timeouts),
            queue_max_attempts: env_parse("QUEUE_MAX_ATTEMPTS")
                .unwrap_or(defaults.queue_max_attempts),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env_parse("CIRCUIT_FAILURE_THRESHOLD")
                    .unwrap_or(breaker.failure_threshold),
                failure_window: env_parse("CIRCUIT_FAILURE_WINDOW_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(breaker.failure_window),
                break_duration: env_parse("CIRCUIT_BREAK_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(breaker.break_duration),
            },
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_nest_level: 4,
            default_local_timeout: Duration::from_secs(15),
            suppress_local_timeouts: false,
            queue_max_attempts: 3,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
