use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls fail fast
    Open,
    /// Circuit is half-open, allowing a limited number of probe calls
    HalfOpen,
}

impl CircuitState {
    /// Wire name used by the admin surface and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF-OPEN",
        }
    }

    /// Numeric encoding for gauges (0 = closed, 1 = open, 2 = half-open)
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures in closed state before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed, in milliseconds
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Probe calls allowed in half-open state, and consecutive successes needed to close
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    10_000
}

fn default_half_open_max_calls() -> u32 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    /// `reset_timeout` is rounded up to whole milliseconds
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_max_calls: u32) -> Self {
        let reset_timeout_ms = reset_timeout.as_nanos().div_ceil(1_000_000);
        Self {
            failure_threshold,
            reset_timeout_ms: u64::try_from(reset_timeout_ms).unwrap_or(u64::MAX),
            half_open_max_calls,
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Returns a description of the first invalid field, if any
    pub fn invalid_field(&self) -> Option<&'static str> {
        if self.failure_threshold == 0 {
            Some("failure_threshold must be > 0")
        } else if self.reset_timeout_ms == 0 {
            Some("reset_timeout_ms must be > 0")
        } else if self.half_open_max_calls == 0 {
            Some("half_open_max_calls must be > 0")
        } else {
            None
        }
    }
}

/// Lifetime counters for a circuit breaker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Calls admitted
    pub admitted_calls: u64,
    /// Calls rejected because the circuit was open or the probe cap was reached
    pub rejected_calls: u64,
    /// Recorded successes
    pub successful_calls: u64,
    /// Recorded failures
    pub failed_calls: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
}

/// Point-in-time view of a circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub half_open_calls: u32,
    pub last_change: DateTime<Utc>,
    pub config: CircuitBreakerConfig,
    pub metrics: CircuitBreakerMetrics,
}

/// Returned when a circuit refuses admission; the guarded call was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
}

/// Outcome of running work through a circuit breaker
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Admission refused, the work was not invoked
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The work ran and failed with its own error
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// Returns the work's own error, if the work ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open(_) => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF-OPEN");
    }

    #[test]
    fn test_circuit_state_serializes_like_display() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF-OPEN\"");
        let state: CircuitState = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(state, CircuitState::Open);
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout(), Duration::from_secs(10));
        assert_eq!(config.half_open_max_calls, 1);
        assert!(config.invalid_field().is_none());
    }

    #[test]
    fn test_invalid_config_fields() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.invalid_field().is_some());

        let config = CircuitBreakerConfig::new(3, Duration::ZERO, 1);
        assert_eq!(config.invalid_field(), Some("reset_timeout_ms must be > 0"));
    }

    #[test]
    fn test_sub_millisecond_reset_timeout_rounds_up() {
        let config = CircuitBreakerConfig::new(3, Duration::from_micros(500), 1);
        assert_eq!(config.reset_timeout_ms, 1);
        assert!(config.invalid_field().is_none());

        let config = CircuitBreakerConfig::new(3, Duration::from_micros(1500), 1);
        assert_eq!(config.reset_timeout(), Duration::from_millis(2));

        let config = CircuitBreakerConfig::new(3, Duration::from_secs(10), 1);
        assert_eq!(config.reset_timeout_ms, 10_000);
    }

    #[test]
    fn test_breaker_error_variants() {
        let open: BreakerError<std::io::Error> = BreakerError::Open(CircuitOpenError {
            name: "redis-get-message".to_string(),
        });
        assert!(open.is_open());
        assert_eq!(open.to_string(), "circuit breaker 'redis-get-message' is open");
        assert!(open.into_inner().is_none());

        let inner: BreakerError<std::io::Error> =
            BreakerError::Inner(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!inner.is_open());
        assert_eq!(inner.to_string(), "boom");
    }
}
