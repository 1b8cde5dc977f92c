use super::types::CircuitState;
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::{info, warn};

/// Receives circuit breaker state transitions
///
/// Observers run synchronously on the thread that triggered the transition,
/// while the breaker holds its state lock. They must be fast and must not call
/// back into the breaker that notified them.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, name: &str, from: CircuitState, to: CircuitState);
}

impl<F> StateObserver for F
where
    F: Fn(&str, CircuitState, CircuitState) + Send + Sync,
{
    fn on_state_change(&self, name: &str, from: CircuitState, to: CircuitState) {
        self(name, from, to)
    }
}

/// Shared handle to an observer
pub type SharedObserver = Arc<dyn StateObserver>;

/// Logs every transition through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl StateObserver for LoggingObserver {
    fn on_state_change(&self, name: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(
                breaker = %name,
                from = %from,
                to = %to,
                "Circuit breaker opened"
            ),
            _ => info!(
                breaker = %name,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
    }
}

/// Publishes transitions through the `metrics` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl StateObserver for MetricsObserver {
    fn on_state_change(&self, name: &str, from: CircuitState, to: CircuitState) {
        let labels = [
            ("breaker", name.to_string()),
            ("from", from.as_str().to_string()),
            ("to", to.as_str().to_string()),
        ];
        counter!(crate::metrics::CIRCUIT_BREAKER_TRANSITIONS, &labels).increment(1);

        let labels = [("breaker", name.to_string())];
        gauge!(crate::metrics::CIRCUIT_BREAKER_STATE, &labels).set(to.as_gauge());
    }
}
