use metrics::{describe_counter, describe_gauge};
use tracing::debug;

/// Counter of breaker transitions, labelled by breaker, from and to
pub const CIRCUIT_BREAKER_TRANSITIONS: &str = "circuit_breaker_transitions_total";

/// Gauge of the current breaker state (0 = closed, 1 = open, 2 = half-open)
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";

/// Register metric descriptions with whatever recorder is installed
pub fn describe_metrics() {
    describe_counter!(
        CIRCUIT_BREAKER_TRANSITIONS,
        "Total number of circuit breaker state transitions"
    );
    describe_gauge!(
        CIRCUIT_BREAKER_STATE,
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );

    debug!("Circuit breaker metrics registered with descriptions");
}
