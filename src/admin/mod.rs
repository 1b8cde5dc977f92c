pub mod handlers;

use crate::circuit_breaker::CircuitBreakerRegistry;
use axum::{
    routing::{get, post},
    Router,
};
use self::handlers::{health, list_circuit_breakers, reset_circuit_breaker};

/// Operator-facing routes for inspecting and resetting circuit breakers
pub fn setup_admin_router(registry: CircuitBreakerRegistry) -> Router {
    Router::new()
        .route("/circuit-breakers", get(list_circuit_breakers))
        .route("/circuit-breakers/reset", post(reset_circuit_breaker))
        .route("/health", get(health))
        .with_state(registry)
}
