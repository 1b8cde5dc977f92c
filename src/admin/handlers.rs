use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::error::{Result, ServiceError};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    /// RFC 3339 time of the last state change
    pub last_change: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetParams {
    pub name: Option<String>,
    /// Reset counters in place instead of forgetting the breaker
    #[serde(default)]
    pub keep_config: bool,
}

pub async fn list_circuit_breakers(
    State(registry): State<CircuitBreakerRegistry>,
) -> Json<Vec<CircuitBreakerStatus>> {
    let statuses = registry
        .snapshots()
        .into_iter()
        .map(|snapshot| CircuitBreakerStatus {
            name: snapshot.name,
            state: snapshot.state,
            last_change: snapshot
                .last_change
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        })
        .collect();

    Json(statuses)
}

pub async fn reset_circuit_breaker(
    State(registry): State<CircuitBreakerRegistry>,
    Query(params): Query<ResetParams>,
) -> Result<&'static str> {
    let name = params
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ServiceError::BadRequest("Missing circuit breaker name".to_string()))?;

    if params.keep_config {
        let found = registry.reset(&name);
        info!(breaker = %name, found, "Admin reset of circuit breaker counters");
    } else {
        registry.remove(&name);
        info!(breaker = %name, "Admin removed circuit breaker");
    }

    Ok("Circuit breaker reset successfully")
}

pub async fn health() -> &'static str {
    "OK"
}
