//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::DurableStore;
use publisher::{CircuitState, FeatureFlags};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_circuit: &'static str,
    pub local_handling_enabled: bool,
}

/// GET /health: reports liveness and the delivery path currently in use.
pub async fn check<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let queue_circuit = match state.bus.publisher().circuit_breaker().state() {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    };
    Json(HealthResponse {
        status: "ok",
        queue_circuit,
        local_handling_enabled: state.flags.local_domain_event_handling_enabled(),
    })
}
