//! Operational endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use domain::redeliver_unpublished;
use event_store::DurableStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_REDELIVERY_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct RedeliverParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct RedeliverResponse {
    pub delivered: usize,
    pub undelivered: usize,
}

/// POST /admin/redeliver: publish records whose delivery never succeeded.
#[tracing::instrument(skip(state))]
pub async fn redeliver<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<RedeliverParams>,
) -> Result<Json<RedeliverResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_REDELIVERY_BATCH);
    let report = redeliver_unpublished(state.bus.store(), state.bus.publisher(), limit).await?;
    Ok(Json(RedeliverResponse {
        delivered: report.delivered,
        undelivered: report.undelivered,
    }))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LocalHandling {
    pub enabled: bool,
}

/// PUT /admin/local-handling: switch in-process event handling on or off.
#[tracing::instrument(skip(state))]
pub async fn set_local_handling<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<LocalHandling>,
) -> Json<LocalHandling> {
    state.flags.set_local_domain_event_handling(req.enabled);
    tracing::info!(enabled = req.enabled, "local domain event handling switched");
    Json(req)
}
