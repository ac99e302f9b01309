//! Counter command and query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::AggregateId;
use domain::{
    Aggregate, CommandContext, CommandParams, CommandResult, Counter, CreateCounter,
    DecrementCounter, IncrementCounter, ResetCounter, TrackedAggregate,
};
use event_store::{DomainEventRecord, DurableStore, DurableStoreExt, Version};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::activity::ActivityEntry;
use crate::error::ApiError;

// -- Request types --

/// Envelope fields shared by every command request.
#[derive(Debug, Default, Deserialize)]
pub struct CommandFields {
    /// Idempotency key; generated when omitted.
    pub command_id: Option<String>,
    pub correlation_id: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    #[serde(flatten)]
    pub command: CommandFields,
    #[serde(default = "one")]
    pub by: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(flatten)]
    pub command: CommandFields,
}

fn one() -> i64 {
    1
}

// -- Response types --

#[derive(Serialize)]
pub struct CounterResponse {
    pub id: String,
    pub value: i64,
    pub version: i64,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub counter: CounterResponse,
    pub records: Vec<RecordResponse>,
}

#[derive(Serialize)]
pub struct RecordResponse {
    pub record_id: String,
    pub event_type: String,
    pub aggregate_version: i64,
    pub command_type: String,
    pub command_id: String,
    pub correlation_id: String,
    pub timestamp: String,
    pub published: bool,
    pub payload: serde_json::Value,
}

impl From<DomainEventRecord> for RecordResponse {
    fn from(record: DomainEventRecord) -> Self {
        Self {
            record_id: record.id.to_string(),
            event_type: record.event_type,
            aggregate_version: record.aggregate_version.as_i64(),
            command_type: record.command_type,
            command_id: record.command_params.command_id,
            correlation_id: record.command_params.correlation_id,
            timestamp: record.timestamp.to_rfc3339(),
            published: record.published,
            payload: record.event_data,
        }
    }
}

fn counter_response(counter: &Counter) -> CounterResponse {
    CounterResponse {
        id: counter.id().map(|id| id.to_string()).unwrap_or_default(),
        value: counter.value(),
        version: counter.version().as_i64(),
    }
}

fn command_response(result: CommandResult<Counter>) -> Json<CommandResponse> {
    Json(CommandResponse {
        counter: counter_response(&result.aggregate),
        records: result.records.into_iter().map(RecordResponse::from).collect(),
    })
}

// -- Handlers --

/// POST /counters: create a counter with its first increment.
#[tracing::instrument(skip_all)]
pub async fn create<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<AmountRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let params = command_params(&req.command, &headers);
    let result = state
        .bus
        .create(CreateCounter::new(params, req.by), &CommandContext::root())
        .await?;
    Ok((StatusCode::CREATED, command_response(result)))
}

/// POST /counters/{id}/increment
#[tracing::instrument(skip(state, headers, req))]
pub async fn increment<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AmountRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let counter_id = parse_aggregate_id(&id)?;
    let params = command_params(&req.command, &headers);
    let result = state
        .bus
        .modify(
            IncrementCounter::new(params, counter_id, req.by),
            &CommandContext::root(),
        )
        .await?;
    Ok(command_response(result))
}

/// POST /counters/{id}/decrement
#[tracing::instrument(skip(state, headers, req))]
pub async fn decrement<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AmountRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let counter_id = parse_aggregate_id(&id)?;
    let params = command_params(&req.command, &headers);
    let result = state
        .bus
        .modify(
            DecrementCounter::new(params, counter_id, req.by),
            &CommandContext::root(),
        )
        .await?;
    Ok(command_response(result))
}

/// POST /counters/{id}/reset
#[tracing::instrument(skip(state, headers, req))]
pub async fn reset<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ResetRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let counter_id = parse_aggregate_id(&id)?;
    let params = command_params(&req.command, &headers);
    let result = state
        .bus
        .modify(
            ResetCounter::new(params, counter_id),
            &CommandContext::root(),
        )
        .await?;
    Ok(command_response(result))
}

/// GET /counters/{id}: load a counter's stored state.
#[tracing::instrument(skip(state))]
pub async fn get<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<CounterResponse>, ApiError> {
    let counter_id = parse_aggregate_id(&id)?;
    let stored = state
        .bus
        .store()
        .find_aggregate(Counter::aggregate_type(), counter_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Counter {id} not found")))?;
    let counter = TrackedAggregate::<Counter>::load(stored)?.into_inner();
    Ok(Json(counter_response(&counter)))
}

/// GET /counters/{id}/events: list every record emitted for a counter.
#[tracing::instrument(skip(state))]
pub async fn events<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<RecordResponse>>, ApiError> {
    let counter_id = parse_aggregate_id(&id)?;
    let records = state
        .bus
        .store()
        .records_for_aggregate(Counter::aggregate_type(), counter_id)
        .await?;
    Ok(Json(records.into_iter().map(RecordResponse::from).collect()))
}

/// GET /counters/{id}/activity: the demo subscriber's feed for a counter.
#[tracing::instrument(skip(state))]
pub async fn activity<S: DurableStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let counter_id = parse_aggregate_id(&id)?;
    Ok(Json(state.activity.for_counter(&counter_id.to_string()).await))
}

/// Builds command params from the request body and headers.
///
/// `x-forwarded-for` and `user-agent` are recorded as the originating
/// address and application.
fn command_params(fields: &CommandFields, headers: &HeaderMap) -> CommandParams {
    let command_id = fields
        .command_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut params = CommandParams::new(command_id);

    if let Some(correlation_id) = &fields.correlation_id {
        params = params.with_correlation_id(correlation_id.clone());
    }
    if let Some(expected) = fields.expected_version {
        params = params.expect_version(Version::new(expected));
    }
    if let Some(ip) = header_value(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
    {
        params = params.originating_ip_address(ip);
    }
    if let Some(application) = header_value(headers, "user-agent") {
        params = params.originating_application(application);
    }
    params
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
