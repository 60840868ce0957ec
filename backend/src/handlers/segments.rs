use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use leadflow_shared::{Segment, SegmentMembership};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::automation::{AssignOutcome, BatchReport, SegmentRule, SegmentRuleInput, TriggerEvent};
use crate::error::{validation_error, ApiError, ApiResult};
use crate::store::SegmentStore;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignRequest {
    pub subscriber_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignResponse {
    pub subscriber_id: Uuid,
    pub segment_id: Uuid,
    pub outcome: AssignOutcome,
    /// Present when the subscriber joined the segment just now
    pub event: Option<TriggerEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    #[serde(flatten)]
    pub report: BatchReport,
    /// `segment_joined` events for the execution engine
    pub events: Vec<TriggerEvent>,
}

pub fn segment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_segments))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:id", get(get_rule).put(update_rule).delete(delete_rule))
        .route("/apply", post(apply_rules))
        .route("/:segment_id/members", get(list_members).post(add_member))
}

async fn list_segments(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Segment>>> {
    Ok(Json(state.store.list_segments().await?))
}

async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<SegmentRule>>> {
    Ok(Json(state.store.list_segment_rules().await?))
}

async fn require_segment(state: &AppState, segment_id: Uuid) -> ApiResult<()> {
    if state.store.get_segment(segment_id).await?.is_none() {
        return Err(validation_error("segment_id", "Segment does not exist"));
    }
    Ok(())
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SegmentRuleInput>,
) -> ApiResult<(StatusCode, Json<SegmentRule>)> {
    let rule = payload.into_rule(None)?;
    require_segment(&state, rule.segment_id).await?;
    state.store.save_segment_rule(&rule).await?;
    info!("Created segment rule {} ({})", rule.name, rule.id);
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SegmentRule>> {
    state
        .store
        .get_segment_rule(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Segment rule"))
}

async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SegmentRuleInput>,
) -> ApiResult<Json<SegmentRule>> {
    let existing = state
        .store
        .get_segment_rule(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Segment rule"))?;
    let rule = payload.into_rule(Some(&existing))?;
    if rule.segment_id != existing.segment_id {
        require_segment(&state, rule.segment_id).await?;
    }
    state.store.save_segment_rule(&rule).await?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_segment_rule(id).await? {
        return Err(ApiError::not_found("Segment rule"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Backfill: run every active rule over every stored subscriber
async fn apply_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<ApplyResponse>> {
    let report = state.segments().apply_stored().await?;
    let events = report.joined_events();
    Ok(Json(ApplyResponse { report, events }))
}

async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SegmentMembership>>> {
    if state.store.get_segment(segment_id).await?.is_none() {
        return Err(ApiError::not_found("Segment"));
    }
    Ok(Json(state.store.list_members(segment_id).await?))
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> ApiResult<(StatusCode, Json<AssignResponse>)> {
    if state.store.get_segment(segment_id).await?.is_none() {
        return Err(ApiError::not_found("Segment"));
    }
    if state.store.get_subscriber(payload.subscriber_id).await?.is_none() {
        return Err(ApiError::not_found("Subscriber"));
    }

    let outcome = state
        .segments()
        .assign(payload.subscriber_id, segment_id)
        .await?;
    let (status, event) = match outcome {
        AssignOutcome::Added => (
            StatusCode::CREATED,
            Some(TriggerEvent::segment_joined(payload.subscriber_id, segment_id)),
        ),
        AssignOutcome::AlreadyMember => (StatusCode::OK, None),
    };

    Ok((
        status,
        Json(AssignResponse {
            subscriber_id: payload.subscriber_id,
            segment_id,
            outcome,
            event,
        }),
    ))
}
