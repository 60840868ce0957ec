use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use leadflow_shared::Subscriber;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::{
    StepDeletion, StepInput, StepRecord, Workflow, WorkflowInput, WorkflowPreview,
    WorkflowStep, WorkflowWithSteps,
};
use crate::error::{ApiError, ApiResult};
use crate::store::SegmentStore;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub step_ids: Vec<Uuid>,
}

/// Preview target: a stored subscriber, an inline one, or a built-in sample
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub subscriber_id: Option<Uuid>,
    #[serde(default)]
    pub subscriber: Option<Subscriber>,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/:id", get(get_workflow).put(update_workflow).delete(delete_workflow))
        .route("/:id/activate", post(activate_workflow))
        .route("/:id/deactivate", post(deactivate_workflow))
        .route("/:id/duplicate", post(duplicate_workflow))
        .route("/:id/preview", post(preview_workflow))
        .route("/:id/steps", get(list_steps).post(add_step))
        .route("/:id/steps/reorder", post(reorder_steps))
        .route("/:id/steps/:step_id", put(update_step).delete(delete_step))
}

fn records(steps: &[WorkflowStep]) -> Vec<StepRecord> {
    steps.iter().map(WorkflowStep::to_record).collect()
}

async fn list_workflows(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Workflow>>> {
    Ok(Json(state.workflows().list().await?))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WorkflowInput>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let workflow = state.workflows().create(payload).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowWithSteps>> {
    Ok(Json(state.workflows().get(id).await?))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkflowInput>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows().update(id, payload).await?))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.workflows().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows().set_active(id, true).await?))
}

async fn deactivate_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.workflows().set_active(id, false).await?))
}

async fn duplicate_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<WorkflowWithSteps>)> {
    let copy = state.workflows().duplicate(id).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

async fn preview_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PreviewRequest>,
) -> ApiResult<Json<WorkflowPreview>> {
    let subscriber = match (payload.subscriber_id, payload.subscriber) {
        (Some(subscriber_id), _) => state
            .store
            .get_subscriber(subscriber_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Subscriber"))?,
        (None, Some(subscriber)) => subscriber,
        (None, None) => sample_subscriber(),
    };
    Ok(Json(state.workflows().preview(id, &subscriber).await?))
}

fn sample_subscriber() -> Subscriber {
    let mut subscriber = Subscriber::new("jane.doe@example.com");
    subscriber.name = Some("Jane Doe".to_string());
    subscriber.source = Some("website".to_string());
    subscriber.company = Some("Example Co".to_string());
    subscriber
}

async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StepRecord>>> {
    let steps = state.workflows().list_steps(id).await?;
    Ok(Json(records(&steps)))
}

async fn add_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StepInput>,
) -> ApiResult<(StatusCode, Json<StepRecord>)> {
    let step = state.workflows().add_step(id, payload).await?;
    Ok((StatusCode::CREATED, Json(step.to_record())))
}

async fn update_step(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<StepInput>,
) -> ApiResult<Json<StepRecord>> {
    let step = state.workflows().update_step(id, step_id, payload).await?;
    Ok(Json(step.to_record()))
}

async fn delete_step(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<StepDeletion>> {
    Ok(Json(state.workflows().delete_step(id, step_id).await?))
}

async fn reorder_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> ApiResult<Json<Vec<StepRecord>>> {
    let steps = state.workflows().reorder_steps(id, &payload.step_ids).await?;
    Ok(Json(records(&steps)))
}
