use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::{AutomationRule, AutomationRuleInput, RuleMatch, TriggerEvent};
use crate::error::ApiResult;
use crate::AppState;

pub fn automation_rule_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_rules).post(create_rule))
        .route("/evaluate", post(evaluate_event))
        .route("/:id", get(get_rule).put(update_rule).delete(delete_rule))
        .route("/:id/toggle", post(toggle_rule))
}

async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<AutomationRule>>> {
    Ok(Json(state.rules().list().await?))
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AutomationRuleInput>,
) -> ApiResult<(StatusCode, Json<AutomationRule>)> {
    let rule = state.rules().create(payload).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationRule>> {
    Ok(Json(state.rules().get(id).await?))
}

async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AutomationRuleInput>,
) -> ApiResult<Json<AutomationRule>> {
    Ok(Json(state.rules().update(id, payload).await?))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.rules().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationRule>> {
    Ok(Json(state.rules().toggle(id).await?))
}

/// Dry run: which rules fire for this entity event, and what they would do
async fn evaluate_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<TriggerEvent>,
) -> ApiResult<Json<Vec<RuleMatch>>> {
    Ok(Json(state.rules().evaluate(&event).await?))
}
