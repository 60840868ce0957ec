use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::settings::SiteSettings;
use crate::AppState;

pub fn settings_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings).put(update_settings))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResult<Json<SiteSettings>> {
    Ok(Json(state.settings().load().await?))
}

/// Missing sections take their defaults, so a partial document is accepted
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SiteSettings>,
) -> ApiResult<Json<SiteSettings>> {
    Ok(Json(state.settings().save(payload).await?))
}
