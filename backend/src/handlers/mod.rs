use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use axum::http::Method;

use crate::AppState;

pub mod automation_rules;
pub mod segments;
pub mod settings;
pub mod workflows;

pub use automation_rules::automation_rule_routes;
pub use segments::segment_routes;
pub use settings::settings_routes;
pub use workflows::workflow_routes;

/// The full API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Leadflow API v1" }))
        .route("/health", get(health_check))
        .nest("/api/v1/segments", segment_routes())
        .nest("/api/v1/workflows", workflow_routes())
        .nest("/api/v1/automation-rules", automation_rule_routes())
        .nest("/api/v1/settings", settings_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db_pool {
        Some(pool) => {
            if crate::database::health_check(pool).await {
                "up"
            } else {
                "down"
            }
        }
        None => "not_configured",
    };

    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "healthy" } else { "degraded" },
            "service": "leadflow-api",
            "database": database,
        })),
    )
}
