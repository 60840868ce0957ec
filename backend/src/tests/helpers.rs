use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::{Arc, Once};
use tower::ServiceExt;

use crate::config::{AutomationConfig, Config, StoreBackend};
use crate::error::AppError;
use crate::store::MemoryStore;
use crate::{handlers, AppState};

static LOGGING: Once = Once::new();

/// Route tracing output through the test harness; `RUST_LOG` picks the level
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        server_addr: "127.0.0.1:0".to_string(),
        store_backend: StoreBackend::Memory,
        automation: AutomationConfig {
            apply_rules_concurrency: 4,
            max_workflow_steps: 10,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
}

/// Full router over a fresh in-memory store
pub fn test_app() -> TestApp {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store.clone(), test_config());
    TestApp {
        router: handlers::router(Arc::new(state)),
        store,
    }
}

impl TestApp {
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("PUT", uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request("DELETE", uri, None).await
    }
}

/// Field names carried by a validation error
pub fn error_fields(err: &AppError) -> Vec<String> {
    let mut fields: Vec<String> = err
        .validation_details()
        .map(|details| details.keys().cloned().collect())
        .unwrap_or_default();
    fields.sort();
    fields
}
