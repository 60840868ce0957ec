//! Standardized error handling for the Leadflow API
//!
//! Every handler returns `ApiResult`, so domain validation, store failures and
//! missing records all reach the client in the same JSON shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::StoreError;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> AppError {
        AppError::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> AppError {
        AppError::BadRequest(message.into())
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    // Resource errors
    NotFound(String),

    // Validation errors
    ValidationError { details: HashMap<String, Vec<String>> },
    BadRequest(String),

    // Server errors
    InternalError(String),
    DatabaseError(String),
    /// A multi-row write failed half way and could not be undone.
    Inconsistent { message: String, affected: Vec<String> },
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InternalError(_) | Self::DatabaseError(_) | Self::Inconsistent { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::Inconsistent { .. } => "INCONSISTENT_STATE",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::ValidationError { .. } => "Validation failed".to_string(),
            Self::BadRequest(msg) => msg.clone(),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::Inconsistent { message, .. } => message.clone(),
        }
    }

    /// Field-level details when this is a validation error
    pub fn validation_details(&self) -> Option<&HashMap<String, Vec<String>>> {
        match self {
            Self::ValidationError { details } => Some(details),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationError { .. })
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidationError { details } => {
                let mut fields: Vec<&String> = details.keys().collect();
                fields.sort();
                write!(f, "validation failed on {:?}", fields)
            }
            Self::InternalError(msg) | Self::DatabaseError(msg) => {
                write!(f, "{}: {}", self.error_code(), msg)
            }
            _ => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        match &self {
            Self::ValidationError { details } => {
                error.details = Some(details.clone());
            }
            Self::Inconsistent { affected, .. } => {
                let mut details = HashMap::new();
                details.insert("affected_steps".to_string(), affected.clone());
                error.details = Some(details);
            }
            _ => {}
        }

        (status, Json(error)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(resource) => Self::NotFound(resource),
            StoreError::Database(sqlx::Error::RowNotFound) => Self::NotFound("Resource".to_string()),
            StoreError::Database(e) => Self::DatabaseError(e.to_string()),
            StoreError::Serialization(e) => Self::InternalError(e.to_string()),
            StoreError::Corrupt(msg) => Self::InternalError(msg),
            StoreError::Conflict(msg) => Self::BadRequest(msg),
            StoreError::Unavailable(msg) => Self::DatabaseError(msg),
        }
    }
}

/// Result type alias for handlers and services
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to create validation errors
pub fn validation_error(field: &str, message: &str) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![message.to_string()]);
    AppError::ValidationError { details }
}

/// Collects field errors before any persistence call is attempted
#[derive(Debug)]
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.push(field, message);
        self
    }

    /// Record an error without consuming the builder
    pub fn push(&mut self, field: &str, message: &str) {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// Fold another error's field details into this builder
    pub fn absorb(&mut self, err: AppError) -> Result<(), AppError> {
        match err {
            AppError::ValidationError { details } => {
                for (field, messages) in details {
                    self.details.entry(field).or_default().extend(messages);
                }
                Ok(())
            }
            other => Err(other),
        }
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }

    /// `Ok(())` when nothing was recorded
    pub fn finish(self) -> ApiResult<()> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
