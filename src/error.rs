// src/error.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::{ScheduleAction, ScheduleStatus};

pub type AppResult<T> = Result<T, AppError>;

/// A user-visible validation message attached to one submitted field,
/// e.g. `assignments.3.user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed with {} field error(s)", .0.len())]
    Validation(Vec<FieldError>),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("Schedule {id} is {status} and cannot be edited")]
    ScheduleNotEditable { id: i64, status: ScheduleStatus },
    #[error("Cannot {action} a schedule that is {from}")]
    InvalidTransition {
        from: ScheduleStatus,
        action: ScheduleAction,
    },
    #[error("Schedule {0} is not available for viewing")]
    NotVisible(i64),
    #[error("Missing or invalid x-user-id header")]
    Unauthenticated,
    #[error("Missing permission: {0}")]
    Forbidden(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Constraint violated: {0}")]
    Constraint(String),
    #[error("Failed to acquire lock")]
    Lock,
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON serialization/deserialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        AppError::NotFound { entity, id }
    }

    /// Field errors of a validation failure, empty for every other variant.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            AppError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, Vec<String>>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, message) = match &self {
            AppError::Validation(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "The given data was invalid.".to_string(),
            ),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ScheduleNotEditable { .. } => (
                StatusCode::CONFLICT,
                "A published or archived schedule cannot be edited.".to_string(),
            ),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::NotVisible(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Database(_)
            | AppError::Constraint(_)
            | AppError::Lock
            | AppError::Io(_)
            | AppError::Csv(_)
            | AppError::SerdeJson(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.".to_string(),
            ),
        };

        if status_code.is_server_error() {
            error!("Error occurred: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let errors = match &self {
            AppError::Validation(field_errors) => {
                let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for field_error in field_errors {
                    grouped
                        .entry(field_error.field.clone())
                        .or_default()
                        .push(field_error.message.clone());
                }
                Some(grouped)
            }
            _ => None,
        };

        (status_code, Json(ErrorBody { message, errors })).into_response()
    }
}
