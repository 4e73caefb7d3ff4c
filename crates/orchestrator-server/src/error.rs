//! Unified error handling for the API.
//!
//! Grounded on krusty-server's `error::AppError`: a small closed set of
//! HTTP-shaped variants, each carrying a human-readable message, with
//! `From` conversions so route handlers can use `?` against
//! `orchestrator_core` and `anyhow` errors directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator_core::WorkflowError;
use serde::Serialize;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        (status, Json(ApiError { error: message, code: code.to_string() })).into_response()
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(id) => AppError::NotFound(format!("workflow {} not found", id)),
            WorkflowError::NotAwaitingApproval { workflow_id } => {
                AppError::Conflict(format!("workflow {} is not awaiting approval", workflow_id))
            }
            WorkflowError::NoRunningPulse(id) => {
                AppError::Conflict(format!("workflow {} has no running pulse", id))
            }
            WorkflowError::InvalidTransition { .. } | WorkflowError::SessionAlreadyActive { .. } => {
                AppError::Conflict(err.to_string())
            }
            WorkflowError::Storage(e) => {
                tracing::error!("internal error: {:?}", e);
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_awaiting_approval_maps_to_conflict() {
        let err = WorkflowError::NotAwaitingApproval { workflow_id: "wf-1".to_string() };
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = WorkflowError::NotFound("wf-1".to_string());
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
