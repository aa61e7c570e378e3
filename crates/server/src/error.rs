use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::{
    DatabaseError,
    models::{
        outbox_email::OutboxEmailError, project::ProjectError, project_user::ProjectUserError,
    },
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    ProjectUser(#[from] ProjectUserError),
    #[error(transparent)]
    OutboxEmail(#[from] OutboxEmailError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code carried on every error response.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Project(err) => match err {
                ProjectError::ProjectNotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ProjectError::BoostAlreadyActive => (
                    StatusCode::CONFLICT,
                    "EMAIL_CAPACITY_BOOST_ALREADY_ACTIVE",
                ),
                ProjectError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
                }
            },
            ApiError::ProjectUser(err) => match err {
                ProjectUserError::UserNotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ProjectUserError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
                }
            },
            ApiError::OutboxEmail(err) => match err {
                OutboxEmailError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                OutboxEmailError::NotEditable => (StatusCode::BAD_REQUEST, "EMAIL_NOT_EDITABLE"),
                OutboxEmailError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
                }
            },
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
            ApiError::Schema(_) => (StatusCode::BAD_REQUEST, "SCHEMA_ERROR"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, code) = self.status_and_code();
        if status_code.is_server_error() {
            tracing::error!(status = %status_code, code, error = %self, "API request failed");
        }
        let response = ApiResponse::<()>::error(&self.to_string(), code);
        (status_code, Json(response)).into_response()
    }
}
