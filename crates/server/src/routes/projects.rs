use axum::{
    Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::post,
};
use db::models::project::{CreateProject, Project};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Bootstrap endpoint: creates a project and hands back its access keys.
/// Everything else on the API is scoped by those keys.
pub async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::Schema("Project name must not be empty".to_string()));
    }
    let project = Project::create(&state.db.conn, &payload, Uuid::new_v4()).await?;
    tracing::debug!(project = %project.id, "created project '{}'", project.name);
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/projects", post(create_project))
}
