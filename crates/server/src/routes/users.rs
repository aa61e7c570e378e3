use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::project_user::{CreateProjectUser, ProjectUser, UpdateProjectUser};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::ProjectContext};

pub async fn create_user(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Json(payload): Json<CreateProjectUser>,
) -> Result<ResponseJson<ApiResponse<ProjectUser>>, ApiError> {
    let user =
        ProjectUser::create(&state.db.conn, context.row_id, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
) -> Result<ResponseJson<ApiResponse<Vec<ProjectUser>>>, ApiError> {
    let users = ProjectUser::find_all(&state.db.conn, context.row_id).await?;
    Ok(ResponseJson(ApiResponse::success(users)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ProjectUser>>, ApiError> {
    let user = ProjectUser::find_by_id(&state.db.conn, context.row_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectUser>,
) -> Result<ResponseJson<ApiResponse<ProjectUser>>, ApiError> {
    let user = ProjectUser::update(&state.db.conn, context.row_id, user_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    ProjectUser::delete(&state.db.conn, context.row_id, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{user_id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
}
