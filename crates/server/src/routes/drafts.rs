use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::email_draft::{CreateEmailDraft, EmailDraft};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, middleware::ProjectContext};

pub async fn create_draft(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Json(payload): Json<CreateEmailDraft>,
) -> Result<ResponseJson<ApiResponse<EmailDraft>>, ApiError> {
    context.require_admin()?;
    if payload.tsx_source.is_empty() {
        return Err(ApiError::Schema("tsx_source must not be empty".to_string()));
    }
    let draft =
        EmailDraft::create(&state.db.conn, context.row_id, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(draft)))
}

pub async fn list_drafts(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
) -> Result<ResponseJson<ApiResponse<Vec<EmailDraft>>>, ApiError> {
    context.require_admin()?;
    let drafts = EmailDraft::find_all(&state.db.conn, context.row_id).await?;
    Ok(ResponseJson(ApiResponse::success(drafts)))
}

pub async fn get_draft(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Path(draft_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EmailDraft>>, ApiError> {
    context.require_admin()?;
    let draft = EmailDraft::find_by_id(&state.db.conn, context.row_id, draft_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Draft not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(draft)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/internal/email-drafts",
            get(list_drafts).post(create_draft),
        )
        .route("/internal/email-drafts/{draft_id}", get(get_draft))
}
