use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use db::models::outbox_email::OutboxEmail;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::ProjectContext};

/// Loads the outbox email named in the path into request extensions, scoped
/// to the authenticated project. An id belonging to another project is
/// indistinguishable from a missing one.
pub async fn load_outbox_email_middleware(
    State(state): State<AppState>,
    Path(email_id): Path<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = request
        .extensions()
        .get::<ProjectContext>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    let email_id: Uuid = email_id
        .parse()
        .map_err(|_| ApiError::Schema("Invalid email id".to_string()))?;

    let email = OutboxEmail::find_by_id(&state.db.conn, context.row_id, email_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Email not found".to_string()))?;

    request.extensions_mut().insert(email);
    Ok(next.run(request).await)
}
