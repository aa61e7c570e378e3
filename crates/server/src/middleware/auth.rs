use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use db::models::{
    ids,
    project::{AccessLevel, Project},
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

pub const SERVER_KEY_HEADER: &str = "x-mailroom-server-key";
pub const ADMIN_KEY_HEADER: &str = "x-mailroom-admin-key";

/// The authenticated project a request is scoped to, inserted into request
/// extensions by [`require_project_auth`].
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project: Project,
    /// Internal row id, used for scoping queries.
    pub row_id: i64,
    pub level: AccessLevel,
}

impl ProjectContext {
    /// Admin-only endpoints reject server-level keys before touching any
    /// entry state.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.level {
            AccessLevel::Admin => Ok(()),
            AccessLevel::Server => Err(ApiError::Unauthorized),
        }
    }
}

fn header_key(request: &Request, name: &str) -> Option<Uuid> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse().ok())
}

/// Resolves the access key headers to a project. A missing, malformed or
/// unknown key is a 401; presenting a server key in the admin header does not
/// grant admin access.
pub async fn require_project_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (key, expected_level) = match header_key(&request, ADMIN_KEY_HEADER) {
        Some(key) => (key, AccessLevel::Admin),
        None => match header_key(&request, SERVER_KEY_HEADER) {
            Some(key) => (key, AccessLevel::Server),
            None => return Err(ApiError::Unauthorized),
        },
    };

    let Some((project, level)) = Project::find_by_access_key(&state.db.conn, key).await? else {
        return Err(ApiError::Unauthorized);
    };
    if expected_level == AccessLevel::Admin && level != AccessLevel::Admin {
        return Err(ApiError::Unauthorized);
    }

    let row_id = ids::project_id_by_uuid(&state.db.conn, project.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    request.extensions_mut().insert(ProjectContext {
        project,
        row_id,
        level,
    });
    Ok(next.run(request).await)
}
