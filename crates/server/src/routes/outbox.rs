use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::get,
};
use db::{
    models::outbox_email::{OutboxEmail, UpdateOutboxEmail},
    types::{OutboxStatus, Recipient, SimpleStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utils::{response::ApiResponse, time::from_millis};
use uuid::Uuid;

use crate::{
    AppState,
    error::ApiError,
    middleware::{ProjectContext, load_outbox_email_middleware},
};

#[derive(Debug, Deserialize)]
pub struct OutboxQuery {
    pub status: Option<String>,
    pub simple_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OutboxListResponse {
    pub items: Vec<OutboxEmail>,
    /// The list is capped, not cursor-paginated.
    pub is_paginated: bool,
}

pub async fn list_outbox(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Query(query): Query<OutboxQuery>,
) -> Result<ResponseJson<ApiResponse<OutboxListResponse>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<OutboxStatus>()
                .map_err(|_| ApiError::Schema(format!("Unknown status: {raw}")))
        })
        .transpose()?;
    let simple_status = query
        .simple_status
        .as_deref()
        .map(|raw| {
            raw.parse::<SimpleStatus>()
                .map_err(|_| ApiError::Schema(format!("Unknown simple_status: {raw}")))
        })
        .transpose()?;

    let items = OutboxEmail::list(&state.db.conn, context.row_id, status, simple_status).await?;
    Ok(ResponseJson(ApiResponse::success(OutboxListResponse {
        items,
        is_paginated: false,
    })))
}

pub async fn get_outbox_email(
    Extension(email): Extension<OutboxEmail>,
) -> ResponseJson<ApiResponse<OutboxEmail>> {
    ResponseJson(ApiResponse::success(email))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOutboxEmailRequest {
    pub is_paused: Option<bool>,
    pub scheduled_at_millis: Option<i64>,
    pub tsx_source: Option<String>,
    #[serde(default, deserialize_with = "utils::serde_ext::double_option")]
    pub theme_id: Option<Option<Uuid>>,
    pub variables: Option<Value>,
    pub to: Option<Recipient>,
    pub skip_deliverability_check: Option<bool>,
    pub cancel: Option<bool>,
}

pub async fn update_outbox_email(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Extension(email): Extension<OutboxEmail>,
    Json(payload): Json<UpdateOutboxEmailRequest>,
) -> Result<ResponseJson<ApiResponse<OutboxEmail>>, ApiError> {
    // Editability comes first, before any field-level validation, so a
    // terminal entry answers EMAIL_NOT_EDITABLE no matter what was supplied.
    if !email.status().is_editable() {
        return Err(ApiError::OutboxEmail(
            db::models::outbox_email::OutboxEmailError::NotEditable,
        ));
    }

    if let Some(variables) = &payload.variables {
        if !variables.is_object() {
            return Err(ApiError::Schema("variables must be an object".to_string()));
        }
    }
    if let Some(Recipient::CustomEmails { emails }) = &payload.to {
        if emails.is_empty() {
            return Err(ApiError::Schema(
                "to.emails must not be empty".to_string(),
            ));
        }
    }

    let update = UpdateOutboxEmail {
        is_paused: payload.is_paused,
        scheduled_at: payload.scheduled_at_millis.map(from_millis),
        tsx_source: payload.tsx_source,
        theme_id: payload.theme_id,
        variables: payload.variables,
        to: payload.to,
        skip_deliverability_check: payload.skip_deliverability_check,
        cancel: payload.cancel.unwrap_or(false),
    };

    let updated =
        OutboxEmail::update(&state.db.conn, context.row_id, email.id(), &update).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let email_id_router = Router::new()
        .route("/", get(get_outbox_email).patch(update_outbox_email))
        .layer(from_fn_with_state(
            state.clone(),
            load_outbox_email_middleware,
        ));

    Router::new()
        .route("/emails/outbox", get(list_outbox))
        .nest("/emails/outbox/{email_id}", email_id_router)
}
