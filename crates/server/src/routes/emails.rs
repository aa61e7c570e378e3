use axum::{
    Extension, Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    delivery_stats::DeliveryStats,
    email_draft::EmailDraft,
    outbox_email::{CreateOutboxEmail, OutboxEmail},
    project::Project,
};
use db::types::Recipient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use services::services::{
    capacity::{self, CapacityRate},
    categories,
};
use utils::{response::ApiResponse, time::from_millis};
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::ProjectContext};

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub user_ids: Option<Vec<Uuid>>,
    pub emails: Option<Vec<String>>,
    pub html: Option<String>,
    pub subject: Option<String>,
    pub draft_id: Option<Uuid>,
    pub theme_id: Option<Uuid>,
    pub notification_category_name: Option<String>,
    pub variables: Option<Value>,
    pub scheduled_at_millis: Option<i64>,
    pub skip_deliverability_check: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CreatedEmailRef {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub results: Vec<CreatedEmailRef>,
}

/// Creates outbox entries and returns immediately; rendering and sending
/// happen asynchronously in the queue worker.
pub async fn send_email(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
    Json(payload): Json<SendEmailRequest>,
) -> Result<ResponseJson<ApiResponse<SendEmailResponse>>, ApiError> {
    // Exactly one recipient source and exactly one content source; rejected
    // up front before any entry is created.
    let recipients: Vec<Recipient> = match (&payload.user_ids, &payload.emails) {
        (Some(user_ids), None) => {
            if user_ids.is_empty() {
                return Err(ApiError::Schema("user_ids must not be empty".to_string()));
            }
            user_ids
                .iter()
                .map(|user_id| Recipient::UserPrimaryEmail { user_id: *user_id })
                .collect()
        }
        (None, Some(emails)) => {
            if emails.is_empty() {
                return Err(ApiError::Schema("emails must not be empty".to_string()));
            }
            vec![Recipient::CustomEmails {
                emails: emails.clone(),
            }]
        }
        _ => {
            return Err(ApiError::Schema(
                "Exactly one of user_ids and emails must be set".to_string(),
            ));
        }
    };

    if let Some(variables) = &payload.variables {
        if !variables.is_object() {
            return Err(ApiError::Schema("variables must be an object".to_string()));
        }
    }

    let category = payload
        .notification_category_name
        .as_deref()
        .map(|name| {
            categories::by_name(name)
                .ok_or_else(|| ApiError::Schema(format!("Unknown notification category: {name}")))
        })
        .transpose()?;

    let (tsx_source, override_subject, theme_id) = match (&payload.html, &payload.draft_id) {
        (Some(html), None) => {
            let subject = payload.subject.clone().ok_or_else(|| {
                ApiError::Schema("subject is required when html is set".to_string())
            })?;
            if category.is_none() {
                return Err(ApiError::Schema(
                    "notification_category_name is required when html is set".to_string(),
                ));
            }
            (html.clone(), Some(subject), payload.theme_id)
        }
        (None, Some(draft_id)) => {
            let draft = EmailDraft::find_by_id(&state.db.conn, context.row_id, *draft_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Draft not found".to_string()))?;
            EmailDraft::mark_sent(&state.db.conn, context.row_id, draft.id).await?;
            (
                draft.tsx_source,
                payload.subject.clone(),
                payload.theme_id.or(draft.theme_id),
            )
        }
        _ => {
            return Err(ApiError::Schema(
                "Exactly one of html and draft_id must be set".to_string(),
            ));
        }
    };

    let mut results = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let user_id = recipient.user_id();
        let data = CreateOutboxEmail {
            recipient,
            tsx_source: tsx_source.clone(),
            theme_id,
            variables: payload
                .variables
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            override_subject: override_subject.clone(),
            override_notification_category_id: category.map(|c| c.id),
            scheduled_at: payload.scheduled_at_millis.map(from_millis),
            skip_deliverability_check: payload.skip_deliverability_check.unwrap_or(false),
            priority: 0,
        };
        let email =
            OutboxEmail::create(&state.db.conn, context.row_id, &data, Uuid::new_v4()).await?;
        results.push(CreatedEmailRef {
            id: email.id(),
            user_id,
        });
    }

    Ok(ResponseJson(ApiResponse::success(SendEmailResponse {
        results,
    })))
}

#[derive(Debug, Serialize)]
pub struct DeliveryInfoResponse {
    pub stats: DeliveryStats,
    pub capacity: CapacityRate,
}

pub async fn delivery_stats(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
) -> Result<ResponseJson<ApiResponse<DeliveryInfoResponse>>, ApiError> {
    let stats = DeliveryStats::for_project(&state.db.conn, context.row_id).await?;
    // Boost state is re-read rather than taken from the auth snapshot, so a
    // boost activated moments ago is reflected immediately.
    let boost_expires_at =
        Project::boost_expires_at(&state.db.conn, context.project.id).await?;
    let capacity = capacity::capacity_rate(
        &stats,
        state.config.base_hourly_rate,
        boost_expires_at,
        chrono::Utc::now(),
    );
    Ok(ResponseJson(ApiResponse::success(DeliveryInfoResponse {
        stats,
        capacity,
    })))
}

#[derive(Debug, Serialize)]
pub struct BoostResponse {
    pub boost_expires_at_millis: i64,
}

/// Activates the 4x capacity boost. Admin access only; a second activation
/// while one is running is a conflict.
pub async fn activate_capacity_boost(
    State(state): State<AppState>,
    Extension(context): Extension<ProjectContext>,
) -> Result<ResponseJson<ApiResponse<BoostResponse>>, ApiError> {
    context.require_admin()?;
    let expires_at = context
        .project
        .activate_boost(&state.db.conn, state.config.boost_duration)
        .await?;
    Ok(ResponseJson(ApiResponse::success(BoostResponse {
        boost_expires_at_millis: expires_at.timestamp_millis(),
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/emails/send-email", post(send_email))
        .route("/emails/delivery-stats", get(delivery_stats))
        .route("/emails/capacity-boost", post(activate_capacity_boost))
}
