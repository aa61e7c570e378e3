use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ExprTrait, JsonValue,
    QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, Order, Query},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    entities::outbox_email,
    types::{OutboxStatus, Recipient, SimpleStatus, SkippedReason},
};
use utils::time::{opt_millis, to_millis};

/// Maximum number of rows returned by the list endpoint. The response carries
/// an explicit `is_paginated: false` marker instead of a cursor.
pub const LIST_LIMIT: u64 = 100;

#[derive(Debug, Error)]
pub enum OutboxEmailError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Email not found")]
    NotFound,
    #[error("Email is in a non-editable state")]
    NotEditable,
}

/// Fields present on every outbox email regardless of lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct BaseFields {
    pub id: Uuid,
    pub simple_status: SimpleStatus,
    pub created_at_millis: i64,
    pub updated_at_millis: i64,
    pub tsx_source: String,
    pub theme_id: Option<Uuid>,
    pub to: Recipient,
    pub variables: JsonValue,
    pub skip_deliverability_check: bool,
    pub scheduled_at_millis: i64,
    pub is_paused: bool,
    pub has_rendered: bool,
    pub has_delivered: bool,
    pub send_retries: i32,
    pub next_send_retry_at_millis: Option<i64>,
    pub send_attempt_errors: Option<JsonValue>,
}

/// Fields available once rendering completed successfully.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedFields {
    pub started_rendering_at_millis: i64,
    pub rendered_at_millis: i64,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub is_transactional: bool,
    pub notification_category_id: Option<Uuid>,
}

/// Wire read model: a tagged variant per lifecycle state, carrying only the
/// fields valid for that state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OutboxEmail {
    Preparing {
        #[serde(flatten)]
        base: BaseFields,
    },
    Rendering {
        #[serde(flatten)]
        base: BaseFields,
        started_rendering_at_millis: i64,
    },
    RenderError {
        #[serde(flatten)]
        base: BaseFields,
        started_rendering_at_millis: i64,
        rendered_at_millis: i64,
        render_error: String,
    },
    Scheduled {
        #[serde(flatten)]
        base: BaseFields,
        #[serde(flatten)]
        rendered: RenderedFields,
    },
    Queued {
        #[serde(flatten)]
        base: BaseFields,
        #[serde(flatten)]
        rendered: RenderedFields,
    },
    Sending {
        #[serde(flatten)]
        base: BaseFields,
        #[serde(flatten)]
        rendered: RenderedFields,
        started_sending_at_millis: i64,
    },
    ServerError {
        #[serde(flatten)]
        base: BaseFields,
        #[serde(flatten)]
        rendered: RenderedFields,
        started_sending_at_millis: i64,
        error_at_millis: i64,
        server_error: String,
    },
    Paused {
        #[serde(flatten)]
        base: BaseFields,
    },
    Sent {
        #[serde(flatten)]
        base: BaseFields,
        #[serde(flatten)]
        rendered: RenderedFields,
        started_sending_at_millis: i64,
        delivered_at_millis: i64,
        can_have_delivery_info: bool,
    },
    Skipped {
        #[serde(flatten)]
        base: BaseFields,
        #[serde(flatten)]
        rendered: Option<RenderedFields>,
        skipped_at_millis: i64,
        skipped_reason: SkippedReason,
        skipped_details: JsonValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_sending_at_millis: Option<i64>,
    },
}

#[derive(Debug, Clone)]
pub struct CreateOutboxEmail {
    pub recipient: Recipient,
    pub tsx_source: String,
    pub theme_id: Option<Uuid>,
    pub variables: JsonValue,
    pub override_subject: Option<String>,
    pub override_notification_category_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub skip_deliverability_check: bool,
    pub priority: i32,
}

/// PATCH payload after route-level decoding (millis already converted).
#[derive(Debug, Clone, Default)]
pub struct UpdateOutboxEmail {
    pub is_paused: Option<bool>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub tsx_source: Option<String>,
    pub theme_id: Option<Option<Uuid>>,
    pub variables: Option<JsonValue>,
    pub to: Option<Recipient>,
    pub skip_deliverability_check: Option<bool>,
    pub cancel: bool,
}

/// Output of a successful render, written back onto the row.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub notification_category_id: Option<Uuid>,
    pub is_transactional: bool,
}

const EDITABLE_STATUSES: [OutboxStatus; 7] = [
    OutboxStatus::Paused,
    OutboxStatus::Preparing,
    OutboxStatus::Rendering,
    OutboxStatus::RenderError,
    OutboxStatus::Scheduled,
    OutboxStatus::Queued,
    OutboxStatus::ServerError,
];

/// Lifecycle state as a pure function of the row's phase columns. The stored
/// `status` column is kept in sync by every mutation path; this is the single
/// place the derivation lives.
pub fn derive_status(model: &outbox_email::Model) -> OutboxStatus {
    if model.skipped_reason.is_some() {
        return OutboxStatus::Skipped;
    }
    if model.is_paused && model.finished_sending_at.is_none() {
        return OutboxStatus::Paused;
    }
    if model.finished_sending_at.is_some() {
        return if model.send_error_message.is_some() {
            OutboxStatus::ServerError
        } else {
            OutboxStatus::Sent
        };
    }
    if model.started_sending_at.is_some() {
        return OutboxStatus::Sending;
    }
    if model.finished_rendering_at.is_some() {
        if model.render_error_message.is_some() {
            return OutboxStatus::RenderError;
        }
        return if model.is_queued {
            OutboxStatus::Queued
        } else {
            OutboxStatus::Scheduled
        };
    }
    if model.started_rendering_at.is_some() {
        return OutboxStatus::Rendering;
    }
    OutboxStatus::Preparing
}

fn recipient_from_json(value: &JsonValue) -> Recipient {
    serde_json::from_value(value.clone()).unwrap_or(Recipient::CustomEmails { emails: vec![] })
}

impl OutboxEmail {
    pub fn from_model(model: outbox_email::Model) -> Self {
        let status = derive_status(&model);
        let rendered = (model.finished_rendering_at.is_some()
            && model.render_error_message.is_none()
            && model.rendered_subject.is_some())
        .then(|| RenderedFields {
            started_rendering_at_millis: opt_millis(model.started_rendering_at.map(Into::into))
                .unwrap_or_default(),
            rendered_at_millis: opt_millis(model.finished_rendering_at.map(Into::into))
                .unwrap_or_default(),
            subject: model.rendered_subject.clone().unwrap_or_default(),
            html: model.rendered_html.clone(),
            text: model.rendered_text.clone(),
            is_transactional: model.rendered_is_transactional.unwrap_or(false),
            notification_category_id: model.rendered_notification_category_id,
        });

        let mut base = BaseFields {
            id: model.uuid,
            simple_status: status.simple(),
            created_at_millis: to_millis(model.created_at.into()),
            updated_at_millis: to_millis(model.updated_at.into()),
            tsx_source: model.tsx_source.clone(),
            theme_id: model.theme_id,
            to: recipient_from_json(&model.recipient),
            variables: model.variables.clone(),
            skip_deliverability_check: model.skip_deliverability_check,
            scheduled_at_millis: to_millis(model.scheduled_at.into()),
            is_paused: model.is_paused,
            has_rendered: rendered.is_some(),
            has_delivered: false,
            send_retries: model.send_retries,
            next_send_retry_at_millis: opt_millis(model.next_send_retry_at.map(Into::into)),
            send_attempt_errors: model.send_attempt_errors.clone(),
        };

        match status {
            OutboxStatus::Preparing => OutboxEmail::Preparing { base },
            OutboxStatus::Paused => OutboxEmail::Paused { base },
            OutboxStatus::Rendering => OutboxEmail::Rendering {
                started_rendering_at_millis: opt_millis(
                    model.started_rendering_at.map(Into::into),
                )
                .unwrap_or_default(),
                base,
            },
            OutboxStatus::RenderError => OutboxEmail::RenderError {
                started_rendering_at_millis: opt_millis(
                    model.started_rendering_at.map(Into::into),
                )
                .unwrap_or_default(),
                rendered_at_millis: opt_millis(model.finished_rendering_at.map(Into::into))
                    .unwrap_or_default(),
                render_error: model
                    .render_error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown render error".to_string()),
                base,
            },
            OutboxStatus::Scheduled => OutboxEmail::Scheduled {
                rendered: rendered.expect("scheduled implies rendered"),
                base,
            },
            OutboxStatus::Queued => OutboxEmail::Queued {
                rendered: rendered.expect("queued implies rendered"),
                base,
            },
            OutboxStatus::Sending => OutboxEmail::Sending {
                rendered: rendered.expect("sending implies rendered"),
                started_sending_at_millis: opt_millis(model.started_sending_at.map(Into::into))
                    .unwrap_or_default(),
                base,
            },
            OutboxStatus::ServerError => OutboxEmail::ServerError {
                rendered: rendered.expect("server-error implies rendered"),
                started_sending_at_millis: opt_millis(model.started_sending_at.map(Into::into))
                    .unwrap_or_default(),
                error_at_millis: opt_millis(model.finished_sending_at.map(Into::into))
                    .unwrap_or_default(),
                server_error: model
                    .send_error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown send error".to_string()),
                base,
            },
            OutboxStatus::Sent => {
                base.has_delivered = true;
                let can_have_delivery_info = model.can_have_delivery_info.unwrap_or(false);
                // Transports without delivery tracking report the send
                // completion time as the delivery time.
                let delivered_at = if can_have_delivery_info {
                    model.delivered_at.or(model.finished_sending_at)
                } else {
                    model.finished_sending_at
                };
                OutboxEmail::Sent {
                    rendered: rendered.expect("sent implies rendered"),
                    started_sending_at_millis: opt_millis(
                        model.started_sending_at.map(Into::into),
                    )
                    .unwrap_or_default(),
                    delivered_at_millis: opt_millis(delivered_at.map(Into::into))
                        .unwrap_or_default(),
                    can_have_delivery_info,
                    base,
                }
            }
            OutboxStatus::Skipped => OutboxEmail::Skipped {
                skipped_at_millis: to_millis(model.updated_at.into()),
                skipped_reason: model
                    .skipped_reason
                    .unwrap_or(SkippedReason::ManuallyCancelled),
                skipped_details: model
                    .skipped_details
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({})),
                started_sending_at_millis: opt_millis(model.started_sending_at.map(Into::into)),
                rendered,
                base,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.base().id
    }

    pub fn status(&self) -> OutboxStatus {
        match self {
            OutboxEmail::Preparing { .. } => OutboxStatus::Preparing,
            OutboxEmail::Rendering { .. } => OutboxStatus::Rendering,
            OutboxEmail::RenderError { .. } => OutboxStatus::RenderError,
            OutboxEmail::Scheduled { .. } => OutboxStatus::Scheduled,
            OutboxEmail::Queued { .. } => OutboxStatus::Queued,
            OutboxEmail::Sending { .. } => OutboxStatus::Sending,
            OutboxEmail::ServerError { .. } => OutboxStatus::ServerError,
            OutboxEmail::Paused { .. } => OutboxStatus::Paused,
            OutboxEmail::Sent { .. } => OutboxStatus::Sent,
            OutboxEmail::Skipped { .. } => OutboxStatus::Skipped,
        }
    }

    pub fn base(&self) -> &BaseFields {
        match self {
            OutboxEmail::Preparing { base }
            | OutboxEmail::Rendering { base, .. }
            | OutboxEmail::RenderError { base, .. }
            | OutboxEmail::Scheduled { base, .. }
            | OutboxEmail::Queued { base, .. }
            | OutboxEmail::Sending { base, .. }
            | OutboxEmail::ServerError { base, .. }
            | OutboxEmail::Paused { base }
            | OutboxEmail::Sent { base, .. }
            | OutboxEmail::Skipped { base, .. } => base,
        }
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        data: &CreateOutboxEmail,
        email_id: Uuid,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let recipient = serde_json::to_value(&data.recipient)
            .map_err(|e| DbErr::Custom(e.to_string()))?;
        let active = outbox_email::ActiveModel {
            uuid: Set(email_id),
            project_id: Set(project_id),
            recipient: Set(recipient),
            tsx_source: Set(data.tsx_source.clone()),
            theme_id: Set(data.theme_id),
            variables: Set(data.variables.clone()),
            override_subject: Set(data.override_subject.clone()),
            override_notification_category_id: Set(data.override_notification_category_id),
            is_paused: Set(false),
            is_queued: Set(false),
            skip_deliverability_check: Set(data.skip_deliverability_check),
            scheduled_at: Set(data.scheduled_at.unwrap_or(now).into()),
            priority: Set(data.priority),
            rendering_worker_id: Set(None),
            started_rendering_at: Set(None),
            finished_rendering_at: Set(None),
            rendered_subject: Set(None),
            rendered_html: Set(None),
            rendered_text: Set(None),
            rendered_notification_category_id: Set(None),
            rendered_is_transactional: Set(None),
            render_error_message: Set(None),
            render_error_details: Set(None),
            started_sending_at: Set(None),
            finished_sending_at: Set(None),
            send_retries: Set(0),
            next_send_retry_at: Set(None),
            send_attempt_errors: Set(None),
            send_error_message: Set(None),
            send_error_details: Set(None),
            can_have_delivery_info: Set(None),
            delivered_at: Set(None),
            bounced_at: Set(None),
            marked_as_spam_at: Set(None),
            skipped_reason: Set(None),
            skipped_details: Set(None),
            status: Set(OutboxStatus::Preparing),
            simple_status: Set(SimpleStatus::InProgress),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    /// Project-scoped lookup: an id belonging to another project is
    /// indistinguishable from a missing one.
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let record = outbox_email::Entity::find()
            .filter(outbox_email::Column::ProjectId.eq(project_id))
            .filter(outbox_email::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn list<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        status: Option<OutboxStatus>,
        simple_status: Option<SimpleStatus>,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = outbox_email::Entity::find()
            .filter(outbox_email::Column::ProjectId.eq(project_id));
        if let Some(status) = status {
            query = query.filter(outbox_email::Column::Status.eq(status));
        }
        if let Some(simple_status) = simple_status {
            query = query.filter(outbox_email::Column::SimpleStatus.eq(simple_status));
        }
        let records = query
            .order_by_desc(outbox_email::Column::CreatedAt)
            .order_by_desc(outbox_email::Column::Id)
            .limit(LIST_LIMIT)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    /// Applies a PATCH. The editability check runs twice: once on the loaded
    /// row (so the caller gets `NotEditable` before any field validation) and
    /// once inside the guarded UPDATE, so a terminal transition racing this
    /// call wins and the patch fails instead of clobbering it.
    pub async fn update<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        id: Uuid,
        data: &UpdateOutboxEmail,
    ) -> Result<Self, OutboxEmailError> {
        let record = outbox_email::Entity::find()
            .filter(outbox_email::Column::ProjectId.eq(project_id))
            .filter(outbox_email::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(OutboxEmailError::NotFound)?;

        if !derive_status(&record).is_editable() {
            return Err(OutboxEmailError::NotEditable);
        }

        let now = Utc::now();
        let mut next = record.clone();
        let mut needs_rerender_reset = false;

        if data.cancel {
            next.is_paused = false;
            next.is_queued = false;
            next.skipped_reason = Some(SkippedReason::ManuallyCancelled);
            next.skipped_details = Some(serde_json::json!({}));
        } else {
            if let Some(tsx_source) = &data.tsx_source {
                next.tsx_source = tsx_source.clone();
                needs_rerender_reset = true;
            }
            if let Some(theme_id) = &data.theme_id {
                next.theme_id = *theme_id;
                needs_rerender_reset = true;
            }
            if let Some(to) = &data.to {
                next.recipient =
                    serde_json::to_value(to).map_err(|e| DbErr::Custom(e.to_string()))?;
                needs_rerender_reset = true;
            }
            if let Some(variables) = &data.variables {
                next.variables = variables.clone();
                needs_rerender_reset = true;
            }
            if let Some(skip) = data.skip_deliverability_check {
                next.skip_deliverability_check = skip;
            }
            if let Some(scheduled_at) = data.scheduled_at {
                next.scheduled_at = scheduled_at.into();
                next.is_queued = false;
            }
            if let Some(is_paused) = data.is_paused {
                next.is_paused = is_paused;
            }

            // A content edit invalidates everything downstream of rendering;
            // the worker will pick the row up again from scratch.
            if needs_rerender_reset {
                next.rendering_worker_id = None;
                next.started_rendering_at = None;
                next.finished_rendering_at = None;
                next.rendered_subject = None;
                next.rendered_html = None;
                next.rendered_text = None;
                next.rendered_notification_category_id = None;
                next.rendered_is_transactional = None;
                next.render_error_message = None;
                next.render_error_details = None;
                next.is_queued = false;
                next.started_sending_at = None;
                next.finished_sending_at = None;
                next.send_error_message = None;
                next.send_error_details = None;
                next.skipped_reason = None;
                next.skipped_details = None;
                next.can_have_delivery_info = None;
                next.delivered_at = None;
                next.bounced_at = None;
                next.marked_as_spam_at = None;
            }
        }

        next.status = derive_status(&next);
        next.simple_status = next.status.simple();
        next.updated_at = now.into();

        // Only the touched columns are written, so a worker mutating other
        // phase columns concurrently is not clobbered by this patch.
        let mut query = outbox_email::Entity::update_many();
        if data.cancel {
            query = query
                .col_expr(outbox_email::Column::IsPaused, Expr::value(false))
                .col_expr(outbox_email::Column::IsQueued, Expr::value(false))
                .col_expr(
                    outbox_email::Column::SkippedReason,
                    Expr::value(next.skipped_reason),
                )
                .col_expr(
                    outbox_email::Column::SkippedDetails,
                    Expr::value(next.skipped_details.clone()),
                );
        } else {
            if data.tsx_source.is_some() {
                query = query.col_expr(
                    outbox_email::Column::TsxSource,
                    Expr::value(next.tsx_source.clone()),
                );
            }
            if data.theme_id.is_some() {
                query = query.col_expr(outbox_email::Column::ThemeId, Expr::value(next.theme_id));
            }
            if data.to.is_some() {
                query = query.col_expr(
                    outbox_email::Column::Recipient,
                    Expr::value(next.recipient.clone()),
                );
            }
            if data.variables.is_some() {
                query = query.col_expr(
                    outbox_email::Column::Variables,
                    Expr::value(next.variables.clone()),
                );
            }
            if data.skip_deliverability_check.is_some() {
                query = query.col_expr(
                    outbox_email::Column::SkipDeliverabilityCheck,
                    Expr::value(next.skip_deliverability_check),
                );
            }
            if data.scheduled_at.is_some() {
                query = query
                    .col_expr(
                        outbox_email::Column::ScheduledAt,
                        Expr::value(DateTime::<Utc>::from(next.scheduled_at)),
                    )
                    .col_expr(outbox_email::Column::IsQueued, Expr::value(false));
            }
            if data.is_paused.is_some() {
                query =
                    query.col_expr(outbox_email::Column::IsPaused, Expr::value(next.is_paused));
            }
            if needs_rerender_reset {
                query = query
                    .col_expr(
                        outbox_email::Column::RenderingWorkerId,
                        Expr::value(None::<Uuid>),
                    )
                    .col_expr(
                        outbox_email::Column::StartedRenderingAt,
                        Expr::value(None::<DateTime<Utc>>),
                    )
                    .col_expr(
                        outbox_email::Column::FinishedRenderingAt,
                        Expr::value(None::<DateTime<Utc>>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderedSubject,
                        Expr::value(None::<String>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderedHtml,
                        Expr::value(None::<String>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderedText,
                        Expr::value(None::<String>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderedNotificationCategoryId,
                        Expr::value(None::<Uuid>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderedIsTransactional,
                        Expr::value(None::<bool>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderErrorMessage,
                        Expr::value(None::<String>),
                    )
                    .col_expr(
                        outbox_email::Column::RenderErrorDetails,
                        Expr::value(None::<JsonValue>),
                    )
                    .col_expr(outbox_email::Column::IsQueued, Expr::value(false))
                    .col_expr(
                        outbox_email::Column::StartedSendingAt,
                        Expr::value(None::<DateTime<Utc>>),
                    )
                    .col_expr(
                        outbox_email::Column::FinishedSendingAt,
                        Expr::value(None::<DateTime<Utc>>),
                    )
                    .col_expr(
                        outbox_email::Column::SendErrorMessage,
                        Expr::value(None::<String>),
                    )
                    .col_expr(
                        outbox_email::Column::SendErrorDetails,
                        Expr::value(None::<JsonValue>),
                    )
                    .col_expr(
                        outbox_email::Column::SkippedReason,
                        Expr::value(None::<SkippedReason>),
                    )
                    .col_expr(
                        outbox_email::Column::SkippedDetails,
                        Expr::value(None::<JsonValue>),
                    )
                    .col_expr(
                        outbox_email::Column::CanHaveDeliveryInfo,
                        Expr::value(None::<bool>),
                    )
                    .col_expr(
                        outbox_email::Column::DeliveredAt,
                        Expr::value(None::<DateTime<Utc>>),
                    )
                    .col_expr(
                        outbox_email::Column::BouncedAt,
                        Expr::value(None::<DateTime<Utc>>),
                    )
                    .col_expr(
                        outbox_email::Column::MarkedAsSpamAt,
                        Expr::value(None::<DateTime<Utc>>),
                    );
            }
        }

        let result = query
            .col_expr(outbox_email::Column::Status, Expr::value(next.status))
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(next.simple_status),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::ProjectId.eq(project_id))
            .filter(outbox_email::Column::Uuid.eq(id))
            .filter(outbox_email::Column::Status.is_in(EDITABLE_STATUSES))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            // Re-read to distinguish a vanished row from a terminal
            // transition that won the race.
            return match outbox_email::Entity::find()
                .filter(outbox_email::Column::ProjectId.eq(project_id))
                .filter(outbox_email::Column::Uuid.eq(id))
                .one(db)
                .await?
            {
                None => Err(OutboxEmailError::NotFound),
                Some(_) => Err(OutboxEmailError::NotEditable),
            };
        }

        Self::find_by_id(db, project_id, id)
            .await?
            .ok_or(OutboxEmailError::NotFound)
    }

    // ---- queue worker operations -------------------------------------------

    /// Atomically claims up to `limit` rows for rendering. Rows already
    /// claimed by another worker, paused, or skipped are left alone.
    pub async fn claim_for_rendering<C: ConnectionTrait>(
        db: &C,
        worker_id: Uuid,
        limit: u64,
    ) -> Result<Vec<outbox_email::Model>, DbErr> {
        let now = Utc::now();
        let candidates = Query::select()
            .column(outbox_email::Column::Id)
            .from(outbox_email::Entity)
            .and_where(Expr::col(outbox_email::Column::RenderingWorkerId).is_null())
            .and_where(Expr::col(outbox_email::Column::IsPaused).eq(false))
            .and_where(Expr::col(outbox_email::Column::SkippedReason).is_null())
            .order_by(outbox_email::Column::CreatedAt, Order::Asc)
            .limit(limit)
            .to_owned();

        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::RenderingWorkerId,
                Expr::value(Some(worker_id)),
            )
            .col_expr(
                outbox_email::Column::StartedRenderingAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::Rendering),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.in_subquery(candidates))
            .filter(outbox_email::Column::RenderingWorkerId.is_null())
            .filter(outbox_email::Column::IsPaused.eq(false))
            .filter(outbox_email::Column::SkippedReason.is_null())
            .exec_with_returning(db)
            .await
    }

    pub async fn save_rendered<C: ConnectionTrait>(
        db: &C,
        row: &outbox_email::Model,
        worker_id: Uuid,
        content: &RenderedContent,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        let subject = row
            .override_subject
            .clone()
            .unwrap_or_else(|| content.subject.clone());
        let status = if row.is_paused {
            OutboxStatus::Paused
        } else {
            OutboxStatus::Scheduled
        };
        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::RenderedSubject,
                Expr::value(Some(subject)),
            )
            .col_expr(
                outbox_email::Column::RenderedHtml,
                Expr::value(Some(content.html.clone())),
            )
            .col_expr(
                outbox_email::Column::RenderedText,
                Expr::value(content.text.clone()),
            )
            .col_expr(
                outbox_email::Column::RenderedNotificationCategoryId,
                Expr::value(content.notification_category_id),
            )
            .col_expr(
                outbox_email::Column::RenderedIsTransactional,
                Expr::value(Some(content.is_transactional)),
            )
            .col_expr(
                outbox_email::Column::RenderErrorMessage,
                Expr::value(None::<String>),
            )
            .col_expr(
                outbox_email::Column::RenderErrorDetails,
                Expr::value(None::<JsonValue>),
            )
            .col_expr(
                outbox_email::Column::FinishedRenderingAt,
                Expr::value(Some(now)),
            )
            .col_expr(outbox_email::Column::Status, Expr::value(status))
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(status.simple()),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.eq(row.id))
            .filter(outbox_email::Column::RenderingWorkerId.eq(worker_id))
            .exec(db)
            .await?;
        Ok(())
    }

    pub async fn mark_render_error<C: ConnectionTrait>(
        db: &C,
        row: &outbox_email::Model,
        worker_id: Uuid,
        external_message: &str,
        details: JsonValue,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::RenderErrorMessage,
                Expr::value(Some(external_message.to_string())),
            )
            .col_expr(
                outbox_email::Column::RenderErrorDetails,
                Expr::value(Some(details)),
            )
            .col_expr(
                outbox_email::Column::FinishedRenderingAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::RenderError),
            )
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(SimpleStatus::Error),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.eq(row.id))
            .filter(outbox_email::Column::RenderingWorkerId.eq(worker_id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Unclaims renders that started but never finished; the claim holder
    /// presumably died. Returns how many rows were reset.
    pub async fn reset_stuck_rendering<C: ConnectionTrait>(
        db: &C,
        older_than: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::RenderingWorkerId,
                Expr::value(None::<Uuid>),
            )
            .col_expr(
                outbox_email::Column::StartedRenderingAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::Preparing),
            )
            .filter(outbox_email::Column::StartedRenderingAt.lte(older_than))
            .filter(outbox_email::Column::FinishedRenderingAt.is_null())
            .filter(outbox_email::Column::SkippedReason.is_null())
            .filter(outbox_email::Column::IsPaused.eq(false))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Marks rendered, unpaused, unskipped rows whose schedule (and retry
    /// backoff, if any) has elapsed as queued. Returns the number queued.
    pub async fn queue_ready<C: ConnectionTrait>(
        db: &C,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let base_filter = |query: sea_orm::UpdateMany<outbox_email::Entity>| {
            query
                .col_expr(outbox_email::Column::IsQueued, Expr::value(true))
                .col_expr(
                    outbox_email::Column::Status,
                    Expr::value(OutboxStatus::Queued),
                )
                .filter(outbox_email::Column::IsQueued.eq(false))
                .filter(outbox_email::Column::IsPaused.eq(false))
                .filter(outbox_email::Column::SkippedReason.is_null())
                .filter(outbox_email::Column::FinishedRenderingAt.is_not_null())
                .filter(outbox_email::Column::RenderedHtml.is_not_null())
                .filter(outbox_email::Column::ScheduledAt.lte(now))
        };

        let fresh = base_filter(outbox_email::Entity::update_many())
            .filter(outbox_email::Column::NextSendRetryAt.is_null())
            .exec(db)
            .await?;

        let retries = base_filter(outbox_email::Entity::update_many())
            .col_expr(
                outbox_email::Column::NextSendRetryAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .filter(outbox_email::Column::NextSendRetryAt.lte(now))
            .exec(db)
            .await?;

        Ok(fresh.rows_affected + retries.rows_affected)
    }

    /// Projects (internal ids) that currently have queued, sendable rows.
    pub async fn projects_with_queued<C: ConnectionTrait>(db: &C) -> Result<Vec<i64>, DbErr> {
        outbox_email::Entity::find()
            .select_only()
            .column(outbox_email::Column::ProjectId)
            .distinct()
            .filter(outbox_email::Column::IsQueued.eq(true))
            .filter(outbox_email::Column::IsPaused.eq(false))
            .filter(outbox_email::Column::SkippedReason.is_null())
            .filter(outbox_email::Column::StartedSendingAt.is_null())
            .filter(outbox_email::Column::FinishedSendingAt.is_null())
            .into_tuple()
            .all(db)
            .await
    }

    /// Atomically claims up to `limit` queued rows of one project for
    /// sending, highest priority first.
    pub async fn claim_for_sending<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        limit: u64,
    ) -> Result<Vec<outbox_email::Model>, DbErr> {
        let now = Utc::now();
        let candidates = Query::select()
            .column(outbox_email::Column::Id)
            .from(outbox_email::Entity)
            .and_where(Expr::col(outbox_email::Column::ProjectId).eq(project_id))
            .and_where(Expr::col(outbox_email::Column::IsQueued).eq(true))
            .and_where(Expr::col(outbox_email::Column::IsPaused).eq(false))
            .and_where(Expr::col(outbox_email::Column::SkippedReason).is_null())
            .and_where(Expr::col(outbox_email::Column::StartedSendingAt).is_null())
            .and_where(Expr::col(outbox_email::Column::FinishedSendingAt).is_null())
            .and_where(Expr::col(outbox_email::Column::FinishedRenderingAt).is_not_null())
            .order_by(outbox_email::Column::Priority, Order::Desc)
            .order_by(outbox_email::Column::ScheduledAt, Order::Asc)
            .order_by(outbox_email::Column::CreatedAt, Order::Asc)
            .limit(limit)
            .to_owned();

        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::StartedSendingAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::Sending),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.in_subquery(candidates))
            .filter(outbox_email::Column::StartedSendingAt.is_null())
            .filter(outbox_email::Column::SkippedReason.is_null())
            .exec_with_returning(db)
            .await
    }

    /// Records a skip. Guarded so that it cannot overwrite an already-skipped
    /// or already-finished row.
    pub async fn mark_skipped<C: ConnectionTrait>(
        db: &C,
        row_id: i64,
        reason: SkippedReason,
        details: JsonValue,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::SkippedReason,
                Expr::value(Some(reason)),
            )
            .col_expr(
                outbox_email::Column::SkippedDetails,
                Expr::value(Some(details)),
            )
            .col_expr(outbox_email::Column::IsQueued, Expr::value(false))
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::Skipped),
            )
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(SimpleStatus::Ok),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.eq(row_id))
            .filter(outbox_email::Column::SkippedReason.is_null())
            .filter(outbox_email::Column::FinishedSendingAt.is_null())
            .exec(db)
            .await?;
        Ok(())
    }

    pub async fn mark_sent<C: ConnectionTrait>(
        db: &C,
        row_id: i64,
        can_have_delivery_info: bool,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::FinishedSendingAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                outbox_email::Column::CanHaveDeliveryInfo,
                Expr::value(Some(can_have_delivery_info)),
            )
            .col_expr(
                outbox_email::Column::SendErrorMessage,
                Expr::value(None::<String>),
            )
            .col_expr(
                outbox_email::Column::SendErrorDetails,
                Expr::value(None::<JsonValue>),
            )
            .col_expr(outbox_email::Column::IsQueued, Expr::value(false))
            .col_expr(outbox_email::Column::Status, Expr::value(OutboxStatus::Sent))
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(SimpleStatus::Ok),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.eq(row_id))
            .filter(outbox_email::Column::FinishedSendingAt.is_null())
            .exec(db)
            .await?;
        Ok(())
    }

    /// Releases a claimed row after a retryable send failure and schedules
    /// the next attempt.
    pub async fn schedule_send_retry<C: ConnectionTrait>(
        db: &C,
        row_id: i64,
        retries: i32,
        next_retry_at: DateTime<Utc>,
        attempt_errors: JsonValue,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::StartedSendingAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(outbox_email::Column::IsQueued, Expr::value(false))
            .col_expr(outbox_email::Column::SendRetries, Expr::value(retries))
            .col_expr(
                outbox_email::Column::NextSendRetryAt,
                Expr::value(Some(next_retry_at)),
            )
            .col_expr(
                outbox_email::Column::SendAttemptErrors,
                Expr::value(Some(attempt_errors)),
            )
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::Scheduled),
            )
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(SimpleStatus::InProgress),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.eq(row_id))
            .filter(outbox_email::Column::FinishedSendingAt.is_null())
            .exec(db)
            .await?;
        Ok(())
    }

    /// Terminal send failure: non-retryable error or attempts exhausted.
    pub async fn mark_send_error<C: ConnectionTrait>(
        db: &C,
        row_id: i64,
        retries: i32,
        external_message: &str,
        details: JsonValue,
        attempt_errors: Option<JsonValue>,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        outbox_email::Entity::update_many()
            .col_expr(
                outbox_email::Column::FinishedSendingAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                outbox_email::Column::CanHaveDeliveryInfo,
                Expr::value(Some(false)),
            )
            .col_expr(outbox_email::Column::SendRetries, Expr::value(retries))
            .col_expr(
                outbox_email::Column::SendAttemptErrors,
                Expr::value(attempt_errors),
            )
            .col_expr(
                outbox_email::Column::SendErrorMessage,
                Expr::value(Some(external_message.to_string())),
            )
            .col_expr(
                outbox_email::Column::SendErrorDetails,
                Expr::value(Some(details)),
            )
            .col_expr(outbox_email::Column::IsQueued, Expr::value(false))
            .col_expr(
                outbox_email::Column::Status,
                Expr::value(OutboxStatus::ServerError),
            )
            .col_expr(
                outbox_email::Column::SimpleStatus,
                Expr::value(SimpleStatus::Error),
            )
            .col_expr(outbox_email::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_email::Column::Id.eq(row_id))
            .filter(outbox_email::Column::FinishedSendingAt.is_null())
            .exec(db)
            .await?;
        Ok(())
    }

    /// Rows stuck in the sending phase, for alerting only. These were claimed
    /// but never resolved; manual intervention is required.
    pub async fn stuck_sending<C: ConnectionTrait>(
        db: &C,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<outbox_email::Model>, DbErr> {
        outbox_email::Entity::find()
            .filter(outbox_email::Column::StartedSendingAt.lte(older_than))
            .filter(outbox_email::Column::FinishedSendingAt.is_null())
            .filter(outbox_email::Column::SkippedReason.is_null())
            .filter(outbox_email::Column::IsPaused.eq(false))
            .all(db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DbService,
        models::{
            ids,
            project::{CreateProject, Project},
        },
    };

    async fn setup() -> (DbService, i64) {
        let db = DbService::new_in_memory().await.unwrap();
        let project = Project::create(
            &db.conn,
            &CreateProject {
                name: "Outbox".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let project_id = ids::project_id_by_uuid(&db.conn, project.id)
            .await
            .unwrap()
            .unwrap();
        (db, project_id)
    }

    fn create_data(tsx: &str) -> CreateOutboxEmail {
        CreateOutboxEmail {
            recipient: Recipient::CustomEmails {
                emails: vec!["someone@example.com".to_string()],
            },
            tsx_source: tsx.to_string(),
            theme_id: None,
            variables: serde_json::json!({}),
            override_subject: None,
            override_notification_category_id: None,
            scheduled_at: None,
            skip_deliverability_check: false,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn create_starts_preparing_and_round_trips_source() {
        let (db, project_id) = setup().await;
        let source = "  <Subject value=\"Hi\" />\n  untouched   whitespace\t";
        let email = OutboxEmail::create(&db.conn, project_id, &create_data(source), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(email.status(), OutboxStatus::Preparing);
        assert_eq!(email.base().simple_status, SimpleStatus::InProgress);
        assert_eq!(email.base().tsx_source, source);

        let read = OutboxEmail::find_by_id(&db.conn, project_id, email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.base().tsx_source, source);
    }

    #[tokio::test]
    async fn cross_project_lookup_misses() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();

        let other = Project::create(
            &db.conn,
            &CreateProject {
                name: "Other".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let other_id = ids::project_id_by_uuid(&db.conn, other.id)
            .await
            .unwrap()
            .unwrap();

        assert!(
            OutboxEmail::find_by_id(&db.conn, other_id, email.id())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn pause_and_unpause_preserve_schedule() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();
        let original_schedule = email.base().scheduled_at_millis;

        let paused = OutboxEmail::update(
            &db.conn,
            project_id,
            email.id(),
            &UpdateOutboxEmail {
                is_paused: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(paused.status(), OutboxStatus::Paused);
        assert!(paused.base().is_paused);
        assert_eq!(paused.base().scheduled_at_millis, original_schedule);

        let resumed = OutboxEmail::update(
            &db.conn,
            project_id,
            email.id(),
            &UpdateOutboxEmail {
                is_paused: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(resumed.status(), OutboxStatus::Preparing);
        assert_eq!(resumed.base().scheduled_at_millis, original_schedule);
    }

    #[tokio::test]
    async fn cancel_records_manual_reason() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();
        let cancelled = OutboxEmail::update(
            &db.conn,
            project_id,
            email.id(),
            &UpdateOutboxEmail {
                cancel: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        match cancelled {
            OutboxEmail::Skipped {
                skipped_reason,
                skipped_details,
                ..
            } => {
                assert_eq!(skipped_reason, SkippedReason::ManuallyCancelled);
                assert_eq!(skipped_details, serde_json::json!({}));
            }
            other => panic!("expected skipped, got {:?}", other.status()),
        }

        // A second cancel (or any other patch) must fail: skipped is terminal.
        let again = OutboxEmail::update(
            &db.conn,
            project_id,
            email.id(),
            &UpdateOutboxEmail {
                cancel: true,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(again, Err(OutboxEmailError::NotEditable)));
    }

    #[tokio::test]
    async fn sent_email_rejects_every_patch_unchanged() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();

        // Drive the row through the worker path to SENT.
        let worker = Uuid::new_v4();
        let claimed = OutboxEmail::claim_for_rendering(&db.conn, worker, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        OutboxEmail::save_rendered(
            &db.conn,
            &claimed[0],
            worker,
            &RenderedContent {
                subject: "S".to_string(),
                html: "<p>x</p>".to_string(),
                text: None,
                notification_category_id: None,
                is_transactional: true,
            },
        )
        .await
        .unwrap();
        OutboxEmail::queue_ready(&db.conn, Utc::now()).await.unwrap();
        let sending = OutboxEmail::claim_for_sending(&db.conn, project_id, 10)
            .await
            .unwrap();
        assert_eq!(sending.len(), 1);
        OutboxEmail::mark_sent(&db.conn, sending[0].id, false)
            .await
            .unwrap();

        let sent = OutboxEmail::find_by_id(&db.conn, project_id, email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.status(), OutboxStatus::Sent);
        let before = serde_json::to_value(&sent).unwrap();

        let patch = OutboxEmail::update(
            &db.conn,
            project_id,
            email.id(),
            &UpdateOutboxEmail {
                is_paused: Some(true),
                tsx_source: Some("changed".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(patch, Err(OutboxEmailError::NotEditable)));

        let after = OutboxEmail::find_by_id(&db.conn, project_id, email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(serde_json::to_value(&after).unwrap(), before);
    }

    #[tokio::test]
    async fn content_edit_resets_rendering_state() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("v1"), Uuid::new_v4())
            .await
            .unwrap();

        let worker = Uuid::new_v4();
        let claimed = OutboxEmail::claim_for_rendering(&db.conn, worker, 10)
            .await
            .unwrap();
        OutboxEmail::save_rendered(
            &db.conn,
            &claimed[0],
            worker,
            &RenderedContent {
                subject: "S".to_string(),
                html: "<p>v1</p>".to_string(),
                text: None,
                notification_category_id: None,
                is_transactional: false,
            },
        )
        .await
        .unwrap();

        let rendered = OutboxEmail::find_by_id(&db.conn, project_id, email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rendered.status(), OutboxStatus::Scheduled);
        assert!(rendered.base().has_rendered);

        let edited = OutboxEmail::update(
            &db.conn,
            project_id,
            email.id(),
            &UpdateOutboxEmail {
                tsx_source: Some("v2".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(edited.status(), OutboxStatus::Preparing);
        assert!(!edited.base().has_rendered);
        assert_eq!(edited.base().tsx_source, "v2");
    }

    #[tokio::test]
    async fn queue_ready_respects_schedule_and_pause() {
        let (db, project_id) = setup().await;
        let future = CreateOutboxEmail {
            scheduled_at: Some(Utc::now() + chrono::Duration::hours(1)),
            ..create_data("later")
        };
        let later = OutboxEmail::create(&db.conn, project_id, &future, Uuid::new_v4())
            .await
            .unwrap();
        let now_email =
            OutboxEmail::create(&db.conn, project_id, &create_data("now"), Uuid::new_v4())
                .await
                .unwrap();

        let worker = Uuid::new_v4();
        let claimed = OutboxEmail::claim_for_rendering(&db.conn, worker, 10)
            .await
            .unwrap();
        for row in &claimed {
            OutboxEmail::save_rendered(
                &db.conn,
                row,
                worker,
                &RenderedContent {
                    subject: "S".to_string(),
                    html: "<p>x</p>".to_string(),
                    text: None,
                    notification_category_id: None,
                    is_transactional: false,
                },
            )
            .await
            .unwrap();
        }

        let queued = OutboxEmail::queue_ready(&db.conn, Utc::now()).await.unwrap();
        assert_eq!(queued, 1);

        let ready = OutboxEmail::find_by_id(&db.conn, project_id, now_email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ready.status(), OutboxStatus::Queued);
        let deferred = OutboxEmail::find_by_id(&db.conn, project_id, later.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deferred.status(), OutboxStatus::Scheduled);
    }

    #[tokio::test]
    async fn mark_skipped_does_not_override_terminal_rows() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();
        let worker = Uuid::new_v4();
        let claimed = OutboxEmail::claim_for_rendering(&db.conn, worker, 10)
            .await
            .unwrap();
        OutboxEmail::save_rendered(
            &db.conn,
            &claimed[0],
            worker,
            &RenderedContent {
                subject: "S".to_string(),
                html: "<p>x</p>".to_string(),
                text: None,
                notification_category_id: None,
                is_transactional: false,
            },
        )
        .await
        .unwrap();
        OutboxEmail::queue_ready(&db.conn, Utc::now()).await.unwrap();
        let rows = OutboxEmail::claim_for_sending(&db.conn, project_id, 10)
            .await
            .unwrap();
        OutboxEmail::mark_sent(&db.conn, rows[0].id, false)
            .await
            .unwrap();

        OutboxEmail::mark_skipped(
            &db.conn,
            rows[0].id,
            SkippedReason::UserAccountDeleted,
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let still_sent = OutboxEmail::find_by_id(&db.conn, project_id, email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(still_sent.status(), OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_simple_status() {
        let (db, project_id) = setup().await;
        let first = OutboxEmail::create(&db.conn, project_id, &create_data("a"), Uuid::new_v4())
            .await
            .unwrap();
        let second = OutboxEmail::create(&db.conn, project_id, &create_data("b"), Uuid::new_v4())
            .await
            .unwrap();
        OutboxEmail::update(
            &db.conn,
            project_id,
            second.id(),
            &UpdateOutboxEmail {
                cancel: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let all = OutboxEmail::list(&db.conn, project_id, None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let skipped =
            OutboxEmail::list(&db.conn, project_id, Some(OutboxStatus::Skipped), None)
                .await
                .unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].id(), second.id());

        let in_progress =
            OutboxEmail::list(&db.conn, project_id, None, Some(SimpleStatus::InProgress))
                .await
                .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id(), first.id());
    }

    #[tokio::test]
    async fn claiming_is_exclusive_per_worker() {
        let (db, project_id) = setup().await;
        OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();

        let first = OutboxEmail::claim_for_rendering(&db.conn, Uuid::new_v4(), 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        let second = OutboxEmail::claim_for_rendering(&db.conn, Uuid::new_v4(), 10)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn send_retry_releases_claim_until_backoff_elapses() {
        let (db, project_id) = setup().await;
        let email = OutboxEmail::create(&db.conn, project_id, &create_data("x"), Uuid::new_v4())
            .await
            .unwrap();
        let worker = Uuid::new_v4();
        let claimed = OutboxEmail::claim_for_rendering(&db.conn, worker, 10)
            .await
            .unwrap();
        OutboxEmail::save_rendered(
            &db.conn,
            &claimed[0],
            worker,
            &RenderedContent {
                subject: "S".to_string(),
                html: "<p>x</p>".to_string(),
                text: None,
                notification_category_id: None,
                is_transactional: false,
            },
        )
        .await
        .unwrap();
        OutboxEmail::queue_ready(&db.conn, Utc::now()).await.unwrap();
        let rows = OutboxEmail::claim_for_sending(&db.conn, project_id, 10)
            .await
            .unwrap();

        OutboxEmail::schedule_send_retry(
            &db.conn,
            rows[0].id,
            1,
            Utc::now() + chrono::Duration::seconds(30),
            serde_json::json!([{ "attempt_number": 1 }]),
        )
        .await
        .unwrap();

        // Backoff not elapsed: nothing to queue or claim.
        assert_eq!(OutboxEmail::queue_ready(&db.conn, Utc::now()).await.unwrap(), 0);

        // Once the backoff has passed, the row queues again.
        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(OutboxEmail::queue_ready(&db.conn, later).await.unwrap(), 1);

        let read = OutboxEmail::find_by_id(&db.conn, project_id, email.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.base().send_retries, 1);
        assert_eq!(read.status(), OutboxStatus::Queued);
    }
}
