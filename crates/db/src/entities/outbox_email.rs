use sea_orm::{JsonValue, entity::prelude::*};

use crate::types::{OutboxStatus, SimpleStatus, SkippedReason};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "outbox_emails")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub uuid: Uuid,
    pub project_id: i64,

    /// Tagged JSON, see [`crate::types::Recipient`].
    pub recipient: JsonValue,

    pub tsx_source: String,
    pub theme_id: Option<Uuid>,
    pub variables: JsonValue,
    pub override_subject: Option<String>,
    pub override_notification_category_id: Option<Uuid>,

    pub is_paused: bool,
    pub is_queued: bool,
    pub skip_deliverability_check: bool,
    pub scheduled_at: DateTimeUtc,
    pub priority: i32,

    pub rendering_worker_id: Option<Uuid>,
    pub started_rendering_at: Option<DateTimeUtc>,
    pub finished_rendering_at: Option<DateTimeUtc>,
    pub rendered_subject: Option<String>,
    pub rendered_html: Option<String>,
    pub rendered_text: Option<String>,
    pub rendered_notification_category_id: Option<Uuid>,
    pub rendered_is_transactional: Option<bool>,
    pub render_error_message: Option<String>,
    pub render_error_details: Option<JsonValue>,

    pub started_sending_at: Option<DateTimeUtc>,
    pub finished_sending_at: Option<DateTimeUtc>,
    pub send_retries: i32,
    pub next_send_retry_at: Option<DateTimeUtc>,
    pub send_attempt_errors: Option<JsonValue>,
    pub send_error_message: Option<String>,
    pub send_error_details: Option<JsonValue>,
    pub can_have_delivery_info: Option<bool>,
    pub delivered_at: Option<DateTimeUtc>,
    pub bounced_at: Option<DateTimeUtc>,
    pub marked_as_spam_at: Option<DateTimeUtc>,

    pub skipped_reason: Option<SkippedReason>,
    pub skipped_details: Option<JsonValue>,

    pub status: OutboxStatus,
    pub simple_status: SimpleStatus,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
