use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Detailed lifecycle state of an outbox email. Stored denormalized on the
/// row (kept in sync by every mutation path) so list filters can run in SQL;
/// the row's phase columns remain the source of truth.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OutboxStatus {
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "rendering")]
    Rendering,
    #[sea_orm(string_value = "render-error")]
    RenderError,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "sending")]
    Sending,
    #[sea_orm(string_value = "server-error")]
    ServerError,
    #[sea_orm(string_value = "paused")]
    Paused,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "skipped")]
    Skipped,
}

impl OutboxStatus {
    /// States in which a PATCH is accepted. Everything else fails with
    /// `EMAIL_NOT_EDITABLE` before field validation runs.
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            OutboxStatus::Paused
                | OutboxStatus::Preparing
                | OutboxStatus::Rendering
                | OutboxStatus::RenderError
                | OutboxStatus::Scheduled
                | OutboxStatus::Queued
                | OutboxStatus::ServerError
        )
    }

    pub fn simple(self) -> SimpleStatus {
        match self {
            OutboxStatus::Preparing
            | OutboxStatus::Rendering
            | OutboxStatus::Scheduled
            | OutboxStatus::Queued
            | OutboxStatus::Sending
            | OutboxStatus::Paused => SimpleStatus::InProgress,
            OutboxStatus::Sent | OutboxStatus::Skipped => SimpleStatus::Ok,
            OutboxStatus::RenderError | OutboxStatus::ServerError => SimpleStatus::Error,
        }
    }
}

/// Coarse three-way projection of [`OutboxStatus`] for dashboard filtering.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SimpleStatus {
    #[sea_orm(string_value = "in-progress")]
    InProgress,
    #[sea_orm(string_value = "ok")]
    Ok,
    #[sea_orm(string_value = "error")]
    Error,
}

/// Why a skipped email was not sent. Skipping is a legitimate terminal
/// outcome of async drift between queuing and sending, not an error.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SkippedReason {
    #[sea_orm(string_value = "MANUALLY_CANCELLED")]
    ManuallyCancelled,
    #[sea_orm(string_value = "USER_HAS_NO_PRIMARY_EMAIL")]
    UserHasNoPrimaryEmail,
    #[sea_orm(string_value = "USER_ACCOUNT_DELETED")]
    UserAccountDeleted,
    #[sea_orm(string_value = "USER_UNSUBSCRIBED")]
    UserUnsubscribed,
    #[sea_orm(string_value = "NO_EMAIL_PROVIDED")]
    NoEmailProvided,
    #[sea_orm(string_value = "LIKELY_NOT_DELIVERABLE")]
    LikelyNotDeliverable,
}

/// Delivery target of an outbox email, stored as tagged JSON on the row.
/// `UserPrimaryEmail` is resolved to an address at send time, not at queue
/// time, so recipient state changed after queuing is honored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Recipient {
    UserPrimaryEmail {
        user_id: Uuid,
    },
    CustomEmails {
        emails: Vec<String>,
    },
}

impl Recipient {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Recipient::UserPrimaryEmail { user_id } => Some(*user_id),
            Recipient::CustomEmails { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_kebab_case() {
        assert_eq!(OutboxStatus::RenderError.to_string(), "render-error");
        assert_eq!(SimpleStatus::InProgress.to_string(), "in-progress");
        assert_eq!(
            "server-error".parse::<OutboxStatus>().unwrap(),
            OutboxStatus::ServerError
        );
    }

    #[test]
    fn skipped_reasons_serialize_screaming_snake() {
        assert_eq!(
            SkippedReason::UserHasNoPrimaryEmail.to_string(),
            "USER_HAS_NO_PRIMARY_EMAIL"
        );
    }

    #[test]
    fn terminal_states_are_not_editable() {
        assert!(!OutboxStatus::Sent.is_editable());
        assert!(!OutboxStatus::Skipped.is_editable());
        assert!(!OutboxStatus::Sending.is_editable());
        assert!(OutboxStatus::Paused.is_editable());
        assert!(OutboxStatus::ServerError.is_editable());
    }

    #[test]
    fn recipient_json_is_tagged() {
        let recipient = Recipient::CustomEmails {
            emails: vec!["a@example.com".to_string()],
        };
        let json = serde_json::to_value(&recipient).unwrap();
        assert_eq!(json["type"], "custom-emails");
        assert_eq!(json["emails"][0], "a@example.com");

        let user = serde_json::json!({ "type": "user-primary-email", "user_id": Uuid::new_v4() });
        assert!(matches!(
            serde_json::from_value::<Recipient>(user).unwrap(),
            Recipient::UserPrimaryEmail { .. }
        ));
    }
}
