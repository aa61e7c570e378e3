use db::{
    ConnectionTrait, DatabaseError,
    models::project_user::ProjectUser,
    types::{Recipient, SkippedReason},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::services::categories;

/// Domain whose addresses are treated as undeliverable when no external
/// verification service is wired up; lets tests exercise the
/// `LIKELY_NOT_DELIVERABLE` skip path deterministically.
pub const UNDELIVERABLE_TEST_DOMAIN: &str = "undeliverable.example.com";

/// Outcome of send-time recipient resolution. A `Skip` is a legitimate
/// terminal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Send { emails: Vec<String> },
    Skip { reason: SkippedReason, details: Value },
}

impl Resolution {
    fn skip(reason: SkippedReason) -> Self {
        Resolution::Skip {
            reason,
            details: json!({}),
        }
    }
}

/// Resolves a recipient to concrete addresses at the moment of sending, so
/// state changed after queuing (deleted user, removed email, opt-out) is
/// honored. Evaluation order: existence, contact channel, suppression,
/// deliverability.
pub async fn resolve<C: ConnectionTrait>(
    db: &C,
    project_row_id: i64,
    recipient: &Recipient,
    notification_category_id: Option<Uuid>,
    skip_deliverability_check: bool,
) -> Result<Resolution, DatabaseError> {
    let (emails, user) = match recipient {
        Recipient::CustomEmails { emails } => {
            if emails.is_empty() {
                return Ok(Resolution::skip(SkippedReason::NoEmailProvided));
            }
            (emails.clone(), None)
        }
        Recipient::UserPrimaryEmail { user_id } => {
            let Some(user) = ProjectUser::find_by_id(db, project_row_id, *user_id).await? else {
                return Ok(Resolution::skip(SkippedReason::UserAccountDeleted));
            };
            let Some(primary_email) = user.primary_email.clone() else {
                return Ok(Resolution::skip(SkippedReason::UserHasNoPrimaryEmail));
            };
            (vec![primary_email], Some(user))
        }
    };

    if let (Some(category_id), Some(user)) = (notification_category_id, &user) {
        let suppressible = categories::by_id(category_id).is_some_and(|c| c.can_disable);
        if suppressible && user.is_unsubscribed_from(category_id) {
            return Ok(Resolution::skip(SkippedReason::UserUnsubscribed));
        }
    }

    if !skip_deliverability_check {
        for email in &emails {
            let domain = email.rsplit('@').next().map(str::to_ascii_lowercase);
            if domain.as_deref() == Some(UNDELIVERABLE_TEST_DOMAIN) {
                return Ok(Resolution::Skip {
                    reason: SkippedReason::LikelyNotDeliverable,
                    details: json!({ "email": email }),
                });
            }
        }
    }

    Ok(Resolution::Send { emails })
}

#[cfg(test)]
mod tests {
    use db::{
        DbService,
        models::{
            ids,
            project::{CreateProject, Project},
            project_user::{CreateProjectUser, ProjectUser, UpdateProjectUser},
        },
    };

    use super::*;

    async fn setup() -> (DbService, i64) {
        let db = DbService::new_in_memory().await.unwrap();
        let project = Project::create(
            &db.conn,
            &CreateProject {
                name: "Recipients".to_string(),
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

    #[tokio::test]
    async fn deleted_user_resolves_to_account_deleted_skip() {
        let (db, project_id) = setup().await;
        let resolution = resolve(
            &db.conn,
            project_id,
            &Recipient::UserPrimaryEmail {
                user_id: Uuid::new_v4(),
            },
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(
            resolution,
            Resolution::skip(SkippedReason::UserAccountDeleted)
        );
    }

    #[tokio::test]
    async fn user_without_primary_email_skips() {
        let (db, project_id) = setup().await;
        let user = ProjectUser::create(
            &db.conn,
            project_id,
            &CreateProjectUser::default(),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let resolution = resolve(
            &db.conn,
            project_id,
            &Recipient::UserPrimaryEmail { user_id: user.id },
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(
            resolution,
            Resolution::skip(SkippedReason::UserHasNoPrimaryEmail)
        );
    }

    #[tokio::test]
    async fn unsubscribed_user_skips_only_for_suppressible_categories() {
        let (db, project_id) = setup().await;
        let user = ProjectUser::create(
            &db.conn,
            project_id,
            &CreateProjectUser {
                primary_email: Some("u@example.com".to_string()),
                ..Default::default()
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let marketing = categories::by_name("Marketing").unwrap();
        let transactional = categories::by_name("Transactional").unwrap();
        ProjectUser::update(
            &db.conn,
            project_id,
            user.id,
            &UpdateProjectUser {
                unsubscribed_category_ids: Some(vec![marketing.id, transactional.id]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let recipient = Recipient::UserPrimaryEmail { user_id: user.id };

        let resolution = resolve(&db.conn, project_id, &recipient, Some(marketing.id), false)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::skip(SkippedReason::UserUnsubscribed));

        // Transactional is exempt even with an explicit opt-out on record.
        let resolution = resolve(
            &db.conn,
            project_id,
            &recipient,
            Some(transactional.id),
            false,
        )
        .await
        .unwrap();
        assert_eq!(
            resolution,
            Resolution::Send {
                emails: vec!["u@example.com".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn empty_custom_list_and_test_domain_skip() {
        let (db, project_id) = setup().await;
        let resolution = resolve(
            &db.conn,
            project_id,
            &Recipient::CustomEmails { emails: vec![] },
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(resolution, Resolution::skip(SkippedReason::NoEmailProvided));

        let addr = format!("x@{UNDELIVERABLE_TEST_DOMAIN}");
        let resolution = resolve(
            &db.conn,
            project_id,
            &Recipient::CustomEmails {
                emails: vec![addr.clone()],
            },
            None,
            false,
        )
        .await
        .unwrap();
        match resolution {
            Resolution::Skip { reason, details } => {
                assert_eq!(reason, SkippedReason::LikelyNotDeliverable);
                assert_eq!(details["email"], addr);
            }
            other => panic!("expected skip, got {other:?}"),
        }

        // The skip_deliverability_check flag bypasses the verification.
        let resolution = resolve(
            &db.conn,
            project_id,
            &Recipient::CustomEmails { emails: vec![addr] },
            None,
            true,
        )
        .await
        .unwrap();
        assert!(matches!(resolution, Resolution::Send { .. }));
    }
}
