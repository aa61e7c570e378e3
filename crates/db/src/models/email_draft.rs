use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::email_draft;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub id: Uuid,
    pub display_name: String,
    pub tsx_source: String,
    pub theme_id: Option<Uuid>,
    pub sent_at_millis: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEmailDraft {
    pub display_name: String,
    pub tsx_source: String,
    pub theme_id: Option<Uuid>,
}

impl EmailDraft {
    fn from_model(model: email_draft::Model) -> Self {
        Self {
            id: model.uuid,
            display_name: model.display_name,
            tsx_source: model.tsx_source,
            theme_id: model.theme_id,
            sent_at_millis: model.sent_at.map(|ts| DateTime::<Utc>::from(ts).timestamp_millis()),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        data: &CreateEmailDraft,
        draft_id: Uuid,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let active = email_draft::ActiveModel {
            uuid: Set(draft_id),
            project_id: Set(project_id),
            display_name: Set(data.display_name.clone()),
            tsx_source: Set(data.tsx_source.clone()),
            theme_id: Set(data.theme_id),
            sent_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let record = email_draft::Entity::find()
            .filter(email_draft::Column::ProjectId.eq(project_id))
            .filter(email_draft::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_all<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
    ) -> Result<Vec<Self>, DbErr> {
        let records = email_draft::Entity::find()
            .filter(email_draft::Column::ProjectId.eq(project_id))
            .order_by_desc(email_draft::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    /// Stamps the first time the draft was used to send an email.
    pub async fn mark_sent<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        id: Uuid,
    ) -> Result<(), DbErr> {
        let record = email_draft::Entity::find()
            .filter(email_draft::Column::ProjectId.eq(project_id))
            .filter(email_draft::Column::Uuid.eq(id))
            .one(db)
            .await?;
        if let Some(record) = record {
            if record.sent_at.is_none() {
                let mut active: email_draft::ActiveModel = record.into();
                active.sent_at = Set(Some(Utc::now().into()));
                active.update(db).await?;
            }
        }
        Ok(())
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

    #[tokio::test]
    async fn draft_round_trips_source_verbatim() {
        let db = DbService::new_in_memory().await.unwrap();
        let project = Project::create(
            &db.conn,
            &CreateProject {
                name: "Drafts".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let project_id = ids::project_id_by_uuid(&db.conn, project.id)
            .await
            .unwrap()
            .unwrap();

        let source = "line one\n\t indented\nline three";
        let draft = EmailDraft::create(
            &db.conn,
            project_id,
            &CreateEmailDraft {
                display_name: "Welcome".to_string(),
                tsx_source: source.to_string(),
                theme_id: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let read = EmailDraft::find_by_id(&db.conn, project_id, draft.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.tsx_source, source);
        assert!(read.sent_at_millis.is_none());

        EmailDraft::mark_sent(&db.conn, project_id, draft.id)
            .await
            .unwrap();
        let read = EmailDraft::find_by_id(&db.conn, project_id, draft.id)
            .await
            .unwrap()
            .unwrap();
        assert!(read.sent_at_millis.is_some());
    }
}
