use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{entities::project_user, models::ids};

#[derive(Debug, Error)]
pub enum ProjectUserError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("User not found")]
    UserNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectUser {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub primary_email: Option<String>,
    pub unsubscribed_category_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProjectUser {
    pub display_name: Option<String>,
    pub primary_email: Option<String>,
}

/// PATCH payload. Double-`Option` distinguishes "leave unchanged" (absent)
/// from "set to null" (explicit null), which is how a primary email is
/// removed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectUser {
    #[serde(default, deserialize_with = "utils::serde_ext::double_option")]
    pub display_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "utils::serde_ext::double_option")]
    pub primary_email: Option<Option<String>>,
    pub unsubscribed_category_ids: Option<Vec<Uuid>>,
}

impl ProjectUser {
    fn from_model(model: project_user::Model) -> Self {
        let unsubscribed_category_ids =
            serde_json::from_value(model.unsubscribed_category_ids).unwrap_or_default();
        Self {
            id: model.uuid,
            display_name: model.display_name,
            primary_email: model.primary_email,
            unsubscribed_category_ids,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        data: &CreateProjectUser,
        user_id: Uuid,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let active = project_user::ActiveModel {
            uuid: Set(user_id),
            project_id: Set(project_id),
            display_name: Set(data.display_name.clone()),
            primary_email: Set(data.primary_email.clone()),
            unsubscribed_category_ids: Set(serde_json::json!([])),
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
        let record = project_user::Entity::find()
            .filter(project_user::Column::ProjectId.eq(project_id))
            .filter(project_user::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_all<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
    ) -> Result<Vec<Self>, DbErr> {
        let records = project_user::Entity::find()
            .filter(project_user::Column::ProjectId.eq(project_id))
            .order_by_desc(project_user::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        id: Uuid,
        data: &UpdateProjectUser,
    ) -> Result<Self, ProjectUserError> {
        let record = project_user::Entity::find()
            .filter(project_user::Column::ProjectId.eq(project_id))
            .filter(project_user::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(ProjectUserError::UserNotFound)?;

        let mut active: project_user::ActiveModel = record.into();
        if let Some(display_name) = &data.display_name {
            active.display_name = Set(display_name.clone());
        }
        if let Some(primary_email) = &data.primary_email {
            active.primary_email = Set(primary_email.clone());
        }
        if let Some(categories) = &data.unsubscribed_category_ids {
            active.unsubscribed_category_ids =
                Set(serde_json::to_value(categories).map_err(|e| DbErr::Custom(e.to_string()))?);
        }
        active.updated_at = Set(Utc::now().into());
        let model = active.update(db).await?;
        Ok(Self::from_model(model))
    }

    pub async fn delete<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
        id: Uuid,
    ) -> Result<(), ProjectUserError> {
        let user_id = ids::user_id_by_uuid(db, project_id, id)
            .await?
            .ok_or(ProjectUserError::UserNotFound)?;
        project_user::Entity::delete_by_id(user_id).exec(db).await?;
        Ok(())
    }

    pub fn is_unsubscribed_from(&self, category_id: Uuid) -> bool {
        self.unsubscribed_category_ids.contains(&category_id)
    }
}
