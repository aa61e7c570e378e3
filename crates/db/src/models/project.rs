use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ExprTrait, QueryFilter, Set,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entities::project;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    ProjectNotFound,
    #[error("A capacity boost is already active for this project")]
    BoostAlreadyActive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub server_key: Uuid,
    pub admin_key: Uuid,
    pub boost_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
}

/// Access level granted by the key a request presented. Admin implies server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Server,
    Admin,
}

impl Project {
    fn from_model(model: project::Model) -> Self {
        Self {
            id: model.uuid,
            name: model.name,
            server_key: model.server_key,
            admin_key: model.admin_key,
            boost_expires_at: model.boost_expires_at.map(Into::into),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateProject,
        project_id: Uuid,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let active = project::ActiveModel {
            uuid: Set(project_id),
            name: Set(data.name.clone()),
            server_key: Set(Uuid::new_v4()),
            admin_key: Set(Uuid::new_v4()),
            boost_expires_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = project::Entity::find()
            .filter(project::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    /// Resolves an access key to its project and the level it grants.
    pub async fn find_by_access_key<C: ConnectionTrait>(
        db: &C,
        key: Uuid,
    ) -> Result<Option<(Self, AccessLevel)>, DbErr> {
        let record = project::Entity::find()
            .filter(
                project::Column::ServerKey
                    .eq(key)
                    .or(project::Column::AdminKey.eq(key)),
            )
            .one(db)
            .await?;
        Ok(record.map(|model| {
            let level = if model.admin_key == key {
                AccessLevel::Admin
            } else {
                AccessLevel::Server
            };
            (Self::from_model(model), level)
        }))
    }

    pub fn is_boost_active(&self, now: DateTime<Utc>) -> bool {
        self.boost_expires_at.is_some_and(|expires| expires > now)
    }

    /// Activates the capacity boost with a compare-and-swap on
    /// `boost_expires_at`: the update only matches when no unexpired boost
    /// exists, so two concurrent activations cannot both succeed.
    pub async fn activate_boost<C: ConnectionTrait>(
        &self,
        db: &C,
        duration: Duration,
    ) -> Result<DateTime<Utc>, ProjectError> {
        let now = Utc::now();
        let expires_at = now + duration;
        let result = project::Entity::update_many()
            .col_expr(
                project::Column::BoostExpiresAt,
                Expr::value(sea_orm::Value::from(expires_at)),
            )
            .col_expr(
                project::Column::UpdatedAt,
                Expr::value(sea_orm::Value::from(now)),
            )
            .filter(project::Column::Uuid.eq(self.id))
            .filter(
                project::Column::BoostExpiresAt
                    .is_null()
                    .or(project::Column::BoostExpiresAt.lte(now)),
            )
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            // Either the project vanished or a boost is still running;
            // re-read to tell the two apart.
            match Self::find_by_id(db, self.id).await? {
                Some(project) if project.is_boost_active(now) => {
                    Err(ProjectError::BoostAlreadyActive)
                }
                Some(_) => Err(ProjectError::Database(DbErr::Custom(
                    "boost activation matched no rows".to_string(),
                ))),
                None => Err(ProjectError::ProjectNotFound),
            }
        } else {
            Ok(expires_at)
        }
    }

    /// Current boost expiry as stored, without filtering out expired values;
    /// callers compare against the clock.
    pub async fn boost_expires_at<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, DbErr> {
        Ok(Self::find_by_id(db, id).await?.and_then(|p| p.boost_expires_at))
    }
}
