use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect};
use uuid::Uuid;

use crate::entities::{project, project_user};

pub async fn project_id_by_uuid<C: ConnectionTrait>(
    db: &C,
    uuid: Uuid,
) -> Result<Option<i64>, DbErr> {
    project::Entity::find()
        .select_only()
        .column(project::Column::Id)
        .filter(project::Column::Uuid.eq(uuid))
        .into_tuple()
        .one(db)
        .await
}

pub async fn project_uuid_by_id<C: ConnectionTrait>(
    db: &C,
    id: i64,
) -> Result<Option<Uuid>, DbErr> {
    project::Entity::find()
        .select_only()
        .column(project::Column::Uuid)
        .filter(project::Column::Id.eq(id))
        .into_tuple()
        .one(db)
        .await
}

pub async fn user_id_by_uuid<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    uuid: Uuid,
) -> Result<Option<i64>, DbErr> {
    project_user::Entity::find()
        .select_only()
        .column(project_user::Column::Id)
        .filter(project_user::Column::ProjectId.eq(project_id))
        .filter(project_user::Column::Uuid.eq(uuid))
        .into_tuple()
        .one(db)
        .await
}
