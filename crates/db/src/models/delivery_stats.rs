use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::entities::outbox_email;

/// Counters for one rolling window, bucketed by `finished_sending_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub sent: u64,
    pub bounced: u64,
    pub marked_as_spam: u64,
}

/// Rolling hour/day/week/month delivery counters for one project. Derived on
/// read; nothing here is stored as a mutable aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub hour: WindowStats,
    pub day: WindowStats,
    pub week: WindowStats,
    pub month: WindowStats,
}

async fn window<C: ConnectionTrait>(
    db: &C,
    project_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<WindowStats, DbErr> {
    let base = || {
        outbox_email::Entity::find()
            .filter(outbox_email::Column::ProjectId.eq(project_id))
            .filter(outbox_email::Column::FinishedSendingAt.gte(cutoff))
    };

    let sent = base()
        .filter(outbox_email::Column::SendErrorMessage.is_null())
        .filter(outbox_email::Column::SkippedReason.is_null())
        .count(db)
        .await?;
    let bounced = base()
        .filter(outbox_email::Column::BouncedAt.is_not_null())
        .count(db)
        .await?;
    let marked_as_spam = base()
        .filter(outbox_email::Column::MarkedAsSpamAt.is_not_null())
        .count(db)
        .await?;

    Ok(WindowStats {
        sent,
        bounced,
        marked_as_spam,
    })
}

impl DeliveryStats {
    pub async fn for_project<C: ConnectionTrait>(
        db: &C,
        project_id: i64,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        Ok(Self {
            hour: window(db, project_id, now - Duration::hours(1)).await?,
            day: window(db, project_id, now - Duration::days(1)).await?,
            week: window(db, project_id, now - Duration::weeks(1)).await?,
            month: window(db, project_id, now - Duration::days(30)).await?,
        })
    }
}
