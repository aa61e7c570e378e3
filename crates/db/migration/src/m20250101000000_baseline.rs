use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Projects::Table)
                    .col(pk_id_col(manager, Projects::Id))
                    .col(uuid_col(Projects::Uuid))
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(uuid_col(Projects::ServerKey))
                    .col(uuid_col(Projects::AdminKey))
                    .col(ColumnDef::new(Projects::BoostExpiresAt).timestamp())
                    .col(timestamp_col(Projects::CreatedAt))
                    .col(timestamp_col(Projects::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_projects_uuid")
                    .table(Projects::Table)
                    .col(Projects::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_projects_server_key")
                    .table(Projects::Table)
                    .col(Projects::ServerKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_projects_admin_key")
                    .table(Projects::Table)
                    .col(Projects::AdminKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(ProjectUsers::Table)
                    .col(pk_id_col(manager, ProjectUsers::Id))
                    .col(uuid_col(ProjectUsers::Uuid))
                    .col(fk_id_col(manager, ProjectUsers::ProjectId))
                    .col(ColumnDef::new(ProjectUsers::DisplayName).string())
                    .col(ColumnDef::new(ProjectUsers::PrimaryEmail).string())
                    .col(
                        ColumnDef::new(ProjectUsers::UnsubscribedCategoryIds)
                            .json_binary()
                            .not_null(),
                    )
                    .col(timestamp_col(ProjectUsers::CreatedAt))
                    .col(timestamp_col(ProjectUsers::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_users_project")
                            .from(ProjectUsers::Table, ProjectUsers::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_project_users_project_uuid")
                    .table(ProjectUsers::Table)
                    .col(ProjectUsers::ProjectId)
                    .col(ProjectUsers::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(EmailDrafts::Table)
                    .col(pk_id_col(manager, EmailDrafts::Id))
                    .col(uuid_col(EmailDrafts::Uuid))
                    .col(fk_id_col(manager, EmailDrafts::ProjectId))
                    .col(ColumnDef::new(EmailDrafts::DisplayName).string().not_null())
                    .col(ColumnDef::new(EmailDrafts::TsxSource).text().not_null())
                    .col(uuid_nullable_col(EmailDrafts::ThemeId))
                    .col(ColumnDef::new(EmailDrafts::SentAt).timestamp())
                    .col(timestamp_col(EmailDrafts::CreatedAt))
                    .col(timestamp_col(EmailDrafts::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_drafts_project")
                            .from(EmailDrafts::Table, EmailDrafts::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_email_drafts_project_uuid")
                    .table(EmailDrafts::Table)
                    .col(EmailDrafts::ProjectId)
                    .col(EmailDrafts::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(OutboxEmails::Table)
                    .col(pk_id_col(manager, OutboxEmails::Id))
                    .col(uuid_col(OutboxEmails::Uuid))
                    .col(fk_id_col(manager, OutboxEmails::ProjectId))
                    .col(ColumnDef::new(OutboxEmails::Recipient).json_binary().not_null())
                    .col(ColumnDef::new(OutboxEmails::TsxSource).text().not_null())
                    .col(uuid_nullable_col(OutboxEmails::ThemeId))
                    .col(ColumnDef::new(OutboxEmails::Variables).json_binary().not_null())
                    .col(ColumnDef::new(OutboxEmails::OverrideSubject).string())
                    .col(uuid_nullable_col(OutboxEmails::OverrideNotificationCategoryId))
                    .col(bool_col(OutboxEmails::IsPaused))
                    .col(bool_col(OutboxEmails::IsQueued))
                    .col(bool_col(OutboxEmails::SkipDeliverabilityCheck))
                    .col(timestamp_col(OutboxEmails::ScheduledAt))
                    .col(
                        ColumnDef::new(OutboxEmails::Priority)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(uuid_nullable_col(OutboxEmails::RenderingWorkerId))
                    .col(ColumnDef::new(OutboxEmails::StartedRenderingAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::FinishedRenderingAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::RenderedSubject).string())
                    .col(ColumnDef::new(OutboxEmails::RenderedHtml).text())
                    .col(ColumnDef::new(OutboxEmails::RenderedText).text())
                    .col(uuid_nullable_col(OutboxEmails::RenderedNotificationCategoryId))
                    .col(ColumnDef::new(OutboxEmails::RenderedIsTransactional).boolean())
                    .col(ColumnDef::new(OutboxEmails::RenderErrorMessage).text())
                    .col(ColumnDef::new(OutboxEmails::RenderErrorDetails).json_binary())
                    .col(ColumnDef::new(OutboxEmails::StartedSendingAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::FinishedSendingAt).timestamp())
                    .col(
                        ColumnDef::new(OutboxEmails::SendRetries)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(ColumnDef::new(OutboxEmails::NextSendRetryAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::SendAttemptErrors).json_binary())
                    .col(ColumnDef::new(OutboxEmails::SendErrorMessage).text())
                    .col(ColumnDef::new(OutboxEmails::SendErrorDetails).json_binary())
                    .col(ColumnDef::new(OutboxEmails::CanHaveDeliveryInfo).boolean())
                    .col(ColumnDef::new(OutboxEmails::DeliveredAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::BouncedAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::MarkedAsSpamAt).timestamp())
                    .col(ColumnDef::new(OutboxEmails::SkippedReason).string_len(64))
                    .col(ColumnDef::new(OutboxEmails::SkippedDetails).json_binary())
                    .col(
                        ColumnDef::new(OutboxEmails::Status)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("preparing")),
                    )
                    .col(
                        ColumnDef::new(OutboxEmails::SimpleStatus)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("in-progress")),
                    )
                    .col(timestamp_col(OutboxEmails::CreatedAt))
                    .col(timestamp_col(OutboxEmails::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_outbox_emails_project")
                            .from(OutboxEmails::Table, OutboxEmails::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_outbox_emails_project_uuid")
                    .table(OutboxEmails::Table)
                    .col(OutboxEmails::ProjectId)
                    .col(OutboxEmails::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_outbox_emails_project_status")
                    .table(OutboxEmails::Table)
                    .col(OutboxEmails::ProjectId)
                    .col(OutboxEmails::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_outbox_emails_render_claim")
                    .table(OutboxEmails::Table)
                    .col(OutboxEmails::RenderingWorkerId)
                    .col(OutboxEmails::IsPaused)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_outbox_emails_send_claim")
                    .table(OutboxEmails::Table)
                    .col(OutboxEmails::ProjectId)
                    .col(OutboxEmails::IsQueued)
                    .col(OutboxEmails::StartedSendingAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_outbox_emails_finished_sending_at")
                    .table(OutboxEmails::Table)
                    .col(OutboxEmails::ProjectId)
                    .col(OutboxEmails::FinishedSendingAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxEmails::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailDrafts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProjectUsers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn pk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().auto_increment().primary_key().to_owned()
}

fn fk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().to_owned()
}

fn uuid_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().not_null().to_owned()
}

fn uuid_nullable_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().to_owned()
}

fn timestamp_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

fn bool_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .boolean()
        .not_null()
        .default(Expr::val(false))
        .to_owned()
}

#[derive(Iden)]
enum Projects {
    Table,
    Id,
    Uuid,
    Name,
    ServerKey,
    AdminKey,
    BoostExpiresAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum ProjectUsers {
    Table,
    Id,
    Uuid,
    ProjectId,
    DisplayName,
    PrimaryEmail,
    UnsubscribedCategoryIds,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum EmailDrafts {
    Table,
    Id,
    Uuid,
    ProjectId,
    DisplayName,
    TsxSource,
    ThemeId,
    SentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum OutboxEmails {
    Table,
    Id,
    Uuid,
    ProjectId,
    Recipient,
    TsxSource,
    ThemeId,
    Variables,
    OverrideSubject,
    OverrideNotificationCategoryId,
    IsPaused,
    IsQueued,
    SkipDeliverabilityCheck,
    ScheduledAt,
    Priority,
    RenderingWorkerId,
    StartedRenderingAt,
    FinishedRenderingAt,
    RenderedSubject,
    RenderedHtml,
    RenderedText,
    RenderedNotificationCategoryId,
    RenderedIsTransactional,
    RenderErrorMessage,
    RenderErrorDetails,
    StartedSendingAt,
    FinishedSendingAt,
    SendRetries,
    NextSendRetryAt,
    SendAttemptErrors,
    SendErrorMessage,
    SendErrorDetails,
    CanHaveDeliveryInfo,
    DeliveredAt,
    BouncedAt,
    MarkedAsSpamAt,
    SkippedReason,
    SkippedDetails,
    Status,
    SimpleStatus,
    CreatedAt,
    UpdatedAt,
}
