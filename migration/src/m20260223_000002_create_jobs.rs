use sea_orm_migration::prelude::*;

use crate::m20260223_000001_create_bots::Bots;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Jobs::Id).integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new(Jobs::BotId).integer().null())
                    .col(ColumnDef::new(Jobs::Task).string_len(64).not_null())
                    .col(ColumnDef::new(Jobs::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Jobs::Progress).integer().not_null().default(0))
                    .col(ColumnDef::new(Jobs::Message).text().null())
                    .col(ColumnDef::new(Jobs::RequestId).string_len(128).null())
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Jobs::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_jobs_bot")
                            .from(Jobs::Table, Jobs::BotId)
                            .to(Bots::Table, Bots::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("ix_jobs_bot_status")
                    .table(Jobs::Table)
                    .col(Jobs::BotId)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("ix_jobs_request_id")
                    .table(Jobs::Table)
                    .col(Jobs::RequestId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    BotId,
    Task,
    Status,
    Progress,
    Message,
    RequestId,
    CreatedAt,
    UpdatedAt,
}
