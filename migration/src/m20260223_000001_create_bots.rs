use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bots::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bots::Id).integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new(Bots::Name).string_len(120).not_null())
                    .col(ColumnDef::new(Bots::Symbols).json().not_null())
                    .col(ColumnDef::new(Bots::Timeframe).string_len(20).not_null())
                    .col(ColumnDef::new(Bots::PaperMode).boolean().not_null().default(true))
                    .col(ColumnDef::new(Bots::Strategy).string_len(120).not_null())
                    .col(ColumnDef::new(Bots::Knobs).json().not_null())
                    .col(ColumnDef::new(Bots::Status).string_len(32).not_null().default("stopped"))
                    .col(ColumnDef::new(Bots::StopRequested).boolean().not_null().default(false))
                    .col(
                        ColumnDef::new(Bots::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Bots::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("ix_bots_status")
                    .table(Bots::Table)
                    .col(Bots::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Bots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Bots {
    Table,
    Id,
    Name,
    Symbols,
    Timeframe,
    PaperMode,
    Strategy,
    Knobs,
    Status,
    StopRequested,
    CreatedAt,
    UpdatedAt,
}
