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
                    .table(Trades::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Trades::Id).integer().not_null().auto_increment().primary_key())
                    .col(ColumnDef::new(Trades::BotId).integer().null())
                    .col(ColumnDef::new(Trades::Symbol).string_len(30).not_null())
                    .col(ColumnDef::new(Trades::Side).string_len(8).not_null())
                    .col(ColumnDef::new(Trades::Amount).double().not_null())
                    .col(ColumnDef::new(Trades::Price).double().not_null())
                    .col(ColumnDef::new(Trades::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Trades::Pnl).double().null())
                    .col(ColumnDef::new(Trades::CostBasisQuote).double().not_null().default(0.0))
                    .col(ColumnDef::new(Trades::FeesPaidQuote).double().not_null().default(0.0))
                    .col(ColumnDef::new(Trades::UnrealizedPnlQuote).double().null())
                    .col(ColumnDef::new(Trades::RealizedPnlQuote).double().null())
                    .col(ColumnDef::new(Trades::ClosedAt).timestamp().null())
                    .col(
                        ColumnDef::new(Trades::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trades_bot")
                            .from(Trades::Table, Trades::BotId)
                            .to(Bots::Table, Bots::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("ix_trades_bot_status")
                    .table(Trades::Table)
                    .col(Trades::BotId)
                    .col(Trades::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("ix_trades_bot_created_at")
                    .table(Trades::Table)
                    .col(Trades::BotId)
                    .col(Trades::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PortfolioSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PortfolioSnapshots::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PortfolioSnapshots::BotId).integer().null())
                    .col(ColumnDef::new(PortfolioSnapshots::Equity).double().not_null())
                    .col(ColumnDef::new(PortfolioSnapshots::Cash).double().not_null())
                    .col(ColumnDef::new(PortfolioSnapshots::PositionsValue).double().not_null())
                    .col(
                        ColumnDef::new(PortfolioSnapshots::Timestamp)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_portfolio_snapshots_bot")
                            .from(PortfolioSnapshots::Table, PortfolioSnapshots::BotId)
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
                    .name("ix_portfolio_snapshots_bot_timestamp")
                    .table(PortfolioSnapshots::Table)
                    .col(PortfolioSnapshots::BotId)
                    .col(PortfolioSnapshots::Timestamp)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PortfolioSnapshots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Trades::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Trades {
    Table,
    Id,
    BotId,
    Symbol,
    Side,
    Amount,
    Price,
    Status,
    Pnl,
    CostBasisQuote,
    FeesPaidQuote,
    UnrealizedPnlQuote,
    RealizedPnlQuote,
    ClosedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum PortfolioSnapshots {
    Table,
    Id,
    BotId,
    Equity,
    Cash,
    PositionsValue,
    Timestamp,
}
