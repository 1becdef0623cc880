//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// JSON array of "BASE/QUOTE" strings
    pub symbols: Json,
    pub timeframe: String,
    pub paper_mode: bool,
    pub strategy: String,
    /// Free-form tuning knobs (fee_rate, stake_amount, ...)
    pub knobs: Json,
    pub status: String, // "stopped" or "running"
    pub stop_requested: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::trades::Entity")]
    Trades,
    #[sea_orm(has_many = "super::jobs::Entity")]
    Jobs,
    #[sea_orm(has_many = "super::portfolio_snapshots::Entity")]
    PortfolioSnapshots,
}

impl Related<super::trades::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trades.def()
    }
}

impl Related<super::jobs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Jobs.def()
    }
}

impl Related<super::portfolio_snapshots::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PortfolioSnapshots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
