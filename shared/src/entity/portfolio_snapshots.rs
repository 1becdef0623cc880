//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

/// Append-only valuation time series; `bot_id = NULL` denotes a global snapshot.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "portfolio_snapshots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub bot_id: Option<i32>,
    #[sea_orm(column_type = "Double")]
    pub equity: f64,
    #[sea_orm(column_type = "Double")]
    pub cash: f64,
    #[sea_orm(column_type = "Double")]
    pub positions_value: f64,
    pub timestamp: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bots::Entity",
        from = "Column::BotId",
        to = "super::bots::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    Bots,
}

impl Related<super::bots::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
