//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trades")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub bot_id: Option<i32>,
    pub symbol: String,
    pub side: String, // "buy" or "sell"
    #[sea_orm(column_type = "Double")]
    pub amount: f64,
    /// Entry price in quote currency
    #[sea_orm(column_type = "Double")]
    pub price: f64,
    pub status: String, // "open", "closed"
    /// Legacy mirror of the latest unrealized PnL, kept for older readers
    #[sea_orm(column_type = "Double", nullable)]
    pub pnl: Option<f64>,
    #[sea_orm(column_type = "Double")]
    pub cost_basis_quote: f64,
    #[sea_orm(column_type = "Double")]
    pub fees_paid_quote: f64,
    /// Recomputed every loop tick while open; stale when the symbol had no mark
    #[sea_orm(column_type = "Double", nullable)]
    pub unrealized_pnl_quote: Option<f64>,
    /// Fixed at close time, never recomputed
    #[sea_orm(column_type = "Double", nullable)]
    pub realized_pnl_quote: Option<f64>,
    pub closed_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bots::Entity",
        from = "Column::BotId",
        to = "super::bots::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Bots,
}

impl Related<super::bots::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
