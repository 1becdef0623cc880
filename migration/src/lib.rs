pub use sea_orm_migration::prelude::*;

mod m20260223_000001_create_bots;
mod m20260223_000002_create_jobs;
mod m20260223_000003_create_trades_and_snapshots;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260223_000001_create_bots::Migration),
            Box::new(m20260223_000002_create_jobs::Migration),
            Box::new(m20260223_000003_create_trades_and_snapshots::Migration),
        ]
    }
}
