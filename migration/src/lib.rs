pub use sea_orm_migration::prelude::*;

mod m20251001_000001_create_trades;
mod m20251001_000002_create_trade_participants;
mod m20251001_000003_create_staging_tables;
mod m20251001_000004_create_leaderboard_stats;
mod m20251001_000005_create_sync_status;
mod m20251001_000006_create_leaderboard_view;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251001_000001_create_trades::Migration),
            Box::new(m20251001_000002_create_trade_participants::Migration),
            Box::new(m20251001_000003_create_staging_tables::Migration),
            Box::new(m20251001_000004_create_leaderboard_stats::Migration),
            Box::new(m20251001_000005_create_sync_status::Migration),
            Box::new(m20251001_000006_create_leaderboard_view::Migration),
        ]
    }
}
