pub mod bots;
pub mod jobs;
pub mod portfolio_snapshots;
pub mod trades;
