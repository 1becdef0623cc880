pub mod config;
pub mod database;
pub mod entity;
pub mod market;
pub mod models;
pub mod queue;
pub mod redis;

pub use config::Config;
pub use database::get_db_connection;
pub use market::{BinanceMarketClient, MarketData, MarketError, Ticker};
pub use models::*;
pub use queue::{TaskKind, TaskRequest, TASK_QUEUE_KEY};
pub use redis::{get_redis_client, Redis};
