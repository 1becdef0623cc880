use std::sync::Arc;

use sea_orm::DatabaseConnection;
use shared::{get_db_connection, get_redis_client, BinanceMarketClient, Config};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub redis: shared::Redis,
    pub market: Arc<BinanceMarketClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config = Config::from_env()?;
        let db = get_db_connection(&config.database_url).await?;
        let redis = get_redis_client(&config.redis_url)?;
        tracing::info!("Connected to database successfully");

        Ok(AppState {
            db,
            redis,
            market: Arc::new(BinanceMarketClient::new(&config.binance_base_url)),
            config: Arc::new(config),
        })
    }
}
