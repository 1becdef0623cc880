use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use shared::{Config, MarketData};

use crate::events::EventSink;

/// Everything a reconciliation loop needs, constructed once at worker startup
/// and passed down explicitly.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: DatabaseConnection,
    pub events: Arc<dyn EventSink>,
    pub market: Arc<dyn MarketData>,
    pub settings: LoopSettings,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub loop_interval_seconds: f64,
    pub paper_starting_cash: f64,
    pub paper_fee_rate: f64,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        LoopSettings {
            loop_interval_seconds: config.bot_loop_interval_seconds,
            paper_starting_cash: config.paper_starting_cash,
            paper_fee_rate: config.paper_fee_rate,
        }
    }
}

impl WorkerContext {
    /// Pause between ticks, floored at one second.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.settings.loop_interval_seconds.max(1.0))
    }
}
