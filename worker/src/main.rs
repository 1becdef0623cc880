use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use redis::AsyncCommands;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use shared::{get_db_connection, get_redis_client, BinanceMarketClient, Config, TaskKind, TaskRequest, TASK_QUEUE_KEY};
use worker::context::{LoopSettings, WorkerContext};
use worker::events::RedisEventPublisher;
use worker::runner;

/// BRPOP poll timeout; bounds how long shutdown signals wait on an idle queue.
const QUEUE_POLL_SECONDS: f64 = 5.0;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting trading bot worker...");

    let config = Config::from_env()?;
    let db = get_db_connection(&config.database_url).await?;
    let redis = get_redis_client(&config.redis_url)?;
    info!("Connected to database");

    let ctx = Arc::new(WorkerContext {
        db,
        events: Arc::new(RedisEventPublisher::new(redis.clone())),
        market: Arc::new(BinanceMarketClient::new(&config.binance_base_url)),
        settings: LoopSettings::from_config(&config),
    });

    let pool = Arc::new(Semaphore::new(config.worker_concurrency));
    // Bots with a live run loop in this process; a duplicate start request
    // would otherwise spawn a second loop for the same bot.
    let running_bots: Arc<Mutex<HashSet<i32>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut conn = redis.get_multiplexed_async_connection().await?;
    info!(
        "Worker consuming {} (concurrency {})",
        TASK_QUEUE_KEY, config.worker_concurrency
    );

    loop {
        let popped: Option<(String, String)> = match conn.brpop(TASK_QUEUE_KEY, QUEUE_POLL_SECONDS).await {
            Ok(popped) => popped,
            Err(err) => {
                error!("Task queue read failed: {}", err);
                tokio::time::sleep(Duration::from_secs(1)).await;
                if let Ok(fresh) = redis.get_multiplexed_async_connection().await {
                    conn = fresh;
                }
                continue;
            }
        };
        let Some((_, raw)) = popped else {
            continue;
        };

        let request: TaskRequest = match serde_json::from_str(&raw) {
            Ok(request) => request,
            Err(err) => {
                warn!("Discarding malformed task request: {}", err);
                continue;
            }
        };

        if request.task == TaskKind::RunLoop {
            let mut running = running_bots.lock().unwrap();
            if !running.insert(request.bot_id) {
                warn!(
                    "Bot {} already has a live run loop in this worker, dropping duplicate start",
                    request.bot_id
                );
                continue;
            }
        }

        let permit = pool.clone().acquire_owned().await?;
        let ctx = ctx.clone();
        let running_bots = running_bots.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let bot_id = request.bot_id;
            match request.task {
                TaskKind::RunLoop => {
                    match runner::run_bot_loop(&ctx, bot_id, Some(&request.request_id)).await {
                        Ok(outcome) => info!("Bot {} run loop finished: {:?}", bot_id, outcome),
                        Err(err) => error!("Bot {} run loop task failed: {}", bot_id, err),
                    }
                    running_bots.lock().unwrap().remove(&bot_id);
                }
                TaskKind::Stop => match runner::request_stop(&ctx, bot_id, Some(&request.request_id)).await {
                    Ok(outcome) => info!("Bot {} stop handled: {:?}", bot_id, outcome),
                    Err(err) => error!("Bot {} stop task failed: {}", bot_id, err),
                },
            }
        });
    }
}
