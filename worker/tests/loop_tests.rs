//! Integration tests for the reconciliation loop, run against an in-memory
//! SQLite database with a scripted market feed and a recording event sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};

use migration::{Migrator, MigratorTrait};
use shared::entity::{bots, jobs, portfolio_snapshots, trades};
use shared::models::{BotStatus, JobStatus, TradeStatus};
use shared::queue::TaskKind;
use shared::{MarketData, MarketError, Ticker};
use worker::context::{LoopSettings, WorkerContext};
use worker::events::EventSink;
use worker::jobs as job_tracker;
use worker::runner::{self, LoopOutcome, StopOutcome};

struct ScriptedMarket {
    prices: Mutex<HashMap<String, f64>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedMarket {
    fn new(prices: &[(&str, f64)]) -> Self {
        ScriptedMarket {
            prices: Mutex::new(prices.iter().map(|(symbol, price)| (symbol.to_string(), *price)).collect()),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MarketData for ScriptedMarket {
    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, Ticker>, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MarketError::Empty);
        }
        let prices = self.prices.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                prices.get(symbol).map(|&last| {
                    (
                        symbol.clone(),
                        Ticker {
                            last,
                            change_24h: None,
                            timestamp: None,
                        },
                    )
                })
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    fn payloads_of(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &str, data: Value) {
        self.events.lock().unwrap().push((event.to_string(), data));
    }
}

async fn test_context(market: Arc<dyn MarketData>) -> (Arc<WorkerContext>, Arc<RecordingSink>) {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1);
    let db: DatabaseConnection = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let events: Arc<dyn EventSink> = sink.clone();
    let ctx = WorkerContext {
        db,
        events,
        market,
        settings: LoopSettings {
            loop_interval_seconds: 1.0,
            paper_starting_cash: 10000.0,
            paper_fee_rate: 0.001,
        },
    };
    (Arc::new(ctx), sink)
}

async fn insert_bot(db: &DatabaseConnection, symbols: Value) -> bots::Model {
    let now = Utc::now();
    bots::ActiveModel {
        name: Set("alpha".to_string()),
        symbols: Set(symbols),
        timeframe: Set("1m".to_string()),
        paper_mode: Set(true),
        strategy: Set("baseline".to_string()),
        knobs: Set(json!({})),
        status: Set(BotStatus::Stopped.as_str().to_string()),
        stop_requested: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn insert_open_trade(
    db: &DatabaseConnection,
    bot_id: i32,
    symbol: &str,
    amount: f64,
    cost_basis: f64,
    fees: f64,
) -> trades::Model {
    trades::ActiveModel {
        bot_id: Set(Some(bot_id)),
        symbol: Set(symbol.to_string()),
        side: Set("buy".to_string()),
        amount: Set(amount),
        price: Set(cost_basis / amount),
        status: Set(TradeStatus::Open.as_str().to_string()),
        pnl: Set(None),
        cost_basis_quote: Set(cost_basis),
        fees_paid_quote: Set(fees),
        unrealized_pnl_quote: Set(None),
        realized_pnl_quote: Set(None),
        closed_at: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn job_by_task(db: &DatabaseConnection, bot_id: i32, task: TaskKind) -> jobs::Model {
    jobs::Entity::find()
        .filter(jobs::Column::BotId.eq(bot_id))
        .filter(jobs::Column::Task.eq(task.as_str()))
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn job_rows_are_reused_until_terminal() {
    let market: Arc<dyn MarketData> = Arc::new(ScriptedMarket::new(&[]));
    let (ctx, _sink) = test_context(market).await;
    let bot = insert_bot(&ctx.db, json!(["BTC/USDT"])).await;

    let first = job_tracker::acquire_or_reuse(&ctx.db, Some(bot.id), TaskKind::RunLoop.as_str(), Some("req-1"))
        .await
        .unwrap();
    let second = job_tracker::acquire_or_reuse(&ctx.db, Some(bot.id), TaskKind::RunLoop.as_str(), Some("req-2"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.request_id.as_deref(), Some("req-2"));

    let done = job_tracker::advance(&ctx.db, second, JobStatus::Completed, 100, "done")
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed.as_str());

    // A terminal row is frozen; further advances are ignored.
    let frozen = job_tracker::advance(&ctx.db, done.clone(), JobStatus::Running, 10, "reopened")
        .await
        .unwrap();
    assert_eq!(frozen.status, JobStatus::Completed.as_str());
    assert_eq!(frozen.progress, 100);

    let third = job_tracker::acquire_or_reuse(&ctx.db, Some(bot.id), TaskKind::RunLoop.as_str(), Some("req-3"))
        .await
        .unwrap();
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn run_loop_values_portfolio_and_honors_stop() {
    let scripted = Arc::new(ScriptedMarket::new(&[("BTC/USDT", 21000.0)]));
    let market: Arc<dyn MarketData> = scripted.clone();
    let (ctx, sink) = test_context(market).await;
    let bot = insert_bot(&ctx.db, json!(["BTC/USDT"])).await;
    insert_open_trade(&ctx.db, bot.id, "BTC/USDT", 1.0, 20000.0, 10.0).await;

    let handle = {
        let ctx = ctx.clone();
        let bot_id = bot.id;
        tokio::spawn(async move { runner::run_bot_loop(&ctx, bot_id, Some("req-run")).await })
    };

    // Let the first tick complete; the loop is then asleep until tick two.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let snapshots = portfolio_snapshots::Entity::find()
        .filter(portfolio_snapshots::Column::BotId.eq(bot.id))
        .all(&ctx.db)
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    assert!((snapshots[0].positions_value - 21000.0).abs() < 1e-9);
    assert!((snapshots[0].cash - (-10010.0)).abs() < 1e-9);
    assert!((snapshots[0].equity - 10990.0).abs() < 1e-9);

    let trade = trades::Entity::find()
        .filter(trades::Column::BotId.eq(bot.id))
        .one(&ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trade.unrealized_pnl_quote, Some(990.0));
    assert_eq!(trade.status, TradeStatus::Open.as_str());

    // Stop while the loop is mid-flight; it must notice on its next tick.
    let stop = runner::request_stop(&ctx, bot.id, Some("req-stop")).await.unwrap();
    assert!(matches!(stop, StopOutcome::Stopped { .. }));

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, LoopOutcome::Stopped);

    let bot_row = bots::Entity::find_by_id(bot.id).one(&ctx.db).await.unwrap().unwrap();
    assert_eq!(bot_row.status, BotStatus::Stopped.as_str());
    assert!(!bot_row.stop_requested);

    // The run job and the stop job both ended terminal, as separate rows.
    let run_job = job_by_task(&ctx.db, bot.id, TaskKind::RunLoop).await;
    assert_eq!(run_job.status, JobStatus::Completed.as_str());
    assert_eq!(run_job.progress, 100);
    let stop_job = job_by_task(&ctx.db, bot.id, TaskKind::Stop).await;
    assert_eq!(stop_job.status, JobStatus::Completed.as_str());
    assert_ne!(run_job.id, stop_job.id);

    let names = sink.names();
    for expected in ["bot.state", "trade.updated", "portfolio.snapshot", "job.progress"] {
        assert!(names.iter().any(|name| name == expected), "missing event {}", expected);
    }

    let snapshots_events = sink.payloads_of("portfolio.snapshot");
    assert_eq!(snapshots_events[0]["equity"], json!(10990.0));
    assert_eq!(snapshots_events[0]["fee_rate"], json!(0.001));
    assert_eq!(snapshots_events[0]["prices"]["BTC/USDT"], json!(21000.0));

    let trade_events = sink.payloads_of("trade.updated");
    assert_eq!(trade_events[0]["trade_id"], json!(trade.id));
    assert_eq!(trade_events[0]["unrealized_pnl_quote"], json!(990.0));
}

#[tokio::test]
async fn empty_symbol_list_skips_fetch_and_keeps_job_running() {
    let scripted = Arc::new(ScriptedMarket::new(&[("BTC/USDT", 21000.0)]));
    let market: Arc<dyn MarketData> = scripted.clone();
    let (ctx, sink) = test_context(market).await;
    let bot = insert_bot(&ctx.db, json!([])).await;

    let handle = {
        let ctx = ctx.clone();
        let bot_id = bot.id;
        tokio::spawn(async move { runner::run_bot_loop(&ctx, bot_id, None).await })
    };

    tokio::time::sleep(Duration::from_millis(600)).await;

    // No fetch, no snapshot; the job keeps running with a notice message.
    assert_eq!(scripted.call_count(), 0);
    let snapshots = portfolio_snapshots::Entity::find().all(&ctx.db).await.unwrap();
    assert!(snapshots.is_empty());

    let job = job_by_task(&ctx.db, bot.id, TaskKind::RunLoop).await;
    assert_eq!(job.status, JobStatus::Running.as_str());
    assert_eq!(job.message.as_deref(), Some("Bot has no symbols configured"));

    let notices = sink.payloads_of("system.notice");
    assert!(notices
        .iter()
        .any(|notice| notice["message"] == json!("Bot has no symbols configured")));

    runner::request_stop(&ctx, bot.id, None).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, LoopOutcome::Stopped);

    let bot_row = bots::Entity::find_by_id(bot.id).one(&ctx.db).await.unwrap().unwrap();
    assert!(!bot_row.stop_requested);
}

#[tokio::test]
async fn fetch_errors_are_retriable_and_deletion_is_terminal() {
    let scripted = Arc::new(ScriptedMarket::new(&[("BTC/USDT", 21000.0)]));
    scripted.set_failing(true);
    let market: Arc<dyn MarketData> = scripted.clone();
    let (ctx, sink) = test_context(market).await;
    let bot = insert_bot(&ctx.db, json!(["BTC/USDT"])).await;

    let handle = {
        let ctx = ctx.clone();
        let bot_id = bot.id;
        tokio::spawn(async move { runner::run_bot_loop(&ctx, bot_id, None).await })
    };

    tokio::time::sleep(Duration::from_millis(600)).await;

    // The fetch failed but the loop is still alive and the job still running.
    assert!(scripted.call_count() >= 1);
    assert!(!handle.is_finished());
    let job = job_by_task(&ctx.db, bot.id, TaskKind::RunLoop).await;
    assert_eq!(job.status, JobStatus::Running.as_str());
    let message = job.message.unwrap_or_default();
    assert!(message.contains("Ticker fetch error"), "unexpected message: {}", message);
    assert!(sink
        .payloads_of("system.notice")
        .iter()
        .any(|notice| notice["message"].as_str().unwrap_or_default().contains("Ticker fetch error")));

    // Delete the bot row out from under the loop.
    bots::Entity::delete_by_id(bot.id).exec(&ctx.db).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, LoopOutcome::BotDeleted);

    let job = jobs::Entity::find_by_id(job.id).one(&ctx.db).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed.as_str());
    assert_eq!(job.message.as_deref(), Some("Bot deleted while running"));

    assert!(sink
        .payloads_of("system.notice")
        .iter()
        .any(|notice| notice["message"] == json!("Bot deleted while loop was active")));
}

#[tokio::test]
async fn run_loop_for_unknown_bot_terminates_with_notice() {
    let market: Arc<dyn MarketData> = Arc::new(ScriptedMarket::new(&[]));
    let (ctx, sink) = test_context(market).await;

    let outcome = runner::run_bot_loop(&ctx, 424242, None).await.unwrap();
    assert_eq!(outcome, LoopOutcome::BotNotFound);

    assert!(jobs::Entity::find().all(&ctx.db).await.unwrap().is_empty());
    assert!(sink
        .payloads_of("system.notice")
        .iter()
        .any(|notice| notice["message"] == json!("Run loop received unknown bot id")));
}

#[tokio::test]
async fn stop_request_for_unknown_bot_reports_notice() {
    let market: Arc<dyn MarketData> = Arc::new(ScriptedMarket::new(&[]));
    let (ctx, sink) = test_context(market).await;

    let outcome = runner::request_stop(&ctx, 99, None).await.unwrap();
    assert_eq!(outcome, StopOutcome::BotNotFound);
    assert!(sink
        .payloads_of("system.notice")
        .iter()
        .any(|notice| notice["message"] == json!("Stop request received unknown bot id")));
}

#[tokio::test]
async fn stop_handler_is_optimistic_without_a_live_loop() {
    let market: Arc<dyn MarketData> = Arc::new(ScriptedMarket::new(&[]));
    let (ctx, sink) = test_context(market).await;
    let bot = insert_bot(&ctx.db, json!(["BTC/USDT"])).await;

    let outcome = runner::request_stop(&ctx, bot.id, Some("req-stop")).await.unwrap();
    let StopOutcome::Stopped { job_id } = outcome else {
        panic!("expected Stopped outcome");
    };

    // Intent is persisted even though no loop is iterating.
    let bot_row = bots::Entity::find_by_id(bot.id).one(&ctx.db).await.unwrap().unwrap();
    assert_eq!(bot_row.status, BotStatus::Stopped.as_str());
    assert!(bot_row.stop_requested);

    let stop_job = jobs::Entity::find_by_id(job_id).one(&ctx.db).await.unwrap().unwrap();
    assert_eq!(stop_job.status, JobStatus::Completed.as_str());
    assert_eq!(stop_job.progress, 100);
    assert_eq!(stop_job.request_id.as_deref(), Some("req-stop"));

    let names = sink.names();
    assert!(names.iter().any(|name| name == "bot.state"));
    assert!(names.iter().any(|name| name == "job.progress"));
}
