//! Per-bot reconciliation loop and the stop handler.
//!
//! One loop instance runs per active bot. Each tick reloads the bot row,
//! honors stop requests, marks open positions to market, persists a portfolio
//! snapshot and advances the run job. The stop handler only persists intent;
//! the loop discovers the flag on its next tick and shuts down on its own.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use shared::entity::{bots, jobs, portfolio_snapshots, trades};
use shared::models::{BotStatus, JobStatus, TradeStatus};
use shared::queue::TaskKind;

use crate::context::WorkerContext;
use crate::jobs as job_tracker;
use crate::portfolio;

/// Fatal errors. Retriable conditions (fetch failures, missing symbols) are
/// absorbed by the loop itself and never surface here.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Orderly terminations of a loop instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No bot row existed when the loop started.
    BotNotFound,
    /// The bot row disappeared between ticks.
    BotDeleted,
    /// A stop request (or an external status flip) was honored.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    BotNotFound,
    Stopped { job_id: i32 },
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Symbols configured on the bot row, with blanks and non-strings dropped.
pub fn configured_symbols(bot: &bots::Model) -> Vec<String> {
    bot.symbols
        .as_array()
        .map(|symbols| {
            symbols
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|symbol| !symbol.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Fee rate from the bot's knobs, falling back to the configured default for
/// missing, malformed or negative values.
pub fn resolve_fee_rate(bot: &bots::Model, default_fee: f64) -> f64 {
    let value = match bot.knobs.get("fee_rate") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(rate) if rate >= 0.0 => rate,
        _ => default_fee,
    }
}

/// Drive one bot's reconciliation loop until it stops or fails.
///
/// Fatal errors are cleaned up (bot forced to stopped, job marked failed,
/// events emitted) and then returned, so the hosting dispatcher can record
/// the failed task. The loop never restarts itself.
pub async fn run_bot_loop(
    ctx: &WorkerContext,
    bot_id: i32,
    request_id: Option<&str>,
) -> Result<LoopOutcome, LoopError> {
    let mut job_id = None;
    match run_loop_inner(ctx, bot_id, request_id, &mut job_id).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            fail_loop(ctx, bot_id, job_id, &err).await;
            Err(err)
        }
    }
}

async fn run_loop_inner(
    ctx: &WorkerContext,
    bot_id: i32,
    request_id: Option<&str>,
    job_id_slot: &mut Option<i32>,
) -> Result<LoopOutcome, LoopError> {
    let interval = ctx.tick_interval();

    // STARTING: claim the bot row and the run job in one transaction.
    let txn = ctx.db.begin().await?;
    let Some(bot) = bots::Entity::find_by_id(bot_id).one(&txn).await? else {
        txn.commit().await?;
        ctx.events
            .publish(
                "system.notice",
                json!({
                    "bot_id": bot_id,
                    "message": "Run loop received unknown bot id",
                    "ts": now_iso(),
                }),
            )
            .await;
        return Ok(LoopOutcome::BotNotFound);
    };

    let mut active: bots::ActiveModel = bot.into();
    active.status = Set(BotStatus::Running.as_str().to_string());
    active.stop_requested = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;

    let job = job_tracker::acquire_or_reuse(&txn, Some(bot_id), TaskKind::RunLoop.as_str(), request_id).await?;
    let job = job_tracker::advance(&txn, job, JobStatus::Running, 0, "Worker loop started").await?;
    txn.commit().await?;

    let job_id = job.id;
    *job_id_slot = Some(job_id);
    info!("Bot {} run loop started (job {})", bot_id, job_id);

    ctx.events
        .publish(
            "bot.state",
            json!({
                "bot_id": bot_id,
                "status": BotStatus::Running.as_str(),
                "job_id": job_id,
                "ts": now_iso(),
            }),
        )
        .await;

    let mut iteration: i32 = 0;

    loop {
        // Reload and decide in one transaction, so a stop request cannot slip
        // between the status read and the transition.
        let txn = ctx.db.begin().await?;
        let bot = bots::Entity::find_by_id(bot_id).one(&txn).await?;
        let job = jobs::Entity::find_by_id(job_id).one(&txn).await?;

        let Some(bot) = bot else {
            if let Some(job) = job {
                let progress = job.progress;
                job_tracker::advance(&txn, job, JobStatus::Failed, progress, "Bot deleted while running").await?;
            }
            txn.commit().await?;
            ctx.events
                .publish(
                    "system.notice",
                    json!({
                        "bot_id": bot_id,
                        "job_id": job_id,
                        "message": "Bot deleted while loop was active",
                        "ts": now_iso(),
                    }),
                )
                .await;
            warn!("Bot {} deleted while its run loop was active", bot_id);
            return Ok(LoopOutcome::BotDeleted);
        };

        if bot.status != BotStatus::Running.as_str() || bot.stop_requested {
            let mut active: bots::ActiveModel = bot.into();
            active.status = Set(BotStatus::Stopped.as_str().to_string());
            active.stop_requested = Set(false);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
            if let Some(job) = job {
                job_tracker::advance(&txn, job, JobStatus::Completed, 100, "Bot loop stopped").await?;
            }
            txn.commit().await?;

            ctx.events
                .publish(
                    "bot.state",
                    json!({
                        "bot_id": bot_id,
                        "status": BotStatus::Stopped.as_str(),
                        "job_id": job_id,
                        "ts": now_iso(),
                    }),
                )
                .await;
            ctx.events
                .publish(
                    "job.progress",
                    json!({
                        "bot_id": bot_id,
                        "job_id": job_id,
                        "status": JobStatus::Completed.as_str(),
                        "progress": 100,
                        "ts": now_iso(),
                    }),
                )
                .await;
            info!("Bot {} run loop stopped", bot_id);
            return Ok(LoopOutcome::Stopped);
        }

        let symbols = configured_symbols(&bot);
        let fee_rate = resolve_fee_rate(&bot, ctx.settings.paper_fee_rate);

        if symbols.is_empty() {
            if let Some(job) = job {
                job_tracker::record_message(&txn, job, "Bot has no symbols configured").await?;
            }
            txn.commit().await?;
            ctx.events
                .publish(
                    "system.notice",
                    json!({
                        "bot_id": bot_id,
                        "job_id": job_id,
                        "message": "Bot has no symbols configured",
                        "ts": now_iso(),
                    }),
                )
                .await;
            tokio::time::sleep(interval).await;
            continue;
        }
        txn.commit().await?;

        // The fetch runs outside any transaction; a failure here is retriable
        // and the next tick is an independent attempt.
        let tickers = match ctx.market.fetch_tickers(&symbols).await {
            Ok(tickers) => tickers,
            Err(err) => {
                let message = format!("Ticker fetch error: {}", err);
                if let Some(job) = jobs::Entity::find_by_id(job_id).one(&ctx.db).await? {
                    job_tracker::record_message(&ctx.db, job, &message).await?;
                }
                ctx.events
                    .publish(
                        "system.notice",
                        json!({
                            "bot_id": bot_id,
                            "job_id": job_id,
                            "message": message,
                            "ts": now_iso(),
                        }),
                    )
                    .await;
                tokio::time::sleep(interval).await;
                continue;
            }
        };

        let mut marks: HashMap<String, f64> = HashMap::new();
        for symbol in &symbols {
            if let Some(ticker) = tickers.get(symbol) {
                marks.insert(symbol.clone(), ticker.last);
            }
        }

        // Revalue, snapshot and advance the job atomically.
        let txn = ctx.db.begin().await?;
        let open_trades = trades::Entity::find()
            .filter(trades::Column::BotId.eq(bot_id))
            .filter(trades::Column::Status.eq(TradeStatus::Open.as_str()))
            .order_by_asc(trades::Column::CreatedAt)
            .all(&txn)
            .await?;
        let closed_trades = trades::Entity::find()
            .filter(trades::Column::BotId.eq(bot_id))
            .filter(trades::Column::Status.eq(TradeStatus::Closed.as_str()))
            .order_by_asc(trades::Column::CreatedAt)
            .all(&txn)
            .await?;

        let valuation = portfolio::value(&open_trades, &closed_trades, &marks, ctx.settings.paper_starting_cash);

        for repriced in &valuation.repriced {
            if let Some(model) = open_trades.iter().find(|trade| trade.id == repriced.trade_id) {
                let mut active: trades::ActiveModel = model.clone().into();
                active.unrealized_pnl_quote = Set(Some(repriced.unrealized_pnl));
                active.pnl = Set(Some(repriced.unrealized_pnl));
                active.update(&txn).await?;
            }
        }

        let snapshot_ts = Utc::now();
        portfolio_snapshots::ActiveModel {
            bot_id: Set(Some(bot_id)),
            equity: Set(valuation.equity),
            cash: Set(valuation.cash),
            positions_value: Set(valuation.positions_value),
            timestamp: Set(snapshot_ts),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        iteration += 1;
        let progress = iteration.min(99);
        if let Some(job) = jobs::Entity::find_by_id(job_id).one(&txn).await? {
            job_tracker::advance(
                &txn,
                job,
                JobStatus::Running,
                progress,
                &format!("Loop iteration {}", iteration),
            )
            .await?;
        }
        txn.commit().await?;

        for repriced in &valuation.repriced {
            ctx.events
                .publish(
                    "trade.updated",
                    json!({
                        "bot_id": bot_id,
                        "trade_id": repriced.trade_id,
                        "symbol": repriced.symbol,
                        "price": repriced.mark_price,
                        "unrealized_pnl_quote": repriced.unrealized_pnl,
                        "ts": now_iso(),
                    }),
                )
                .await;
        }

        ctx.events
            .publish(
                "portfolio.snapshot",
                json!({
                    "bot_id": bot_id,
                    "equity": valuation.equity,
                    "cash": valuation.cash,
                    "positions_value": valuation.positions_value,
                    "ts": snapshot_ts.to_rfc3339(),
                    "prices": marks,
                    "fee_rate": fee_rate,
                }),
            )
            .await;

        if iteration == 1 || iteration % 3 == 0 {
            ctx.events
                .publish(
                    "job.progress",
                    json!({
                        "bot_id": bot_id,
                        "job_id": job_id,
                        "status": JobStatus::Running.as_str(),
                        "progress": progress,
                        "ts": now_iso(),
                    }),
                )
                .await;
        }

        tokio::time::sleep(interval).await;
    }
}

/// Best-effort cleanup after a fatal loop error.
async fn fail_loop(ctx: &WorkerContext, bot_id: i32, job_id: Option<i32>, err: &LoopError) {
    error!("Bot {} run loop failed: {}", bot_id, err);

    let cleanup = async {
        let txn = ctx.db.begin().await?;
        if let Some(bot) = bots::Entity::find_by_id(bot_id).one(&txn).await? {
            let mut active: bots::ActiveModel = bot.into();
            active.status = Set(BotStatus::Stopped.as_str().to_string());
            active.stop_requested = Set(false);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }
        if let Some(job_id) = job_id {
            if let Some(job) = jobs::Entity::find_by_id(job_id).one(&txn).await? {
                let progress = job.progress;
                job_tracker::advance(&txn, job, JobStatus::Failed, progress, &err.to_string()).await?;
            }
        }
        txn.commit().await?;
        Ok::<(), sea_orm::DbErr>(())
    };
    if let Err(cleanup_err) = cleanup.await {
        warn!("Cleanup after failed loop for bot {} did not complete: {}", bot_id, cleanup_err);
    }

    ctx.events
        .publish(
            "bot.state",
            json!({
                "bot_id": bot_id,
                "status": BotStatus::Stopped.as_str(),
                "job_id": job_id,
                "ts": now_iso(),
            }),
        )
        .await;
    ctx.events
        .publish(
            "system.notice",
            json!({
                "bot_id": bot_id,
                "job_id": job_id,
                "message": format!("Run loop failed: {}", err),
                "ts": now_iso(),
            }),
        )
        .await;
}

/// Persist a stop request and record a terminal stop job.
///
/// Deliberately optimistic: this does not wait for the running loop. The loop
/// observes `stop_requested` at the top of its next tick and completes its
/// own run job, so one stop can leave two terminal jobs (kind run and kind
/// stop) for the same bot.
pub async fn request_stop(
    ctx: &WorkerContext,
    bot_id: i32,
    request_id: Option<&str>,
) -> Result<StopOutcome, LoopError> {
    let txn = ctx.db.begin().await?;
    let Some(bot) = bots::Entity::find_by_id(bot_id).one(&txn).await? else {
        txn.commit().await?;
        ctx.events
            .publish(
                "system.notice",
                json!({
                    "bot_id": bot_id,
                    "message": "Stop request received unknown bot id",
                    "ts": now_iso(),
                }),
            )
            .await;
        return Ok(StopOutcome::BotNotFound);
    };

    let mut active: bots::ActiveModel = bot.into();
    active.status = Set(BotStatus::Stopped.as_str().to_string());
    active.stop_requested = Set(true);
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;

    let stop_job = job_tracker::acquire_or_reuse(&txn, Some(bot_id), TaskKind::Stop.as_str(), request_id).await?;
    let stop_job = job_tracker::advance(&txn, stop_job, JobStatus::Completed, 100, "Stop signal set").await?;
    txn.commit().await?;

    info!("Stop requested for bot {} (job {})", bot_id, stop_job.id);

    ctx.events
        .publish(
            "bot.state",
            json!({
                "bot_id": bot_id,
                "status": BotStatus::Stopped.as_str(),
                "job_id": stop_job.id,
                "ts": now_iso(),
            }),
        )
        .await;
    ctx.events
        .publish(
            "job.progress",
            json!({
                "bot_id": bot_id,
                "job_id": stop_job.id,
                "status": JobStatus::Completed.as_str(),
                "progress": 100,
                "ts": now_iso(),
            }),
        )
        .await;

    Ok(StopOutcome::Stopped { job_id: stop_job.id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot_with(symbols: Value, knobs: Value) -> bots::Model {
        bots::Model {
            id: 1,
            name: "alpha".to_string(),
            symbols,
            timeframe: "1m".to_string(),
            paper_mode: true,
            strategy: "baseline".to_string(),
            knobs,
            status: BotStatus::Running.as_str().to_string(),
            stop_requested: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn configured_symbols_drops_blanks_and_non_strings() {
        let bot = bot_with(json!(["BTC/USDT", "  ", 42, " ETH/USDT "]), json!({}));
        assert_eq!(configured_symbols(&bot), vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn configured_symbols_handles_non_array() {
        let bot = bot_with(json!("BTC/USDT"), json!({}));
        assert!(configured_symbols(&bot).is_empty());
    }

    #[test]
    fn fee_rate_from_knobs() {
        let bot = bot_with(json!([]), json!({"fee_rate": 0.002}));
        assert_eq!(resolve_fee_rate(&bot, 0.001), 0.002);
    }

    #[test]
    fn fee_rate_parses_strings() {
        let bot = bot_with(json!([]), json!({"fee_rate": "0.0015"}));
        assert_eq!(resolve_fee_rate(&bot, 0.001), 0.0015);
    }

    #[test]
    fn fee_rate_falls_back_for_bad_values() {
        for knobs in [json!({}), json!({"fee_rate": -0.5}), json!({"fee_rate": "abc"}), json!({"fee_rate": null})] {
            let bot = bot_with(json!([]), knobs);
            assert_eq!(resolve_fee_rate(&bot, 0.001), 0.001);
        }
    }
}
