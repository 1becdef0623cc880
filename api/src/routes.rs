use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait};
use serde::Deserialize;
use serde_json::{json, Value};

use shared::entity::{bots, jobs, portfolio_snapshots, trades};
use shared::MarketData;
use shared::models::{
    normalize_symbols, BotCreate, BotKnobsUpdate, BotRead, BotStartResponse, BotStatus, BotStopResponse, JobRead,
    JobStatus, MarketTicker, PortfolioSnapshotRead, TradeRead,
};
use shared::queue::{self, TaskKind, TaskRequest};
use shared::redis::EVENTS_CHANNEL;
use worker::jobs as job_tracker;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = state.db.ping().await.is_ok();

    let redis_ok = match state.redis.get_multiplexed_async_connection().await {
        Ok(mut conn) => {
            let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
            pong.is_ok()
        }
        Err(_) => false,
    };

    let status = if db_ok && redis_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "checks": {
            "db": { "ok": db_ok },
            "redis": { "ok": redis_ok },
        },
    }))
}

pub async fn create_bot(
    State(state): State<AppState>,
    Json(payload): Json<BotCreate>,
) -> Result<(StatusCode, Json<BotRead>), ApiError> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Unprocessable("Bot name is required".to_string()));
    }
    if payload.timeframe.trim().is_empty() {
        return Err(ApiError::Unprocessable("Timeframe is required".to_string()));
    }
    let symbols = normalize_symbols(&payload.symbols).map_err(ApiError::Unprocessable)?;

    let strategy = payload
        .strategy
        .as_deref()
        .map(str::trim)
        .filter(|strategy| !strategy.is_empty())
        .unwrap_or("baseline")
        .to_string();

    let now = Utc::now();
    let bot = bots::ActiveModel {
        name: Set(name),
        symbols: Set(json!(symbols)),
        timeframe: Set(payload.timeframe.trim().to_string()),
        paper_mode: Set(payload.paper_mode),
        strategy: Set(strategy),
        knobs: Set(serde_json::to_value(&payload.knobs).unwrap_or_else(|_| json!({}))),
        status: Set(BotStatus::Stopped.as_str().to_string()),
        stop_requested: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(BotRead::from(bot))))
}

pub async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<BotRead>>, ApiError> {
    let bots = bots::Entity::find()
        .order_by_desc(bots::Column::CreatedAt)
        .all(&state.db)
        .await?;
    Ok(Json(bots.into_iter().map(BotRead::from).collect()))
}

pub async fn get_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotRead>, ApiError> {
    let bot = bots::Entity::find_by_id(bot_id)
        .one(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Bot not found"))?;
    Ok(Json(BotRead::from(bot)))
}

/// Mark the bot running, claim the run job and hand the loop to the worker
/// queue. The status flip is rolled back if the enqueue fails, so a bot is
/// never left "running" with no task behind it.
pub async fn start_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotStartResponse>, ApiError> {
    let request = TaskRequest::run_loop(bot_id);

    let txn = state.db.begin().await?;
    let Some(bot) = bots::Entity::find_by_id(bot_id).one(&txn).await? else {
        return Err(ApiError::NotFound("Bot not found"));
    };

    let mut active: bots::ActiveModel = bot.into();
    active.status = Set(BotStatus::Running.as_str().to_string());
    active.stop_requested = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;

    let job = job_tracker::acquire_or_reuse(&txn, Some(bot_id), TaskKind::RunLoop.as_str(), Some(&request.request_id))
        .await?;
    txn.commit().await?;

    let enqueued = async {
        let mut conn = state.redis.get_multiplexed_async_connection().await?;
        queue::enqueue(&mut conn, &request).await
    }
    .await;

    if let Err(err) = enqueued {
        let txn = state.db.begin().await?;
        if let Some(bot) = bots::Entity::find_by_id(bot_id).one(&txn).await? {
            let mut active: bots::ActiveModel = bot.into();
            active.status = Set(BotStatus::Stopped.as_str().to_string());
            active.stop_requested = Set(true);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }
        if let Some(job) = jobs::Entity::find_by_id(job.id).one(&txn).await? {
            let progress = job.progress;
            job_tracker::advance(
                &txn,
                job,
                JobStatus::Failed,
                progress,
                &format!("Failed to enqueue task: {}", err),
            )
            .await?;
        }
        txn.commit().await?;
        return Err(ApiError::Unavailable(format!("Failed to enqueue worker task: {}", err)));
    }

    Ok(Json(BotStartResponse {
        bot_id,
        job_id: job.id,
        task_id: request.request_id,
        status: job.status,
    }))
}

/// Optimistic stop: persist intent, record the stop job and enqueue the stop
/// task. A live loop notices the flag on its next tick.
pub async fn stop_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<i32>,
) -> Result<Json<BotStopResponse>, ApiError> {
    let request = TaskRequest::stop(bot_id);

    let txn = state.db.begin().await?;
    let Some(bot) = bots::Entity::find_by_id(bot_id).one(&txn).await? else {
        return Err(ApiError::NotFound("Bot not found"));
    };

    let mut active: bots::ActiveModel = bot.into();
    active.status = Set(BotStatus::Stopped.as_str().to_string());
    active.stop_requested = Set(true);
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;

    let stop_job = job_tracker::acquire_or_reuse(&txn, Some(bot_id), TaskKind::Stop.as_str(), Some(&request.request_id))
        .await?;
    txn.commit().await?;

    let enqueued = async {
        let mut conn = state.redis.get_multiplexed_async_connection().await?;
        queue::enqueue(&mut conn, &request).await
    }
    .await;

    if let Err(err) = enqueued {
        if let Some(job) = jobs::Entity::find_by_id(stop_job.id).one(&state.db).await? {
            let progress = job.progress;
            job_tracker::advance(
                &state.db,
                job,
                JobStatus::Failed,
                progress,
                &format!("Failed to enqueue stop task: {}", err),
            )
            .await?;
        }
        return Err(ApiError::Unavailable(format!("Failed to enqueue stop task: {}", err)));
    }

    Ok(Json(BotStopResponse {
        bot_id,
        stop_requested: true,
        status: BotStatus::Stopped.as_str().to_string(),
    }))
}

pub async fn update_bot_knobs(
    State(state): State<AppState>,
    Path(bot_id): Path<i32>,
    Json(payload): Json<BotKnobsUpdate>,
) -> Result<Json<BotRead>, ApiError> {
    let bot = bots::Entity::find_by_id(bot_id)
        .one(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Bot not found"))?;

    let mut active: bots::ActiveModel = bot.into();
    active.knobs = Set(serde_json::to_value(&payload.knobs).unwrap_or_else(|_| json!({})));
    active.updated_at = Set(Utc::now());
    let bot = active.update(&state.db).await?;

    Ok(Json(BotRead::from(bot)))
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobRead>>, ApiError> {
    let jobs = jobs::Entity::find()
        .order_by_desc(jobs::Column::CreatedAt)
        .all(&state.db)
        .await?;
    Ok(Json(jobs.into_iter().map(JobRead::from).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i32>,
) -> Result<Json<JobRead>, ApiError> {
    let job = jobs::Entity::find_by_id(job_id)
        .one(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Job not found"))?;
    Ok(Json(JobRead::from(job)))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub status: Option<String>,
}

pub async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRead>>, ApiError> {
    let mut select = trades::Entity::find().order_by_desc(trades::Column::CreatedAt);
    if let Some(status) = query.status.as_deref() {
        select = select.filter(trades::Column::Status.eq(status));
    }
    let trades = select.all(&state.db).await?;
    Ok(Json(trades.into_iter().map(TradeRead::from).collect()))
}

pub async fn latest_portfolio(State(state): State<AppState>) -> Result<Json<PortfolioSnapshotRead>, ApiError> {
    let snapshot = portfolio_snapshots::Entity::find()
        .order_by_desc(portfolio_snapshots::Column::Timestamp)
        .one(&state.db)
        .await?
        .ok_or(ApiError::NotFound("No portfolio snapshots found"))?;
    Ok(Json(PortfolioSnapshotRead::from(snapshot)))
}

pub async fn bot_portfolio(
    State(state): State<AppState>,
    Path(bot_id): Path<i32>,
) -> Result<Json<PortfolioSnapshotRead>, ApiError> {
    let snapshot = portfolio_snapshots::Entity::find()
        .filter(portfolio_snapshots::Column::BotId.eq(bot_id))
        .order_by_desc(portfolio_snapshots::Column::Timestamp)
        .one(&state.db)
        .await?
        .ok_or(ApiError::NotFound("No portfolio snapshots found for bot"))?;
    Ok(Json(PortfolioSnapshotRead::from(snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct TickersQuery {
    /// Comma-separated list, e.g. "BTC/USDT,ETH/USDT"
    pub symbols: String,
}

pub async fn market_tickers(
    State(state): State<AppState>,
    Query(query): Query<TickersQuery>,
) -> Result<Json<Vec<MarketTicker>>, ApiError> {
    let raw: Vec<String> = query.symbols.split(',').map(str::to_string).collect();
    let symbols = normalize_symbols(&raw).map_err(ApiError::Unprocessable)?;

    let tickers = state
        .market
        .fetch_tickers(&symbols)
        .await
        .map_err(|err| ApiError::Upstream(format!("Failed to fetch tickers: {}", err)))?;

    let payload = symbols
        .iter()
        .filter_map(|symbol| {
            tickers.get(symbol).map(|ticker| MarketTicker {
                symbol: symbol.clone(),
                price: ticker.last,
                change_24h: ticker.change_24h,
                timestamp: ticker.timestamp,
            })
        })
        .collect();

    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
pub struct OhlcvQuery {
    pub symbol: String,
    pub timeframe: Option<String>,
    pub limit: Option<u32>,
}

pub async fn market_ohlcv(
    State(state): State<AppState>,
    Query(query): Query<OhlcvQuery>,
) -> Result<Json<Value>, ApiError> {
    let symbol = query.symbol.trim().to_uppercase();
    if !symbol.contains('/') {
        return Err(ApiError::Unprocessable(
            "symbol must look like BASE/QUOTE, e.g. BTC/USDT".to_string(),
        ));
    }
    let timeframe = query.timeframe.unwrap_or_else(|| "1h".to_string());
    let limit = query.limit.unwrap_or(500).clamp(1, 1000);

    let rows = state
        .market
        .fetch_ohlcv(&symbol, &timeframe, limit)
        .await
        .map_err(|err| ApiError::Upstream(format!("Failed to fetch OHLCV: {}", err)))?;

    Ok(Json(json!({
        "symbol": symbol,
        "timeframe": timeframe,
        "limit": limit,
        "ohlcv": rows,
    })))
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SseFilter {
    pub bot_id: Option<i64>,
    pub job_id: Option<i64>,
}

/// Relay the redis events channel to the UI as server-sent events, optionally
/// filtered down to one bot or job.
pub async fn sse(
    State(state): State<AppState>,
    Query(filter): Query<SseFilter>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut pubsub = state
        .redis
        .get_async_pubsub()
        .await
        .map_err(|err| ApiError::Unavailable(format!("Event bus unavailable: {}", err)))?;
    pubsub
        .subscribe(EVENTS_CHANNEL)
        .await
        .map_err(|err| ApiError::Unavailable(format!("Event bus unavailable: {}", err)))?;

    let connected = stream::once(futures::future::ready(Ok::<_, Infallible>(
        Event::default().event("system.notice").data(
            json!({
                "message": "SSE connected",
                "channel": EVENTS_CHANNEL,
                "ts": Utc::now().to_rfc3339(),
            })
            .to_string(),
        ),
    )));

    let events = pubsub.into_on_message().filter_map(move |message| async move {
        let payload: String = message.get_payload().ok()?;
        let envelope: Value = serde_json::from_str(&payload).ok()?;
        let name = envelope
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("system.notice")
            .to_string();
        let data = envelope.get("data").cloned().unwrap_or_else(|| json!({}));

        if let Some(bot_id) = filter.bot_id {
            if data.get("bot_id").and_then(Value::as_i64) != Some(bot_id) {
                return None;
            }
        }
        if let Some(job_id) = filter.job_id {
            if data.get("job_id").and_then(Value::as_i64) != Some(job_id) {
                return None;
            }
        }

        Some(Ok::<_, Infallible>(Event::default().event(name).data(data.to_string())))
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::default()))
}
