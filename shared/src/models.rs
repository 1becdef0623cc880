use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{bots, jobs, portfolio_snapshots, trades};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Stopped,
    Running,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Stopped => "stopped",
            BotStatus::Running => "running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal rows are never reopened; a later run reclaims or creates a fresh row.
    pub fn is_terminal(status: &str) -> bool {
        status == JobStatus::Completed.as_str() || status == JobStatus::Failed.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

/// Tuning knobs stored on the bot row. Unknown keys are rejected at the API
/// boundary but the worker treats the stored JSON as free-form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Knobs {
    #[serde(default = "default_max_open_trades")]
    pub max_open_trades: i32,
    #[serde(default = "default_stake_amount")]
    pub stake_amount: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_rate: Option<f64>,
}

impl Default for Knobs {
    fn default() -> Self {
        Knobs {
            max_open_trades: default_max_open_trades(),
            stake_amount: default_stake_amount(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            cooldown_minutes: default_cooldown_minutes(),
            fee_rate: None,
        }
    }
}

fn default_max_open_trades() -> i32 {
    3
}

fn default_stake_amount() -> f64 {
    100.0
}

fn default_stop_loss_pct() -> f64 {
    5.0
}

fn default_take_profit_pct() -> f64 {
    10.0
}

fn default_cooldown_minutes() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotCreate {
    pub name: String,
    pub symbols: Vec<String>,
    pub timeframe: String,
    #[serde(default = "default_paper_mode")]
    pub paper_mode: bool,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub knobs: Knobs,
}

fn default_paper_mode() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotKnobsUpdate {
    pub knobs: Knobs,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotRead {
    pub id: i32,
    pub name: String,
    pub symbols: serde_json::Value,
    pub timeframe: String,
    pub paper_mode: bool,
    pub strategy: String,
    pub knobs: serde_json::Value,
    pub status: String,
    pub stop_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<bots::Model> for BotRead {
    fn from(bot: bots::Model) -> Self {
        BotRead {
            id: bot.id,
            name: bot.name,
            symbols: bot.symbols,
            timeframe: bot.timeframe,
            paper_mode: bot.paper_mode,
            strategy: bot.strategy,
            knobs: bot.knobs,
            status: bot.status,
            stop_requested: bot.stop_requested,
            created_at: bot.created_at,
            updated_at: bot.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStartResponse {
    pub bot_id: i32,
    pub job_id: i32,
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStopResponse {
    pub bot_id: i32,
    pub stop_requested: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRead {
    pub id: i32,
    pub bot_id: Option<i32>,
    pub task: String,
    pub status: String,
    pub progress: i32,
    pub message: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<jobs::Model> for JobRead {
    fn from(job: jobs::Model) -> Self {
        JobRead {
            id: job.id,
            bot_id: job.bot_id,
            task: job.task,
            status: job.status,
            progress: job.progress,
            message: job.message,
            request_id: job.request_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRead {
    pub id: i32,
    pub bot_id: Option<i32>,
    pub symbol: String,
    pub side: String,
    pub amount: f64,
    pub price: f64,
    pub status: String,
    pub pnl: Option<f64>,
    pub cost_basis_quote: f64,
    pub fees_paid_quote: f64,
    pub unrealized_pnl_quote: Option<f64>,
    pub realized_pnl_quote: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<trades::Model> for TradeRead {
    fn from(trade: trades::Model) -> Self {
        TradeRead {
            id: trade.id,
            bot_id: trade.bot_id,
            symbol: trade.symbol,
            side: trade.side,
            amount: trade.amount,
            price: trade.price,
            status: trade.status,
            pnl: trade.pnl,
            cost_basis_quote: trade.cost_basis_quote,
            fees_paid_quote: trade.fees_paid_quote,
            unrealized_pnl_quote: trade.unrealized_pnl_quote,
            realized_pnl_quote: trade.realized_pnl_quote,
            closed_at: trade.closed_at,
            created_at: trade.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshotRead {
    pub id: i32,
    pub bot_id: Option<i32>,
    pub equity: f64,
    pub cash: f64,
    pub positions_value: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<portfolio_snapshots::Model> for PortfolioSnapshotRead {
    fn from(snapshot: portfolio_snapshots::Model) -> Self {
        PortfolioSnapshotRead {
            id: snapshot.id,
            bot_id: snapshot.bot_id,
            equity: snapshot.equity,
            cash: snapshot.cash,
            positions_value: snapshot.positions_value,
            timestamp: snapshot.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketTicker {
    pub symbol: String,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub timestamp: Option<i64>,
}

/// Trim, uppercase and validate a symbol list. Every surviving entry is
/// "BASE/QUOTE"; an empty result or a malformed entry is an error.
pub fn normalize_symbols(symbols: &[String]) -> Result<Vec<String>, String> {
    let normalized: Vec<String> = symbols
        .iter()
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .collect();

    if normalized.is_empty() {
        return Err("At least one symbol is required".to_string());
    }

    let invalid: Vec<&str> = normalized
        .iter()
        .filter(|symbol| !symbol.contains('/'))
        .map(|symbol| symbol.as_str())
        .collect();

    if !invalid.is_empty() {
        return Err(format!("Invalid symbol values: {}", invalid.join(", ")));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_symbols_uppercases_and_trims() {
        let input = vec![" btc/usdt ".to_string(), "eth/usdt".to_string(), "".to_string()];
        let normalized = normalize_symbols(&input).unwrap();
        assert_eq!(normalized, vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn normalize_symbols_rejects_empty() {
        assert!(normalize_symbols(&[]).is_err());
        assert!(normalize_symbols(&["   ".to_string()]).is_err());
    }

    #[test]
    fn normalize_symbols_rejects_missing_separator() {
        let err = normalize_symbols(&["BTCUSDT".to_string()]).unwrap_err();
        assert!(err.contains("BTCUSDT"));
    }

    #[test]
    fn knobs_deserialize_with_defaults() {
        let knobs: Knobs = serde_json::from_str("{}").unwrap();
        assert_eq!(knobs.max_open_trades, 3);
        assert_eq!(knobs.stake_amount, 100.0);
        assert!(knobs.fee_rate.is_none());
    }

    #[test]
    fn knobs_reject_unknown_fields() {
        let result: Result<Knobs, _> = serde_json::from_str(r#"{"leverage": 10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn job_status_terminal() {
        assert!(JobStatus::is_terminal("completed"));
        assert!(JobStatus::is_terminal("failed"));
        assert!(!JobStatus::is_terminal("running"));
        assert!(!JobStatus::is_terminal("queued"));
    }
}
