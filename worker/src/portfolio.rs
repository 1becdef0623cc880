//! Portfolio valuation.
//!
//! Pure arithmetic over trade rows and current mark prices; persistence and
//! event emission stay in the loop.

use std::collections::HashMap;

use shared::entity::trades;

/// An open trade that received a mark price this tick.
#[derive(Debug, Clone)]
pub struct RepricedTrade {
    pub trade_id: i32,
    pub symbol: String,
    pub mark_price: f64,
    pub mark_value: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone)]
pub struct Valuation {
    pub cash: f64,
    pub positions_value: f64,
    pub equity: f64,
    pub repriced: Vec<RepricedTrade>,
}

/// Mark open positions to market.
///
/// Open trades whose symbol is missing from `marks` keep their previous
/// unrealized PnL instead of being zeroed, so a partial price fetch cannot
/// fake a PnL swing. Their cost still counts as locked: cash reflects every
/// open position whether or not this tick priced it.
pub fn value(
    open_trades: &[trades::Model],
    closed_trades: &[trades::Model],
    marks: &HashMap<String, f64>,
    starting_cash: f64,
) -> Valuation {
    let mut positions_value = 0.0;
    let mut locked_cost = 0.0;
    let mut repriced = Vec::new();

    for trade in open_trades {
        locked_cost += trade.cost_basis_quote + trade.fees_paid_quote;

        let Some(&mark_price) = marks.get(&trade.symbol) else {
            continue;
        };

        let mark_value = trade.amount * mark_price;
        let unrealized_pnl = mark_value - trade.cost_basis_quote - trade.fees_paid_quote;
        positions_value += mark_value;
        repriced.push(RepricedTrade {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            mark_price,
            mark_value,
            unrealized_pnl,
        });
    }

    let realized_total: f64 = closed_trades
        .iter()
        .filter_map(|trade| trade.realized_pnl_quote)
        .sum();

    let cash = starting_cash + realized_total - locked_cost;
    let equity = cash + positions_value;

    Valuation {
        cash,
        positions_value,
        equity,
        repriced,
    }
}
