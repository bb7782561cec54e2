//! Backtest summary and per-pair reports

use serde::{Deserialize, Serialize};

use super::state::{BacktestState, EquityPoint, Trade, TradeOutcome};
use crate::Result;

/// Profit factor reported when there are profits but no losses
pub const PROFIT_FACTOR_CAP: f64 = 999.99;

/// Result of one (symbol, timeframe) walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReport {
    pub symbol: String,
    pub timeframe: String,
    pub candles: usize,
    pub total_trades: usize,
    pub win_rate: f64,
    pub profit_loss: f64,
    pub final_capital: f64,
    pub lowest_capital: f64,
    pub max_drawdown: f64,
    pub equity_curve: Vec<EquityPoint>,
}

impl PairReport {
    pub fn from_state(symbol: &str, timeframe: &str, candles: usize, state: &BacktestState) -> Self {
        let trades = &state.closed_trades;
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            candles,
            total_trades: trades.len(),
            win_rate: win_rate(trades.iter()),
            profit_loss: state.realized_pnl(),
            final_capital: state.current_capital,
            lowest_capital: state.lowest_capital,
            max_drawdown: state.max_drawdown,
            equity_curve: state.equity_curve.clone(),
        }
    }
}

/// A pair that never ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPair {
    pub symbol: String,
    pub timeframe: String,
    pub reason: String,
}

/// Everything a finished run reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return_pct: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    /// Fraction 0.0..=1.0
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    /// Largest drawdown of any pair, as a fraction of peak equity
    pub max_drawdown: f64,

    pub trades_with_retest: usize,
    pub trades_without_retest: usize,
    pub win_rate_with_retest: f64,
    pub win_rate_without_retest: f64,
    /// `win_rate_with_retest - win_rate_without_retest`
    pub retest_improvement: f64,

    /// Initial capital plus cumulative P&L at each exit
    pub equity_curve: Vec<EquityPoint>,
    /// Ordered by exit time
    pub trades: Vec<Trade>,
    pub pairs: Vec<PairReport>,
    pub skipped: Vec<SkippedPair>,
    pub cancelled: bool,
}

fn win_rate<'a>(trades: impl Iterator<Item = &'a Trade>) -> f64 {
    let (n, wins) = trades.fold((0usize, 0usize), |(n, w), t| {
        (n + 1, w + usize::from(t.outcome == TradeOutcome::Win))
    });
    if n == 0 {
        0.0
    } else {
        wins as f64 / n as f64
    }
}

impl BacktestSummary {
    /// Read-only merge of independent pair runs
    pub fn merge(
        initial_capital: f64,
        mut trades: Vec<Trade>,
        pairs: Vec<PairReport>,
        skipped: Vec<SkippedPair>,
        cancelled: bool,
    ) -> Self {
        trades.sort_by(|a, b| a.exit_time.cmp(&b.exit_time).then(a.id.cmp(&b.id)));

        let count = |o: TradeOutcome| trades.iter().filter(|t| t.outcome == o).count();
        let winning_trades = count(TradeOutcome::Win);
        let losing_trades = count(TradeOutcome::Loss);
        let breakeven_trades = count(TradeOutcome::Breakeven);

        let gross_profit: f64 = trades
            .iter()
            .filter(|t| t.profit_loss > 0.0)
            .map(|t| t.profit_loss)
            .sum();
        let gross_loss: f64 = trades
            .iter()
            .filter(|t| t.profit_loss < 0.0)
            .map(|t| t.profit_loss.abs())
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };

        let net: f64 = trades.iter().map(|t| t.profit_loss).sum();
        let final_capital = initial_capital + net;

        let mut equity = initial_capital;
        let equity_curve = trades
            .iter()
            .map(|t| {
                equity += t.profit_loss;
                EquityPoint {
                    timestamp: t.exit_time,
                    equity,
                }
            })
            .collect();

        let with_retest = || trades.iter().filter(|t| t.had_zone_retest);
        let without_retest = || trades.iter().filter(|t| !t.had_zone_retest);
        let win_rate_with_retest = win_rate(with_retest());
        let win_rate_without_retest = win_rate(without_retest());

        Self {
            initial_capital,
            final_capital,
            total_return_pct: (final_capital - initial_capital) / initial_capital * 100.0,
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
            breakeven_trades,
            win_rate: win_rate(trades.iter()),
            gross_profit,
            gross_loss,
            profit_factor,
            max_drawdown: pairs.iter().map(|p| p.max_drawdown).fold(0.0, f64::max),
            trades_with_retest: with_retest().count(),
            trades_without_retest: without_retest().count(),
            win_rate_with_retest,
            win_rate_without_retest,
            retest_improvement: win_rate_with_retest - win_rate_without_retest,
            equity_curve,
            trades,
            pairs,
            skipped,
            cancelled,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
