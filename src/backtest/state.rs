//! Per-run mutable state: capital, open positions, closed trades, drawdown

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Candle, Direction, PatternType};

/// P&L within this distance of zero counts as breakeven
pub const BREAKEVEN_EPSILON: f64 = 1e-9;

/// Closed trades needed before Kelly sizing trusts its own statistics
pub const KELLY_MIN_TRADES: usize = 10;
pub const KELLY_MAX_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

impl TradeOutcome {
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > BREAKEVEN_EPSILON {
            TradeOutcome::Win
        } else if pnl < -BREAKEVEN_EPSILON {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    EndOfData,
}

/// What the walk hands over when it accepts a detection
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub symbol: String,
    pub timeframe: String,
    pub pattern: PatternType,
    pub direction: Direction,
    pub index: usize,
    pub time: i64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Capital reserved for the position
    pub value: f64,
    pub confidence: f64,
    pub overall_score: f64,
    pub had_zone_retest: bool,
    pub retest_quality: f64,
}

/// An open simulated position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub timeframe: String,
    pub pattern: PatternType,
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: i64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
    pub value: f64,
    pub confidence: f64,
    pub overall_score: f64,
    pub had_zone_retest: bool,
    pub retest_quality: f64,
    /// Best move in the trade's favour, as a fraction of entry
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
}

impl Position {
    fn is_long(&self) -> bool {
        self.direction.is_bullish()
    }

    pub fn pnl_at(&self, price: f64) -> f64 {
        if self.is_long() {
            (price - self.entry_price) * self.quantity
        } else {
            (self.entry_price - price) * self.quantity
        }
    }

    fn track_excursion(&mut self, candle: &Candle) {
        let (favorable, adverse) = if self.is_long() {
            (candle.high - self.entry_price, self.entry_price - candle.low)
        } else {
            (self.entry_price - candle.low, candle.high - self.entry_price)
        };
        self.max_favorable_excursion = self
            .max_favorable_excursion
            .max(favorable / self.entry_price);
        self.max_adverse_excursion = self.max_adverse_excursion.max(adverse / self.entry_price);
    }

    /// Exit triggered by this candle. The stop is checked first, so a candle
    /// spanning both levels counts as a loss.
    fn exit_hit(&self, candle: &Candle) -> Option<(f64, ExitReason)> {
        if self.is_long() {
            if candle.low <= self.stop_loss {
                Some((self.stop_loss, ExitReason::StopLoss))
            } else if candle.high >= self.take_profit {
                Some((self.take_profit, ExitReason::TakeProfit))
            } else {
                None
            }
        } else if candle.high >= self.stop_loss {
            Some((self.stop_loss, ExitReason::StopLoss))
        } else if candle.low <= self.take_profit {
            Some((self.take_profit, ExitReason::TakeProfit))
        } else {
            None
        }
    }
}

/// A closed position. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub timeframe: String,
    pub pattern: PatternType,
    pub direction: Direction,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
    pub profit_loss: f64,
    pub profit_loss_pct: f64,
    pub outcome: TradeOutcome,
    pub exit_reason: ExitReason,
    pub candles_held: usize,
    pub confidence: f64,
    pub overall_score: f64,
    pub had_zone_retest: bool,
    pub retest_quality: f64,
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
}

/// Mutable state of one (symbol, timeframe) walk
#[derive(Debug, Clone, Serialize)]
pub struct BacktestState {
    pub initial_capital: f64,
    /// Free capital; reserved position value is not included
    pub current_capital: f64,
    pub peak_capital: f64,
    pub lowest_capital: f64,
    pub current_drawdown: f64,
    pub max_drawdown: f64,
    pub open_positions: Vec<Position>,
    pub closed_trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub trade_counter: u64,
}

impl BacktestState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            current_capital: initial_capital,
            peak_capital: initial_capital,
            lowest_capital: initial_capital,
            current_drawdown: 0.0,
            max_drawdown: 0.0,
            open_positions: Vec::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            trade_counter: 0,
        }
    }

    /// Free capital plus value reserved by open positions
    pub fn equity(&self) -> f64 {
        self.current_capital + self.open_positions.iter().map(|p| p.value).sum::<f64>()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.closed_trades.iter().map(|t| t.profit_loss).sum()
    }

    pub fn has_capacity(&self, max_concurrent: usize) -> bool {
        self.open_positions.len() < max_concurrent
    }

    /// Reserve capital and open a position. Returns the position id, or
    /// `None` when the entry is unusable or capital is exhausted.
    pub fn open(&mut self, entry: Entry) -> Option<u64> {
        let value = entry.value.min(self.current_capital);
        if !(value > 0.0 && entry.price > 0.0) {
            return None;
        }
        self.trade_counter += 1;
        let id = self.trade_counter;
        self.current_capital -= value;

        debug!(
            id,
            symbol = %entry.symbol,
            pattern = %entry.pattern,
            direction = ?entry.direction,
            price = entry.price,
            stop = entry.stop_loss,
            target = entry.take_profit,
            value,
            "opened position"
        );

        self.open_positions.push(Position {
            id,
            symbol: entry.symbol,
            timeframe: entry.timeframe,
            pattern: entry.pattern,
            direction: entry.direction,
            entry_index: entry.index,
            entry_time: entry.time,
            entry_price: entry.price,
            stop_loss: entry.stop_loss,
            take_profit: entry.take_profit,
            quantity: value / entry.price,
            value,
            confidence: entry.confidence,
            overall_score: entry.overall_score,
            had_zone_retest: entry.had_zone_retest,
            retest_quality: entry.retest_quality,
            max_favorable_excursion: 0.0,
            max_adverse_excursion: 0.0,
        });
        Some(id)
    }

    /// Track excursions and close every position whose stop or target the
    /// candle reached
    pub fn update_positions(&mut self, candle: &Candle, index: usize) {
        let mut i = 0;
        while i < self.open_positions.len() {
            let pos = &mut self.open_positions[i];
            pos.track_excursion(candle);
            match pos.exit_hit(candle) {
                Some((price, reason)) => {
                    let pos = self.open_positions.remove(i);
                    self.close(pos, price, candle.timestamp, index, reason);
                }
                None => i += 1,
            }
        }
    }

    /// Close whatever is still open at `candle`'s close
    pub fn close_all(&mut self, candle: &Candle, index: usize) {
        for pos in std::mem::take(&mut self.open_positions) {
            self.close(pos, candle.close, candle.timestamp, index, ExitReason::EndOfData);
        }
    }

    fn close(&mut self, pos: Position, exit_price: f64, exit_time: i64, index: usize, reason: ExitReason) {
        let pnl = pos.pnl_at(exit_price);
        let outcome = TradeOutcome::from_pnl(pnl);
        self.current_capital += pos.value + pnl;
        self.lowest_capital = self.lowest_capital.min(self.current_capital);

        debug!(
            id = pos.id,
            symbol = %pos.symbol,
            pattern = %pos.pattern,
            exit = exit_price,
            pnl,
            outcome = ?outcome,
            reason = ?reason,
            "closed position"
        );

        self.closed_trades.push(Trade {
            id: pos.id,
            profit_loss_pct: if pos.value > 0.0 { pnl / pos.value * 100.0 } else { 0.0 },
            symbol: pos.symbol,
            timeframe: pos.timeframe,
            pattern: pos.pattern,
            direction: pos.direction,
            entry_time: pos.entry_time,
            exit_time,
            entry_price: pos.entry_price,
            exit_price,
            stop_loss: pos.stop_loss,
            take_profit: pos.take_profit,
            quantity: pos.quantity,
            profit_loss: pnl,
            outcome,
            exit_reason: reason,
            candles_held: index.saturating_sub(pos.entry_index),
            confidence: pos.confidence,
            overall_score: pos.overall_score,
            had_zone_retest: pos.had_zone_retest,
            retest_quality: pos.retest_quality,
            max_favorable_excursion: pos.max_favorable_excursion,
            max_adverse_excursion: pos.max_adverse_excursion,
        });
        self.update_drawdown();
    }

    /// Refresh peak equity and the running maximum drawdown
    pub fn update_drawdown(&mut self) {
        let equity = self.equity();
        self.peak_capital = self.peak_capital.max(equity);
        self.current_drawdown = if self.peak_capital > 0.0 {
            ((self.peak_capital - equity) / self.peak_capital).max(0.0)
        } else {
            0.0
        };
        self.max_drawdown = self.max_drawdown.max(self.current_drawdown);
    }

    pub fn record_equity(&mut self, timestamp: i64) {
        self.equity_curve.push(EquityPoint {
            timestamp,
            equity: self.equity(),
        });
    }

    /// Fractional Kelly from closed trades:
    /// `multiplier * (W - (1 - W) / R)` clamped to `[0, KELLY_MAX_FRACTION]`.
    /// `None` until there are enough trades with at least one win and one loss.
    pub fn kelly_fraction(&self, multiplier: f64) -> Option<f64> {
        if self.closed_trades.len() < KELLY_MIN_TRADES {
            return None;
        }
        let (wins, losses): (Vec<f64>, Vec<f64>) = self
            .closed_trades
            .iter()
            .map(|t| t.profit_loss)
            .filter(|pnl| pnl.abs() > BREAKEVEN_EPSILON)
            .partition(|pnl| *pnl > 0.0);
        if wins.is_empty() || losses.is_empty() {
            return None;
        }
        let decided = (wins.len() + losses.len()) as f64;
        let w = wins.len() as f64 / decided;
        let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
        let avg_loss = losses.iter().map(|l| l.abs()).sum::<f64>() / losses.len() as f64;
        let r = avg_win / avg_loss;
        Some((multiplier * (w - (1.0 - w) / r)).clamp(0.0, KELLY_MAX_FRACTION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(direction: Direction, price: f64, stop: f64, target: f64, value: f64) -> Entry {
        Entry {
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            pattern: PatternType::DoubleBottom,
            direction,
            index: 0,
            time: 0,
            price,
            stop_loss: stop,
            take_profit: target,
            value,
            confidence: 0.7,
            overall_score: 0.6,
            had_zone_retest: false,
            retest_quality: 0.0,
        }
    }

    fn bar(i: usize, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(i as i64 * 60_000, close, high, low, close, 1.0)
    }

    #[test]
    fn test_long_take_profit() {
        let mut s = BacktestState::new(1000.0);
        s.open(entry(Direction::Bullish, 100.0, 95.0, 110.0, 100.0)).unwrap();
        assert_eq!(s.current_capital, 900.0);
        assert_eq!(s.equity(), 1000.0);

        s.update_positions(&bar(1, 105.0, 99.0, 104.0), 1);
        assert_eq!(s.open_positions.len(), 1);
        s.update_positions(&bar(2, 111.0, 103.0, 109.0), 2);

        let t = &s.closed_trades[0];
        assert_eq!(t.exit_reason, ExitReason::TakeProfit);
        assert_eq!(t.outcome, TradeOutcome::Win);
        assert!((t.profit_loss - 10.0).abs() < 1e-9);
        assert!((t.max_favorable_excursion - 0.11).abs() < 1e-9);
        assert!((t.max_adverse_excursion - 0.01).abs() < 1e-9);
        assert_eq!(t.candles_held, 2);
        assert!((s.current_capital - 1010.0).abs() < 1e-9);
    }

    #[test]
    fn test_stop_checked_before_target() {
        let mut s = BacktestState::new(1000.0);
        s.open(entry(Direction::Bullish, 100.0, 95.0, 110.0, 100.0)).unwrap();
        s.update_positions(&bar(1, 112.0, 94.0, 100.0), 1);
        let t = &s.closed_trades[0];
        assert_eq!(t.exit_reason, ExitReason::StopLoss);
        assert_eq!(t.outcome, TradeOutcome::Loss);
        assert!(t.profit_loss < 0.0);
    }

    #[test]
    fn test_short_position_and_end_of_data() {
        let mut s = BacktestState::new(1000.0);
        s.open(entry(Direction::Bearish, 100.0, 105.0, 90.0, 200.0)).unwrap();
        s.update_positions(&bar(1, 101.0, 96.0, 97.0), 1);
        s.close_all(&bar(2, 98.0, 96.0, 97.0), 2);
        let t = &s.closed_trades[0];
        assert_eq!(t.exit_reason, ExitReason::EndOfData);
        assert!((t.profit_loss - 6.0).abs() < 1e-9);
        assert!((s.current_capital - (1000.0 + s.realized_pnl())).abs() < 1e-9);
        assert!(s.open_positions.is_empty());
    }

    #[test]
    fn test_open_caps_at_free_capital() {
        let mut s = BacktestState::new(100.0);
        s.open(entry(Direction::Bullish, 10.0, 9.0, 12.0, 80.0)).unwrap();
        s.open(entry(Direction::Bullish, 10.0, 9.0, 12.0, 80.0)).unwrap();
        assert_eq!(s.current_capital, 0.0);
        assert!(s.open(entry(Direction::Bullish, 10.0, 9.0, 12.0, 80.0)).is_none());
        assert_eq!(s.trade_counter, 2);
    }

    #[test]
    fn test_drawdown_is_running_max() {
        let mut s = BacktestState::new(1000.0);
        let mut seen = 0.0;
        for (i, (stop, target)) in [(95.0, 200.0), (50.0, 101.0), (95.0, 200.0)].into_iter().enumerate() {
            s.open(entry(Direction::Bullish, 100.0, stop, target, 500.0)).unwrap();
            s.update_positions(&bar(i, 102.0, 90.0, 95.0), i);
            assert!(s.max_drawdown >= seen);
            assert!(s.max_drawdown >= s.current_drawdown);
            seen = s.max_drawdown;
        }
        assert!(s.max_drawdown > 0.0);
    }

    #[test]
    fn test_kelly_fraction() {
        let mut s = BacktestState::new(10_000.0);
        assert_eq!(s.kelly_fraction(1.0), None);
        // 6 wins of +20, 4 losses of -10: W = 0.6, R = 2
        for i in 0..10 {
            let target = if i < 6 { 120.0 } else { 1000.0 };
            s.open(entry(Direction::Bullish, 100.0, 90.0, target, 100.0)).unwrap();
            let c = if i < 6 { bar(i, 121.0, 99.0, 120.0) } else { bar(i, 101.0, 89.0, 90.0) };
            s.update_positions(&c, i);
        }
        let f = s.kelly_fraction(1.0).unwrap();
        assert!((f - 0.25).abs() < 1e-9, "0.6 - 0.4 / 2 = 0.4, clamped");
        let half = s.kelly_fraction(0.5).unwrap();
        assert!((half - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_outcome_from_pnl() {
        assert_eq!(TradeOutcome::from_pnl(1e-12), TradeOutcome::Breakeven);
        assert_eq!(TradeOutcome::from_pnl(0.5), TradeOutcome::Win);
        assert_eq!(TradeOutcome::from_pnl(-0.5), TradeOutcome::Loss);
    }
}
