//! Bar-by-bar backtesting
//!
//! Every (symbol, timeframe) pair is walked on its own with an isolated
//! [`BacktestState`]. Pairs never share mutable state, so they can run on a
//! rayon pool; the summary is a read-only merge at the end.

pub mod config;
pub mod report;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::engine::{BuiltinDetector, EngineBuilder, PatternEngine};
use crate::filter::FilterEngine;
use crate::indicators;
use crate::{Candle, Direction, Error, PatternDetection, PatternType, Result};

pub use config::{BacktestConfig, PositionSizing, ScanMode, StopPolicy};
pub use report::{BacktestSummary, PairReport, SkippedPair, PROFIT_FACTOR_CAP};
pub use state::{BacktestState, EquityPoint, Entry, ExitReason, Position, Trade, TradeOutcome};

/// Sizing used by Kelly until the run has enough closed trades
pub const KELLY_FALLBACK_FRACTION: f64 = 0.02;

/// Historical candles by (symbol, timeframe)
pub trait CandleFeed {
    fn candles(&self, symbol: &str, timeframe: &str) -> Option<&[Candle]>;
}

impl CandleFeed for HashMap<(String, String), Vec<Candle>> {
    fn candles(&self, symbol: &str, timeframe: &str) -> Option<&[Candle]> {
        self.get(&(symbol.to_string(), timeframe.to_string()))
            .map(Vec::as_slice)
    }
}

/// Outcome of walking one pair
#[derive(Debug, Clone)]
pub struct PairRun {
    pub report: PairReport,
    pub trades: Vec<Trade>,
}

pub struct BacktestEngine {
    config: BacktestConfig,
    scanner: PatternEngine,
    filter: Option<FilterEngine>,
}

impl BacktestEngine {
    /// Validate the config and build the scanner. Fails before any candle
    /// is processed.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;

        let builder = EngineBuilder::new()
            .tier(config.tier)
            .min_confidence(0.0)
            .require_zone_retest(false);
        let builder = match config.scan_mode {
            ScanMode::Simple => builder
                .add(BuiltinDetector::DoubleTop(Default::default()))
                .add(BuiltinDetector::DoubleBottom(Default::default())),
            ScanMode::Full => builder.with_all_defaults(),
        };
        let builder = match &config.patterns {
            Some(patterns) => builder.only_patterns(patterns.iter().copied()),
            None => builder,
        };
        let scanner = builder.build()?;

        let filter = config.filter.clone().map(FilterEngine::new).transpose()?;

        Ok(Self {
            config,
            scanner,
            filter,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Pattern types the walk can trade
    pub fn active_patterns(&self) -> Vec<PatternType> {
        self.scanner.active_patterns().into_iter().collect()
    }

    pub fn run<F: CandleFeed>(&self, feed: &F) -> BacktestSummary {
        self.run_with_cancel(feed, &AtomicBool::new(false))
    }

    /// Sequential run. `cancel` is checked between pairs; pairs already
    /// finished still appear in the summary.
    pub fn run_with_cancel<F: CandleFeed>(&self, feed: &F, cancel: &AtomicBool) -> BacktestSummary {
        self.log_start();
        let mut outcomes = Vec::new();
        let mut cancelled = false;
        for (symbol, timeframe) in self.config.pairs() {
            if cancel.load(Ordering::Relaxed) {
                warn!(%symbol, %timeframe, "backtest cancelled");
                cancelled = true;
                break;
            }
            outcomes.push(self.run_pair(feed, &symbol, &timeframe));
        }
        self.finish(outcomes, cancelled)
    }

    /// One rayon task per pair
    pub fn run_parallel<F: CandleFeed + Sync>(&self, feed: &F) -> BacktestSummary {
        self.log_start();
        let outcomes: Vec<_> = self
            .config
            .pairs()
            .par_iter()
            .map(|(symbol, timeframe)| self.run_pair(feed, symbol, timeframe))
            .collect();
        self.finish(outcomes, false)
    }

    /// Look up, trim to the configured time range and walk one pair
    pub fn run_pair<F: CandleFeed + ?Sized>(
        &self,
        feed: &F,
        symbol: &str,
        timeframe: &str,
    ) -> std::result::Result<PairRun, SkippedPair> {
        let skip = |error: Error| {
            warn!(%symbol, %timeframe, %error, "pair skipped");
            SkippedPair {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: error.to_string(),
            }
        };

        let candles = match feed.candles(symbol, timeframe) {
            Some(c) if !c.is_empty() => self.in_range(c),
            _ => {
                return Err(skip(Error::MissingMarketData {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                }))
            }
        };
        if candles.len() < self.config.min_history {
            return Err(skip(Error::InsufficientHistory {
                need: self.config.min_history,
                got: candles.len(),
            }));
        }

        let state = self.walk(symbol, timeframe, candles);
        let report = PairReport::from_state(symbol, timeframe, candles.len(), &state);
        info!(
            %symbol,
            %timeframe,
            trades = report.total_trades,
            win_rate = report.win_rate,
            pnl = report.profit_loss,
            max_drawdown = report.max_drawdown,
            "pair finished"
        );
        Ok(PairRun {
            report,
            trades: state.closed_trades,
        })
    }

    fn in_range<'a>(&self, candles: &'a [Candle]) -> &'a [Candle] {
        let from = self
            .config
            .start_time
            .map_or(0, |t| candles.partition_point(|c| c.timestamp < t));
        let to = self
            .config
            .end_time
            .map_or(candles.len(), |t| candles.partition_point(|c| c.timestamp <= t));
        &candles[from..to.max(from)]
    }

    /// The candle walk. Caller guarantees `candles.len() >= min_history`.
    pub fn walk(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> BacktestState {
        let cfg = &self.config;
        let mut state = BacktestState::new(cfg.initial_capital);
        let atr = indicators::atr(candles, indicators::ATR_PERIOD);
        // pattern instances already traded: (type, absolute breakout index)
        let mut traded: HashSet<(PatternType, usize)> = HashSet::new();

        for i in cfg.min_history..candles.len() {
            let candle = &candles[i];
            state.update_positions(candle, i);

            if state.has_capacity(cfg.max_concurrent_trades) {
                let offset = (i + 1).saturating_sub(cfg.scan_window);
                for det in self.scanner.detect_all(&candles[offset..=i]) {
                    if !state.has_capacity(cfg.max_concurrent_trades) {
                        break;
                    }
                    let key = (det.pattern, offset + det.end_index);
                    if traded.contains(&key) {
                        continue;
                    }
                    if !self.accepts(&det) {
                        continue;
                    }
                    let Some(entry) = self.entry(&state, &det, symbol, timeframe, candle, i, atr[i]) else {
                        continue;
                    };
                    if state.open(entry).is_some() {
                        traded.insert(key);
                    }
                }
            }

            state.update_drawdown();
            if (i - cfg.min_history) % cfg.equity_sample_interval == 0 {
                state.record_equity(candle.timestamp);
            }
        }

        if let Some(last) = candles.last() {
            state.close_all(last, candles.len() - 1);
            state.record_equity(last.timestamp);
        }
        state
    }

    /// Score, retest and optional filter-engine gates
    fn accepts(&self, det: &PatternDetection) -> bool {
        let cfg = &self.config;
        if !cfg.use_filters {
            return true;
        }
        let Some(features) = det.features.as_ref() else {
            return false;
        };
        if features.overall_score < cfg.min_score_threshold {
            debug!(pattern = %det.pattern, score = features.overall_score, "below score threshold");
            return false;
        }
        if cfg.require_zone_retest && !features.has_zone_retest {
            debug!(pattern = %det.pattern, "no zone retest");
            return false;
        }
        if let Some(filter) = &self.filter {
            let result = filter.evaluate(det);
            if !result.passed {
                debug!(pattern = %det.pattern, rejected_by = ?result.rejected_by, "filtered out");
                return false;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn entry(
        &self,
        state: &BacktestState,
        det: &PatternDetection,
        symbol: &str,
        timeframe: &str,
        candle: &Candle,
        index: usize,
        atr: f64,
    ) -> Option<Entry> {
        let long = match det.direction {
            Direction::Bullish => true,
            Direction::Bearish => false,
            Direction::Neutral => return None,
        };
        let price = candle.close;
        let (stop_loss, take_profit) = self.exits(det, price, long, atr)?;
        let value = self.position_value(state);
        let features = det.features.as_ref();

        Some(Entry {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            pattern: det.pattern,
            direction: det.direction,
            index,
            time: candle.timestamp,
            price,
            stop_loss,
            take_profit,
            value,
            confidence: det.confidence,
            overall_score: features.map_or(0.0, |f| f.overall_score),
            had_zone_retest: features.is_some_and(|f| f.has_zone_retest),
            retest_quality: features.map_or(0.0, |f| f.retest_quality_score),
        })
    }

    /// Stop and target for an entry at `price`; `None` when they would sit on
    /// the wrong side of the entry
    fn exits(&self, det: &PatternDetection, price: f64, long: bool, atr: f64) -> Option<(f64, f64)> {
        let sign = if long { 1.0 } else { -1.0 };
        let (stop, target) = match self.config.stop_loss {
            StopPolicy::Atr { multiplier } => {
                let dist = atr * multiplier;
                (price - sign * dist, price + sign * dist * self.config.risk_reward)
            }
            StopPolicy::Percent { pct } => {
                let dist = price * pct;
                (price - sign * dist, price + sign * dist * self.config.risk_reward)
            }
            StopPolicy::Pattern => (det.stop_loss, det.take_profit),
        };
        let valid = if long {
            stop < price && target > price
        } else {
            stop > price && target < price
        };
        valid.then_some((stop, target))
    }

    fn position_value(&self, state: &BacktestState) -> f64 {
        let capital = state.current_capital;
        match self.config.position_sizing {
            PositionSizing::Percent { fraction } => capital * fraction,
            PositionSizing::Fixed { amount } => amount,
            PositionSizing::Kelly { multiplier } => {
                capital * state.kelly_fraction(multiplier).unwrap_or(KELLY_FALLBACK_FRACTION)
            }
        }
    }

    fn log_start(&self) {
        info!(
            symbols = self.config.symbols.len(),
            timeframes = self.config.timeframes.len(),
            capital = self.config.initial_capital,
            mode = ?self.config.scan_mode,
            patterns = self.scanner.active_patterns().len(),
            "starting backtest"
        );
    }

    fn finish(
        &self,
        outcomes: Vec<std::result::Result<PairRun, SkippedPair>>,
        cancelled: bool,
    ) -> BacktestSummary {
        let mut trades = Vec::new();
        let mut pairs = Vec::new();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(run) => {
                    trades.extend(run.trades);
                    pairs.push(run.report);
                }
                Err(s) => skipped.push(s),
            }
        }

        let summary =
            BacktestSummary::merge(self.config.initial_capital, trades, pairs, skipped, cancelled);
        info!(
            total_trades = summary.total_trades,
            win_rate = summary.win_rate,
            win_rate_with_retest = summary.win_rate_with_retest,
            win_rate_without_retest = summary.win_rate_without_retest,
            profit_factor = summary.profit_factor,
            max_drawdown = summary.max_drawdown,
            skipped = summary.skipped.len(),
            "backtest complete"
        );
        summary
    }
}
