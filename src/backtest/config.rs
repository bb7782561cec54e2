//! Backtest configuration
//!
//! Loaded from JSON with serde defaults for every field. [`BacktestConfig::validate`]
//! runs before any candle is touched.

use serde::{Deserialize, Serialize};

use crate::features::FeatureConfig;
use crate::filter::FilterConfig;
use crate::{Error, PatternType, Result, Tier};

/// How much capital a new position reserves
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionSizing {
    /// Fraction of current capital
    Percent { fraction: f64 },
    /// Constant amount in quote currency
    Fixed { amount: f64 },
    /// Fractional Kelly from the run's own closed trades
    Kelly {
        #[serde(default = "default_kelly_multiplier")]
        multiplier: f64,
    },
}

fn default_kelly_multiplier() -> f64 {
    0.5
}

impl Default for PositionSizing {
    fn default() -> Self {
        PositionSizing::Percent { fraction: 0.02 }
    }
}

/// Where stops are placed; targets sit at `risk_reward` times the stop distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopPolicy {
    Atr {
        #[serde(default = "default_atr_multiplier")]
        multiplier: f64,
    },
    Percent { pct: f64 },
    /// Use the detector's own stop and target
    Pattern,
}

fn default_atr_multiplier() -> f64 {
    2.0
}

impl Default for StopPolicy {
    fn default() -> Self {
        StopPolicy::Atr {
            multiplier: default_atr_multiplier(),
        }
    }
}

/// Which detectors the candle walk runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Double top and double bottom only
    #[default]
    Simple,
    /// Every detector the tier allows
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Inclusive bounds in ms since the epoch
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    /// Allowlist; `None` runs everything the tier and scan mode allow
    pub patterns: Option<Vec<PatternType>>,
    pub initial_capital: f64,
    pub position_sizing: PositionSizing,
    pub max_concurrent_trades: usize,
    pub stop_loss: StopPolicy,
    pub risk_reward: f64,
    pub use_filters: bool,
    /// Minimum `overall_score` when filters are on
    pub min_score_threshold: f64,
    pub require_zone_retest: bool,
    /// Extra filter pass applied on top of the score threshold
    pub filter: Option<FilterConfig>,
    pub scan_mode: ScanMode,
    pub tier: Tier,
    /// Candles skipped before the walk starts
    pub min_history: usize,
    /// Trailing candles handed to the detectors at each step
    pub scan_window: usize,
    /// Steps between equity samples
    pub equity_sample_interval: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: vec!["1h".to_string()],
            patterns: None,
            initial_capital: 10_000.0,
            position_sizing: PositionSizing::default(),
            max_concurrent_trades: 3,
            stop_loss: StopPolicy::default(),
            risk_reward: 2.5,
            use_filters: true,
            min_score_threshold: 0.6,
            require_zone_retest: false,
            filter: None,
            scan_mode: ScanMode::Simple,
            tier: Tier::Elite,
            min_history: 200,
            scan_window: 500,
            equity_sample_interval: 24,
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}

impl BacktestConfig {
    /// Parse and validate. Unknown sizing or stop types fail here.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() || self.timeframes.is_empty() {
            return Err(invalid("at least one symbol and one timeframe required"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(invalid(format!("start_time {start} after end_time {end}")));
            }
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(invalid(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.max_concurrent_trades == 0 {
            return Err(invalid("max_concurrent_trades must be at least 1"));
        }
        match self.position_sizing {
            PositionSizing::Percent { fraction } if !(fraction > 0.0 && fraction <= 1.0) => {
                return Err(invalid(format!("percent sizing fraction {fraction} outside (0, 1]")));
            }
            PositionSizing::Fixed { amount } if !(amount.is_finite() && amount > 0.0) => {
                return Err(invalid(format!("fixed sizing amount {amount} must be positive")));
            }
            PositionSizing::Kelly { multiplier } if !(multiplier > 0.0 && multiplier <= 1.0) => {
                return Err(invalid(format!("kelly multiplier {multiplier} outside (0, 1]")));
            }
            _ => {}
        }
        match self.stop_loss {
            StopPolicy::Atr { multiplier } if !(multiplier.is_finite() && multiplier > 0.0) => {
                return Err(invalid(format!("atr stop multiplier {multiplier} must be positive")));
            }
            StopPolicy::Percent { pct } if !(pct > 0.0 && pct < 1.0) => {
                return Err(invalid(format!("percent stop {pct} outside (0, 1)")));
            }
            _ => {}
        }
        if !(self.risk_reward.is_finite() && self.risk_reward > 0.0) {
            return Err(invalid(format!("risk_reward must be positive, got {}", self.risk_reward)));
        }
        if !(0.0..=1.0).contains(&self.min_score_threshold) {
            return Err(Error::OutOfRange {
                field: "min_score_threshold",
                value: self.min_score_threshold,
                min: 0.0,
                max: 1.0,
            });
        }
        if self.equity_sample_interval == 0 {
            return Err(invalid("equity_sample_interval must be positive"));
        }
        // feature extraction refuses shorter slices, so every detection would drop
        let need = FeatureConfig::default().min_history;
        let windows = [("min_history", self.min_history), ("scan_window", self.scan_window)];
        for (field, value) in windows {
            if value < need {
                return Err(invalid(format!(
                    "{field} {value} is below the {need} candles feature extraction needs"
                )));
            }
        }
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        Ok(())
    }

    /// Every (symbol, timeframe) combination, symbols outermost
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.symbols
            .iter()
            .flat_map(|s| self.timeframes.iter().map(move |tf| (s.clone(), tf.clone())))
            .collect()
    }
}
