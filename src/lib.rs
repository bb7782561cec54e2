//! # zonescan - chart pattern detection with zone-retest confirmation
//!
//! Detects multi-candle chart patterns (double tops/bottoms, head and shoulders,
//! flags, UPU/DPD continuations, frequency zones, ...), scores each candidate with
//! a feature snapshot built around the zone-retest heuristic, and replays
//! history bar-by-bar to measure how those signals would have traded.
//!
//! ## Quick Start
//!
//! ```rust
//! use zonescan::prelude::*;
//!
//! let engine = EngineBuilder::new()
//!     .tier(Tier::Pro)
//!     .with_all_defaults()
//!     .min_confidence(0.5)
//!     .require_zone_retest(true)
//!     .build()
//!     .unwrap();
//!
//! let candles: Vec<Candle> = vec![];
//! let detections = engine.detect_all(&candles);
//! assert!(detections.is_empty());
//! ```

pub mod backtest;
pub mod detectors;
pub mod engine;
pub mod features;
pub mod filter;
pub mod indicators;

pub use engine::{
    scan_parallel, BuiltinDetector, EngineBuilder, EngineConfig, PatternEngine, ScanError,
    ScanResult,
};

pub mod prelude {
    pub use crate::{
        // Backtest
        backtest::{
            BacktestConfig, BacktestEngine, BacktestState, BacktestSummary, CandleFeed,
            PositionSizing, ScanMode, StopPolicy, Trade, TradeOutcome,
        },
        // Detectors
        detectors::*,
        // Engine
        engine::{
            scan_parallel, BuiltinDetector, EngineBuilder, EngineConfig, PatternEngine, ScanError,
            ScanResult,
        },
        // Features
        features::{FeatureConfig, FeatureExtractor, PatternFeatures},
        // Filters
        filter::{FilterConfig, FilterEngine, FilterResult},
        // Types
        available_patterns,
        Candle,
        Direction,
        // Errors
        Error,
        OHLCVExt,
        PatternDetection,
        PatternType,
        Period,
        Ratio,
        Result,
        Tier,
        Zone,
        ZoneType,
        OHLCV,
    };
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by detectors, feature extraction and backtest setup
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Feature extraction needs a long history to seed EMA-200 and the S/R lookback
    #[error("Insufficient history: need {need} candles, got {got}")]
    InsufficientHistory { need: usize, got: usize },

    /// A detector's lookback window is longer than the available candles
    #[error("Insufficient data: need {need} candles, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Detector {pattern} failed: {reason}")]
    DetectorFailure {
        pattern: PatternType,
        reason: &'static str,
    },

    #[error("No candle data for {symbol} {timeframe}")]
    MissingMarketData { symbol: String, timeframe: String },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(Error::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(Error::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    /// Candle open time in milliseconds since the epoch
    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(Error::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(Error::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(Error::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// One fetched candle. Immutable once built; series are ordered by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candle {
    /// Open time, milliseconds since the epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp)
    }
}

// ============================================================
// SIGNAL TYPES
// ============================================================

/// Direction/bias of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }
}

/// Role a zone plays once price has broken through it.
///
/// A broken support acts as `Resistance` on the retest (price should reject
/// from below); a broken resistance acts as `Support` (price should bounce
/// from above). Bounce patterns that never broke the level use the role the
/// level already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Support,
    Resistance,
}

/// A price level a detection expects to be retested
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Zone {
    pub price: f64,
    pub kind: ZoneType,
}

impl Zone {
    pub fn support(price: f64) -> Self {
        Self {
            price,
            kind: ZoneType::Support,
        }
    }

    pub fn resistance(price: f64) -> Self {
        Self {
            price,
            kind: ZoneType::Resistance,
        }
    }
}

// ============================================================
// PATTERN TYPES & TIERS
// ============================================================

/// Subscription level gating which detectors a caller may run.
///
/// Tiers are cumulative: every pattern available to `Basic` is also
/// available to `Pro` and `Elite`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Pro,
    Elite,
}

macro_rules! pattern_types {
    ($($variant:ident => ($code:literal, $direction:expr, $tier:expr)),* $(,)?) => {
        /// Every chart pattern the engine knows about
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum PatternType {
            $($variant),*
        }

        impl PatternType {
            pub const ALL: [PatternType; [$($code),*].len()] = [$(PatternType::$variant),*];

            /// Stable string code, matches the serde representation
            pub fn as_str(self) -> &'static str {
                match self {
                    $(PatternType::$variant => $code),*
                }
            }

            /// Returns the typical direction of this pattern.
            ///
            /// - `Some(Direction::Bullish)` / `Some(Direction::Bearish)` - fixed bias
            /// - `None` - bidirectional, the breakout side decides
            pub fn typical_direction(self) -> Option<Direction> {
                match self {
                    $(PatternType::$variant => $direction),*
                }
            }

            /// Lowest tier allowed to run this pattern's detector
            pub fn min_tier(self) -> Tier {
                match self {
                    $(PatternType::$variant => $tier),*
                }
            }
        }
    };
}

const BULL: Option<Direction> = Some(Direction::Bullish);
const BEAR: Option<Direction> = Some(Direction::Bearish);

pattern_types! {
    DoubleTop => ("double_top", BEAR, Tier::Free),
    DoubleBottom => ("double_bottom", BULL, Tier::Free),
    TripleTop => ("triple_top", BEAR, Tier::Pro),
    TripleBottom => ("triple_bottom", BULL, Tier::Pro),
    HeadAndShoulders => ("head_and_shoulders", BEAR, Tier::Basic),
    InverseHeadAndShoulders => ("inverse_head_and_shoulders", BULL, Tier::Basic),
    Upu => ("upu", BULL, Tier::Pro),
    Dpd => ("dpd", BEAR, Tier::Pro),
    Upd => ("upd", BEAR, Tier::Elite),
    Dpu => ("dpu", BULL, Tier::Elite),
    BullFlag => ("bull_flag", BULL, Tier::Basic),
    BearFlag => ("bear_flag", BEAR, Tier::Basic),
    BullPennant => ("bull_pennant", BULL, Tier::Pro),
    BearPennant => ("bear_pennant", BEAR, Tier::Pro),
    AscendingTriangle => ("ascending_triangle", BULL, Tier::Basic),
    DescendingTriangle => ("descending_triangle", BEAR, Tier::Basic),
    SymmetricalTriangle => ("symmetrical_triangle", None, Tier::Pro),
    RisingWedge => ("rising_wedge", BEAR, Tier::Elite),
    FallingWedge => ("falling_wedge", BULL, Tier::Elite),
    CupAndHandle => ("cup_and_handle", BULL, Tier::Elite),
    Hfz => ("hfz", BEAR, Tier::Pro),
    Lfz => ("lfz", BULL, Tier::Pro),
    SupportBounce => ("support_bounce", BULL, Tier::Free),
    ResistanceRejection => ("resistance_rejection", BEAR, Tier::Free),
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patterns available to a subscription tier
pub fn available_patterns(tier: Tier) -> BTreeSet<PatternType> {
    PatternType::ALL
        .iter()
        .copied()
        .filter(|p| p.min_tier() <= tier)
        .collect()
}

// ============================================================
// PATTERN DETECTION - result of a detector
// ============================================================

/// One candidate trading signal produced by a detector.
///
/// Geometry (indices, prices, zone, `data`) is fixed at creation. The engine
/// revises `confidence` once it has attached `features`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternDetection {
    pub pattern: PatternType,
    pub direction: Direction,
    /// Confidence 0.0..=1.0
    pub confidence: f64,
    pub start_index: usize,
    /// Breakout candle index
    pub end_index: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub zone: Option<Zone>,
    /// Pattern-specific geometry (necklines, peaks, pole sizes, ...)
    pub data: BTreeMap<String, f64>,
    pub features: Option<features::PatternFeatures>,
}

impl PatternDetection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pattern: PatternType,
        direction: Direction,
        confidence: f64,
        start_index: usize,
        end_index: usize,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Self {
        Self {
            pattern,
            direction,
            confidence: confidence.clamp(0.0, 1.0),
            start_index,
            end_index,
            entry_price,
            stop_loss,
            take_profit,
            zone: None,
            data: BTreeMap::new(),
            features: None,
        }
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn with_data(mut self, key: &str, value: f64) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Potential reward over potential risk from entry
    pub fn risk_reward(&self) -> Option<f64> {
        let risk = (self.entry_price - self.stop_loss).abs();
        let reward = (self.take_profit - self.entry_price).abs();
        (risk > f64::EPSILON).then(|| reward / risk)
    }

    pub fn has_zone_retest(&self) -> bool {
        self.features.as_ref().is_some_and(|f| f.has_zone_retest)
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_candle_validate() {
        assert!(Candle::new(0, 10.0, 11.0, 9.0, 10.5, 1.0).validate().is_ok());
        assert!(Candle::new(0, 10.0, 9.0, 11.0, 10.5, 1.0).validate().is_err());
        assert!(Candle::new(0, f64::NAN, 11.0, 9.0, 10.5, 1.0).validate().is_err());
    }

    #[test]
    fn test_tiers_are_cumulative() {
        let free = available_patterns(Tier::Free);
        let basic = available_patterns(Tier::Basic);
        let pro = available_patterns(Tier::Pro);
        let elite = available_patterns(Tier::Elite);

        assert!(free.is_subset(&basic));
        assert!(basic.is_subset(&pro));
        assert!(pro.is_subset(&elite));
        assert_eq!(elite.len(), 24);
        assert!(free.contains(&PatternType::DoubleBottom));
        assert!(!free.contains(&PatternType::Upu));
        assert!(pro.contains(&PatternType::Upu));
    }

    #[test]
    fn test_typical_direction() {
        assert_eq!(PatternType::SymmetricalTriangle.typical_direction(), None);
        assert_eq!(PatternType::Lfz.typical_direction(), Some(Direction::Bullish));
        assert_eq!(PatternType::Upd.typical_direction(), Some(Direction::Bearish));
        let biased = PatternType::ALL
            .iter()
            .filter(|p| p.typical_direction().is_some())
            .count();
        assert_eq!(biased, 23);
    }

    #[test]
    fn test_pattern_codes_match_serde() {
        for p in PatternType::ALL {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.as_str()));
        }
    }

    #[test]
    fn test_detection_risk_reward() {
        let d = PatternDetection::new(
            PatternType::DoubleBottom,
            Direction::Bullish,
            1.4,
            0,
            10,
            100.0,
            98.0,
            105.0,
        );
        assert_eq!(d.confidence, 1.0);
        assert!((d.risk_reward().unwrap() - 2.5).abs() < 1e-9);
    }
}
