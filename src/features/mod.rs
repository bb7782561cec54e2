//! Feature extraction for pattern candidates
//!
//! Turns a candle history plus an optional zone into a [`PatternFeatures`]
//! snapshot: volume confirmation, EMA trend context, support/resistance
//! confluence, RSI divergence, MACD state, the zone-retest triple and the
//! composite scores used to rank and filter detections.

pub mod levels;
pub mod retest;
pub mod scoring;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators;
use crate::{Error, Period, Result, Zone, ZoneType, OHLCV};

pub use levels::{pivot_highs, pivot_lows, support_resistance, SupportResistance};
pub use retest::{validate_zone_retest, ZoneRetest};

// ============================================================
// FEATURE ENUMS
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    #[default]
    Flat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    #[default]
    Sideways,
}

/// Where the last candle sits relative to an EMA
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaPosition {
    Above,
    Below,
    /// The candle's range straddles the EMA
    #[default]
    Crossing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    Bullish,
    Bearish,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdCross {
    BullishCross,
    BearishCross,
    #[default]
    None,
}

// ============================================================
// PATTERN FEATURES
// ============================================================

/// Snapshot of derived signal quality for one candidate at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternFeatures {
    // price action
    pub price_change_pct: f64,
    /// Current ATR over its trailing mean
    pub volatility_ratio: f64,

    // volume
    pub volume_ratio: f64,
    pub volume_trend: VolumeTrend,
    pub volume_confirmed: bool,

    // geometry
    pub pattern_duration: usize,
    pub pattern_height_pct: f64,
    /// 1.0 when both halves of the pattern span the same range
    pub pattern_symmetry: f64,

    // support / resistance
    pub support_touches: u32,
    pub resistance_touches: u32,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
    pub distance_to_support_pct: Option<f64>,
    pub distance_to_resistance_pct: Option<f64>,

    // trend
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    pub ema_20_position: EmaPosition,
    pub ema_50_position: EmaPosition,
    pub ema_200_position: EmaPosition,

    // momentum
    pub rsi: f64,
    pub rsi_divergence: Divergence,
    pub macd_histogram: f64,
    pub macd_signal: MacdCross,

    // calendar (UTC), absent when candles carry no timestamp
    pub hour_of_day: Option<u32>,
    /// 0 = Monday
    pub day_of_week: Option<u32>,

    // zone retest
    pub has_zone_retest: bool,
    pub retest_candles_ago: usize,
    pub retest_quality_score: f64,

    // derived scores, all 0.0..=1.0
    pub pattern_quality_score: f64,
    pub entry_timing_score: f64,
    pub risk_reward_score: f64,
    pub overall_score: f64,
}

// ============================================================
// SUB-ALGORITHMS
// ============================================================

/// Breakout volume against the average of the preceding candles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfirmation {
    pub ratio: f64,
    pub is_confirmed: bool,
    pub trend: VolumeTrend,
}

/// Compare the breakout candle's volume with the mean over the prior
/// `lookback` candles. The trend compares the first and last volume of the
/// five candles ending at the breakout.
pub fn volume_confirmation<T: OHLCV>(
    candles: &[T],
    breakout_index: usize,
    lookback: usize,
) -> VolumeConfirmation {
    let Some(breakout) = candles.get(breakout_index) else {
        return VolumeConfirmation {
            ratio: 0.0,
            is_confirmed: false,
            trend: VolumeTrend::Flat,
        };
    };

    let prior = &candles[breakout_index.saturating_sub(lookback)..breakout_index];
    let avg = if prior.is_empty() {
        0.0
    } else {
        prior.iter().map(|c| c.volume()).sum::<f64>() / prior.len() as f64
    };
    let ratio = if avg > 0.0 {
        breakout.volume() / avg
    } else {
        0.0
    };

    let first = candles[breakout_index.saturating_sub(4)].volume();
    let last = breakout.volume();
    let trend = if first <= 0.0 {
        VolumeTrend::Flat
    } else if last > first * 1.2 {
        VolumeTrend::Increasing
    } else if last < first * 0.8 {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Flat
    };

    VolumeConfirmation {
        ratio,
        is_confirmed: ratio >= scoring::VOLUME_CONFIRM_RATIO,
        trend,
    }
}

/// EMA-20/50/200 alignment at the last close
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendContext {
    pub direction: TrendDirection,
    pub strength: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub ema_200: f64,
}

/// `Up` iff price > EMA20 > EMA50 > EMA200, `Down` iff the reverse. Strength is
/// the distance to EMA-200, saturating at 10%.
pub fn trend_context(closes: &[f64]) -> TrendContext {
    let Some(&price) = closes.last() else {
        return TrendContext {
            direction: TrendDirection::Sideways,
            strength: 0.0,
            ema_20: 0.0,
            ema_50: 0.0,
            ema_200: 0.0,
        };
    };
    let last = |s: Vec<f64>| s.last().copied().unwrap_or(price);
    let ema_20 = last(indicators::ema(closes, 20));
    let ema_50 = last(indicators::ema(closes, 50));
    let ema_200 = last(indicators::ema(closes, 200));

    let direction = if price > ema_20 && ema_20 > ema_50 && ema_50 > ema_200 {
        TrendDirection::Up
    } else if price < ema_20 && ema_20 < ema_50 && ema_50 < ema_200 {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    };

    let strength = if ema_200 > 0.0 {
        ((price - ema_200).abs() / ema_200 / 0.10).min(1.0)
    } else {
        0.0
    };

    TrendContext {
        direction,
        strength,
        ema_20,
        ema_50,
        ema_200,
    }
}

/// Compare the two most recent pivot lows (highs) in the trailing window
/// against RSI at the same candles.
pub fn rsi_divergence<T: OHLCV>(candles: &[T], rsi: &[f64], lookback: usize) -> Divergence {
    let to = candles.len().min(rsi.len());
    let from = to.saturating_sub(lookback);

    let lows = levels::pivot_lows(candles, from, to);
    if let [.., a, b] = lows[..] {
        if candles[b].low() < candles[a].low() && rsi[b] > rsi[a] {
            return Divergence::Bullish;
        }
    }

    let highs = levels::pivot_highs(candles, from, to);
    if let [.., a, b] = highs[..] {
        if candles[b].high() > candles[a].high() && rsi[b] < rsi[a] {
            return Divergence::Bearish;
        }
    }

    Divergence::None
}

fn ema_position<T: OHLCV>(candle: &T, ema: f64) -> EmaPosition {
    if candle.low() <= ema && ema <= candle.high() {
        EmaPosition::Crossing
    } else if candle.close() > ema {
        EmaPosition::Above
    } else {
        EmaPosition::Below
    }
}

// ============================================================
// EXTRACTOR
// ============================================================

/// Feature extractor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Candles required before any feature is computed (seeds EMA-200)
    pub min_history: usize,
    pub volume_lookback: usize,
    pub sr_lookback: usize,
    pub sr_touch_tolerance: f64,
    pub retest_max_candles: usize,
    pub retest_tolerance: f64,
    pub divergence_lookback: usize,
    pub volatility_lookback: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_history: 200,
            volume_lookback: 20,
            sr_lookback: 100,
            sr_touch_tolerance: 0.02,
            retest_max_candles: retest::RETEST_MAX_CANDLES,
            retest_tolerance: retest::RETEST_TOLERANCE,
            divergence_lookback: 20,
            volatility_lookback: 50,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        Period::new(self.volume_lookback)?;
        Period::new(self.sr_lookback)?;
        Period::new(self.divergence_lookback)?;
        Period::new(self.volatility_lookback)?;
        if !(self.retest_tolerance > 0.0 && self.retest_tolerance < 1.0) {
            return Err(Error::OutOfRange {
                field: "retest_tolerance",
                value: self.retest_tolerance,
                min: 0.0,
                max: 1.0,
            });
        }
        if !(self.sr_touch_tolerance > 0.0 && self.sr_touch_tolerance < 1.0) {
            return Err(Error::OutOfRange {
                field: "sr_touch_tolerance",
                value: self.sr_touch_tolerance,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }
}

/// Builds [`PatternFeatures`] snapshots
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    pub config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Extract features for a pattern spanning `pattern_start..=pattern_end`.
    ///
    /// The last candle is "now". `pattern_end` is the breakout candle that the
    /// volume check and the retest scan start from.
    pub fn extract<T: OHLCV>(
        &self,
        candles: &[T],
        pattern_start: usize,
        pattern_end: usize,
        zone: Option<Zone>,
    ) -> Result<PatternFeatures> {
        let cfg = &self.config;
        let len = candles.len();
        let need = cfg.min_history.max(2);
        if len < need {
            return Err(Error::InsufficientHistory {
                need,
                got: len,
            });
        }
        if pattern_start > pattern_end || pattern_end >= len {
            return Err(Error::InvalidValue("pattern range outside candle history"));
        }

        let current = &candles[len - 1];
        let price = current.close();
        let closes = indicators::closes(candles);

        // price action
        let start_close = candles[pattern_start].close();
        let price_change_pct = if start_close > 0.0 {
            (candles[pattern_end].close() - start_close) / start_close * 100.0
        } else {
            0.0
        };

        let atr = indicators::atr(candles, indicators::ATR_PERIOD);
        let recent_atr = &atr[len.saturating_sub(cfg.volatility_lookback)..];
        let mean_atr = recent_atr.iter().sum::<f64>() / recent_atr.len() as f64;
        let volatility_ratio = if mean_atr > 0.0 {
            atr[len - 1] / mean_atr
        } else {
            1.0
        };

        let volume = volume_confirmation(candles, pattern_end, cfg.volume_lookback);

        // geometry
        let span = &candles[pattern_start..=pattern_end];
        let (hi, lo) = span_extremes(span);
        let pattern_height_pct = if lo > 0.0 { (hi - lo) / lo * 100.0 } else { 0.0 };
        let pattern_symmetry = symmetry(span);

        let sr = support_resistance(candles, cfg.sr_lookback, cfg.sr_touch_tolerance);
        let trend = trend_context(&closes);

        let rsi = indicators::rsi(&closes, indicators::RSI_PERIOD);
        let rsi_divergence = rsi_divergence(candles, &rsi, cfg.divergence_lookback);

        let macd = indicators::macd(&closes);
        let hist_now = macd.histogram[len - 1];
        let hist_prev = macd.histogram[len - 2];
        let macd_signal = if hist_prev <= 0.0 && hist_now > 0.0 {
            MacdCross::BullishCross
        } else if hist_prev >= 0.0 && hist_now < 0.0 {
            MacdCross::BearishCross
        } else {
            MacdCross::None
        };

        let when = current
            .timestamp()
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let retest = zone
            .map(|z| {
                validate_zone_retest(
                    candles,
                    pattern_end,
                    z.price,
                    z.kind,
                    cfg.retest_max_candles,
                    cfg.retest_tolerance,
                )
            })
            .unwrap_or_default();

        let mut features = PatternFeatures {
            price_change_pct,
            volatility_ratio,
            volume_ratio: volume.ratio,
            volume_trend: volume.trend,
            volume_confirmed: volume.is_confirmed,
            pattern_duration: pattern_end - pattern_start + 1,
            pattern_height_pct,
            pattern_symmetry,
            support_touches: sr.support_touches,
            resistance_touches: sr.resistance_touches,
            nearest_support: sr.support,
            nearest_resistance: sr.resistance,
            distance_to_support_pct: sr.distance_to_support_pct(price),
            distance_to_resistance_pct: sr.distance_to_resistance_pct(price),
            trend_direction: trend.direction,
            trend_strength: trend.strength,
            ema_20_position: ema_position(current, trend.ema_20),
            ema_50_position: ema_position(current, trend.ema_50),
            ema_200_position: ema_position(current, trend.ema_200),
            rsi: rsi[len - 1],
            rsi_divergence,
            macd_histogram: hist_now,
            macd_signal,
            hour_of_day: when.map(|t| t.hour()),
            day_of_week: when.map(|t| t.weekday().num_days_from_monday()),
            has_zone_retest: retest.has_retest,
            retest_candles_ago: retest.candles_ago,
            retest_quality_score: retest.quality,
            ..PatternFeatures::default()
        };

        // the opposing level is the one a trade would run into
        let bearish = match zone.map(|z| z.kind) {
            Some(ZoneType::Resistance) => true,
            Some(ZoneType::Support) => false,
            None => trend.direction == TrendDirection::Down,
        };
        let opposing = if bearish {
            features.distance_to_support_pct
        } else {
            features.distance_to_resistance_pct
        };

        features.pattern_quality_score = scoring::pattern_quality(&features);
        features.entry_timing_score = scoring::entry_timing(&features);
        features.risk_reward_score = scoring::risk_reward(opposing, features.trend_strength);
        features.overall_score = scoring::overall(
            features.pattern_quality_score,
            features.entry_timing_score,
            features.risk_reward_score,
            retest.has_retest.then_some(retest.quality),
        );

        Ok(features)
    }
}

fn span_extremes<T: OHLCV>(span: &[T]) -> (f64, f64) {
    span.iter().fold((f64::MIN, f64::MAX), |(hi, lo), c| {
        (hi.max(c.high()), lo.min(c.low()))
    })
}

fn symmetry<T: OHLCV>(span: &[T]) -> f64 {
    if span.len() < 2 {
        return 1.0;
    }
    let mid = span.len() / 2;
    let (h1, l1) = span_extremes(&span[..mid]);
    let (h2, l2) = span_extremes(&span[mid..]);
    let (r1, r2) = (h1 - l1, h2 - l2);
    let widest = r1.max(r2);
    if widest <= f64::EPSILON {
        1.0
    } else {
        (1.0 - (r1 - r2).abs() / widest).clamp(0.0, 1.0)
    }
}

// ============================================================
// TESTS
// ============================================================
