//! Zone detectors
//!
//! HFZ/LFZ (high/low frequency zones) bucket the window into price levels
//! and pick the most-touched one. Support bounce and resistance rejection
//! work off the nearest pivot support/resistance instead.

use super::helpers::{highest, lowest, window, STOP_BUFFER, ZONE_TOUCH_TOLERANCE};
use super::PatternDetector;
use crate::features::levels::support_resistance;
use crate::{Direction, OHLCVExt, PatternDetection, PatternType, Result, Zone, OHLCV};

impl_with_defaults!(
    HfzDetector,
    LfzDetector,
    SupportBounceDetector,
    ResistanceRejectionDetector,
);

/// Targets for zone trades sit at twice the risk
const ZONE_REWARD_MULTIPLE: f64 = 2.0;

/// Which side of price the level sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Floor,
    Ceiling,
}

impl Side {
    /// +1 when price should hold above the level, -1 below
    fn sign(self) -> f64 {
        match self {
            Side::Floor => 1.0,
            Side::Ceiling => -1.0,
        }
    }

    fn wick<T: OHLCV>(self, c: &T) -> f64 {
        match self {
            Side::Floor => c.low(),
            Side::Ceiling => c.high(),
        }
    }

    fn direction(self) -> Direction {
        match self {
            Side::Floor => Direction::Bullish,
            Side::Ceiling => Direction::Bearish,
        }
    }

    fn zone(self, level: f64) -> Zone {
        match self {
            Side::Floor => Zone::support(level),
            Side::Ceiling => Zone::resistance(level),
        }
    }
}

// ============================================================
// FREQUENCY ZONES
// ============================================================

#[derive(Debug)]
struct FrequencyZone {
    level: f64,
    /// Candle indices whose wick touched the level
    touches: Vec<usize>,
}

/// Most-touched of `levels` evenly spaced price levels. Lowest level wins ties.
fn frequency_zone<T: OHLCV>(
    candles: &[T],
    start: usize,
    levels: usize,
    tolerance: f64,
    side: Side,
) -> Option<FrequencyZone> {
    let len = candles.len();
    let (_, hi) = highest(candles, start, len)?;
    let (_, lo) = lowest(candles, start, len)?;
    if hi <= lo || levels == 0 {
        return None;
    }
    let step = (hi - lo) / levels as f64;

    let mut best: Option<FrequencyZone> = None;
    for k in 0..levels {
        let level = lo + step * (k as f64 + 0.5);
        let band = level * tolerance;
        let touches: Vec<usize> = (start..len)
            .filter(|&i| (side.wick(&candles[i]) - level).abs() <= band)
            .collect();
        if best.as_ref().map_or(true, |b| touches.len() > b.touches.len()) {
            best = Some(FrequencyZone { level, touches });
        }
    }
    best
}

#[allow(clippy::too_many_arguments)]
fn frequency_zone_detection<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    start: usize,
    levels: usize,
    tolerance: f64,
    min_touches: usize,
    side: Side,
) -> Option<PatternDetection> {
    let zone = frequency_zone(candles, start, levels, tolerance, side)?;
    let min_touches = min_touches.max(1);
    if zone.touches.len() < min_touches {
        return None;
    }

    let entry = candles[candles.len() - 1].close();
    let sign = side.sign();
    let distance = sign * (entry - zone.level) / zone.level;
    // close is off the wick, so allow twice the touch band
    let near = 2.0 * tolerance;
    if distance <= 0.0 || distance > near {
        return None;
    }

    let stop = zone.level * (1.0 - sign * (tolerance + STOP_BUFFER));
    let target = entry + ZONE_REWARD_MULTIPLE * (entry - stop);
    let touch_score = (zone.touches.len().min(8) as f64) / 8.0;
    let proximity = 1.0 - (distance / near).clamp(0.0, 1.0);

    Some(
        PatternDetection::new(
            pattern,
            side.direction(),
            0.4 + 0.4 * touch_score + 0.2 * proximity,
            zone.touches[0],
            zone.touches[min_touches - 1],
            entry,
            stop,
            target,
        )
        .with_zone(side.zone(zone.level))
        .with_data("level", zone.level)
        .with_data("touches", zone.touches.len() as f64),
    )
}

macro_rules! frequency_zone_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $side:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            pub levels: usize,
            pub tolerance: f64,
            pub min_touches: usize,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: 100,
                    levels: 20,
                    tolerance: ZONE_TOUCH_TOLERANCE,
                    min_touches: 3,
                }
            }
        }

        impl PatternDetector for $name {
            fn pattern(&self) -> PatternType {
                $pattern
            }

            fn lookback(&self) -> usize {
                self.lookback
            }

            fn detect<T: OHLCV>(&self, candles: &[T]) -> Result<Option<PatternDetection>> {
                let start = window(self.pattern(), candles, self.lookback)?;
                Ok(frequency_zone_detection(
                    candles,
                    self.pattern(),
                    start,
                    self.levels,
                    self.tolerance,
                    self.min_touches,
                    $side,
                ))
            }
        }
    };
}

frequency_zone_detector!(
    /// Low Frequency Zone: a floor of clustered lows with price bouncing above it
    LfzDetector,
    PatternType::Lfz,
    Side::Floor
);
frequency_zone_detector!(
    /// High Frequency Zone: a ceiling of clustered highs rejecting price below it
    HfzDetector,
    PatternType::Hfz,
    Side::Ceiling
);

// ============================================================
// SUPPORT BOUNCE / RESISTANCE REJECTION
// ============================================================

#[allow(clippy::too_many_arguments)]
fn level_reaction<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    start: usize,
    lookback: usize,
    sr_tolerance: f64,
    touch_tolerance: f64,
    min_touches: u32,
    side: Side,
) -> Option<PatternDetection> {
    let sr = support_resistance(candles, lookback, sr_tolerance);
    let (level, touches, opposite, key) = match side {
        Side::Floor => (sr.support?, sr.support_touches, sr.resistance, "support"),
        Side::Ceiling => (sr.resistance?, sr.resistance_touches, sr.support, "resistance"),
    };
    if touches < min_touches {
        return None;
    }

    let last = candles.len() - 1;
    let c = &candles[last];
    let sign = side.sign();
    let touching = |i: usize| ((side.wick(&candles[i]) - level) / level).abs() <= touch_tolerance;
    let reacted = match side {
        Side::Floor => c.is_bullish(),
        Side::Ceiling => c.is_bearish(),
    };
    if !touching(last) || sign * (c.close() - level) <= 0.0 || !reacted {
        return None;
    }

    let first_touch = (start..last).find(|&i| touching(i))?;
    let prior_touch = (start..last).rev().find(|&i| touching(i))?;

    let entry = c.close();
    let stop = level * (1.0 - sign * (touch_tolerance + STOP_BUFFER));
    let target = opposite
        .filter(|&o| sign * (o - entry) > 0.0)
        .unwrap_or(entry + ZONE_REWARD_MULTIPLE * (entry - stop));
    let strength = if c.range() > f64::EPSILON {
        sign * (c.close() - side.wick(c)) / c.range()
    } else {
        0.0
    };
    let confidence =
        0.5 + 0.3 * (touches.min(5) as f64 / 5.0) + 0.2 * strength.clamp(0.0, 1.0);

    Some(
        PatternDetection::new(
            pattern,
            side.direction(),
            confidence,
            first_touch,
            prior_touch,
            entry,
            stop,
            target,
        )
        .with_zone(side.zone(level))
        .with_data(key, level)
        .with_data("touches", touches as f64),
    )
}

macro_rules! level_reaction_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $side:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            /// Tolerance used to count touches of the level
            pub sr_tolerance: f64,
            /// How close the current wick must come to the level
            pub touch_tolerance: f64,
            pub min_touches: u32,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: 100,
                    sr_tolerance: 0.02,
                    touch_tolerance: 0.01,
                    min_touches: 2,
                }
            }
        }

        impl PatternDetector for $name {
            fn pattern(&self) -> PatternType {
                $pattern
            }

            fn lookback(&self) -> usize {
                self.lookback
            }

            fn detect<T: OHLCV>(&self, candles: &[T]) -> Result<Option<PatternDetection>> {
                let start = window(self.pattern(), candles, self.lookback)?;
                Ok(level_reaction(
                    candles,
                    self.pattern(),
                    start,
                    self.lookback,
                    self.sr_tolerance,
                    self.touch_tolerance,
                    self.min_touches,
                    $side,
                ))
            }
        }
    };
}

level_reaction_detector!(
    /// Current candle wicks into a pivot support touched at least twice before
    /// and closes bullish above it.
    SupportBounceDetector,
    PatternType::SupportBounce,
    Side::Floor
);
level_reaction_detector!(
    /// Current candle wicks into a pivot resistance and closes bearish below it
    ResistanceRejectionDetector,
    PatternType::ResistanceRejection,
    Side::Ceiling
);
