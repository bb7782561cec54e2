//! Reversal pattern detectors
//!
//! Double/Triple Top and Bottom, Head & Shoulders and its inverse. All of
//! them work on ±2 pivots inside the trailing window and need the current
//! close to have crossed the neckline.

use super::helpers::{
    extreme_pivots, first_close_above, first_close_below, highest, lowest, pct_diff, window,
    MIN_NECKLINE_MOVE, MIN_SEPARATION, SHOULDER_TOLERANCE, STOP_BUFFER, TWIN_TOLERANCE,
};
use super::PatternDetector;
use crate::features::levels::{pivot_highs, pivot_lows};
use crate::{Direction, PatternDetection, PatternType, Result, Zone, OHLCV};

impl_with_defaults!(
    DoubleTopDetector,
    DoubleBottomDetector,
    TripleTopDetector,
    TripleBottomDetector,
    HeadAndShouldersDetector,
    InverseHeadAndShouldersDetector,
);

/// Head & shoulders: current close within 1% of the neckline counts as "near"
const NECKLINE_NEAR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Top,
    Bottom,
}

/// `n` equal extremes with a neckline between them
#[derive(Debug)]
struct EqualExtremes {
    indices: Vec<usize>,
    prices: Vec<f64>,
    neckline: f64,
    /// First close beyond the neckline after the last extreme
    breakout: usize,
    /// (max - min) / min over the extremes
    spread: f64,
    /// Distance from the average extreme to the neckline, as a fraction
    move_pct: f64,
}

impl EqualExtremes {
    fn average(&self) -> f64 {
        self.prices.iter().sum::<f64>() / self.prices.len() as f64
    }

    fn confidence(&self, tolerance: f64, min_move: f64) -> f64 {
        let symmetry = 1.0 - (self.spread / tolerance).clamp(0.0, 1.0);
        let size = (self.move_pct / (2.0 * min_move)).clamp(0.0, 1.0);
        0.5 + 0.25 * symmetry + 0.25 * size
    }
}

fn equal_extremes<T: OHLCV>(
    candles: &[T],
    start: usize,
    n: usize,
    min_separation: usize,
    tolerance: f64,
    min_move: f64,
    side: Side,
) -> Option<EqualExtremes> {
    let len = candles.len();
    let (pivots, value, beats): (Vec<usize>, fn(&T) -> f64, fn(f64, f64) -> bool) = match side {
        Side::Top => (pivot_highs(candles, start, len), |c| c.high(), |a, b| a > b),
        Side::Bottom => (pivot_lows(candles, start, len), |c| c.low(), |a, b| a < b),
    };
    let indices = extreme_pivots(&pivots, |i| value(&candles[i]), beats, n, min_separation)?;
    let prices: Vec<f64> = indices.iter().map(|&i| value(&candles[i])).collect();

    let hi = prices.iter().copied().fold(f64::MIN, f64::max);
    let lo = prices.iter().copied().fold(f64::MAX, f64::min);
    let spread = pct_diff(hi, lo);
    if spread > tolerance {
        return None;
    }

    let (first, last) = (indices[0], indices[n - 1]);
    let avg = prices.iter().sum::<f64>() / n as f64;
    let close = candles[len - 1].close();

    let (neckline, move_pct, breakout) = match side {
        Side::Bottom => {
            let (_, neck) = highest(candles, first + 1, last)?;
            if close <= neck {
                return None;
            }
            let breakout = first_close_above(candles, last + 1, len, neck)?;
            (neck, (neck - avg) / avg, breakout)
        }
        Side::Top => {
            let (_, neck) = lowest(candles, first + 1, last)?;
            if close >= neck {
                return None;
            }
            let breakout = first_close_below(candles, last + 1, len, neck)?;
            (neck, (avg - neck) / avg, breakout)
        }
    };
    if move_pct < min_move {
        return None;
    }

    Some(EqualExtremes {
        indices,
        prices,
        neckline,
        breakout,
        spread,
        move_pct,
    })
}

fn equal_extremes_detection<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    ex: &EqualExtremes,
    tolerance: f64,
    min_move: f64,
    side: Side,
) -> PatternDetection {
    let entry = candles[candles.len() - 1].close();
    let height = (ex.neckline - ex.average()).abs();

    // stop beyond the most extreme of the extremes
    let (direction, stop, target, zone) = match side {
        Side::Bottom => {
            let floor = ex.prices.iter().copied().fold(f64::MAX, f64::min);
            (
                Direction::Bullish,
                floor * (1.0 - STOP_BUFFER),
                entry + height,
                Zone::support(ex.neckline),
            )
        }
        Side::Top => {
            let ceiling = ex.prices.iter().copied().fold(f64::MIN, f64::max);
            (
                Direction::Bearish,
                ceiling * (1.0 + STOP_BUFFER),
                entry - height,
                Zone::resistance(ex.neckline),
            )
        }
    };

    let mut det = PatternDetection::new(
        pattern,
        direction,
        ex.confidence(tolerance, min_move),
        ex.indices[0],
        ex.breakout,
        entry,
        stop,
        target,
    )
    .with_zone(zone)
    .with_data("neckline", ex.neckline)
    .with_data("move_pct", ex.move_pct * 100.0);
    for (k, price) in ex.prices.iter().enumerate() {
        det = det.with_data(&format!("extreme_{}", k + 1), *price);
    }
    det
}

macro_rules! equal_extremes_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $count:expr, $lookback:expr, $side:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            pub min_separation: usize,
            /// Largest (max - min) / min spread between the extremes
            pub tolerance: f64,
            /// Smallest move from the average extreme to the neckline
            pub min_move: f64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: $lookback,
                    min_separation: MIN_SEPARATION,
                    tolerance: TWIN_TOLERANCE,
                    min_move: MIN_NECKLINE_MOVE,
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
                Ok(equal_extremes(
                    candles,
                    start,
                    $count,
                    self.min_separation,
                    self.tolerance,
                    self.min_move,
                    $side,
                )
                .map(|ex| {
                    equal_extremes_detection(
                        candles,
                        self.pattern(),
                        &ex,
                        self.tolerance,
                        self.min_move,
                        $side,
                    )
                }))
            }
        }
    };
}

// ============================================================
// DOUBLE TOP / BOTTOM
// ============================================================

equal_extremes_detector!(
    /// Two troughs within 2% of each other, at least 5 candles apart, a bounce
    /// of at least 3% to the neckline between them and a close back above it.
    DoubleBottomDetector,
    PatternType::DoubleBottom,
    2,
    50,
    Side::Bottom
);
equal_extremes_detector!(
    /// Mirror of [`DoubleBottomDetector`] at the highs
    DoubleTopDetector,
    PatternType::DoubleTop,
    2,
    50,
    Side::Top
);

// ============================================================
// TRIPLE TOP / BOTTOM
// ============================================================

equal_extremes_detector!(
    /// Three peaks within 2% of each other over a wider window
    TripleTopDetector,
    PatternType::TripleTop,
    3,
    80,
    Side::Top
);
equal_extremes_detector!(
    TripleBottomDetector,
    PatternType::TripleBottom,
    3,
    80,
    Side::Bottom
);

// ============================================================
// HEAD AND SHOULDERS
// ============================================================

#[derive(Debug)]
struct HeadShoulders {
    left: (usize, f64),
    head: (usize, f64),
    right: (usize, f64),
    neckline: f64,
    breakout: usize,
    shoulder_diff: f64,
}

fn head_and_shoulders<T: OHLCV>(
    candles: &[T],
    start: usize,
    tolerance: f64,
    side: Side,
) -> Option<HeadShoulders> {
    let len = candles.len();
    let (pivots, value, beats): (Vec<usize>, fn(&T) -> f64, fn(f64, f64) -> bool) = match side {
        Side::Top => (pivot_highs(candles, start, len), |c| c.high(), |a, b| a > b),
        Side::Bottom => (pivot_lows(candles, start, len), |c| c.low(), |a, b| a < b),
    };
    if pivots.len() < 3 {
        return None;
    }

    let best = |from: usize, to: usize| {
        best_pivot(candles, pivots.iter().copied().filter(|&i| i >= from && i < to), value, beats)
    };
    let head = best(0, len)?;
    let left = best(0, head.0)?;
    let right = best(head.0 + 1, len)?;
    if !beats(head.1, left.1) || !beats(head.1, right.1) {
        return None;
    }

    let shoulder_diff = pct_diff(left.1, right.1);
    if shoulder_diff > tolerance {
        return None;
    }

    let close = candles[len - 1].close();
    let (neckline, breakout) = match side {
        Side::Top => {
            let (_, t1) = lowest(candles, left.0 + 1, head.0)?;
            let (_, t2) = lowest(candles, head.0 + 1, right.0)?;
            let neck = (t1 + t2) / 2.0;
            if close > neck * (1.0 + NECKLINE_NEAR) {
                return None;
            }
            let breakout = first_close_below(candles, right.0 + 1, len, neck).unwrap_or(len - 1);
            (neck, breakout)
        }
        Side::Bottom => {
            let (_, p1) = highest(candles, left.0 + 1, head.0)?;
            let (_, p2) = highest(candles, head.0 + 1, right.0)?;
            let neck = (p1 + p2) / 2.0;
            if close < neck * (1.0 - NECKLINE_NEAR) {
                return None;
            }
            let breakout = first_close_above(candles, right.0 + 1, len, neck).unwrap_or(len - 1);
            (neck, breakout)
        }
    };

    Some(HeadShoulders {
        left,
        head,
        right,
        neckline,
        breakout,
        shoulder_diff,
    })
}

/// Most extreme pivot in `idx`, earliest on ties
fn best_pivot<T: OHLCV>(
    candles: &[T],
    idx: impl Iterator<Item = usize>,
    value: fn(&T) -> f64,
    beats: fn(f64, f64) -> bool,
) -> Option<(usize, f64)> {
    idx.fold(None, |acc, i| {
        let v = value(&candles[i]);
        match acc {
            Some((_, b)) if !beats(v, b) => acc,
            _ => Some((i, v)),
        }
    })
}

fn head_shoulders_detection<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    hs: &HeadShoulders,
    tolerance: f64,
    side: Side,
) -> PatternDetection {
    let symmetry = 1.0 - (hs.shoulder_diff / tolerance).clamp(0.0, 1.0);
    let height = (hs.head.1 - hs.neckline).abs();
    let confidence = 0.5 + 0.3 * symmetry + 0.2 * (height / hs.neckline / 0.05).clamp(0.0, 1.0);

    let entry = candles[candles.len() - 1].close();
    let (direction, stop, target, zone) = match side {
        Side::Top => (
            Direction::Bearish,
            hs.right.1 * (1.0 + STOP_BUFFER),
            entry - height,
            Zone::resistance(hs.neckline),
        ),
        Side::Bottom => (
            Direction::Bullish,
            hs.right.1 * (1.0 - STOP_BUFFER),
            entry + height,
            Zone::support(hs.neckline),
        ),
    };

    PatternDetection::new(
        pattern,
        direction,
        confidence,
        hs.left.0,
        hs.breakout,
        entry,
        stop,
        target,
    )
    .with_zone(zone)
    .with_data("left_shoulder", hs.left.1)
    .with_data("head", hs.head.1)
    .with_data("right_shoulder", hs.right.1)
    .with_data("neckline", hs.neckline)
}

macro_rules! head_shoulders_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $side:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            pub shoulder_tolerance: f64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: 60,
                    shoulder_tolerance: SHOULDER_TOLERANCE,
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
                Ok(
                    head_and_shoulders(candles, start, self.shoulder_tolerance, $side).map(|hs| {
                        head_shoulders_detection(
                            candles,
                            self.pattern(),
                            &hs,
                            self.shoulder_tolerance,
                            $side,
                        )
                    }),
                )
            }
        }
    };
}

head_shoulders_detector!(
    /// Tallest pivot high flanked by two lower shoulders within 15% of each
    /// other; the close must sit at or under the neckline.
    HeadAndShouldersDetector,
    PatternType::HeadAndShoulders,
    Side::Top
);
head_shoulders_detector!(
    InverseHeadAndShouldersDetector,
    PatternType::InverseHeadAndShoulders,
    Side::Bottom
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Candle, Error, ZoneType};

    /// Piecewise-linear path through `(index, price)` waypoints, one doji-like
    /// candle per step with a ±0.5 wick
    pub(crate) fn path(points: &[(usize, f64)]) -> Vec<Candle> {
        let mut out = Vec::new();
        for w in points.windows(2) {
            let ((i0, p0), (i1, p1)) = (w[0], w[1]);
            for i in i0..i1 {
                let t = (i - i0) as f64 / (i1 - i0) as f64;
                out.push(bar(i, p0 + (p1 - p0) * t));
            }
        }
        if let Some(&(i, p)) = points.last() {
            out.push(bar(i, p));
        }
        out
    }

    fn bar(i: usize, mid: f64) -> Candle {
        Candle::new(i as i64 * 3_600_000, mid, mid + 0.5, mid - 0.5, mid, 1_000.0)
    }

    fn mirror(candles: &[Candle], axis: f64) -> Vec<Candle> {
        candles
            .iter()
            .map(|c| {
                Candle::new(
                    c.timestamp,
                    axis - c.open,
                    axis - c.low,
                    axis - c.high,
                    axis - c.close,
                    c.volume,
                )
            })
            .collect()
    }

    fn double_bottom_path() -> Vec<Candle> {
        path(&[
            (0, 112.0),
            (20, 112.0),
            (30, 100.0),
            (35, 106.0),
            (40, 100.0),
            (50, 108.0),
            (55, 108.0),
        ])
    }

    #[test]
    fn test_double_bottom() {
        let candles = double_bottom_path();
        let det = DoubleBottomDetector::default().detect(&candles).unwrap().unwrap();

        assert_eq!(det.direction, Direction::Bullish);
        assert_eq!(det.start_index, 30);
        assert_eq!(det.end_index, 49);
        assert_eq!(det.entry_price, candles.last().unwrap().close);
        assert!((det.data["neckline"] - 106.5).abs() < 1e-9);
        assert!((det.stop_loss - 99.5 * 0.995).abs() < 1e-9);
        assert!((det.take_profit - (108.0 + 7.0)).abs() < 1e-9);
        assert_eq!(det.zone.unwrap().kind, ZoneType::Support);
        // equal troughs and a 7% bounce max out the formula
        assert!((det.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_double_bottom_needs_close_above_neckline() {
        let mut candles = double_bottom_path();
        candles.truncate(48);
        assert!(DoubleBottomDetector::default().detect(&candles).is_err());

        let candles = path(&[
            (0, 112.0),
            (20, 112.0),
            (30, 100.0),
            (35, 106.0),
            (40, 100.0),
            (55, 105.0),
        ]);
        assert!(DoubleBottomDetector::default().detect(&candles).unwrap().is_none());
    }

    #[test]
    fn test_double_bottom_rejects_uneven_troughs() {
        let candles = path(&[
            (0, 112.0),
            (20, 112.0),
            (30, 100.0),
            (35, 106.0),
            (40, 96.0),
            (50, 108.0),
            (55, 108.0),
        ]);
        assert!(DoubleBottomDetector::default().detect(&candles).unwrap().is_none());
    }

    #[test]
    fn test_double_bottom_rejects_close_twin_troughs() {
        // the two deepest troughs (28, 31) are 3 candles apart; the shallower
        // trough at 42 must not stand in for either of them
        let candles = path(&[
            (0, 112.0),
            (20, 112.0),
            (28, 100.0),
            (29, 102.0),
            (30, 102.0),
            (31, 100.0),
            (36, 106.0),
            (42, 101.0),
            (50, 108.0),
            (55, 108.0),
        ]);
        assert!(DoubleBottomDetector::default().detect(&candles).unwrap().is_none());

        let mirrored = mirror(&candles, 200.0);
        assert!(DoubleTopDetector::default().detect(&mirrored).unwrap().is_none());
    }

    #[test]
    fn test_double_top_mirrors_bottom() {
        let candles = mirror(&double_bottom_path(), 200.0);
        let det = DoubleTopDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bearish);
        assert_eq!(det.end_index, 49);
        assert!(det.stop_loss > det.entry_price);
        assert!(det.take_profit < det.entry_price);
        assert_eq!(det.zone.unwrap().kind, ZoneType::Resistance);
    }

    #[test]
    fn test_triple_bottom() {
        let candles = path(&[
            (0, 112.0),
            (20, 112.0),
            (30, 100.0),
            (35, 105.0),
            (40, 100.5),
            (45, 105.5),
            (50, 100.0),
            (60, 108.0),
            (80, 108.0),
        ]);
        let det = TripleBottomDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bullish);
        assert_eq!(det.start_index, 30);
        assert!(det.stop_loss < 99.5);
    }

    #[test]
    fn test_head_and_shoulders() {
        let candles = path(&[
            (0, 100.0),
            (30, 100.0),
            (35, 108.0),
            (40, 103.0),
            (45, 114.0),
            (50, 103.0),
            (55, 108.0),
            (60, 100.0),
            (65, 99.0),
        ]);
        let det = HeadAndShouldersDetector::default().detect(&candles).unwrap().unwrap();

        assert_eq!(det.direction, Direction::Bearish);
        assert_eq!(det.start_index, 35);
        assert_eq!(det.end_index, 59);
        assert!((det.data["neckline"] - 102.5).abs() < 1e-9);
        assert!((det.take_profit - (99.0 - 12.0)).abs() < 1e-9);
        assert!((det.stop_loss - 108.5 * 1.005).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_head_and_shoulders() {
        let candles = mirror(
            &path(&[
                (0, 100.0),
                (30, 100.0),
                (35, 108.0),
                (40, 103.0),
                (45, 114.0),
                (50, 103.0),
                (55, 108.0),
                (60, 100.0),
                (65, 99.0),
            ]),
            220.0,
        );
        let det = InverseHeadAndShouldersDetector::default()
            .detect(&candles)
            .unwrap()
            .unwrap();
        assert_eq!(det.direction, Direction::Bullish);
        assert!((det.data["neckline"] - 117.5).abs() < 1e-9);
        assert!(det.take_profit > det.entry_price);
    }

    #[test]
    fn test_short_window_is_an_error() {
        let candles = path(&[(0, 100.0), (10, 110.0)]);
        assert!(matches!(
            HeadAndShouldersDetector::default().detect(&candles),
            Err(Error::InsufficientData { need: 60, got: 11 })
        ));
    }
}
