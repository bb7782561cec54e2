//! Trend-line structures and the cup and handle
//!
//! Triangles and wedges fit least-squares lines through the ±2 pivot highs
//! and lows of the window and classify them by normalized slope (total change
//! across the window as a fraction of the average close).

use super::helpers::{highest, lowest, pct_diff, window, Line, STOP_BUFFER};
use super::PatternDetector;
use crate::features::levels::{pivot_highs, pivot_lows};
use crate::{Direction, PatternDetection, PatternType, Result, Zone, OHLCV};

impl_with_defaults!(
    AscendingTriangleDetector,
    DescendingTriangleDetector,
    SymmetricalTriangleDetector,
    RisingWedgeDetector,
    FallingWedgeDetector,
    CupAndHandleDetector,
);

/// A line counts as flat when it moves less than 1% across the window
pub const FLAT_TOLERANCE: f64 = 0.01;

// ============================================================
// TREND LINES
// ============================================================

#[derive(Debug)]
struct TrendLines {
    highs: Vec<(usize, f64)>,
    lows: Vec<(usize, f64)>,
    upper: Line,
    lower: Line,
    upper_slope: f64,
    lower_slope: f64,
}

impl TrendLines {
    fn fit<T: OHLCV>(candles: &[T], start: usize) -> Option<Self> {
        let len = candles.len();
        let highs: Vec<(usize, f64)> = pivot_highs(candles, start, len)
            .into_iter()
            .map(|i| (i, candles[i].high()))
            .collect();
        let lows: Vec<(usize, f64)> = pivot_lows(candles, start, len)
            .into_iter()
            .map(|i| (i, candles[i].low()))
            .collect();
        let upper = Line::fit(&highs)?;
        let lower = Line::fit(&lows)?;

        let span = len - start;
        let mean = candles[start..].iter().map(|c| c.close()).sum::<f64>() / span as f64;
        Some(Self {
            upper_slope: upper.normalized_slope(span, mean),
            lower_slope: lower.normalized_slope(span, mean),
            highs,
            lows,
            upper,
            lower,
        })
    }

    fn pivot_count(&self) -> usize {
        self.highs.len() + self.lows.len()
    }

    fn last_high(&self) -> (usize, f64) {
        self.highs[self.highs.len() - 1]
    }

    fn last_low(&self) -> (usize, f64) {
        self.lows[self.lows.len() - 1]
    }

    fn first_pivot(&self) -> usize {
        self.highs[0].0.min(self.lows[0].0)
    }

    fn last_pivot(&self) -> usize {
        self.last_high().0.max(self.last_low().0)
    }

    /// Distance between the first pivot high and first pivot low
    fn opening_height(&self) -> f64 {
        (self.highs[0].1 - self.lows[0].1).abs()
    }

    fn touches_score(&self) -> f64 {
        (self.pivot_count() as f64 / 6.0).clamp(0.0, 1.0)
    }
}

fn first_close_above_line<T: OHLCV>(candles: &[T], from: usize, line: &Line) -> Option<usize> {
    (from..candles.len()).find(|&i| candles[i].close() > line.at(i))
}

fn first_close_below_line<T: OHLCV>(candles: &[T], from: usize, line: &Line) -> Option<usize> {
    (from..candles.len()).find(|&i| candles[i].close() < line.at(i))
}

/// Struct, defaults and trait impl for a detector that classifies the
/// window's trend lines with `$shape`
macro_rules! trend_line_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $shape:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            pub flat_tolerance: f64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: 40,
                    flat_tolerance: FLAT_TOLERANCE,
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
                Ok(TrendLines::fit(candles, start)
                    .and_then(|tl| $shape(candles, self.pattern(), &tl, self.flat_tolerance)))
            }
        }
    };
}

// ============================================================
// TRIANGLES
// ============================================================

trend_line_detector!(
    /// Flat resistance over rising lows, broken to the upside
    AscendingTriangleDetector,
    PatternType::AscendingTriangle,
    ascending_triangle
);
trend_line_detector!(
    /// Flat support under falling highs, broken to the downside
    DescendingTriangleDetector,
    PatternType::DescendingTriangle,
    descending_triangle
);
trend_line_detector!(
    /// Falling highs and rising lows; trades whichever side breaks
    SymmetricalTriangleDetector,
    PatternType::SymmetricalTriangle,
    symmetrical_triangle
);

fn ascending_triangle<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    tl: &TrendLines,
    flat: f64,
) -> Option<PatternDetection> {
    if tl.upper_slope.abs() > flat || tl.lower_slope <= flat {
        return None;
    }

    let resistance = tl.highs.iter().map(|(_, p)| p).sum::<f64>() / tl.highs.len() as f64;
    let entry = candles[candles.len() - 1].close();
    if entry <= resistance {
        return None;
    }
    let breakout =
        (tl.last_high().0 + 1..candles.len()).find(|&i| candles[i].close() > resistance)?;

    let height = resistance - tl.lows[0].1;
    let flatness = 1.0 - (tl.upper_slope.abs() / flat).clamp(0.0, 1.0);

    Some(
        PatternDetection::new(
            pattern,
            Direction::Bullish,
            0.5 + 0.25 * tl.touches_score() + 0.25 * flatness,
            tl.first_pivot(),
            breakout,
            entry,
            tl.last_low().1 * (1.0 - STOP_BUFFER),
            entry + height,
        )
        .with_zone(Zone::support(resistance))
        .with_data("resistance", resistance)
        .with_data("lower_slope_pct", tl.lower_slope * 100.0),
    )
}

fn descending_triangle<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    tl: &TrendLines,
    flat: f64,
) -> Option<PatternDetection> {
    if tl.lower_slope.abs() > flat || tl.upper_slope >= -flat {
        return None;
    }

    let support = tl.lows.iter().map(|(_, p)| p).sum::<f64>() / tl.lows.len() as f64;
    let entry = candles[candles.len() - 1].close();
    if entry >= support {
        return None;
    }
    let breakout = (tl.last_low().0 + 1..candles.len()).find(|&i| candles[i].close() < support)?;

    let height = tl.highs[0].1 - support;
    let flatness = 1.0 - (tl.lower_slope.abs() / flat).clamp(0.0, 1.0);

    Some(
        PatternDetection::new(
            pattern,
            Direction::Bearish,
            0.5 + 0.25 * tl.touches_score() + 0.25 * flatness,
            tl.first_pivot(),
            breakout,
            entry,
            tl.last_high().1 * (1.0 + STOP_BUFFER),
            entry - height,
        )
        .with_zone(Zone::resistance(support))
        .with_data("support", support)
        .with_data("upper_slope_pct", tl.upper_slope * 100.0),
    )
}

fn symmetrical_triangle<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    tl: &TrendLines,
    flat: f64,
) -> Option<PatternDetection> {
    if tl.upper_slope >= -flat || tl.lower_slope <= flat {
        return None;
    }

    let last = candles.len() - 1;
    let from = tl.last_pivot() + 1;
    let (upper_now, lower_now) = (tl.upper.at(last), tl.lower.at(last));
    let entry = candles[last].close();
    let height = tl.opening_height();

    let (direction, breakout, stop, target, zone) = if entry > upper_now {
        let b = first_close_above_line(candles, from, &tl.upper)?;
        (
            Direction::Bullish,
            b,
            tl.last_low().1 * (1.0 - STOP_BUFFER),
            entry + height,
            Zone::support(tl.upper.at(b)),
        )
    } else if entry < lower_now {
        let b = first_close_below_line(candles, from, &tl.lower)?;
        (
            Direction::Bearish,
            b,
            tl.last_high().1 * (1.0 + STOP_BUFFER),
            entry - height,
            Zone::resistance(tl.lower.at(b)),
        )
    } else {
        return None;
    };

    let squeeze = if height > 0.0 {
        1.0 - ((upper_now - lower_now).abs() / height).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(
        PatternDetection::new(
            pattern,
            direction,
            0.5 + 0.25 * tl.touches_score() + 0.25 * squeeze,
            tl.first_pivot(),
            breakout,
            entry,
            stop,
            target,
        )
        .with_zone(zone)
        .with_data("upper_slope_pct", tl.upper_slope * 100.0)
        .with_data("lower_slope_pct", tl.lower_slope * 100.0),
    )
}

// ============================================================
// WEDGES
// ============================================================

trend_line_detector!(
    /// Both lines rising, lows faster than highs, broken to the downside
    RisingWedgeDetector,
    PatternType::RisingWedge,
    rising_wedge
);
trend_line_detector!(
    /// Both lines falling, highs faster than lows, broken to the upside
    FallingWedgeDetector,
    PatternType::FallingWedge,
    falling_wedge
);

fn rising_wedge<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    tl: &TrendLines,
    flat: f64,
) -> Option<PatternDetection> {
    if tl.upper_slope <= flat || tl.lower_slope <= tl.upper_slope {
        return None;
    }

    let last = candles.len() - 1;
    let entry = candles[last].close();
    if entry >= tl.lower.at(last) {
        return None;
    }
    let breakout = first_close_below_line(candles, tl.last_pivot() + 1, &tl.lower)?;
    let convergence = 1.0 - (tl.upper_slope / tl.lower_slope).clamp(0.0, 1.0);

    Some(
        PatternDetection::new(
            pattern,
            Direction::Bearish,
            0.5 + 0.25 * tl.touches_score() + 0.25 * convergence,
            tl.first_pivot(),
            breakout,
            entry,
            tl.last_high().1 * (1.0 + STOP_BUFFER),
            entry - tl.opening_height(),
        )
        .with_zone(Zone::resistance(tl.lower.at(breakout)))
        .with_data("upper_slope_pct", tl.upper_slope * 100.0)
        .with_data("lower_slope_pct", tl.lower_slope * 100.0),
    )
}

fn falling_wedge<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    tl: &TrendLines,
    flat: f64,
) -> Option<PatternDetection> {
    if tl.lower_slope >= -flat || tl.upper_slope >= tl.lower_slope {
        return None;
    }

    let last = candles.len() - 1;
    let entry = candles[last].close();
    if entry <= tl.upper.at(last) {
        return None;
    }
    let breakout = first_close_above_line(candles, tl.last_pivot() + 1, &tl.upper)?;
    let convergence = 1.0 - (tl.lower_slope / tl.upper_slope).clamp(0.0, 1.0);

    Some(
        PatternDetection::new(
            pattern,
            Direction::Bullish,
            0.5 + 0.25 * tl.touches_score() + 0.25 * convergence,
            tl.first_pivot(),
            breakout,
            entry,
            tl.last_low().1 * (1.0 - STOP_BUFFER),
            entry + tl.opening_height(),
        )
        .with_zone(Zone::support(tl.upper.at(breakout)))
        .with_data("upper_slope_pct", tl.upper_slope * 100.0)
        .with_data("lower_slope_pct", tl.lower_slope * 100.0),
    )
}

// ============================================================
// CUP AND HANDLE
// ============================================================

/// Rounded bottom between two rims within 3%, a shallow handle and a close
/// above the higher rim.
#[derive(Debug, Clone)]
pub struct CupAndHandleDetector {
    pub lookback: usize,
    pub rim_tolerance: f64,
    pub min_depth: f64,
    pub max_depth: f64,
    /// Handle may give back at most this fraction of the cup depth
    pub max_handle_retrace: f64,
}

impl Default for CupAndHandleDetector {
    fn default() -> Self {
        Self {
            lookback: 80,
            rim_tolerance: 0.03,
            min_depth: 0.05,
            max_depth: 0.5,
            max_handle_retrace: 0.5,
        }
    }
}

impl PatternDetector for CupAndHandleDetector {
    fn pattern(&self) -> PatternType {
        PatternType::CupAndHandle
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn detect<T: OHLCV>(&self, candles: &[T]) -> Result<Option<PatternDetection>> {
        let start = window(self.pattern(), candles, self.lookback)?;
        let len = candles.len();
        let cup_end = start + self.lookback * 3 / 4;

        let Some((left_idx, left_rim)) = highest(candles, start, start + self.lookback / 4) else {
            return Ok(None);
        };
        let Some((bottom_idx, bottom)) = lowest(candles, left_idx + 1, cup_end) else {
            return Ok(None);
        };
        let Some((right_idx, right_rim)) = highest(candles, bottom_idx + 1, cup_end) else {
            return Ok(None);
        };

        let rim_diff = pct_diff(left_rim, right_rim);
        if rim_diff > self.rim_tolerance {
            return Ok(None);
        }
        let depth = (left_rim.min(right_rim) - bottom) / left_rim.min(right_rim);
        if depth < self.min_depth || depth > self.max_depth {
            return Ok(None);
        }
        // U, not V: the bottom sits in the middle half of the cup
        let width = right_idx - left_idx;
        if bottom_idx < left_idx + width / 4 || bottom_idx > right_idx - width / 4 {
            return Ok(None);
        }

        let level = left_rim.max(right_rim);
        let Some(breakout) =
            (right_idx + 3..len).find(|&i| candles[i].close() > level)
        else {
            return Ok(None);
        };
        let (Some((_, handle_low)), Some((_, handle_high))) = (
            lowest(candles, right_idx + 1, breakout),
            highest(candles, right_idx + 1, breakout),
        ) else {
            return Ok(None);
        };
        if handle_high > level || handle_low >= right_rim {
            return Ok(None);
        }
        let retrace = (right_rim - handle_low) / (right_rim - bottom);
        if retrace > self.max_handle_retrace {
            return Ok(None);
        }

        let entry = candles[len - 1].close();
        if entry <= level {
            return Ok(None);
        }

        let confidence = 0.5
            + 0.25 * (1.0 - (rim_diff / self.rim_tolerance).clamp(0.0, 1.0))
            + 0.25 * (1.0 - (retrace / self.max_handle_retrace).clamp(0.0, 1.0));

        Ok(Some(
            PatternDetection::new(
                self.pattern(),
                Direction::Bullish,
                confidence,
                left_idx,
                breakout,
                entry,
                handle_low * (1.0 - STOP_BUFFER),
                entry + (level - bottom),
            )
            .with_zone(Zone::support(level))
            .with_data("left_rim", left_rim)
            .with_data("right_rim", right_rim)
            .with_data("cup_bottom", bottom)
            .with_data("handle_low", handle_low),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn path(points: &[(usize, f64)]) -> Vec<Candle> {
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
            .map(|c| Candle::new(c.timestamp, axis - c.open, axis - c.low, axis - c.high, axis - c.close, c.volume))
            .collect()
    }

    fn ascending_triangle() -> Vec<Candle> {
        path(&[
            (0, 100.0),
            (10, 100.0),
            (15, 109.0),
            (20, 102.0),
            (25, 109.0),
            (30, 104.0),
            (35, 109.0),
            (40, 106.0),
            (45, 109.0),
            (47, 108.0),
            (48, 111.0),
            (49, 112.0),
        ])
    }

    fn rising_wedge() -> Vec<Candle> {
        path(&[
            (0, 100.0),
            (10, 100.0),
            (15, 106.0),
            (20, 101.0),
            (25, 107.0),
            (30, 103.0),
            (35, 108.0),
            (40, 105.0),
            (45, 109.0),
            (47, 107.0),
            (48, 104.0),
            (49, 103.0),
        ])
    }

    #[test]
    fn test_ascending_triangle() {
        let candles = ascending_triangle();
        let det = AscendingTriangleDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bullish);
        assert_eq!(det.end_index, 48);
        assert!((det.data["resistance"] - 109.5).abs() < 1e-9);
        assert!((det.take_profit - 120.0).abs() < 1e-9);
        assert!((det.stop_loss - 107.5 * 0.995).abs() < 1e-9);

        assert!(SymmetricalTriangleDetector::default().detect(&candles).unwrap().is_none());
        assert!(RisingWedgeDetector::default().detect(&candles).unwrap().is_none());
    }

    #[test]
    fn test_descending_triangle_mirrors_ascending() {
        let candles = mirror(&ascending_triangle(), 220.0);
        let det = DescendingTriangleDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bearish);
        assert_eq!(det.end_index, 48);
        assert!((det.data["support"] - 110.5).abs() < 1e-9);
    }

    #[test]
    fn test_symmetrical_triangle_breaks_up() {
        let candles = path(&[
            (0, 100.0),
            (10, 100.0),
            (15, 112.0),
            (20, 100.0),
            (25, 110.0),
            (30, 102.0),
            (35, 108.0),
            (40, 104.0),
            (45, 106.5),
            (47, 105.0),
            (48, 108.0),
            (49, 109.0),
        ]);
        let det = SymmetricalTriangleDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bullish);
        assert_eq!(det.end_index, 48);
    }

    #[test]
    fn test_rising_wedge_breaks_down() {
        let det = RisingWedgeDetector::default()
            .detect(&rising_wedge())
            .unwrap()
            .unwrap();
        assert_eq!(det.direction, Direction::Bearish);
        assert_eq!(det.end_index, 48);
        assert!(det.stop_loss > det.entry_price);
    }

    #[test]
    fn test_falling_wedge_mirrors_rising() {
        let candles = mirror(&rising_wedge(), 220.0);
        let det = FallingWedgeDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bullish);
        assert_eq!(det.end_index, 48);
    }

    #[test]
    fn test_cup_and_handle() {
        let candles = path(&[
            (0, 110.0),
            (15, 120.0),
            (40, 100.0),
            (65, 120.0),
            (70, 114.0),
            (73, 116.0),
            (74, 123.0),
            (89, 125.0),
        ]);
        let det = CupAndHandleDetector::default().detect(&candles).unwrap().unwrap();
        assert_eq!(det.direction, Direction::Bullish);
        assert_eq!(det.start_index, 15);
        assert_eq!(det.end_index, 74);
        assert!((det.data["cup_bottom"] - 99.5).abs() < 1e-9);
        assert!((det.stop_loss - 113.5 * 0.995).abs() < 1e-9);
        assert!((det.take_profit - (125.0 + 21.0)).abs() < 1e-9);
    }

    #[test]
    fn test_v_bottom_is_not_a_cup() {
        let candles = path(&[
            (0, 110.0),
            (15, 120.0),
            (20, 100.0),
            (65, 120.0),
            (70, 114.0),
            (73, 116.0),
            (74, 123.0),
            (89, 125.0),
        ]);
        assert!(CupAndHandleDetector::default().detect(&candles).unwrap().is_none());
    }
}
