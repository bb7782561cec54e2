//! Pivot points and support/resistance confluence

use serde::{Deserialize, Serialize};

use crate::OHLCV;

/// Pivot radius: a pivot is a strict extremum over ±2 candles
pub const PIVOT_RADIUS: usize = 2;

/// Indices of strict local highs within `[from, to)`
pub fn pivot_highs<T: OHLCV>(candles: &[T], from: usize, to: usize) -> Vec<usize> {
    pivots(candles, from, to, |c| c.high(), |a, b| a > b)
}

/// Indices of strict local lows within `[from, to)`
pub fn pivot_lows<T: OHLCV>(candles: &[T], from: usize, to: usize) -> Vec<usize> {
    pivots(candles, from, to, |c| c.low(), |a, b| a < b)
}

fn pivots<T, V, C>(candles: &[T], from: usize, to: usize, value: V, beats: C) -> Vec<usize>
where
    T: OHLCV,
    V: Fn(&T) -> f64,
    C: Fn(f64, f64) -> bool,
{
    let to = to.min(candles.len());
    let mut out = Vec::new();
    if to < from + 2 * PIVOT_RADIUS + 1 {
        return out;
    }

    for i in (from + PIVOT_RADIUS)..(to - PIVOT_RADIUS) {
        let v = value(&candles[i]);
        let is_pivot = (i - PIVOT_RADIUS..=i + PIVOT_RADIUS)
            .filter(|&j| j != i)
            .all(|j| beats(v, value(&candles[j])));
        if is_pivot {
            out.push(i);
        }
    }

    out
}

/// Nearest support/resistance around the current price with touch counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub support_touches: u32,
    pub resistance_touches: u32,
}

impl SupportResistance {
    /// Distance from `price` down to support, in percent
    pub fn distance_to_support_pct(&self, price: f64) -> Option<f64> {
        self.support
            .filter(|_| price > 0.0)
            .map(|s| (price - s) / price * 100.0)
    }

    /// Distance from `price` up to resistance, in percent
    pub fn distance_to_resistance_pct(&self, price: f64) -> Option<f64> {
        self.resistance
            .filter(|_| price > 0.0)
            .map(|r| (r - price) / price * 100.0)
    }
}

/// Find the nearest pivot support below and pivot resistance above the last
/// close, over the trailing `lookback` candles. Touches count candles whose
/// low (support) or high (resistance) sits within `tolerance` of the level.
pub fn support_resistance<T: OHLCV>(
    candles: &[T],
    lookback: usize,
    tolerance: f64,
) -> SupportResistance {
    let Some(last) = candles.last() else {
        return SupportResistance::default();
    };
    let price = last.close();
    let to = candles.len();
    let from = to.saturating_sub(lookback);

    let support = pivot_lows(candles, from, to)
        .into_iter()
        .map(|i| candles[i].low())
        .filter(|&l| l < price)
        .fold(None, |best: Option<f64>, l| Some(best.map_or(l, |b| b.max(l))));

    let resistance = pivot_highs(candles, from, to)
        .into_iter()
        .map(|i| candles[i].high())
        .filter(|&h| h > price)
        .fold(None, |best: Option<f64>, h| Some(best.map_or(h, |b| b.min(h))));

    let window = &candles[from..to];
    let touches = |level: Option<f64>, value: fn(&T) -> f64| -> u32 {
        level.map_or(0, |lvl| {
            window
                .iter()
                .filter(|c| lvl > 0.0 && ((value(c) - lvl) / lvl).abs() <= tolerance)
                .count() as u32
        })
    };

    SupportResistance {
        support,
        resistance,
        support_touches: touches(support, |c| c.low()),
        resistance_touches: touches(resistance, |c| c.high()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn bar(i: i64, low: f64, high: f64) -> Candle {
        let mid = (low + high) / 2.0;
        Candle::new(i, mid, high, low, mid, 1.0)
    }

    #[test]
    fn test_pivots_strict() {
        let highs = [1.0, 2.0, 5.0, 2.0, 1.0, 2.0, 2.0, 2.0, 1.0];
        let candles: Vec<Candle> = highs
            .iter()
            .enumerate()
            .map(|(i, &h)| bar(i as i64, h - 0.5, h))
            .collect();
        // index 2 is a strict high; the plateau at 5..7 is not
        assert_eq!(pivot_highs(&candles, 0, candles.len()), vec![2]);
    }

    #[test]
    fn test_support_resistance_nearest_levels() {
        // oscillate between 95 and 105, end in the middle
        let mut candles = Vec::new();
        for i in 0..40 {
            let phase = i % 8;
            let center = match phase {
                0 => 96.0,
                4 => 104.0,
                1 | 7 => 98.0,
                3 | 5 => 102.0,
                _ => 100.0,
            };
            candles.push(bar(i, center - 1.0, center + 1.0));
        }
        candles.push(bar(40, 99.5, 100.5));

        let sr = support_resistance(&candles, 100, 0.02);
        assert_eq!(sr.support, Some(95.0));
        assert_eq!(sr.resistance, Some(105.0));
        assert!(sr.support_touches >= 4);
        assert!(sr.resistance_touches >= 4);
    }

    #[test]
    fn test_support_resistance_empty() {
        let candles: Vec<Candle> = Vec::new();
        assert_eq!(support_resistance(&candles, 100, 0.02), SupportResistance::default());
    }
}
