//! Common helpers for chart pattern detection
//!
//! Thresholds shared across detector modules plus window, extreme and
//! trend-line utilities.

use crate::{Error, PatternType, Result, OHLCV};

// ============================================================
// THRESHOLDS
// ============================================================

/// Twin peaks/troughs must sit within 2% of each other
pub const TWIN_TOLERANCE: f64 = 0.02;
/// Minimum move between an extreme and the neckline
pub const MIN_NECKLINE_MOVE: f64 = 0.03;
/// Minimum candles between twin extremes
pub const MIN_SEPARATION: usize = 5;
/// Head-and-shoulders shoulders within 15% of each other
pub const SHOULDER_TOLERANCE: f64 = 0.15;
/// Three-phase patterns: minimum phase-1 move
pub const PHASE_MIN_MOVE: f64 = 0.02;
/// Three-phase patterns: maximum consolidation range
pub const CONSOLIDATION_MAX_RANGE: f64 = 0.03;
/// Flags: minimum pole move
pub const POLE_MIN_MOVE: f64 = 0.05;
/// Flags: maximum Fibonacci retrace of the pole
pub const FLAG_MAX_RETRACE: f64 = 0.618;
/// Frequency zones: touch tolerance as a fraction of the level price
pub const ZONE_TOUCH_TOLERANCE: f64 = 0.015;
/// Stops sit this far beyond the invalidation level
pub const STOP_BUFFER: f64 = 0.005;

// ============================================================
// WINDOW HELPERS
// ============================================================

/// Start index of the trailing `lookback` window.
///
/// Fails with `InsufficientData` when the series is shorter than the window
/// and with `DetectorFailure` when the window holds a non-positive or
/// non-finite price.
pub fn window<T: OHLCV>(pattern: PatternType, candles: &[T], lookback: usize) -> Result<usize> {
    if lookback == 0 || candles.len() < lookback {
        return Err(Error::InsufficientData {
            need: lookback.max(1),
            got: candles.len(),
        });
    }
    let start = candles.len() - lookback;
    let bad = candles[start..].iter().any(|c| {
        [c.open(), c.high(), c.low(), c.close()]
            .iter()
            .any(|v| !v.is_finite() || *v <= 0.0)
    });
    if bad {
        return Err(Error::DetectorFailure {
            pattern,
            reason: "non-positive or non-finite price in window",
        });
    }
    Ok(start)
}

/// Highest high in `[from, to)`, earliest index on ties
pub fn highest<T: OHLCV>(candles: &[T], from: usize, to: usize) -> Option<(usize, f64)> {
    let to = to.min(candles.len());
    (from..to).fold(None, |best, i| {
        let h = candles[i].high();
        match best {
            Some((_, b)) if h <= b => best,
            _ => Some((i, h)),
        }
    })
}

/// Lowest low in `[from, to)`, earliest index on ties
pub fn lowest<T: OHLCV>(candles: &[T], from: usize, to: usize) -> Option<(usize, f64)> {
    let to = to.min(candles.len());
    (from..to).fold(None, |best, i| {
        let l = candles[i].low();
        match best {
            Some((_, b)) if l >= b => best,
            _ => Some((i, l)),
        }
    })
}

/// Relative difference between two prices, against the smaller one
#[inline]
pub fn pct_diff(a: f64, b: f64) -> f64 {
    let base = a.min(b);
    if base <= 0.0 {
        f64::INFINITY
    } else {
        (a - b).abs() / base
    }
}

/// First index in `[from, to)` whose close is above `level`
pub fn first_close_above<T: OHLCV>(candles: &[T], from: usize, to: usize, level: f64) -> Option<usize> {
    (from..to.min(candles.len())).find(|&i| candles[i].close() > level)
}

/// First index in `[from, to)` whose close is below `level`
pub fn first_close_below<T: OHLCV>(candles: &[T], from: usize, to: usize, level: f64) -> Option<usize> {
    (from..to.min(candles.len())).find(|&i| candles[i].close() < level)
}

/// The `n` most extreme pivots, returned in index order. `None` when fewer
/// than `n` exist or any two of them are closer than `min_separation`.
/// `more_extreme(a, b)` says whether value `a` beats `b`.
pub fn extreme_pivots(
    pivots: &[usize],
    value: impl Fn(usize) -> f64,
    more_extreme: fn(f64, f64) -> bool,
    n: usize,
    min_separation: usize,
) -> Option<Vec<usize>> {
    if n == 0 || pivots.len() < n {
        return None;
    }
    let mut ranked = pivots.to_vec();
    // stable sort keeps the earlier pivot first on ties
    ranked.sort_by(|&a, &b| {
        let (va, vb) = (value(a), value(b));
        if more_extreme(va, vb) {
            std::cmp::Ordering::Less
        } else if more_extreme(vb, va) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });

    let mut picked = ranked[..n].to_vec();
    picked.sort_unstable();
    picked
        .windows(2)
        .all(|w| w[1] - w[0] >= min_separation)
        .then_some(picked)
}

/// Least-squares line through `(index, price)` points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}

impl Line {
    pub fn fit(points: &[(usize, f64)]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| *x as f64).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| *y).sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for &(x, y) in points {
            let dx = x as f64 - mean_x;
            sxy += dx * (y - mean_y);
            sxx += dx * dx;
        }
        if sxx <= f64::EPSILON {
            return None;
        }
        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    #[inline]
    pub fn at(&self, x: usize) -> f64 {
        self.intercept + self.slope * x as f64
    }

    /// Total change across `span` candles as a fraction of `price`
    #[inline]
    pub fn normalized_slope(&self, span: usize, price: f64) -> f64 {
        if price <= 0.0 {
            0.0
        } else {
            self.slope * span as f64 / price
        }
    }
}
