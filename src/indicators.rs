//! Technical indicators over price and candle series
//!
//! Every function returns a series with the same length as its input so that
//! `out[i]` always lines up with `input[i]`. Early values that a textbook
//! definition would leave undefined are filled with neutral defaults instead
//! (prefix mean for EMA, 50 for RSI, raw range for ATR). Bad input degrades,
//! it never errors.

use crate::{OHLCVExt, OHLCV};

/// Default RSI period (Wilder)
pub const RSI_PERIOD: usize = 14;
/// Default ATR period
pub const ATR_PERIOD: usize = 14;

/// Exponential moving average, multiplier `2 / (period + 1)`.
///
/// Until `period` observations exist the value is the simple mean of the
/// available prefix, which also seeds the recursion at index `period - 1`.
pub fn ema(prices: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut sum = 0.0;

    for (i, &price) in prices.iter().enumerate() {
        if i < period {
            sum += price;
            out.push(sum / (i + 1) as f64);
        } else {
            let prev = out[i - 1];
            out.push(price * k + prev * (1.0 - k));
        }
    }

    out
}

/// Simple moving average over a shrinking window at the start
pub fn sma(prices: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(prices.len());
    let mut sum = 0.0;

    for i in 0..prices.len() {
        sum += prices[i];
        if i >= period {
            sum -= prices[i - period];
        }
        let n = (i + 1).min(period);
        out.push(sum / n as f64);
    }

    out
}

/// Relative Strength Index with Wilder's smoothing.
///
/// The first `period` values are 50.0 (neutral). Output is always in [0, 100].
pub fn rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let n = prices.len();
    let mut out = vec![50.0; n];
    if n <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let p = period as f64;
    for i in (period + 1)..n {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = rsi_value(avg_gain, avg_loss);
    }

    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if !avg_gain.is_finite() || !avg_loss.is_finite() {
        return 50.0;
    }
    if avg_loss <= 0.0 {
        return if avg_gain <= 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// True range series. The first candle has no previous close, so its true
/// range is the plain high-low range.
pub fn true_range<T: OHLCV>(candles: &[T]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    for (i, c) in candles.iter().enumerate() {
        let hl = c.range().abs();
        let tr = if i == 0 {
            hl
        } else {
            let prev_close = candles[i - 1].close();
            hl.max((c.high() - prev_close).abs())
                .max((c.low() - prev_close).abs())
        };
        out.push(if tr.is_finite() { tr } else { 0.0 });
    }
    out
}

/// Average true range: rolling simple mean of true range, never negative
pub fn atr<T: OHLCV>(candles: &[T], period: usize) -> Vec<f64> {
    // running-sum rounding can dip a hair below zero after large bars roll off
    sma(&true_range(candles), period)
        .into_iter()
        .map(|v| v.max(0.0))
        .collect()
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Standard 12/26/9 MACD
pub fn macd(prices: &[f64]) -> Macd {
    let fast = ema(prices, 12);
    let slow = ema(prices, 26);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema(&line, 9);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    Macd {
        line,
        signal,
        histogram,
    }
}

/// Extract close prices from a candle slice
pub fn closes<T: OHLCV>(candles: &[T]) -> Vec<f64> {
    candles.iter().map(|c| c.close()).collect()
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    #[test]
    fn test_ema_prefix_is_simple_mean() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = ema(&prices, 3);
        assert_eq!(out.len(), prices.len());
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!((out[1] - 1.5).abs() < 1e-12);
        assert!((out[2] - 2.0).abs() < 1e-12);
        // k = 0.5: 4*0.5 + 2*0.5
        assert!((out[3] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ema_empty() {
        assert!(ema(&[], 20).is_empty());
    }

    #[test]
    fn test_rsi_short_input_is_neutral() {
        let out = rsi(&[1.0, 2.0, 3.0], 14);
        assert_eq!(out, vec![50.0; 3]);
    }

    #[test]
    fn test_rsi_monotonic_rise_is_100() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&prices, 14);
        assert_eq!(out[13], 50.0);
        assert_eq!(out[14], 100.0);
        assert_eq!(out[29], 100.0);
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let out = rsi(&[10.0; 40], 14);
        assert!(out.iter().all(|v| *v == 50.0));
    }

    #[test]
    fn test_atr_first_value_is_range() {
        let candles = vec![
            Candle::new(0, 10.0, 12.0, 9.0, 11.0, 1.0),
            Candle::new(1, 11.0, 15.0, 11.0, 14.0, 1.0),
        ];
        let out = atr(&candles, 14);
        assert!((out[0] - 3.0).abs() < 1e-12);
        // TR[1] = max(4, 4, 0) = 4, mean(3, 4)
        assert!((out[1] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_macd_lengths() {
        let prices: Vec<f64> = (0..60).map(|i| (i as f64 * 0.3).sin() * 5.0 + 100.0).collect();
        let m = macd(&prices);
        assert_eq!(m.line.len(), 60);
        assert_eq!(m.signal.len(), 60);
        assert_eq!(m.histogram.len(), 60);
        for i in 0..60 {
            assert!((m.histogram[i] - (m.line[i] - m.signal[i])).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sma_shrinking_window() {
        let out = sma(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(out, vec![2.0, 3.0, 5.0, 7.0]);
    }
}
