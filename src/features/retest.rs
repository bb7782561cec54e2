//! Zone-retest validation
//!
//! After a breakout, price often comes back to the level it just broke before
//! moving on. A broken support should reject price from below (the candle's
//! high tags the zone and the candle closes under it); a broken resistance
//! should hold price from above (the low tags the zone and the close stays
//! above). Only a touch *and* a reaction count as a retest.

use serde::{Deserialize, Serialize};

use crate::{OHLCVExt, ZoneType, OHLCV};

/// Default number of candles scanned after the breakout
pub const RETEST_MAX_CANDLES: usize = 20;
/// Default half-width of the touch band, as a fraction of the zone price
pub const RETEST_TOLERANCE: f64 = 0.005;

/// Outcome of a retest scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneRetest {
    pub has_retest: bool,
    /// Index of the first valid retest candle
    pub retest_index: Option<usize>,
    /// `candles.len() - retest_index`, 0 when there is no retest
    pub candles_ago: usize,
    /// 0.0..=1.0, 0 when there is no retest
    pub quality: f64,
}

/// Scan up to `max_candles` candles after `breakout_index` for the first
/// valid retest of `zone_price`.
///
/// `role` is the part the zone plays after the breakout: `Resistance` for a
/// broken support, `Support` for a broken resistance.
pub fn validate_zone_retest<T: OHLCV>(
    candles: &[T],
    breakout_index: usize,
    zone_price: f64,
    role: ZoneType,
    max_candles: usize,
    tolerance: f64,
) -> ZoneRetest {
    if zone_price <= 0.0 || tolerance <= 0.0 || breakout_index >= candles.len() {
        return ZoneRetest::default();
    }

    let band = zone_price * tolerance;
    let last = breakout_index
        .saturating_add(max_candles)
        .min(candles.len() - 1);

    for j in (breakout_index + 1)..=last {
        let c = &candles[j];
        let range = c.range();

        let (touch, reacted, strength) = match role {
            ZoneType::Resistance => {
                let touch = (c.high() - zone_price).abs();
                let strength = if range > f64::EPSILON {
                    (c.high() - c.close()) / range
                } else {
                    0.0
                };
                (touch, c.close() < zone_price, strength)
            }
            ZoneType::Support => {
                let touch = (c.low() - zone_price).abs();
                let strength = if range > f64::EPSILON {
                    (c.close() - c.low()) / range
                } else {
                    0.0
                };
                (touch, c.close() > zone_price, strength)
            }
        };

        if touch <= band && reacted {
            let precision = 1.0 - (touch / band).clamp(0.0, 1.0);
            let quality = ((precision + strength.clamp(0.0, 1.0)) / 2.0).clamp(0.0, 1.0);
            return ZoneRetest {
                has_retest: true,
                retest_index: Some(j),
                candles_ago: candles.len() - j,
                quality,
            };
        }
    }

    ZoneRetest::default()
}
