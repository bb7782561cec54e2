//! Composite scores derived from a feature snapshot
//!
//! These are hand-tuned bands, not learned weights. The retest bonus in
//! [`overall`] is the lever that separates retested setups from the rest.

use super::{Divergence, MacdCross, PatternFeatures};

pub const QUALITY_WEIGHT: f64 = 0.4;
pub const TIMING_WEIGHT: f64 = 0.3;
pub const RISK_REWARD_WEIGHT: f64 = 0.3;
/// Maximum overall-score bonus for a perfect retest
pub const RETEST_BONUS: f64 = 0.15;

/// Volume ratio at which a breakout counts as confirmed
pub const VOLUME_CONFIRM_RATIO: f64 = 1.2;

/// Rewards volume confirmation, trend strength, S/R touches and a pattern of
/// reasonable duration (10-100 candles) and height (2-20%).
pub fn pattern_quality(f: &PatternFeatures) -> f64 {
    let mut score: f64 = 0.0;

    score += if f.volume_confirmed {
        0.25
    } else {
        0.125 * (f.volume_ratio / VOLUME_CONFIRM_RATIO).clamp(0.0, 1.0)
    };

    score += 0.25 * f.trend_strength.clamp(0.0, 1.0);

    let touches = (f.support_touches + f.resistance_touches).min(5);
    score += 0.25 * touches as f64 / 5.0;

    if (10..=100).contains(&f.pattern_duration) {
        score += 0.125;
    }
    if (2.0..=20.0).contains(&f.pattern_height_pct) {
        score += 0.125;
    }

    score.clamp(0.0, 1.0)
}

/// Rewards RSI in the 30-70 band (or at an extreme backed by divergence),
/// any divergence, and a fresh MACD cross.
pub fn entry_timing(f: &PatternFeatures) -> f64 {
    let mut score: f64 = 0.0;

    let healthy = (30.0..=70.0).contains(&f.rsi);
    let extreme_with_divergence = (f.rsi < 30.0 && f.rsi_divergence == Divergence::Bullish)
        || (f.rsi > 70.0 && f.rsi_divergence == Divergence::Bearish);
    score += if healthy || extreme_with_divergence {
        0.4
    } else {
        0.1
    };

    if f.rsi_divergence != Divergence::None {
        score += 0.3;
    }
    if f.macd_signal != MacdCross::None {
        score += 0.3;
    }

    score.clamp(0.0, 1.0)
}

/// Rewards room to the nearest opposing level (full marks at 5% or when no
/// level is in the way) and trend strength.
pub fn risk_reward(opposing_distance_pct: Option<f64>, trend_strength: f64) -> f64 {
    let room = opposing_distance_pct.map_or(1.0, |d| (d / 5.0).clamp(0.0, 1.0));
    (0.6 * room + 0.4 * trend_strength.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Weighted blend plus the retest bonus, capped at 1.0
pub fn overall(quality: f64, timing: f64, risk_reward: f64, retest_quality: Option<f64>) -> f64 {
    let base = QUALITY_WEIGHT * quality + TIMING_WEIGHT * timing + RISK_REWARD_WEIGHT * risk_reward;
    let bonus = retest_quality.map_or(0.0, |q| RETEST_BONUS * q.clamp(0.0, 1.0));
    (base + bonus).clamp(0.0, 1.0)
}
