//! Post-hoc filters over enriched detections
//!
//! Each enabled filter either rejects the detection outright (score 0) or
//! adds a small bonus on top of its confidence.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, PatternDetection, Result};

pub const VOLUME_BONUS: f64 = 0.05;
/// Retest bonus scales with retest quality, never below [`RETEST_BONUS_FLOOR`]
pub const RETEST_BONUS: f64 = 0.15;
pub const RETEST_BONUS_FLOOR: f64 = 0.05;
pub const QUALITY_BONUS: f64 = 0.05;
pub const TREND_BONUS: f64 = 0.05;
pub const RSI_BONUS: f64 = 0.02;

/// Which filter made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// No feature snapshot attached
    Features,
    Volume,
    ZoneRetest,
    PatternQuality,
    TrendStrength,
    RsiBand,
}

/// Filter thresholds; `None` disables a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_volume_ratio: Option<f64>,
    pub require_zone_retest: bool,
    pub min_pattern_quality: Option<f64>,
    pub min_trend_strength: Option<f64>,
    /// Inclusive RSI band `(low, high)`
    pub rsi_band: Option<(f64, f64)>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_volume_ratio: Some(1.0),
            require_zone_retest: false,
            min_pattern_quality: Some(0.3),
            min_trend_strength: None,
            rsi_band: Some((20.0, 80.0)),
        }
    }
}

impl FilterConfig {
    /// Every filter off
    pub fn permissive() -> Self {
        Self {
            min_volume_ratio: None,
            require_zone_retest: false,
            min_pattern_quality: None,
            min_trend_strength: None,
            rsi_band: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.min_volume_ratio {
            if !(v.is_finite() && v >= 0.0) {
                return Err(Error::OutOfRange {
                    field: "min_volume_ratio",
                    value: v,
                    min: 0.0,
                    max: f64::INFINITY,
                });
            }
        }
        for (field, value) in [
            ("min_pattern_quality", self.min_pattern_quality),
            ("min_trend_strength", self.min_trend_strength),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(Error::OutOfRange {
                        field,
                        value: v,
                        min: 0.0,
                        max: 1.0,
                    });
                }
            }
        }
        if let Some((lo, hi)) = self.rsi_band {
            if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "rsi_band ({lo}, {hi}) must be an ordered range inside 0..=100"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of running the filters over one detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterResult {
    pub passed: bool,
    /// Confidence plus bonuses, capped at 1.0; 0 when rejected
    pub score: f64,
    pub rejected_by: Option<FilterKind>,
    /// Filters that ran and passed
    pub applied: Vec<FilterKind>,
}

impl FilterResult {
    fn reject(kind: FilterKind, applied: Vec<FilterKind>) -> Self {
        Self {
            passed: false,
            score: 0.0,
            rejected_by: Some(kind),
            applied,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    pub config: FilterConfig,
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn evaluate(&self, det: &PatternDetection) -> FilterResult {
        let cfg = &self.config;
        let Some(f) = det.features.as_ref() else {
            return FilterResult::reject(FilterKind::Features, Vec::new());
        };

        let mut score = det.confidence;
        let mut applied = Vec::new();

        if let Some(min) = cfg.min_volume_ratio {
            if f.volume_ratio < min {
                return FilterResult::reject(FilterKind::Volume, applied);
            }
            score += VOLUME_BONUS;
            applied.push(FilterKind::Volume);
        }

        if cfg.require_zone_retest && !f.has_zone_retest {
            return FilterResult::reject(FilterKind::ZoneRetest, applied);
        }
        if f.has_zone_retest {
            score += (RETEST_BONUS * f.retest_quality_score).max(RETEST_BONUS_FLOOR);
            applied.push(FilterKind::ZoneRetest);
        }

        if let Some(min) = cfg.min_pattern_quality {
            if f.pattern_quality_score < min {
                return FilterResult::reject(FilterKind::PatternQuality, applied);
            }
            score += QUALITY_BONUS;
            applied.push(FilterKind::PatternQuality);
        }

        if let Some(min) = cfg.min_trend_strength {
            if f.trend_strength < min {
                return FilterResult::reject(FilterKind::TrendStrength, applied);
            }
            score += TREND_BONUS;
            applied.push(FilterKind::TrendStrength);
        }

        if let Some((lo, hi)) = cfg.rsi_band {
            if f.rsi < lo || f.rsi > hi {
                return FilterResult::reject(FilterKind::RsiBand, applied);
            }
            score += RSI_BONUS;
            applied.push(FilterKind::RsiBand);
        }

        FilterResult {
            passed: true,
            score: score.clamp(0.0, 1.0),
            rejected_by: None,
            applied,
        }
    }

    /// Keep passing detections, highest score first
    pub fn apply(&self, detections: Vec<PatternDetection>) -> Vec<(PatternDetection, FilterResult)> {
        let mut kept: Vec<(PatternDetection, FilterResult)> = detections
            .into_iter()
            .filter_map(|det| {
                let result = self.evaluate(&det);
                if result.passed {
                    Some((det, result))
                } else {
                    debug!(pattern = %det.pattern, rejected_by = ?result.rejected_by, "filtered out");
                    None
                }
            })
            .collect();
        kept.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
        kept
    }
}
