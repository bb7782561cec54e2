//! Pattern detection engine
//!
//! Runs the tier-eligible detectors over a candle window, attaches features
//! to every geometric hit, blends the two confidences and filters.

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::detectors::*;
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::{Error, OHLCVExt, PatternDetection, PatternType, Ratio, Result, Tier, OHLCV};

// ============================================================
// BUILTIN DETECTORS (enum dispatch)
// ============================================================

macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - fast path via enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect<T: OHLCV>(&self, candles: &[T]) -> Result<Option<PatternDetection>> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, candles)),*
                }
            }

            #[inline]
            pub fn pattern(&self) -> PatternType {
                match self {
                    $(Self::$variant(d) => PatternDetector::pattern(d)),*
                }
            }

            #[inline]
            pub fn lookback(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::lookback(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Reversal (6)
    DoubleTop(DoubleTopDetector),
    DoubleBottom(DoubleBottomDetector),
    TripleTop(TripleTopDetector),
    TripleBottom(TripleBottomDetector),
    HeadAndShoulders(HeadAndShouldersDetector),
    InverseHeadAndShoulders(InverseHeadAndShouldersDetector),

    // Continuation (8)
    Upu(UpuDetector),
    Dpd(DpdDetector),
    Upd(UpdDetector),
    Dpu(DpuDetector),
    BullFlag(BullFlagDetector),
    BearFlag(BearFlagDetector),
    BullPennant(BullPennantDetector),
    BearPennant(BearPennantDetector),

    // Structure (6)
    AscendingTriangle(AscendingTriangleDetector),
    DescendingTriangle(DescendingTriangleDetector),
    SymmetricalTriangle(SymmetricalTriangleDetector),
    RisingWedge(RisingWedgeDetector),
    FallingWedge(FallingWedgeDetector),
    CupAndHandle(CupAndHandleDetector),

    // Zones (4)
    Hfz(HfzDetector),
    Lfz(LfzDetector),
    SupportBounce(SupportBounceDetector),
    ResistanceRejection(ResistanceRejectionDetector),
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Detectors above this tier are skipped
    pub tier: Tier,
    /// Minimum blended confidence
    pub min_confidence: f64,
    /// Drop detections without a confirmed zone retest
    pub require_zone_retest: bool,
    pub validate_data: bool,
    pub pattern_filter: Option<BTreeSet<PatternType>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Elite,
            min_confidence: 0.5,
            require_zone_retest: true,
            validate_data: false,
            pattern_filter: None,
        }
    }
}

/// Main pattern detection engine
#[derive(Debug, Clone)]
pub struct PatternEngine {
    builtin: Vec<BuiltinDetector>,
    extractor: FeatureExtractor,
    config: EngineConfig,
}

impl PatternEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Pattern types this engine will actually run
    pub fn active_patterns(&self) -> BTreeSet<PatternType> {
        self.builtin
            .iter()
            .map(BuiltinDetector::pattern)
            .filter(|p| self.is_active(*p))
            .collect()
    }

    fn is_active(&self, pattern: PatternType) -> bool {
        pattern.min_tier() <= self.config.tier
            && self
                .config
                .pattern_filter
                .as_ref()
                .map_or(true, |f| f.contains(&pattern))
    }

    // ===========================================
    // LOW-LEVEL: Primitives
    // ===========================================

    /// Geometric detections only, no features and no filtering. Detector
    /// errors are logged and skipped.
    pub fn detect_raw<T: OHLCV>(&self, candles: &[T]) -> Vec<PatternDetection> {
        let mut out = Vec::new();
        for detector in self.builtin.iter().filter(|d| self.is_active(d.pattern())) {
            match detector.detect(candles) {
                Ok(Some(det)) => out.push(det),
                Ok(None) => {}
                Err(e @ Error::InsufficientData { .. }) => {
                    debug!(pattern = %detector.pattern(), error = %e, "detector skipped");
                }
                Err(e) => {
                    warn!(pattern = %detector.pattern(), error = %e, "detector failed");
                }
            }
        }
        out
    }

    /// Attach features and blend geometric confidence with the overall score
    pub fn enrich<T: OHLCV>(
        &self,
        candles: &[T],
        mut detection: PatternDetection,
    ) -> Result<PatternDetection> {
        let features = self.extractor.extract(
            candles,
            detection.start_index,
            detection.end_index,
            detection.zone,
        )?;
        detection.confidence = ((detection.confidence + features.overall_score) / 2.0).clamp(0.0, 1.0);
        detection.features = Some(features);
        Ok(detection)
    }

    // ===========================================
    // MID-LEVEL: Single window
    // ===========================================

    /// Run every eligible detector, enrich, filter and sort by descending
    /// confidence. Never fails: broken candidates are logged and dropped.
    pub fn detect_all<T: OHLCV>(&self, candles: &[T]) -> Vec<PatternDetection> {
        let mut results: Vec<PatternDetection> = self
            .detect_raw(candles)
            .into_iter()
            .filter_map(|det| {
                let pattern = det.pattern;
                match self.enrich(candles, det) {
                    Ok(det) => Some(det),
                    Err(e) => {
                        debug!(%pattern, error = %e, "feature extraction failed, candidate skipped");
                        None
                    }
                }
            })
            .filter(|det| self.should_include(det))
            .collect();

        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results
    }

    /// [`detect_all`](Self::detect_all) on the prefix ending at `index`
    pub fn scan_at<T: OHLCV>(&self, candles: &[T], index: usize) -> Vec<PatternDetection> {
        if index >= candles.len() {
            return Vec::new();
        }
        self.detect_all(&candles[..=index])
    }

    // ===========================================
    // HIGH-LEVEL: Batch processing
    // ===========================================

    /// Validate the data (when enabled) and run [`detect_all`](Self::detect_all)
    pub fn scan<T: OHLCV>(&self, candles: &[T]) -> Result<Vec<PatternDetection>> {
        if self.config.validate_data {
            self.validate_candles(candles)?;
        }
        Ok(self.detect_all(candles))
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn should_include(&self, det: &PatternDetection) -> bool {
        if det.confidence < self.config.min_confidence {
            debug!(pattern = %det.pattern, confidence = det.confidence, "below min confidence");
            return false;
        }
        if self.config.require_zone_retest && !det.has_zone_retest() {
            debug!(pattern = %det.pattern, "no zone retest");
            return false;
        }
        true
    }

    fn validate_candles<T: OHLCV>(&self, candles: &[T]) -> Result<()> {
        for (i, candle) in candles.iter().enumerate() {
            candle.validate().map_err(|e| match e {
                Error::InvalidOHLCV { reason, .. } => Error::InvalidOHLCV { index: i, reason },
                other => other,
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        Ratio::new(self.config.min_confidence)?;
        self.extractor.config.validate()?;
        for d in &self.builtin {
            d.validate_config()?;
        }
        Ok(())
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    builtin: Vec<BuiltinDetector>,
    feature_config: FeatureConfig,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add all builtin patterns with default configurations
    pub fn with_all_defaults(self) -> Self {
        self.with_reversal_defaults()
            .with_continuation_defaults()
            .with_structure_defaults()
            .with_zone_defaults()
    }

    /// Add reversal patterns with defaults (6)
    pub fn with_reversal_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            DoubleTop,
            DoubleBottom,
            TripleTop,
            TripleBottom,
            HeadAndShoulders,
            InverseHeadAndShoulders,
        ]);
        self
    }

    /// Add continuation patterns with defaults (8)
    pub fn with_continuation_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            Upu,
            Dpd,
            Upd,
            Dpu,
            BullFlag,
            BearFlag,
            BullPennant,
            BearPennant,
        ]);
        self
    }

    /// Add triangles, wedges and the cup and handle with defaults (6)
    pub fn with_structure_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            AscendingTriangle,
            DescendingTriangle,
            SymmetricalTriangle,
            RisingWedge,
            FallingWedge,
            CupAndHandle,
        ]);
        self
    }

    /// Add zone patterns with defaults (4)
    pub fn with_zone_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            Hfz,
            Lfz,
            SupportBounce,
            ResistanceRejection,
        ]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Subscription tier; detectors above it never run
    pub fn tier(mut self, tier: Tier) -> Self {
        self.config.tier = tier;
        self
    }

    /// Set minimum blended confidence
    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.config.min_confidence = confidence;
        self
    }

    pub fn require_zone_retest(mut self, require: bool) -> Self {
        self.config.require_zone_retest = require;
        self
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Filter to specific patterns only
    pub fn only_patterns(mut self, patterns: impl IntoIterator<Item = PatternType>) -> Self {
        self.config.pattern_filter = Some(patterns.into_iter().collect());
        self
    }

    pub fn feature_config(mut self, config: FeatureConfig) -> Self {
        self.feature_config = config;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        let engine = PatternEngine {
            builtin: self.builtin,
            extractor: FeatureExtractor::new(self.feature_config),
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub detections: Vec<PatternDetection>,
}

/// Error from scanning a single instrument
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub error: Error,
}

/// Parallel scanning of multiple instruments
pub fn scan_parallel<'a, T, I>(engine: &PatternEngine, instruments: I) -> (Vec<ScanResult>, Vec<ScanError>)
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, candles)| {
            engine
                .scan(candles)
                .map(|detections| ScanResult {
                    symbol: symbol.to_string(),
                    detections,
                })
                .map_err(|error| ScanError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn flat(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i as i64 * 60_000, 100.0, 100.5, 99.5, 100.0, 1_000.0))
            .collect()
    }

    #[test]
    fn test_builder_registers_all_patterns() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        assert_eq!(engine.active_patterns().len(), PatternType::ALL.len());
    }

    #[test]
    fn test_tier_gates_detectors() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .tier(Tier::Free)
            .build()
            .unwrap();
        assert_eq!(engine.active_patterns(), crate::available_patterns(Tier::Free));
    }

    #[test]
    fn test_only_patterns() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .only_patterns([PatternType::Upu, PatternType::CupAndHandle])
            .tier(Tier::Pro)
            .build()
            .unwrap();
        // cup and handle is elite-only
        assert_eq!(
            engine.active_patterns().into_iter().collect::<Vec<_>>(),
            vec![PatternType::Upu]
        );
    }

    #[test]
    fn test_build_rejects_bad_config() {
        assert!(EngineBuilder::new().min_confidence(1.5).build().is_err());
        let bad = UpuDetector {
            lookback: 3,
            ..Default::default()
        };
        assert!(EngineBuilder::new().add(BuiltinDetector::Upu(bad)).build().is_err());
    }

    #[test]
    fn test_short_history_yields_nothing() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        assert!(engine.detect_all(&flat(20)).is_empty());
        assert!(engine.scan_at(&flat(20), 50).is_empty());
    }

    #[test]
    fn test_scan_validates_data() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .validate_data(true)
            .build()
            .unwrap();
        let mut candles = flat(10);
        candles[3].high = 90.0;
        assert!(matches!(
            engine.scan(&candles),
            Err(Error::InvalidOHLCV { index: 3, .. })
        ));
    }

    #[test]
    fn test_scan_parallel_splits_errors() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .validate_data(true)
            .build()
            .unwrap();
        let good = flat(300);
        let mut bad = flat(300);
        bad[0].low = 101.0;
        let instruments = vec![("GOOD", good.as_slice()), ("BAD", bad.as_slice())];
        let (ok, err) = scan_parallel(&engine, instruments);
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].symbol, "GOOD");
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].symbol, "BAD");
    }
}
