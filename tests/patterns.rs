//! Integration tests for zonescan chart pattern detection.
//!
//! These tests drive the public API end to end on synthetic 250-candle
//! series: detector geometry, feature enrichment, tier gating and retests.

use zonescan::prelude::*;

const HOUR: i64 = 3_600_000;

/// Doji-like bar centred on `mid`
fn doji(i: usize, mid: f64) -> Candle {
    Candle::new(i as i64 * HOUR, mid, mid + 0.5, mid - 0.5, mid, 1000.0)
}

/// Piecewise-linear series through `(index, price)` points
fn path(points: &[(usize, f64)]) -> Vec<Candle> {
    let mut out = Vec::new();
    for w in points.windows(2) {
        let ((x0, p0), (x1, p1)) = (w[0], w[1]);
        let from = if out.is_empty() { x0 } else { x0 + 1 };
        for i in from..=x1 {
            let t = (i - x0) as f64 / (x1 - x0) as f64;
            out.push(doji(i, p0 + (p1 - p0) * t));
        }
    }
    out
}

/// 220 flat candles, twin troughs at 230 and 240 with a 106 bounce between,
/// last close above the neckline
fn double_bottom_series() -> Vec<Candle> {
    let mut candles = path(&[
        (0, 112.0),
        (220, 112.0),
        (230, 100.0),
        (235, 106.0),
        (240, 100.0),
        (250, 108.0),
    ]);
    candles.truncate(250);
    candles
}

/// 200 flat candles, +10% over 30, an 8-candle pause around 110, then +4%
fn upu_series() -> Vec<Candle> {
    let mut candles = path(&[(0, 100.0), (200, 100.0), (230, 110.0)]);
    candles.truncate(230);
    for i in 230..238 {
        let c = if i % 2 == 0 {
            Candle::new(i as i64 * HOUR, 109.6, 111.0, 109.0, 110.5, 1000.0)
        } else {
            Candle::new(i as i64 * HOUR, 110.4, 110.9, 109.1, 109.5, 1000.0)
        };
        candles.push(c);
    }
    for i in 238..250 {
        candles.push(doji(i, 110.0 + 4.4 * (i - 237) as f64 / 12.0));
    }
    candles
}

fn open_engine(tier: Tier) -> PatternEngine {
    EngineBuilder::new()
        .tier(tier)
        .with_all_defaults()
        .min_confidence(0.0)
        .require_zone_retest(false)
        .build()
        .unwrap()
}

// ============================================================
// DETECTOR SCENARIOS
// ============================================================

#[test]
fn test_double_bottom_entry_is_last_close() {
    let candles = double_bottom_series();
    assert_eq!(candles.len(), 250);

    let det = DoubleBottomDetector::with_defaults()
        .detect(&candles)
        .unwrap()
        .expect("double bottom");

    assert_eq!(det.direction, Direction::Bullish);
    assert_eq!(det.entry_price, candles[249].close);
    assert_eq!(det.start_index, 230);
    assert_eq!(det.end_index, 249);
    assert!((det.data["neckline"] - 106.5).abs() < 1e-9);
    assert!(det.stop_loss < 99.5);
    assert!(det.take_profit > det.entry_price);
    assert_eq!(det.zone, Some(Zone::support(det.data["neckline"])));
}

#[test]
fn test_upu_scenario() {
    let candles = upu_series();
    assert_eq!(candles.len(), 250);

    let det = UpuDetector::with_defaults()
        .detect(&candles)
        .unwrap()
        .expect("upu");

    assert_eq!(det.pattern, PatternType::Upu);
    assert_eq!(det.direction, Direction::Bullish);
    assert_eq!(det.entry_price, candles[249].close);
    assert_eq!(det.start_index, 220);
    // first close above the 239 high of 111.23
    assert_eq!(det.end_index, 241);
    assert!((det.entry_price - 114.4).abs() < 1e-9);

    // leg is close[229] - open[220]: 109.67 - 106.67
    assert!((det.data["phase1_move"] - 3.0).abs() < 1e-9);
    assert!((det.data["consolidation_low"] - 109.0).abs() < 1e-9);
    assert!((det.data["consolidation_high"] - (110.0 + 4.4 * 2.0 / 12.0 + 0.5)).abs() < 1e-9);
    assert!((det.stop_loss - 109.0 * 0.995).abs() < 1e-9);
    assert!((det.take_profit - 117.4).abs() < 1e-9);
}

#[test]
fn test_flat_series_has_no_geometric_patterns() {
    let candles = path(&[(0, 100.0), (260, 100.0)]);
    let engine = EngineBuilder::new()
        .with_reversal_defaults()
        .with_continuation_defaults()
        .with_structure_defaults()
        .min_confidence(0.0)
        .require_zone_retest(false)
        .build()
        .unwrap();
    assert!(engine.detect_all(&candles).is_empty());

    // every low sits on the same floor, so a frequency zone is all there is
    let zones = EngineBuilder::new()
        .with_zone_defaults()
        .min_confidence(0.0)
        .require_zone_retest(false)
        .build()
        .unwrap();
    assert!(zones
        .detect_raw(&candles)
        .iter()
        .all(|d| matches!(d.pattern, PatternType::Lfz | PatternType::Hfz)));
}

#[test]
fn test_short_series_is_not_an_error_for_the_engine() {
    let candles = path(&[(0, 100.0), (10, 110.0)]);
    let engine = open_engine(Tier::Elite);
    assert!(engine.detect_all(&candles).is_empty());

    let err = DoubleBottomDetector::with_defaults().detect(&candles).unwrap_err();
    assert!(matches!(err, Error::InsufficientData { need: 50, got: 11 }));
}

// ============================================================
// ENGINE
// ============================================================

#[test]
fn test_engine_enriches_detections() {
    let candles = double_bottom_series();
    let detections = open_engine(Tier::Free).detect_all(&candles);

    let det = detections
        .iter()
        .find(|d| d.pattern == PatternType::DoubleBottom)
        .expect("double bottom through the engine");
    let features = det.features.as_ref().expect("features attached");
    assert_eq!(det.entry_price, candles[249].close);
    assert!((0.0..=1.0).contains(&det.confidence));
    assert!((0.0..=1.0).contains(&features.overall_score));
    // nothing after the breakout candle yet
    assert!(!features.has_zone_retest);

    for pair in detections.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
}

#[test]
fn test_require_zone_retest_drops_unconfirmed() {
    let candles = double_bottom_series();
    let engine = EngineBuilder::new()
        .tier(Tier::Free)
        .with_reversal_defaults()
        .min_confidence(0.0)
        .require_zone_retest(true)
        .build()
        .unwrap();
    assert!(engine.detect_all(&candles).is_empty());
}

#[test]
fn test_detection_is_idempotent() {
    let engine = open_engine(Tier::Elite);
    for candles in [double_bottom_series(), upu_series()] {
        let a = engine.detect_all(&candles);
        let b = engine.detect_all(&candles);
        assert_eq!(a, b);

        let raw_a = engine.detect_raw(&candles);
        let raw_b = engine.detect_raw(&candles);
        assert_eq!(raw_a, raw_b);
    }
}

#[test]
fn test_tier_gating() {
    let candles = upu_series();

    let free = open_engine(Tier::Free);
    assert_eq!(free.active_patterns(), available_patterns(Tier::Free));
    assert!(free
        .detect_raw(&candles)
        .iter()
        .all(|d| d.pattern.min_tier() == Tier::Free));

    let pro = open_engine(Tier::Pro);
    assert!(pro
        .detect_raw(&candles)
        .iter()
        .any(|d| d.pattern == PatternType::Upu));
}

#[test]
fn test_scan_at_uses_prefix_only() {
    let candles = double_bottom_series();
    let engine = open_engine(Tier::Free);

    // before the neckline break nothing fires
    assert!(engine
        .scan_at(&candles, 245)
        .iter()
        .all(|d| d.pattern != PatternType::DoubleBottom));
    assert_eq!(engine.scan_at(&candles, 249), engine.detect_all(&candles));
    assert!(engine.scan_at(&candles, 250).is_empty());
}

#[test]
fn test_validate_data_rejects_bad_candles() {
    let mut candles = double_bottom_series();
    candles[10].high = candles[10].low - 1.0;
    let engine = EngineBuilder::new()
        .with_reversal_defaults()
        .validate_data(true)
        .build()
        .unwrap();
    let err = engine.scan(&candles).unwrap_err();
    assert!(matches!(err, Error::InvalidOHLCV { index: 10, .. }));
}

#[test]
fn test_scan_parallel() {
    let db = double_bottom_series();
    let upu = upu_series();
    let engine = open_engine(Tier::Elite);

    let instruments: Vec<(&str, &[Candle])> = vec![("BTCUSDT", &db), ("ETHUSDT", &upu)];
    let (results, errors) = scan_parallel(&engine, instruments);
    assert!(errors.is_empty());
    assert_eq!(results.len(), 2);
    for r in &results {
        assert!(!r.detections.is_empty(), "{}", r.symbol);
    }
}

// ============================================================
// RECORDS
// ============================================================

#[test]
fn test_detection_serializes() {
    let candles = double_bottom_series();
    let det = open_engine(Tier::Free)
        .detect_all(&candles)
        .into_iter()
        .find(|d| d.pattern == PatternType::DoubleBottom)
        .unwrap();

    let json = serde_json::to_value(&det).unwrap();
    assert_eq!(json["pattern"], "double_bottom");
    assert_eq!(json["direction"], "bullish");
    assert_eq!(json["zone"]["kind"], "support");
    assert!(json["features"]["has_zone_retest"].is_boolean());

    let back: PatternDetection = serde_json::from_value(json).unwrap();
    assert_eq!(back, det);
}

#[test]
fn test_filter_engine_on_live_detection() {
    let candles = double_bottom_series();
    let det = open_engine(Tier::Free)
        .detect_all(&candles)
        .into_iter()
        .find(|d| d.pattern == PatternType::DoubleBottom)
        .unwrap();

    let permissive = FilterEngine::new(FilterConfig::permissive()).unwrap();
    let result = permissive.evaluate(&det);
    assert!(result.passed);
    assert!((result.score - det.confidence).abs() < 1e-12);

    let strict = FilterEngine::new(FilterConfig {
        require_zone_retest: true,
        ..FilterConfig::permissive()
    })
    .unwrap();
    assert!(!strict.evaluate(&det).passed);
}
