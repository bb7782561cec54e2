//! Benchmarks for chart pattern detection and the backtest walk.

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use zonescan::prelude::*;

/// Deterministic swinging series with trends and pullbacks
fn generate_candles(n: usize) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(n);
    let mut price = 100.0;

    for i in 0..n {
        let swing = ((i as f64) / 15.0).sin() * 0.6;
        let noise = ((i * 7 + 13) % 100) as f64 / 100.0 - 0.5;
        let volatility = 0.8 + ((i * 3) % 10) as f64 / 10.0;

        let open = price;
        let close = (price + swing + noise * 0.4).max(1.0);
        let high = open.max(close) + volatility * 0.5;
        let low = (open.min(close) - volatility * 0.5).max(0.5);
        let volume = 1000.0 + ((i * 11) % 17) as f64 * 60.0;

        candles.push(Candle::new(i as i64 * 3_600_000, open, high, low, close, volume));
        price = close;
    }

    candles
}

fn open_engine() -> PatternEngine {
    EngineBuilder::new()
        .with_all_defaults()
        .min_confidence(0.0)
        .require_zone_retest(false)
        .build()
        .unwrap()
}

fn bench_single_pattern(c: &mut Criterion) {
    let candles = generate_candles(500);

    let engine = EngineBuilder::new()
        .add(BuiltinDetector::DoubleBottom(DoubleBottomDetector::with_defaults()))
        .min_confidence(0.0)
        .require_zone_retest(false)
        .build()
        .unwrap();

    c.bench_function("detect_double_bottom_500", |b| {
        b.iter(|| black_box(engine.detect_all(black_box(&candles))))
    });
}

fn bench_all_patterns(c: &mut Criterion) {
    let candles = generate_candles(500);
    let engine = open_engine();

    c.bench_function("detect_all_patterns_500", |b| {
        b.iter(|| black_box(engine.detect_all(black_box(&candles))))
    });
}

fn bench_scaling(c: &mut Criterion) {
    let engine = open_engine();

    let mut group = c.benchmark_group("scaling");

    for size in [200, 500, 1000, 5000].iter() {
        let candles = generate_candles(*size);

        group.bench_with_input(BenchmarkId::new("detect_all", size), size, |b, _| {
            b.iter(|| black_box(engine.detect_all(black_box(&candles))))
        });
    }

    group.finish();
}

fn bench_parallel_scan(c: &mut Criterion) {
    let sets: Vec<Vec<Candle>> = (0..4).map(|k| generate_candles(500 + k * 50)).collect();
    let engine = open_engine();

    let instruments: Vec<(&str, &[Candle])> = vec![
        ("BTCUSDT", &sets[0]),
        ("ETHUSDT", &sets[1]),
        ("SOLUSDT", &sets[2]),
        ("BNBUSDT", &sets[3]),
    ];

    c.bench_function("parallel_scan_4_instruments", |b| {
        b.iter(|| black_box(scan_parallel(black_box(&engine), black_box(instruments.clone()))))
    });
}

fn bench_scan_at(c: &mut Criterion) {
    let candles = generate_candles(1000);
    let engine = open_engine();

    c.bench_function("scan_at_single_candle", |b| {
        b.iter(|| black_box(engine.scan_at(black_box(&candles), black_box(500))))
    });
}

fn bench_backtest(c: &mut Criterion) {
    let mut feed = HashMap::new();
    feed.insert(("BTCUSDT".to_string(), "1h".to_string()), generate_candles(600));

    let engine = BacktestEngine::new(BacktestConfig::default()).unwrap();

    let mut group = c.benchmark_group("backtest");
    group.sample_size(10);
    group.bench_function("simple_600_candles", |b| {
        b.iter(|| black_box(engine.run(black_box(&feed))))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_single_pattern,
    bench_all_patterns,
    bench_scaling,
    bench_parallel_scan,
    bench_scan_at,
    bench_backtest,
);
criterion_main!(benches);
