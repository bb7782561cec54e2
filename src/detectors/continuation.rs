//! Continuation pattern detectors
//!
//! The three-phase family (UPU, DPD, UPD, DPU) splits the window into thirds:
//! a directional leg, a tight pause and a breakout. Flags and pennants look
//! for a pole in the first half of the window and a shallow counter-move in
//! the second half.

use super::helpers::{
    highest, lowest, window, CONSOLIDATION_MAX_RANGE, FLAG_MAX_RETRACE, PHASE_MIN_MOVE,
    POLE_MIN_MOVE, STOP_BUFFER,
};
use super::PatternDetector;
use crate::{Direction, PatternDetection, PatternType, Result, Zone, OHLCV};

impl_with_defaults!(
    UpuDetector,
    DpdDetector,
    UpdDetector,
    DpuDetector,
    BullFlagDetector,
    BearFlagDetector,
    BullPennantDetector,
    BearPennantDetector,
);

/// Pennants retrace less than flags
pub const PENNANT_MAX_RETRACE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Up,
    Down,
}

impl Leg {
    fn direction(self) -> Direction {
        match self {
            Leg::Up => Direction::Bullish,
            Leg::Down => Direction::Bearish,
        }
    }
}

// ============================================================
// THREE-PHASE (UPU / DPD / UPD / DPU)
// ============================================================

#[derive(Debug)]
struct ThreePhase {
    move_pct: f64,
    move_price: f64,
    cons_high: f64,
    cons_low: f64,
    cons_range: f64,
    breakout: usize,
}

#[allow(clippy::too_many_arguments)]
fn three_phase<T: OHLCV>(
    candles: &[T],
    start: usize,
    lookback: usize,
    min_move: f64,
    max_range: f64,
    first: Leg,
    last: Leg,
) -> Option<ThreePhase> {
    let third = lookback / 3;
    if third == 0 {
        return None;
    }
    let len = candles.len();
    let (p2, p3) = (start + third, start + 2 * third);

    let open = candles[start].open();
    let move_price = candles[p2 - 1].close() - open;
    let move_pct = move_price / open;
    let leg_ok = match first {
        Leg::Up => move_pct >= min_move,
        Leg::Down => move_pct <= -min_move,
    };
    if !leg_ok {
        return None;
    }

    let (_, cons_high) = highest(candles, p2, p3)?;
    let (_, cons_low) = lowest(candles, p2, p3)?;
    let cons_range = (cons_high - cons_low) / cons_low;
    if cons_range > max_range {
        return None;
    }

    let close = candles[len - 1].close();
    let breakout = match last {
        Leg::Up if close > cons_high => (p3..len).find(|&i| candles[i].close() > cons_high)?,
        Leg::Down if close < cons_low => (p3..len).find(|&i| candles[i].close() < cons_low)?,
        _ => return None,
    };

    Some(ThreePhase {
        move_pct,
        move_price: move_price.abs(),
        cons_high,
        cons_low,
        cons_range,
        breakout,
    })
}

fn three_phase_detection<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    start: usize,
    tp: &ThreePhase,
    last: Leg,
    max_range: f64,
) -> PatternDetection {
    let entry = candles[candles.len() - 1].close();
    let confidence = 0.5
        + 0.25 * (tp.move_pct.abs() / 0.05).clamp(0.0, 1.0)
        + 0.25 * (1.0 - (tp.cons_range / max_range).clamp(0.0, 1.0));

    let (stop, target, zone) = match last {
        Leg::Up => (
            tp.cons_low * (1.0 - STOP_BUFFER),
            entry + tp.move_price,
            Zone::support(tp.cons_high),
        ),
        Leg::Down => (
            tp.cons_high * (1.0 + STOP_BUFFER),
            entry - tp.move_price,
            Zone::resistance(tp.cons_low),
        ),
    };

    PatternDetection::new(
        pattern,
        last.direction(),
        confidence,
        start,
        tp.breakout,
        entry,
        stop,
        target,
    )
    .with_zone(zone)
    .with_data("phase1_move", tp.move_price)
    .with_data("phase1_move_pct", tp.move_pct * 100.0)
    .with_data("consolidation_high", tp.cons_high)
    .with_data("consolidation_low", tp.cons_low)
}

macro_rules! three_phase_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $first:expr, $last:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            pub min_move: f64,
            pub max_consolidation: f64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: 30,
                    min_move: PHASE_MIN_MOVE,
                    max_consolidation: CONSOLIDATION_MAX_RANGE,
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
                Ok(three_phase(
                    candles,
                    start,
                    self.lookback,
                    self.min_move,
                    self.max_consolidation,
                    $first,
                    $last,
                )
                .map(|tp| {
                    three_phase_detection(candles, self.pattern(), start, &tp, $last, self.max_consolidation)
                }))
            }
        }
    };
}

three_phase_detector!(
    /// Up-Pause-Up: rally, tight range, breakout above the range
    UpuDetector,
    PatternType::Upu,
    Leg::Up,
    Leg::Up
);
three_phase_detector!(
    /// Down-Pause-Down
    DpdDetector,
    PatternType::Dpd,
    Leg::Down,
    Leg::Down
);
three_phase_detector!(
    /// Up-Pause-Down: the rally stalls and the range breaks lower
    UpdDetector,
    PatternType::Upd,
    Leg::Up,
    Leg::Down
);
three_phase_detector!(
    /// Down-Pause-Up
    DpuDetector,
    PatternType::Dpu,
    Leg::Down,
    Leg::Up
);

// ============================================================
// FLAGS AND PENNANTS
// ============================================================

#[derive(Debug)]
struct Flag {
    pole: f64,
    pole_pct: f64,
    flag_high: f64,
    flag_low: f64,
    retrace: f64,
    breakout: usize,
}

/// Pole over the first half of the window, flag over the second half up to
/// the current candle. The flag may give back at most `max_retrace` of the
/// pole and the current close must clear the flag's extreme.
fn flag<T: OHLCV>(
    candles: &[T],
    start: usize,
    lookback: usize,
    min_pole: f64,
    max_retrace: f64,
    leg: Leg,
    pennant: bool,
) -> Option<Flag> {
    let last = candles.len() - 1;
    let flag_start = start + lookback / 2;
    if flag_start >= last {
        return None;
    }
    let base = candles[start].open();

    let (_, tip) = match leg {
        Leg::Up => highest(candles, start, flag_start)?,
        Leg::Down => lowest(candles, start, flag_start)?,
    };
    let pole = (tip - base).abs();
    let pole_pct = pole / base;
    let pole_ok = match leg {
        Leg::Up => tip > base,
        Leg::Down => tip < base,
    };
    if !pole_ok || pole_pct < min_pole {
        return None;
    }

    let (_, hi) = highest(candles, flag_start, last)?;
    let (_, lo) = lowest(candles, flag_start, last)?;
    let retrace = match leg {
        Leg::Up => (tip - lo) / pole,
        Leg::Down => (hi - tip) / pole,
    }
    .max(0.0);
    if retrace > max_retrace {
        return None;
    }

    let close = candles[last].close();
    let broke = match leg {
        Leg::Up => close > hi,
        Leg::Down => close < lo,
    };
    if !broke {
        return None;
    }

    if pennant && !is_contracting(candles, flag_start, last) {
        return None;
    }

    Some(Flag {
        pole,
        pole_pct,
        flag_high: hi,
        flag_low: lo,
        retrace,
        breakout: last,
    })
}

/// Second half of `[from, to)` sits inside the first half with a smaller range
fn is_contracting<T: OHLCV>(candles: &[T], from: usize, to: usize) -> bool {
    if to < from + 6 {
        return false;
    }
    let mid = from + (to - from) / 2;
    let (Some((_, h1)), Some((_, l1)), Some((_, h2)), Some((_, l2))) = (
        highest(candles, from, mid),
        lowest(candles, from, mid),
        highest(candles, mid, to),
        lowest(candles, mid, to),
    ) else {
        return false;
    };
    h2 <= h1 && l2 >= l1 && (h2 - l2) < (h1 - l1)
}

fn flag_detection<T: OHLCV>(
    candles: &[T],
    pattern: PatternType,
    start: usize,
    f: &Flag,
    leg: Leg,
    min_pole: f64,
    max_retrace: f64,
) -> PatternDetection {
    let entry = candles[candles.len() - 1].close();
    let confidence = 0.5
        + 0.25 * (f.pole_pct / (2.0 * min_pole)).clamp(0.0, 1.0)
        + 0.25 * (1.0 - (f.retrace / max_retrace).clamp(0.0, 1.0));

    let (stop, target, zone) = match leg {
        Leg::Up => (
            f.flag_low * (1.0 - STOP_BUFFER),
            entry + f.pole,
            Zone::support(f.flag_high),
        ),
        Leg::Down => (
            f.flag_high * (1.0 + STOP_BUFFER),
            entry - f.pole,
            Zone::resistance(f.flag_low),
        ),
    };

    PatternDetection::new(
        pattern,
        leg.direction(),
        confidence,
        start,
        f.breakout,
        entry,
        stop,
        target,
    )
    .with_zone(zone)
    .with_data("pole", f.pole)
    .with_data("pole_pct", f.pole_pct * 100.0)
    .with_data("retrace", f.retrace)
    .with_data("flag_high", f.flag_high)
    .with_data("flag_low", f.flag_low)
}

macro_rules! flag_detector {
    ($(#[$doc:meta])* $name:ident, $pattern:expr, $leg:expr, $retrace:expr, $pennant:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub lookback: usize,
            pub min_pole: f64,
            pub max_retrace: f64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    lookback: 30,
                    min_pole: POLE_MIN_MOVE,
                    max_retrace: $retrace,
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
                Ok(flag(
                    candles,
                    start,
                    self.lookback,
                    self.min_pole,
                    self.max_retrace,
                    $leg,
                    $pennant,
                )
                .map(|f| {
                    flag_detection(
                        candles,
                        self.pattern(),
                        start,
                        &f,
                        $leg,
                        self.min_pole,
                        self.max_retrace,
                    )
                }))
            }
        }
    };
}

flag_detector!(
    /// Pole of 5%+ then a pullback of at most 61.8% and a close above the flag
    BullFlagDetector,
    PatternType::BullFlag,
    Leg::Up,
    FLAG_MAX_RETRACE,
    false
);
flag_detector!(
    BearFlagDetector,
    PatternType::BearFlag,
    Leg::Down,
    FLAG_MAX_RETRACE,
    false
);
flag_detector!(
    /// Like a bull flag, but the pause narrows
    BullPennantDetector,
    PatternType::BullPennant,
    Leg::Up,
    PENNANT_MAX_RETRACE,
    true
);
flag_detector!(
    BearPennantDetector,
    PatternType::BearPennant,
    Leg::Down,
    PENNANT_MAX_RETRACE,
    true
);
