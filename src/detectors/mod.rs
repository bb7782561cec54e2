//! Chart pattern detectors
//!
//! Every detector is a pure geometric test over the trailing `lookback`
//! candles. It returns at most one [`PatternDetection`] per call and never
//! looks at indicators or features; those are attached later by the engine.
//!
//! # Pattern Categories
//!
//! - **Reversal (6)**: Double/Triple Top and Bottom, Head & Shoulders, Inverse H&S
//! - **Continuation (8)**: UPU, DPD, UPD, DPU, Bull/Bear Flag, Bull/Bear Pennant
//! - **Structure (6)**: Ascending/Descending/Symmetrical Triangle, Rising/Falling
//!   Wedge, Cup and Handle
//! - **Zones (4)**: HFZ, LFZ, Support Bounce, Resistance Rejection

use crate::{PatternDetection, PatternType, Period, Result, OHLCV};

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod continuation;
pub mod reversal;
pub mod structure;
pub mod zones;

pub use continuation::*;
pub use helpers::*;
pub use reversal::*;
pub use structure::*;
pub use zones::*;

/// Geometric pattern detector
pub trait PatternDetector: Send + Sync {
    fn pattern(&self) -> PatternType;

    /// Number of trailing candles the detector inspects
    fn lookback(&self) -> usize;

    /// Test the trailing window of `candles`.
    ///
    /// `Ok(None)` means the geometry is not there. `Err` is reserved for
    /// windows that cannot be evaluated at all.
    fn detect<T: OHLCV>(&self, candles: &[T]) -> Result<Option<PatternDetection>>;

    /// Minimum window is 5 candles so a ±2 pivot fits
    fn validate_config(&self) -> Result<()> {
        let lookback = Period::new(self.lookback())?;
        if lookback.get() < 5 {
            return Err(crate::Error::OutOfRange {
                field: "lookback",
                value: lookback.get() as f64,
                min: 5.0,
                max: f64::INFINITY,
            });
        }
        Ok(())
    }
}
