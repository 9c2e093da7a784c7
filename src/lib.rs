//! # BTA: BackTest & Trade Analysis
//!
//! **BTA** is a Rust library for backtesting trading strategies on candlestick (OHLC) data
//! and analyzing the resulting trade sequence. It is an offline, deterministic, single-asset
//! simulator: strategies are driven bar by bar through a small state machine, and the completed
//! trades are reduced into portfolio-level performance figures.
//!
//! ## Why BTA?
//! - **Deterministic fills**: a signal observed on one bar fills at the next bar's open, with
//!   intrabar stop-loss / profit-target checks in a fixed order.
//! - **Risk Management**: initial stops, profit targets, and ratcheting trailing stops with
//!   per-bar risk bookkeeping (R-multiples, risk percent, runup).
//! - **Technical Analysis Ready**: the engine is parametric over the bar type, so indicator
//!   columns from crates like [`ta`](https://crates.io/crates/ta) slot in through a prep hook.
//! - **Honest accounting**: fees are applied exactly once at close as a haircut on the trade's
//!   growth factor; equity compounds multiplicatively through the analyzer.
//!
//! ## Core Components
//! | Component   | Description                                                                    |
//! |-------------|--------------------------------------------------------------------------------|
//! | **`Bar`** | OHLC data for a single time period; any [`Ohlc`](crate::engine::Ohlc) type works. |
//! | **`Strategy`** | The rule contract: entry, exit, stop-loss, trailing stop, profit target, fees. |
//! | **`Position`** | The single open trade, marked to market bar by bar.                          |
//! | **`Trade`** | Immutable snapshot of a completed round trip.                                   |
//! | **`backtest`** | The engine that simulates strategy execution over historical data.           |
//! | **`analyze`** | Equity curve, drawdown, expectancy, profit factor, Sharpe ratio, and more.    |
//!
//! ## Getting Started
//! ```rust
//! use bta_rs::prelude::*;
//! use chrono::{DateTime, TimeDelta, Utc};
//!
//! struct Momentum {
//!     stop_distance: f64,
//! }
//!
//! impl Strategy for Momentum {
//!     type Bar = Bar;
//!
//!     fn entry_rule(&mut self, entry: &mut EntryHandle, ctx: EntryContext<'_, Bar>) -> Result<()> {
//!         if ctx.bar.close() > ctx.bar.open() {
//!             entry.enter_position(Direction::Long)?;
//!         }
//!         Ok(())
//!     }
//!
//!     fn stop_loss(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
//!         Some(self.stop_distance)
//!     }
//!
//!     fn fees(&self) -> f64 {
//!         0.001
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let start = DateTime::<Utc>::from_timestamp_secs(1_700_000_000).unwrap();
//!     let bars = (0..24i64)
//!         .map(|i| {
//!             let open = 100.0 + i as f64;
//!             Bar::from((start + TimeDelta::hours(i), open, open + 2.0, open - 2.0, open + 1.0))
//!         })
//!         .collect::<Vec<_>>();
//!
//!     let options = SimOptions {
//!         record_rate_of_return: true,
//!         ..SimOptions::default()
//!     };
//!     let trades = backtest(&mut Momentum { stop_distance: 5.0 }, bars, options)?;
//!
//!     let analysis = analyze(
//!         10_000.0,
//!         &trades,
//!         &AnalysisOptions {
//!             starting_date: Some(start),
//!             ..AnalysisOptions::default()
//!         },
//!     )?;
//!     println!("{analysis}");
//!     Ok(())
//! }
//! ```
//!
//! ## Exit Rules
//! | Rule                  | Description                                                          |
//! |-----------------------|----------------------------------------------------------------------|
//! | **Stop-Loss**         | Fixed distance below (above) the entry; a gap fills at the worse of stop and open. |
//! | **Profit Target**     | Fixed distance above (below) the entry; fills at the target price.   |
//! | **Trailing Stop**     | Distance from each close; only ever tightens.                        |
//! | **Exit Rule**         | Arbitrary strategy logic through an exit handle.                     |
//! | **Finalize**          | A position still open after the last bar closes at that bar's close. |
//!
//! ## Integrations
//! | Crate          | Purpose                                                       |
//! |----------------|---------------------------------------------------------------|
//! | [`chrono`](https://crates.io/crates/chrono) | Bar timestamps and timeframe arithmetic. |
//! | [`serde`](https://crates.io/crates/serde) | Serialize bars, trades, and analyses (`serde` feature). |
//! | [`ta`](https://crates.io/crates/ta) | Indicator computation inside strategies.         |
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core engine components: bars, the lookback window, positions, the
/// strategy contract, and the backtest loop.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Utility functions and helpers.
mod utils;

/// Performance analysis: equity curve, drawdown, expectancy, Sharpe ratio.
pub mod analysis;

#[cfg(feature = "serde")]
pub use utils::bars_from_file;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::analysis::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
}

use std::ops::{Div, Mul, Sub};

/// Percent arithmetic for prices and capital.
///
/// Keeps the engine's percentage bookkeeping (profit percent, risk percent,
/// equity change) on one definition.
pub trait PctExt<Rhs = Self> {
    /// Expresses `self` as a percentage of `whole`.
    ///
    /// ### Arguments
    /// * `whole` - The reference value (e.g. an entry price).
    ///
    /// ### Returns
    /// `self / whole · 100`.
    fn pct_of(self, whole: Rhs) -> Self;

    /// Calculates the percentage change from `self` to `new`.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn pct_change(self, new: Rhs) -> Self;
}

impl PctExt for f64 {
    fn pct_of(self, whole: Self) -> Self {
        self.div(whole).mul(100.0)
    }

    fn pct_change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn pct_of() {
        assert_eq!(5.0, 5.0.pct_of(100.0));
        assert_eq!(50.0, 5.0.pct_of(10.0))
    }

    #[test]
    fn pct_change() {
        assert_eq!(10.0, 100.0.pct_change(110.0));
        assert_eq!(-10.0, 100.0.pct_change(90.0))
    }
}
