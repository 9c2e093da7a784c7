use crate::engine::{Direction, Lookback, Ohlc, Position};
use crate::errors::{Error, Result};

/// Per-bar sampling switches for the simulator.
///
/// Each flag gates one optional series recorded on the open position and
/// carried onto the resulting [`Trade`](crate::engine::Trade). All default
/// to off; recording costs one sample per bar held.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default)]
pub struct SimOptions {
    /// Record the stop price bar by bar (requires a trailing stop to be
    /// meaningful).
    pub record_stop_price: bool,
    /// Record the risk percentage bar by bar.
    pub record_risk: bool,
    /// Record the per-bar rate of return; needed for the analyzer's Sharpe
    /// reconstruction.
    pub record_rate_of_return: bool,
}

/// Read-only view handed to [`Strategy::entry_rule`] while no position is
/// open.
pub struct EntryContext<'a, B> {
    /// The current bar.
    pub bar: &'a B,
    /// The lookback window, oldest bar first.
    pub lookback: &'a Lookback<B>,
}

/// Read-only view handed to the in-position callbacks (`exit_rule`,
/// `stop_loss`, `trailing_stop_loss`, `profit_target`).
pub struct PositionContext<'a, B> {
    /// The current bar.
    pub bar: &'a B,
    /// The lookback window, oldest bar first.
    pub lookback: &'a Lookback<B>,
    /// The open position.
    pub position: &'a Position,
}

impl<B> PositionContext<'_, B> {
    /// Shorthand for the open position's entry price.
    pub fn entry_price(&self) -> f64 {
        self.position.entry_price()
    }
}

/// Entry intent recorder passed to [`Strategy::entry_rule`].
///
/// Calling [`enter_position`](Self::enter_position) does not open anything
/// by itself: it records an intent the main loop commits at the next bar's
/// open. Requesting entry twice within one bar is an invariant violation.
#[derive(Debug, Default)]
pub struct EntryHandle {
    requested: Option<Direction>,
}

impl EntryHandle {
    /// Requests a position in the given direction, filled at the next bar's
    /// open.
    pub fn enter_position(&mut self, direction: Direction) -> Result<()> {
        if self.requested.is_some() {
            return Err(Error::EntryAlreadyRequested);
        }
        self.requested = Some(direction);
        Ok(())
    }

    pub(crate) fn take(&mut self) -> Option<Direction> {
        self.requested.take()
    }
}

/// Exit intent recorder passed to [`Strategy::exit_rule`].
///
/// Calling [`exit_position`](Self::exit_position) records an intent the main
/// loop commits at the next bar; without an explicit price the position
/// closes at that bar's open. Requesting exit twice within one bar is an
/// invariant violation.
#[derive(Debug, Default)]
pub struct ExitHandle {
    requested: bool,
    price: Option<f64>,
}

impl ExitHandle {
    /// Requests the open position be closed, optionally at a given price.
    pub fn exit_position(&mut self, price: Option<f64>) -> Result<()> {
        if self.requested {
            return Err(Error::ExitAlreadyRequested);
        }
        self.requested = true;
        self.price = price;
        Ok(())
    }

    pub(crate) fn take(&mut self) -> Option<Option<f64>> {
        if self.requested {
            self.requested = false;
            Some(self.price.take())
        } else {
            None
        }
    }
}

/// A trading strategy driven bar by bar through [`backtest`].
///
/// Only [`entry_rule`](Self::entry_rule) is required; every other member has
/// a neutral default, mirroring an all-optional strategy record. The
/// strategy value itself carries its parameters, and every callback takes
/// `&mut self`, so streaming indicator state (e.g. from the `ta` crate)
/// lives directly in the strategy.
///
/// [`backtest`]: crate::engine::backtest
pub trait Strategy {
    /// The bar type all rules see, post-[`prep_indicators`](Self::prep_indicators).
    type Bar: Ohlc + Clone;

    /// Number of bars the lookback window must hold before any rule fires.
    fn lookback_period(&self) -> usize {
        1
    }

    /// Optional pre-pass over the input series (e.g. to fill indicator
    /// columns). Defaults to the identity.
    fn prep_indicators(&mut self, input: Vec<Self::Bar>) -> Result<Vec<Self::Bar>> {
        Ok(input)
    }

    /// Called on every bar while no position is open; may request entry
    /// through the handle.
    fn entry_rule(&mut self, entry: &mut EntryHandle, ctx: EntryContext<'_, Self::Bar>)
    -> Result<()>;

    /// Called on every bar while a position is open; may request exit
    /// through the handle.
    fn exit_rule(
        &mut self,
        _exit: &mut ExitHandle,
        _ctx: PositionContext<'_, Self::Bar>,
    ) -> Result<()> {
        Ok(())
    }

    /// Initial stop distance from the entry price, or `None` for no stop.
    fn stop_loss(&mut self, _ctx: PositionContext<'_, Self::Bar>) -> Option<f64> {
        None
    }

    /// Trailing stop distance from the current close, or `None` for no
    /// trailing stop. Re-evaluated on every bar the position is held.
    fn trailing_stop_loss(&mut self, _ctx: PositionContext<'_, Self::Bar>) -> Option<f64> {
        None
    }

    /// Profit-target distance from the entry price, or `None` for no
    /// target.
    fn profit_target(&mut self, _ctx: PositionContext<'_, Self::Bar>) -> Option<f64> {
        None
    }

    /// Round-trip fee fraction (maker + taker), applied once at close.
    fn fees(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
#[test]
fn entry_handle_rejects_double_request() {
    let mut entry = EntryHandle::default();
    entry.enter_position(Direction::Long).unwrap();

    let result = entry.enter_position(Direction::Short);
    assert!(matches!(result, Err(Error::EntryAlreadyRequested)));

    assert_eq!(entry.take(), Some(Direction::Long));
    assert_eq!(entry.take(), None);
}

#[cfg(test)]
#[test]
fn exit_handle_rejects_double_request() {
    let mut exit = ExitHandle::default();
    exit.exit_position(Some(101.5)).unwrap();

    let result = exit.exit_position(None);
    assert!(matches!(result, Err(Error::ExitAlreadyRequested)));

    assert_eq!(exit.take(), Some(Some(101.5)));
    assert_eq!(exit.take(), None);
}
