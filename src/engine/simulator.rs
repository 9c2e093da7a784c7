use std::fmt;

use crate::engine::*;
use crate::errors::{Error, Result};
use crate::utils::infer_timeframe;

/// Why a position was closed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop price (initial or trailing) was breached intrabar.
    StopLoss,
    /// The profit target was reached intrabar.
    ProfitTarget,
    /// The strategy's exit rule requested the close.
    ExitRule,
    /// The bar series ended with the position still open.
    Finalize,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop-loss"),
            Self::ProfitTarget => write!(f, "profit-target"),
            Self::ExitRule => write!(f, "exit-rule"),
            Self::Finalize => write!(f, "finalize"),
        }
    }
}

// A transition set while handling one bar is acted on at the next bar, so a
// signal observed on bar N fills at bar N+1's open.
#[derive(Debug, Clone, Copy)]
enum PositionStatus {
    None,
    Enter(Direction),
    Position,
    Exit,
}

/// Runs `strategy` over `bars` and returns the completed trades in exit
/// order.
///
/// The bar series must be non-empty and hold at least
/// [`lookback_period`](Strategy::lookback_period) bars. Rules fire only once
/// the lookback window is full; an entry signalled on one bar fills at the
/// next bar's open, and a position still open after the last bar is
/// finalized at that bar's close.
///
/// ### Example
/// ```rust
/// use bta_rs::prelude::*;
/// use chrono::{DateTime, TimeDelta, Utc};
///
/// struct BuyOnce;
///
/// impl Strategy for BuyOnce {
///     type Bar = Bar;
///
///     fn entry_rule(
///         &mut self,
///         entry: &mut EntryHandle,
///         _ctx: EntryContext<'_, Bar>,
///     ) -> Result<()> {
///         entry.enter_position(Direction::Long)
///     }
/// }
///
/// let start = DateTime::<Utc>::from_timestamp_secs(1515151515).unwrap();
/// let bars = (0..4i64)
///     .map(|i| {
///         let open = 100.0 + i as f64;
///         Bar::from((start + TimeDelta::hours(i), open, open + 1.0, open - 1.0, open + 0.5))
///     })
///     .collect::<Vec<_>>();
///
/// let trades = backtest(&mut BuyOnce, bars, SimOptions::default()).unwrap();
/// assert_eq!(trades.len(), 1);
/// assert_eq!(trades[0].entry_price, 101.0);
/// ```
pub fn backtest<S: Strategy>(
    strategy: &mut S,
    bars: Vec<S::Bar>,
    options: SimOptions,
) -> Result<Vec<Trade>> {
    let simulator = Simulator {
        strategy,
        options,
        fees: 0.0,
        status: PositionStatus::None,
        open_position: None,
        exit_price: None,
        exit_reason: None,
        trades: Vec::new(),
    };
    simulator.run(bars)
}

struct Simulator<'a, S: Strategy> {
    strategy: &'a mut S,
    options: SimOptions,
    fees: f64,
    status: PositionStatus,
    open_position: Option<Position>,
    // deferred exit, committed at the next bar
    exit_price: Option<f64>,
    exit_reason: Option<ExitReason>,
    trades: Vec<Trade>,
}

impl<S: Strategy> Simulator<'_, S> {
    fn run(mut self, bars: Vec<S::Bar>) -> Result<Vec<Trade>> {
        let lookback_period = self.strategy.lookback_period();
        if lookback_period == 0 {
            return Err(Error::ZeroLookback);
        }
        if bars.is_empty() {
            return Err(Error::BarDataEmpty);
        }
        if bars.len() < lookback_period {
            return Err(Error::InsufficientBars(lookback_period, bars.len()));
        }

        let fees = self.strategy.fees();
        if !(0.0..1.0).contains(&fees) {
            return Err(Error::InvalidFees(fees));
        }
        self.fees = fees;

        let series = self.strategy.prep_indicators(bars)?;
        let first = series.first().ok_or(Error::BarDataEmpty)?;
        let last = series.last().ok_or(Error::BarDataEmpty)?;
        let timeframe = infer_timeframe(first.time(), last.time(), series.len());
        let finalize_time = last.time() + timeframe;
        let finalize_price = last.close();

        let mut lookback = Lookback::new(lookback_period);
        for bar in &series {
            lookback.push(bar.clone());
            if !lookback.is_full() {
                continue;
            }

            // dispatch on the state observed at the start of the bar
            match self.status {
                PositionStatus::None => self.check_entry(bar, &lookback)?,
                PositionStatus::Enter(direction) => self.enter_position(direction, bar, &lookback)?,
                PositionStatus::Position => self.update_position(bar, &lookback)?,
                PositionStatus::Exit => self.close_position(bar)?,
            }
        }

        if self.open_position.is_some() {
            self.finalize_open(finalize_time, finalize_price)?;
        }

        Ok(self.trades)
    }

    fn check_entry(&mut self, bar: &S::Bar, lookback: &Lookback<S::Bar>) -> Result<()> {
        let mut entry = EntryHandle::default();
        self.strategy.entry_rule(&mut entry, EntryContext { bar, lookback })?;
        if let Some(direction) = entry.take() {
            self.status = PositionStatus::Enter(direction);
        }
        Ok(())
    }

    fn enter_position(
        &mut self,
        direction: Direction,
        bar: &S::Bar,
        lookback: &Lookback<S::Bar>,
    ) -> Result<()> {
        let entry_price = bar.open();
        let mut position = Position::open(direction, bar.time(), entry_price);

        let stop_ctx = PositionContext {
            bar,
            lookback,
            position: &position,
        };
        if let Some(distance) = self.strategy.stop_loss(stop_ctx) {
            if distance < 0.0 {
                return Err(Error::NegativeStopDistance(distance));
            }
            let stop_price = match direction {
                Direction::Long => entry_price - distance,
                Direction::Short => entry_price + distance,
            };
            position.set_initial_stop(stop_price);
        }

        if self.options.record_risk {
            position.start_risk_series(bar.time());
        }
        if self.options.record_rate_of_return {
            position.start_rate_of_return_series(bar.time());
        }

        let target_ctx = PositionContext {
            bar,
            lookback,
            position: &position,
        };
        if let Some(distance) = self.strategy.profit_target(target_ctx) {
            if distance < 0.0 {
                return Err(Error::NegativeTargetDistance(distance));
            }
            let target_price = match direction {
                Direction::Long => entry_price + distance,
                Direction::Short => entry_price - distance,
            };
            position.set_profit_target(target_price);
        }

        // the position is live from here; a gap through the stop on the
        // entry bar itself exits immediately
        self.status = PositionStatus::Position;
        self.check_intrabar_exit(&position, bar, lookback)?;

        let trailing_ctx = PositionContext {
            bar,
            lookback,
            position: &position,
        };
        if let Some(distance) = self.strategy.trailing_stop_loss(trailing_ctx) {
            if distance < 0.0 {
                return Err(Error::NegativeStopDistance(distance));
            }
            let trailing_price = match direction {
                Direction::Long => bar.close() - distance,
                Direction::Short => bar.close() + distance,
            };
            position.apply_entry_trailing_stop(trailing_price);
            if self.options.record_stop_price {
                position.start_stop_price_series(bar.time());
            }
        }

        position.update_runup(bar.high(), bar.low());
        self.open_position = Some(position);
        Ok(())
    }

    fn update_position(&mut self, bar: &S::Bar, lookback: &Lookback<S::Bar>) -> Result<()> {
        let mut position = self.open_position.take().ok_or(Error::NoOpenPosition)?;

        position.mark_to_market(bar.open());
        position.record_samples(bar.time());

        self.check_intrabar_exit(&position, bar, lookback)?;

        let trailing_ctx = PositionContext {
            bar,
            lookback,
            position: &position,
        };
        if let Some(distance) = self.strategy.trailing_stop_loss(trailing_ctx) {
            if distance < 0.0 {
                return Err(Error::NegativeStopDistance(distance));
            }
            let trailing_price = match position.direction() {
                Direction::Long => bar.close() - distance,
                Direction::Short => bar.close() + distance,
            };
            position.ratchet_stop(trailing_price);
        }
        position.record_stop_price(bar.time());

        position.update_runup(bar.high(), bar.low());
        self.open_position = Some(position);
        Ok(())
    }

    /// First match wins: stop-loss, then profit target, then the strategy's
    /// exit rule.
    fn check_intrabar_exit(
        &mut self,
        position: &Position,
        bar: &S::Bar,
        lookback: &Lookback<S::Bar>,
    ) -> Result<()> {
        if let Some(stop_price) = position.cur_stop_price() {
            let triggered = match position.direction() {
                Direction::Long => bar.low() <= stop_price,
                Direction::Short => bar.high() >= stop_price,
            };
            if triggered {
                // a gap past the stop fills at the worse of stop and open
                let fill = match position.direction() {
                    Direction::Long => stop_price.min(bar.open()),
                    Direction::Short => stop_price.max(bar.open()),
                };
                self.request_exit(Some(fill), ExitReason::StopLoss);
                return Ok(());
            }
        }

        if let Some(target_price) = position.profit_target() {
            let triggered = match position.direction() {
                Direction::Long => bar.high() >= target_price,
                Direction::Short => bar.low() <= target_price,
            };
            if triggered {
                self.request_exit(Some(target_price), ExitReason::ProfitTarget);
                return Ok(());
            }
        }

        let mut exit = ExitHandle::default();
        self.strategy.exit_rule(
            &mut exit,
            PositionContext {
                bar,
                lookback,
                position,
            },
        )?;
        if let Some(price) = exit.take() {
            self.request_exit(price, ExitReason::ExitRule);
        }
        Ok(())
    }

    fn request_exit(&mut self, price: Option<f64>, reason: ExitReason) {
        self.status = PositionStatus::Exit;
        self.exit_price = price;
        self.exit_reason = Some(reason);
    }

    fn close_position(&mut self, bar: &S::Bar) -> Result<()> {
        let position = self.open_position.take().ok_or(Error::NoOpenPosition)?;
        let exit_price = self.exit_price.take().unwrap_or_else(|| bar.open());
        let exit_reason = self.exit_reason.take().unwrap_or(ExitReason::ExitRule);

        let trade = position.finalize(bar.time(), exit_price, exit_reason, self.fees);
        self.trades.push(trade);
        self.status = PositionStatus::None;
        Ok(())
    }

    fn finalize_open(&mut self, exit_time: chrono::DateTime<chrono::Utc>, exit_price: f64) -> Result<()> {
        let position = self.open_position.take().ok_or(Error::NoOpenPosition)?;
        let trade = position.finalize(exit_time, exit_price, ExitReason::Finalize, self.fees);
        self.trades.push(trade);
        self.status = PositionStatus::None;
        self.exit_price = None;
        self.exit_reason = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Utc};
    use ta::Next;
    use ta::indicators::SimpleMovingAverage;

    fn bar(secs: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let time = DateTime::from_timestamp_secs(secs).unwrap();
        Bar::from((time, open, high, low, close))
    }

    struct AlwaysLong {
        fees: f64,
    }

    impl Strategy for AlwaysLong {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Long)
        }

        fn fees(&self) -> f64 {
            self.fees
        }
    }

    struct StopLong {
        stop_distance: f64,
    }

    impl Strategy for StopLong {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Long)
        }

        fn stop_loss(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
            Some(self.stop_distance)
        }
    }

    struct TargetLong {
        target_distance: f64,
    }

    impl Strategy for TargetLong {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Long)
        }

        fn profit_target(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
            Some(self.target_distance)
        }
    }

    struct TargetShort {
        target_distance: f64,
    }

    impl Strategy for TargetShort {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Short)
        }

        fn profit_target(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
            Some(self.target_distance)
        }
    }

    struct TrailingLong {
        trailing_distance: f64,
    }

    impl Strategy for TrailingLong {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Long)
        }

        fn trailing_stop_loss(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
            Some(self.trailing_distance)
        }
    }

    struct ManagedLong {
        stop_distance: f64,
        trailing_distance: f64,
    }

    impl Strategy for ManagedLong {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Long)
        }

        fn stop_loss(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
            Some(self.stop_distance)
        }

        fn trailing_stop_loss(&mut self, _ctx: PositionContext<'_, Bar>) -> Option<f64> {
            Some(self.trailing_distance)
        }
    }

    struct NeverEnter;

    impl Strategy for NeverEnter {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            _entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct HoldBars {
        bars_to_hold: usize,
        exit_price: Option<f64>,
    }

    impl Strategy for HoldBars {
        type Bar = Bar;

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            _ctx: EntryContext<'_, Bar>,
        ) -> Result<()> {
            entry.enter_position(Direction::Long)
        }

        fn exit_rule(
            &mut self,
            exit: &mut ExitHandle,
            ctx: PositionContext<'_, Bar>,
        ) -> Result<()> {
            if ctx.position.holding_period() >= self.bars_to_hold {
                exit.exit_position(self.exit_price)?;
            }
            Ok(())
        }
    }

    fn s1_bars() -> Vec<Bar> {
        vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(3600, 110.0, 111.0, 109.0, 110.0),
            bar(7200, 120.0, 121.0, 119.0, 120.0),
        ]
    }

    #[test]
    fn always_in_long_finalizes_at_last_close() {
        let mut strategy = AlwaysLong { fees: 0.0 };
        let trades = backtest(&mut strategy, s1_bars(), SimOptions::default()).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        // the signal on bar 0 fills on bar 1's open
        assert_eq!(trade.entry_time, DateTime::from_timestamp_secs(3600).unwrap());
        assert_eq!(trade.entry_price, 110.0);
        assert_eq!(trade.exit_price, 120.0);
        assert_eq!(trade.exit_reason, ExitReason::Finalize);
        assert!((trade.growth - 120.0 / 110.0).abs() < 1e-9);
        assert_eq!(trade.holding_period, 2);
        // timeframe inferred as (7200 - 0) / 3 bars = 2400 s
        assert_eq!(trade.exit_time, DateTime::from_timestamp_secs(9600).unwrap());
        assert!(trade.exit_time > trade.entry_time);
    }

    #[test]
    fn stop_out_on_gap_down_fills_at_open() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 100.0, 105.0, 99.0, 104.0),
            bar(120, 90.0, 92.0, 88.0, 91.0),
            bar(180, 91.0, 95.0, 90.0, 94.0),
        ];
        let mut strategy = StopLong { stop_distance: 5.0 };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        // fill is the worse of stop (95) and the gapped open (90)
        assert_eq!(trade.exit_price, 90.0);
        assert_eq!(trade.exit_time, DateTime::from_timestamp_secs(180).unwrap());
        assert_eq!(trade.stop_price, Some(95.0));
        assert_eq!(trade.risk_pct, Some(5.0));
        assert_eq!(trade.rmultiple, Some(-2.0));
    }

    #[test]
    fn stop_out_without_gap_caps_loss_at_one_r() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 100.0, 105.0, 99.0, 104.0),
            bar(120, 98.0, 99.0, 94.0, 96.0),
            bar(180, 95.0, 96.0, 94.0, 95.0),
        ];
        let mut strategy = StopLong { stop_distance: 5.0 };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, 95.0);
        assert!(trade.rmultiple.unwrap() >= -1.0 - 1e-12);
    }

    #[test]
    fn same_bar_stop_out_after_entry() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 100.0, 101.0, 94.0, 95.0),
            bar(120, 95.0, 96.0, 94.0, 95.0),
        ];
        let mut strategy = StopLong { stop_distance: 5.0 };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, 95.0);
        assert_eq!(trade.holding_period, 1);
    }

    #[test]
    fn profit_target_fills_at_target_intrabar() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 100.0, 105.0, 99.0, 104.0),
            bar(120, 105.0, 115.0, 104.0, 112.0),
            bar(180, 112.0, 113.0, 111.0, 112.0),
        ];
        let mut strategy = TargetLong {
            target_distance: 10.0,
        };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.exit_reason, ExitReason::ProfitTarget);
        assert_eq!(trade.exit_price, 110.0);
        assert_eq!(trade.profit_target, Some(110.0));
        assert!((trade.growth - 1.1).abs() < 1e-12);
    }

    #[test]
    fn short_profit_target_uses_reflected_growth() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 100.0, 101.0, 96.0, 97.0),
            bar(120, 95.0, 96.0, 88.0, 90.0),
            bar(180, 90.0, 91.0, 89.0, 90.0),
        ];
        let mut strategy = TargetShort {
            target_distance: 10.0,
        };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.direction, Direction::Short);
        assert_eq!(trade.exit_reason, ExitReason::ProfitTarget);
        assert_eq!(trade.exit_price, 90.0);
        assert_eq!(trade.profit, 10.0);
        // (2 * 100 - 90) / 100
        assert!((trade.growth - 1.1).abs() < 1e-12);
    }

    #[test]
    fn trailing_stop_ratchets_and_never_loosens() {
        let bars = vec![
            bar(0, 99.0, 100.0, 98.0, 99.0),
            bar(60, 100.0, 103.0, 99.0, 102.0),
            bar(120, 103.0, 109.0, 102.0, 108.0),
            bar(180, 107.0, 108.0, 104.0, 106.0),
        ];
        let mut strategy = TrailingLong {
            trailing_distance: 5.0,
        };
        let options = SimOptions {
            record_stop_price: true,
            ..SimOptions::default()
        };
        let trades = backtest(&mut strategy, bars, options).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.exit_reason, ExitReason::Finalize);

        let stops = trade
            .stop_price_series
            .as_ref()
            .unwrap()
            .iter()
            .map(|sample| sample.value())
            .collect::<Vec<_>>();
        // 102 - 5, then 108 - 5, then held at 103 when the close slips back
        assert_eq!(stops, vec![97.0, 103.0, 103.0]);
        assert_eq!(stops.len(), trade.holding_period);
    }

    #[test]
    fn recorded_series_lengths_match_holding_period() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 100.0, 102.0, 99.0, 101.0),
            bar(120, 101.0, 103.0, 100.0, 102.0),
            bar(180, 102.0, 104.0, 101.0, 103.0),
            bar(240, 103.0, 105.0, 102.0, 104.0),
        ];
        let mut strategy = ManagedLong {
            stop_distance: 10.0,
            trailing_distance: 8.0,
        };
        let options = SimOptions {
            record_stop_price: true,
            record_risk: true,
            record_rate_of_return: true,
        };
        let trades = backtest(&mut strategy, bars, options).unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.holding_period, 4);
        assert_eq!(trade.risk_series.as_ref().unwrap().len(), trade.holding_period);
        assert_eq!(
            trade.stop_price_series.as_ref().unwrap().len(),
            trade.holding_period
        );
        assert_eq!(
            trade.rate_of_return_series.as_ref().unwrap().len(),
            trade.holding_period + 1
        );

        // per-bar growth steps compound back to the trade's growth
        let compounded = trade
            .rate_of_return_series
            .as_ref()
            .unwrap()
            .iter()
            .fold(1.0, |acc, sample| acc * (1.0 + sample.value()));
        assert!((compounded - trade.growth).abs() < 1e-9);
    }

    #[test]
    fn exit_rule_closes_at_next_open_by_default() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 101.0, 102.0, 100.0, 101.0),
            bar(120, 102.0, 103.0, 101.0, 102.0),
            bar(180, 103.0, 104.0, 102.0, 103.0),
            bar(240, 104.0, 105.0, 103.0, 104.0),
        ];
        let mut strategy = HoldBars {
            bars_to_hold: 1,
            exit_price: None,
        };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert!(!trades.is_empty());
        let trade = &trades[0];
        assert_eq!(trade.exit_reason, ExitReason::ExitRule);
        assert_eq!(trade.entry_price, 101.0);
        // requested on the first update, committed at the next bar's open
        assert_eq!(trade.exit_price, 103.0);
    }

    #[test]
    fn exit_rule_honors_requested_price() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 101.0, 102.0, 100.0, 101.0),
            bar(120, 102.0, 103.0, 101.0, 102.0),
            bar(180, 103.0, 104.0, 102.0, 103.0),
        ];
        let mut strategy = HoldBars {
            bars_to_hold: 1,
            exit_price: Some(102.5),
        };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert_eq!(trades[0].exit_price, 102.5);
        assert_eq!(trades[0].exit_reason, ExitReason::ExitRule);
    }

    #[test]
    fn never_entering_yields_no_trades() {
        let trades = backtest(&mut NeverEnter, s1_bars(), SimOptions::default()).unwrap();
        assert!(trades.is_empty());
    }

    #[test]
    fn fees_scale_growth_exactly() {
        let free = backtest(
            &mut AlwaysLong { fees: 0.0 },
            s1_bars(),
            SimOptions::default(),
        )
        .unwrap();
        let paid = backtest(
            &mut AlwaysLong { fees: 0.01 },
            s1_bars(),
            SimOptions::default(),
        )
        .unwrap();

        assert_eq!(free.len(), paid.len());
        for (a, b) in free.iter().zip(&paid) {
            assert!((b.growth - a.growth * 0.99).abs() < 1e-12);
        }
    }

    #[test]
    fn lookback_must_fill_before_rules_fire() {
        struct Recorder {
            seen: Vec<DateTime<Utc>>,
        }

        impl Strategy for Recorder {
            type Bar = Bar;

            fn lookback_period(&self) -> usize {
                3
            }

            fn entry_rule(
                &mut self,
                _entry: &mut EntryHandle,
                ctx: EntryContext<'_, Bar>,
            ) -> Result<()> {
                assert!(ctx.lookback.is_full());
                assert_eq!(ctx.lookback.latest().map(|bar| bar.time()), Some(ctx.bar.time()));
                self.seen.push(ctx.bar.time());
                Ok(())
            }
        }

        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(60, 101.0, 102.0, 100.0, 101.0),
            bar(120, 102.0, 103.0, 101.0, 102.0),
            bar(180, 103.0, 104.0, 102.0, 103.0),
        ];
        let mut strategy = Recorder { seen: Vec::new() };
        backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        // the first two bars only fill the window
        assert_eq!(
            strategy.seen,
            vec![
                DateTime::from_timestamp_secs(120).unwrap(),
                DateTime::from_timestamp_secs(180).unwrap(),
            ]
        );
    }

    #[test]
    fn reentry_after_close() {
        struct QuickFlip;

        impl Strategy for QuickFlip {
            type Bar = Bar;

            fn entry_rule(
                &mut self,
                entry: &mut EntryHandle,
                _ctx: EntryContext<'_, Bar>,
            ) -> Result<()> {
                entry.enter_position(Direction::Long)
            }

            fn exit_rule(
                &mut self,
                exit: &mut ExitHandle,
                _ctx: PositionContext<'_, Bar>,
            ) -> Result<()> {
                exit.exit_position(None)
            }
        }

        let bars = (0..10)
            .map(|i| {
                let open = 100.0 + i as f64;
                bar(i * 60, open, open + 1.0, open - 1.0, open + 0.5)
            })
            .collect::<Vec<_>>();
        let trades = backtest(&mut QuickFlip, bars, SimOptions::default()).unwrap();

        // enter, exit on the entry bar's check, close, re-enter: a trade
        // every three bars
        assert!(trades.len() >= 2);
        for pair in trades.windows(2) {
            assert!(pair[1].entry_time >= pair[0].exit_time);
        }
        for trade in &trades {
            assert!(trade.exit_time > trade.entry_time);
            assert!(trade.holding_period >= 1);
        }
    }

    #[test]
    fn rejects_invalid_input() {
        let result = backtest(&mut NeverEnter, Vec::new(), SimOptions::default());
        assert!(matches!(result, Err(Error::BarDataEmpty)));

        struct DeepLookback;
        impl Strategy for DeepLookback {
            type Bar = Bar;

            fn lookback_period(&self) -> usize {
                30
            }

            fn entry_rule(
                &mut self,
                _entry: &mut EntryHandle,
                _ctx: EntryContext<'_, Bar>,
            ) -> Result<()> {
                Ok(())
            }
        }
        let result = backtest(&mut DeepLookback, s1_bars(), SimOptions::default());
        assert!(matches!(result, Err(Error::InsufficientBars(30, 3))));

        struct NoLookback;
        impl Strategy for NoLookback {
            type Bar = Bar;

            fn lookback_period(&self) -> usize {
                0
            }

            fn entry_rule(
                &mut self,
                _entry: &mut EntryHandle,
                _ctx: EntryContext<'_, Bar>,
            ) -> Result<()> {
                Ok(())
            }
        }
        let result = backtest(&mut NoLookback, s1_bars(), SimOptions::default());
        assert!(matches!(result, Err(Error::ZeroLookback)));

        let result = backtest(&mut AlwaysLong { fees: 1.5 }, s1_bars(), SimOptions::default());
        assert!(matches!(result, Err(Error::InvalidFees(_))));
    }

    #[test]
    fn double_entry_request_is_an_invariant_violation() {
        struct DoubleEntry;

        impl Strategy for DoubleEntry {
            type Bar = Bar;

            fn entry_rule(
                &mut self,
                entry: &mut EntryHandle,
                _ctx: EntryContext<'_, Bar>,
            ) -> Result<()> {
                entry.enter_position(Direction::Long)?;
                entry.enter_position(Direction::Long)
            }
        }

        let result = backtest(&mut DoubleEntry, s1_bars(), SimOptions::default());
        assert!(matches!(result, Err(Error::EntryAlreadyRequested)));
    }

    #[derive(Debug, Clone, Copy)]
    struct SmaBar {
        bar: Bar,
        sma: f64,
    }

    impl Ohlc for SmaBar {
        fn time(&self) -> DateTime<Utc> {
            self.bar.time()
        }

        fn open(&self) -> f64 {
            self.bar.open()
        }

        fn high(&self) -> f64 {
            self.bar.high()
        }

        fn low(&self) -> f64 {
            self.bar.low()
        }

        fn close(&self) -> f64 {
            self.bar.close()
        }
    }

    struct SmaCross {
        sma: SimpleMovingAverage,
    }

    impl Strategy for SmaCross {
        type Bar = SmaBar;

        fn lookback_period(&self) -> usize {
            2
        }

        fn prep_indicators(&mut self, input: Vec<SmaBar>) -> Result<Vec<SmaBar>> {
            Ok(input
                .into_iter()
                .map(|mut indicator_bar| {
                    indicator_bar.sma = self.sma.next(indicator_bar.bar.close());
                    indicator_bar
                })
                .collect())
        }

        fn entry_rule(
            &mut self,
            entry: &mut EntryHandle,
            ctx: EntryContext<'_, SmaBar>,
        ) -> Result<()> {
            if ctx.bar.close() > ctx.bar.sma {
                entry.enter_position(Direction::Long)?;
            }
            Ok(())
        }

        fn exit_rule(
            &mut self,
            exit: &mut ExitHandle,
            ctx: PositionContext<'_, SmaBar>,
        ) -> Result<()> {
            if ctx.bar.close() < ctx.bar.sma {
                exit.exit_position(None)?;
            }
            Ok(())
        }
    }

    #[test]
    fn sma_cross_over_indicator_bars() {
        let closes: [f64; 12] = [
            100.0, 102.0, 104.0, 106.0, 108.0, 106.0, 101.0, 96.0, 95.0, 100.0, 105.0, 110.0,
        ];
        let mut previous = closes[0];
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = previous;
                previous = close;
                let high = open.max(close) + 1.0;
                let low = open.min(close) - 1.0;
                SmaBar {
                    bar: bar(i as i64 * 3600, open, high, low, close),
                    sma: 0.0,
                }
            })
            .collect::<Vec<_>>();

        let mut strategy = SmaCross {
            sma: SimpleMovingAverage::new(4).unwrap(),
        };
        let trades = backtest(&mut strategy, bars, SimOptions::default()).unwrap();

        assert!(!trades.is_empty());
        for trade in &trades {
            assert!(trade.exit_time > trade.entry_time);
            assert!(trade.holding_period >= 1);
        }
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::StopLoss.to_string(), "stop-loss");
        assert_eq!(ExitReason::ProfitTarget.to_string(), "profit-target");
        assert_eq!(ExitReason::ExitRule.to_string(), "exit-rule");
        assert_eq!(ExitReason::Finalize.to_string(), "finalize");
    }
}
