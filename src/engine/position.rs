use std::fmt;

use chrono::{DateTime, Utc};

use crate::PctExt;
use crate::engine::ExitReason;

/// Side of a position (long or short).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A long position, profiting when the price rises.
    Long,
    /// A short position, profiting when the price falls.
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// A single `{time, value}` observation of a per-bar series.
///
/// Used for the optional risk, stop-price, and rate-of-return series a
/// position can record while it is open.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    time: DateTime<Utc>,
    value: f64,
}

impl From<(DateTime<Utc>, f64)> for Sample {
    fn from((time, value): (DateTime<Utc>, f64)) -> Self {
        Self { time, value }
    }
}

impl Sample {
    /// The instant the value was observed.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// The observed value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// An open position, marked to market bar by bar.
///
/// At most one position exists at a time. The simulator owns it exclusively;
/// strategy callbacks see it by reference through
/// [`PositionContext`](crate::engine::PositionContext).
#[derive(Debug, Clone)]
pub struct Position {
    direction: Direction,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    growth: f64,
    profit: f64,
    profit_pct: f64,
    holding_period: usize,
    cur_rate_of_return: f64,
    runup: f64,
    initial_stop_price: Option<f64>,
    cur_stop_price: Option<f64>,
    initial_unit_risk: Option<f64>,
    initial_risk_pct: Option<f64>,
    cur_risk_pct: Option<f64>,
    cur_r_multiple: Option<f64>,
    profit_target: Option<f64>,
    risk_series: Option<Vec<Sample>>,
    stop_price_series: Option<Vec<Sample>>,
    rate_of_return_series: Option<Vec<Sample>>,
}

impl Position {
    pub(crate) fn open(direction: Direction, entry_time: DateTime<Utc>, entry_price: f64) -> Self {
        Self {
            direction,
            entry_time,
            entry_price,
            growth: 1.0,
            profit: 0.0,
            profit_pct: 0.0,
            holding_period: 0,
            cur_rate_of_return: 0.0,
            runup: 0.0,
            initial_stop_price: None,
            cur_stop_price: None,
            initial_unit_risk: None,
            initial_risk_pct: None,
            cur_risk_pct: None,
            cur_r_multiple: None,
            profit_target: None,
            risk_series: None,
            stop_price_series: None,
            rate_of_return_series: None,
        }
    }

    /// Returns the position side.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the instant the position was opened.
    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    /// Returns the fill price at entry.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// Returns the multiplicative profit factor since entry.
    pub fn growth(&self) -> f64 {
        self.growth
    }

    /// Returns the per-unit profit since entry.
    pub fn profit(&self) -> f64 {
        self.profit
    }

    /// Returns the profit as a percentage of the entry price.
    pub fn profit_pct(&self) -> f64 {
        self.profit_pct
    }

    /// Returns the number of bars the position has been updated over.
    pub fn holding_period(&self) -> usize {
        self.holding_period
    }

    /// Returns the per-bar multiplicative rate of return of the last update.
    pub fn cur_rate_of_return(&self) -> f64 {
        self.cur_rate_of_return
    }

    /// Returns the maximum favorable excursion from entry.
    pub fn runup(&self) -> f64 {
        self.runup
    }

    /// Returns the stop price fixed at entry, if a stop-loss rule is set.
    pub fn initial_stop_price(&self) -> Option<f64> {
        self.initial_stop_price
    }

    /// Returns the current stop price, trailing-adjusted if applicable.
    pub fn cur_stop_price(&self) -> Option<f64> {
        self.cur_stop_price
    }

    /// Returns the distance from entry to the initial stop.
    pub fn initial_unit_risk(&self) -> Option<f64> {
        self.initial_unit_risk
    }

    /// Returns the entry risk as a percentage of the entry price.
    pub fn initial_risk_pct(&self) -> Option<f64> {
        self.initial_risk_pct
    }

    /// Returns the current risk as a percentage of the current price.
    pub fn cur_risk_pct(&self) -> Option<f64> {
        self.cur_risk_pct
    }

    /// Returns the current profit measured in units of risk.
    pub fn cur_r_multiple(&self) -> Option<f64> {
        self.cur_r_multiple
    }

    /// Returns the profit-target price, if a target rule is set.
    pub fn profit_target(&self) -> Option<f64> {
        self.profit_target
    }

    /// Fixes the initial stop and derives the entry risk figures.
    pub(crate) fn set_initial_stop(&mut self, stop_price: f64) {
        self.initial_stop_price = Some(stop_price);
        self.cur_stop_price = Some(stop_price);

        let unit_risk = (self.entry_price - stop_price).abs();
        let risk_pct = unit_risk.pct_of(self.entry_price);
        self.initial_unit_risk = Some(unit_risk);
        self.initial_risk_pct = Some(risk_pct);
        self.cur_risk_pct = Some(risk_pct);
        self.cur_r_multiple = Some(0.0);
    }

    pub(crate) fn set_profit_target(&mut self, target_price: f64) {
        self.profit_target = Some(target_price);
    }

    /// Applies the first trailing stop, computed from the entry bar's close.
    ///
    /// Without an initial stop the trailing price becomes the stop outright;
    /// with one, the tighter of the two wins and replaces the initial stop.
    pub(crate) fn apply_entry_trailing_stop(&mut self, trailing_price: f64) {
        match self.initial_stop_price {
            None => self.cur_stop_price = Some(trailing_price),
            Some(initial) => {
                let tightened = match self.direction {
                    Direction::Long => initial.max(trailing_price),
                    Direction::Short => initial.min(trailing_price),
                };
                self.initial_stop_price = Some(tightened);
                self.cur_stop_price = Some(tightened);
            }
        }
    }

    /// Ratchets the stop toward the trailing price.
    ///
    /// The stop only ever tightens over the life of the position.
    pub(crate) fn ratchet_stop(&mut self, trailing_price: f64) {
        let tightened = match (self.direction, self.cur_stop_price) {
            (_, None) => trailing_price,
            (Direction::Long, Some(cur)) => cur.max(trailing_price),
            (Direction::Short, Some(cur)) => cur.min(trailing_price),
        };
        self.cur_stop_price = Some(tightened);
    }

    /// Marks the position to market against `price` (a bar's open).
    pub(crate) fn mark_to_market(&mut self, price: f64) {
        let last_growth = self.growth;

        self.profit = match self.direction {
            Direction::Long => price - self.entry_price,
            Direction::Short => self.entry_price - price,
        };
        self.profit_pct = self.profit.pct_of(self.entry_price);
        self.growth = match self.direction {
            Direction::Long => price / self.entry_price,
            Direction::Short => (2.0 * self.entry_price - price) / self.entry_price,
        };

        if let Some(stop_price) = self.cur_stop_price {
            let unit_risk = match self.direction {
                Direction::Long => price - stop_price,
                Direction::Short => stop_price - price,
            };
            self.cur_risk_pct = Some(unit_risk.pct_of(price));
            self.cur_r_multiple = Some(self.profit / unit_risk);
        }

        self.holding_period += 1;
        self.cur_rate_of_return = self.growth / last_growth - 1.0;
    }

    /// Widens the maximum favorable excursion against the bar's extremes.
    pub(crate) fn update_runup(&mut self, high: f64, low: f64) {
        let excursion = match self.direction {
            Direction::Long => high - self.entry_price,
            Direction::Short => self.entry_price - low,
        };
        self.runup = self.runup.max(excursion);
    }

    pub(crate) fn start_risk_series(&mut self, time: DateTime<Utc>) {
        let mut series = Vec::new();
        if let Some(risk_pct) = self.cur_risk_pct {
            series.push(Sample::from((time, risk_pct)));
        }
        self.risk_series = Some(series);
    }

    pub(crate) fn start_rate_of_return_series(&mut self, time: DateTime<Utc>) {
        self.rate_of_return_series = Some(vec![Sample::from((time, self.cur_rate_of_return))]);
    }

    pub(crate) fn start_stop_price_series(&mut self, time: DateTime<Utc>) {
        let mut series = Vec::new();
        if let Some(stop_price) = self.cur_stop_price {
            series.push(Sample::from((time, stop_price)));
        }
        self.stop_price_series = Some(series);
    }

    /// Appends this bar's risk and rate-of-return samples where recording
    /// is enabled.
    pub(crate) fn record_samples(&mut self, time: DateTime<Utc>) {
        if let Some(series) = &mut self.risk_series
            && let Some(risk_pct) = self.cur_risk_pct
        {
            series.push(Sample::from((time, risk_pct)));
        }
        if let Some(series) = &mut self.rate_of_return_series {
            series.push(Sample::from((time, self.cur_rate_of_return)));
        }
    }

    /// Appends this bar's stop price where recording is enabled.
    pub(crate) fn record_stop_price(&mut self, time: DateTime<Utc>) {
        if let Some(series) = &mut self.stop_price_series
            && let Some(stop_price) = self.cur_stop_price
        {
            series.push(Sample::from((time, stop_price)));
        }
    }

    /// Closes the position and snapshots it into an immutable [`Trade`].
    ///
    /// Fees are applied here, exactly once, as a haircut on the growth
    /// factor.
    pub(crate) fn finalize(
        mut self,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
        fees: f64,
    ) -> Trade {
        let profit = match self.direction {
            Direction::Long => exit_price - self.entry_price,
            Direction::Short => self.entry_price - exit_price,
        };
        let profit_pct = profit.pct_of(self.entry_price);
        let rmultiple = self.initial_unit_risk.map(|unit_risk| profit / unit_risk);

        let last_growth = self.growth;
        let raw_growth = match self.direction {
            Direction::Long => exit_price / self.entry_price,
            Direction::Short => (2.0 * self.entry_price - exit_price) / self.entry_price,
        };
        let growth = raw_growth * (1.0 - fees);

        self.holding_period += 1;
        let rate_of_return = growth / last_growth - 1.0;
        if let Some(series) = &mut self.rate_of_return_series {
            series.push(Sample::from((exit_time, rate_of_return)));
        }

        Trade {
            direction: self.direction,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            exit_time,
            exit_price,
            profit,
            profit_pct,
            growth,
            holding_period: self.holding_period,
            exit_reason,
            risk_pct: self.initial_risk_pct,
            rmultiple,
            stop_price: self.initial_stop_price,
            profit_target: self.profit_target,
            runup: self.runup,
            risk_series: self.risk_series,
            stop_price_series: self.stop_price_series,
            rate_of_return_series: self.rate_of_return_series,
        }
    }
}

/// An immutable snapshot of a completed trade.
///
/// Produced by the simulator at position close and consumed by
/// [`analyze`](crate::analysis::analyze). The two sides are decoupled: a
/// trade list from any source can be analyzed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Side of the trade.
    pub direction: Direction,
    /// The instant the position was opened.
    pub entry_time: DateTime<Utc>,
    /// The fill price at entry.
    pub entry_price: f64,
    /// The instant the position was closed.
    pub exit_time: DateTime<Utc>,
    /// The fill price at exit.
    pub exit_price: f64,
    /// Per-unit profit, direction-signed.
    pub profit: f64,
    /// Profit as a percentage of the entry price.
    pub profit_pct: f64,
    /// Fee-adjusted multiplicative profit factor.
    pub growth: f64,
    /// Number of bars the position was updated over.
    pub holding_period: usize,
    /// Why the position was closed.
    pub exit_reason: ExitReason,
    /// Entry risk as a percentage of the entry price, if a stop was set.
    pub risk_pct: Option<f64>,
    /// Profit measured in units of initial risk, if a stop was set.
    pub rmultiple: Option<f64>,
    /// The stop price fixed at entry, if a stop was set.
    pub stop_price: Option<f64>,
    /// The profit-target price, if a target rule was set.
    pub profit_target: Option<f64>,
    /// Maximum favorable excursion from entry.
    pub runup: f64,
    /// Per-bar risk percentages, when `record_risk` was on.
    pub risk_series: Option<Vec<Sample>>,
    /// Per-bar stop prices, when `record_stop_price` was on.
    pub stop_price_series: Option<Vec<Sample>>,
    /// Per-bar rates of return plus a final close sample, when
    /// `record_rate_of_return` was on.
    pub rate_of_return_series: Option<Vec<Sample>>,
}

#[cfg(test)]
#[test]
fn mark_to_market_long() {
    let mut position = Position::open(Direction::Long, DateTime::default(), 100.0);
    position.mark_to_market(110.0);

    assert_eq!(position.profit(), 10.0);
    assert_eq!(position.profit_pct(), 10.0);
    assert_eq!(position.growth(), 1.1);
    assert_eq!(position.holding_period(), 1);
    assert!((position.cur_rate_of_return() - 0.1).abs() < 1e-12);
}

#[cfg(test)]
#[test]
fn mark_to_market_short_reflection() {
    let mut position = Position::open(Direction::Short, DateTime::default(), 100.0);
    position.mark_to_market(90.0);

    assert_eq!(position.profit(), 10.0);
    // (2 * 100 - 90) / 100, the additive reflection of the long formula
    assert_eq!(position.growth(), 1.1);
}

#[cfg(test)]
#[test]
fn initial_stop_derives_risk() {
    let mut position = Position::open(Direction::Long, DateTime::default(), 100.0);
    position.set_initial_stop(95.0);

    assert_eq!(position.initial_stop_price(), Some(95.0));
    assert_eq!(position.cur_stop_price(), Some(95.0));
    assert_eq!(position.initial_unit_risk(), Some(5.0));
    assert_eq!(position.initial_risk_pct(), Some(5.0));
    assert_eq!(position.cur_r_multiple(), Some(0.0));
}

#[cfg(test)]
#[test]
fn ratchet_only_tightens() {
    let mut position = Position::open(Direction::Long, DateTime::default(), 100.0);
    position.ratchet_stop(97.0);
    position.ratchet_stop(103.0);
    position.ratchet_stop(101.0);
    assert_eq!(position.cur_stop_price(), Some(103.0));

    let mut position = Position::open(Direction::Short, DateTime::default(), 100.0);
    position.ratchet_stop(103.0);
    position.ratchet_stop(97.0);
    position.ratchet_stop(99.0);
    assert_eq!(position.cur_stop_price(), Some(97.0));
}

#[cfg(test)]
#[test]
fn entry_trailing_stop_tightens_initial() {
    let mut position = Position::open(Direction::Long, DateTime::default(), 100.0);
    position.set_initial_stop(90.0);
    position.apply_entry_trailing_stop(95.0);
    assert_eq!(position.initial_stop_price(), Some(95.0));
    assert_eq!(position.cur_stop_price(), Some(95.0));

    // a looser trailing price leaves the initial stop in place
    let mut position = Position::open(Direction::Long, DateTime::default(), 100.0);
    position.set_initial_stop(96.0);
    position.apply_entry_trailing_stop(95.0);
    assert_eq!(position.cur_stop_price(), Some(96.0));
}

#[cfg(test)]
#[test]
fn finalize_applies_fees_once() {
    let position = Position::open(Direction::Long, DateTime::default(), 100.0);
    let trade = position.finalize(DateTime::default(), 110.0, ExitReason::ExitRule, 0.01);

    assert_eq!(trade.profit, 10.0);
    assert!((trade.growth - 1.1 * 0.99).abs() < 1e-12);
    assert_eq!(trade.holding_period, 1);
}

#[cfg(test)]
#[test]
fn runup_tracks_favorable_excursion() {
    let mut position = Position::open(Direction::Long, DateTime::default(), 100.0);
    position.update_runup(108.0, 99.0);
    position.update_runup(104.0, 95.0);
    assert_eq!(position.runup(), 8.0);

    let mut position = Position::open(Direction::Short, DateTime::default(), 100.0);
    position.update_runup(101.0, 92.0);
    assert_eq!(position.runup(), 8.0);
}
