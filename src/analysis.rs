//! Performance analysis over a sequence of completed trades.
//!
//! [`analyze`] reduces a trade list into portfolio-level figures:
//! - Compounded equity and peak-to-trough drawdown
//! - Win/loss counts, profit factor, expectancy and system quality
//! - An annualized Sharpe ratio reconstructed from per-trade
//!   rate-of-return samples
//!
//! The analyzer is independent of the simulator: any trade list, from
//! [`backtest`](crate::engine::backtest) or elsewhere, can be analyzed.

use std::fmt;

use crate::PctExt;
use crate::engine::Trade;
use crate::errors::{Error, Result};
use crate::utils::{mean, population_std_dev};

use chrono::{DateTime, TimeDelta, Utc};

/// Milliseconds in a (non-leap) year, used to annualize the Sharpe ratio.
const YEAR_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Options for [`analyze`].
///
/// The Sharpe ratio is only computed when `starting_date` is set and a
/// timeframe is available; without them it defaults to 0. The timeframe is
/// inferred from the first trade's rate-of-return series when not supplied,
/// which can disagree with the simulator's bar interval if that trade spans
/// gaps; pass `timeframe` explicitly to pin it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    /// Start of the period covered by the trades.
    pub starting_date: Option<DateTime<Utc>>,
    /// End of the period; defaults to the last trade's exit time.
    pub ending_date: Option<DateTime<Utc>>,
    /// Bar interval for the Sharpe reconstruction.
    pub timeframe: Option<TimeDelta>,
}

/// Portfolio-level figures computed by [`analyze`].
///
/// Scalars that can be undefined (no trades with a stop, no losses, zero
/// R-multiple deviation) are `None`, never NaN or a sentinel. Averages over
/// an empty cohort are reported as 0.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Capital at the start of the trade sequence.
    pub starting_capital: f64,
    /// Capital after compounding every trade's growth.
    pub final_capital: f64,
    /// Absolute profit over the sequence.
    pub profit: f64,
    /// Profit as a percentage of starting capital.
    pub profit_pct: f64,
    /// Overall multiplicative growth factor.
    pub growth: f64,
    /// Number of trades analyzed.
    pub total_trades: usize,
    /// Total bars held across all trades.
    pub bar_count: usize,
    /// Largest peak-to-trough equity decline (non-positive).
    pub max_drawdown: f64,
    /// Largest decline as a percentage of the peak (non-positive).
    pub max_drawdown_pct: f64,
    /// Largest per-trade entry risk seen, where defined.
    pub max_risk_pct: Option<f64>,
    /// Mean R-multiple across trades with a defined R-multiple.
    pub expectancy: Option<f64>,
    /// Population standard deviation of the R-multiples.
    pub rmultiple_std_dev: Option<f64>,
    /// Expectancy over R-multiple deviation.
    pub system_quality: Option<f64>,
    /// Gross profits over absolute gross losses.
    pub profit_factor: Option<f64>,
    /// Annualized Sharpe ratio of the reconstructed rate-of-return vector.
    pub sharpe_ratio: f64,
    /// Number of trades with positive profit.
    pub num_winning_trades: usize,
    /// Number of trades with zero or negative profit.
    pub num_losing_trades: usize,
    /// Fraction of trades that won.
    pub proportion_winning: f64,
    /// Fraction of trades that lost.
    pub proportion_losing: f64,
    /// Average profit of the winning trades (0 if none).
    pub avg_winning_trade: f64,
    /// Average loss of the losing trades (0 if none).
    pub avg_losing_trade: f64,
    /// Profit percentage over absolute drawdown percentage (0 on zero
    /// drawdown).
    pub return_on_account: f64,
    /// Average profit per trade (0 if none).
    pub avg_profit_per_trade: f64,
    /// `p(win)·avg_win + p(lose)·avg_loss`.
    pub expected_value: f64,
}

/// Analyzes a sequence of completed trades against `starting_capital`.
///
/// Trades are reduced in order: capital compounds through each trade's
/// fee-adjusted growth factor while the peak and drawdown track the equity
/// curve. An empty trade list yields a neutral analysis (final capital
/// equals starting capital, zeros elsewhere).
///
/// ### Returns
/// The analysis, or an error if `starting_capital` is not positive.
///
/// ### Example
/// ```rust
/// use bta_rs::prelude::*;
///
/// let analysis = analyze(10_000.0, &[], &AnalysisOptions::default()).unwrap();
/// assert_eq!(analysis.final_capital, 10_000.0);
/// assert_eq!(analysis.total_trades, 0);
/// ```
pub fn analyze(
    starting_capital: f64,
    trades: &[Trade],
    options: &AnalysisOptions,
) -> Result<Analysis> {
    if starting_capital <= 0.0 {
        return Err(Error::NegZeroCapital(starting_capital));
    }

    let mut working_capital = starting_capital;
    let mut peak_capital = starting_capital;
    let mut max_drawdown = 0.0_f64;
    let mut max_drawdown_pct = 0.0_f64;
    let mut bar_count = 0;
    let mut total_profits = 0.0;
    let mut total_losses = 0.0;
    let mut num_winning_trades = 0;
    let mut num_losing_trades = 0;
    let mut max_risk_pct: Option<f64> = None;
    let mut rmultiples = Vec::new();

    for trade in trades {
        working_capital *= trade.growth;
        bar_count += trade.holding_period;

        let working_drawdown = if working_capital < peak_capital {
            working_capital - peak_capital
        } else {
            peak_capital = working_capital;
            0.0
        };
        max_drawdown = max_drawdown.min(working_drawdown);
        max_drawdown_pct = max_drawdown_pct.min(max_drawdown.pct_of(peak_capital));

        // a zero-profit trade counts as a loser
        if trade.profit > 0.0 {
            total_profits += trade.profit;
            num_winning_trades += 1;
        } else {
            total_losses += trade.profit;
            num_losing_trades += 1;
        }

        if let Some(risk_pct) = trade.risk_pct {
            max_risk_pct = Some(max_risk_pct.map_or(risk_pct, |max| max.max(risk_pct)));
        }
        if let Some(rmultiple) = trade.rmultiple {
            rmultiples.push(rmultiple);
        }
    }

    let total_trades = trades.len();
    let profit = working_capital - starting_capital;
    let profit_pct = starting_capital.pct_change(working_capital);
    let growth = working_capital / starting_capital;

    let expectancy = (!rmultiples.is_empty()).then(|| mean(&rmultiples));
    let rmultiple_std_dev = (!rmultiples.is_empty()).then(|| population_std_dev(&rmultiples));
    let system_quality = match (expectancy, rmultiple_std_dev) {
        (Some(mu), Some(sigma)) if sigma != 0.0 => Some(mu / sigma),
        _ => None,
    };
    let profit_factor = (total_losses != 0.0).then(|| total_profits / total_losses.abs());

    let (proportion_winning, proportion_losing) = if total_trades > 0 {
        (
            num_winning_trades as f64 / total_trades as f64,
            num_losing_trades as f64 / total_trades as f64,
        )
    } else {
        (0.0, 0.0)
    };
    let avg_winning_trade = if num_winning_trades > 0 {
        total_profits / num_winning_trades as f64
    } else {
        0.0
    };
    let avg_losing_trade = if num_losing_trades > 0 {
        total_losses / num_losing_trades as f64
    } else {
        0.0
    };
    let return_on_account = if max_drawdown_pct != 0.0 {
        profit_pct / max_drawdown_pct.abs()
    } else {
        0.0
    };
    let avg_profit_per_trade = if total_trades > 0 {
        profit / total_trades as f64
    } else {
        0.0
    };
    let expected_value = proportion_winning * avg_winning_trade + proportion_losing * avg_losing_trade;

    Ok(Analysis {
        starting_capital,
        final_capital: working_capital,
        profit,
        profit_pct,
        growth,
        total_trades,
        bar_count,
        max_drawdown,
        max_drawdown_pct,
        max_risk_pct,
        expectancy,
        rmultiple_std_dev,
        system_quality,
        profit_factor,
        sharpe_ratio: sharpe_ratio(trades, options),
        num_winning_trades,
        num_losing_trades,
        proportion_winning,
        proportion_losing,
        avg_winning_trade,
        avg_losing_trade,
        return_on_account,
        avg_profit_per_trade,
        expected_value,
    })
}

/// Annualized Sharpe ratio over a uniformly-sampled rate-of-return vector.
///
/// The vector spans `starting_date..ending_date` at `timeframe` resolution;
/// each trade's samples scatter into it by rounded bucket index, last writer
/// wins, out-of-range samples are dropped. Returns 0 whenever the inputs do
/// not pin down a vector (no starting date, no timeframe, empty span) or the
/// deviation is zero.
fn sharpe_ratio(trades: &[Trade], options: &AnalysisOptions) -> f64 {
    let Some(start) = options.starting_date else {
        return 0.0;
    };
    let Some(timeframe) = options.timeframe.or_else(|| inferred_timeframe(trades)) else {
        return 0.0;
    };
    let timeframe_ms = timeframe.num_milliseconds();
    if timeframe_ms <= 0 {
        return 0.0;
    }
    let Some(end) = options
        .ending_date
        .or_else(|| trades.last().map(|trade| trade.exit_time))
    else {
        return 0.0;
    };

    let len = (end - start).num_milliseconds() / timeframe_ms;
    if len <= 0 {
        return 0.0;
    }

    let mut returns = vec![0.0; len as usize];
    for trade in trades {
        let Some(series) = &trade.rate_of_return_series else {
            continue;
        };
        for sample in series {
            let offset_ms = (sample.time() - start).num_milliseconds() as f64;
            let index = (offset_ms / timeframe_ms as f64).round() as i64;
            if (0..len).contains(&index) {
                returns[index as usize] = sample.value();
            }
        }
    }

    let mu = mean(&returns);
    let sigma = population_std_dev(&returns);
    if sigma == 0.0 {
        return 0.0;
    }
    mu / sigma * (YEAR_MS as f64 / timeframe_ms as f64).sqrt()
}

/// Timeframe implied by the first trade's rate-of-return samples.
fn inferred_timeframe(trades: &[Trade]) -> Option<TimeDelta> {
    let first = trades.first()?;
    let series = first.rate_of_return_series.as_ref()?;
    if series.is_empty() {
        return None;
    }
    let span_ms = (first.exit_time - first.entry_time).num_milliseconds() as f64;
    Some(TimeDelta::milliseconds(
        (span_ms / series.len() as f64).round() as i64,
    ))
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_owned(), |value| format!("{value:.2}"))
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Analysis ===")?;
        writeln!(f, "Starting Capital: {:.2}", self.starting_capital)?;
        writeln!(f, "Final Capital: {:.2}", self.final_capital)?;
        writeln!(f, "Profit: {:.2} ({:.2}%)", self.profit, self.profit_pct)?;
        writeln!(f, "Growth: {:.4}", self.growth)?;
        writeln!(f, "Trades: {} over {} bars", self.total_trades, self.bar_count)?;
        writeln!(
            f,
            "Max Drawdown: {:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        )?;
        writeln!(f, "Max Risk Pct: {}", fmt_opt(self.max_risk_pct))?;
        writeln!(f, "Expectancy: {}", fmt_opt(self.expectancy))?;
        writeln!(f, "R-Multiple Std Dev: {}", fmt_opt(self.rmultiple_std_dev))?;
        writeln!(f, "System Quality: {}", fmt_opt(self.system_quality))?;
        writeln!(f, "Profit Factor: {}", fmt_opt(self.profit_factor))?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        writeln!(
            f,
            "Winners: {} ({:.2}%), avg {:.2}",
            self.num_winning_trades,
            self.proportion_winning * 100.0,
            self.avg_winning_trade
        )?;
        writeln!(
            f,
            "Losers: {} ({:.2}%), avg {:.2}",
            self.num_losing_trades,
            self.proportion_losing * 100.0,
            self.avg_losing_trade
        )?;
        writeln!(f, "Return on Account: {:.2}", self.return_on_account)?;
        writeln!(f, "Avg Profit per Trade: {:.2}", self.avg_profit_per_trade)?;
        write!(f, "Expected Value: {:.2}", self.expected_value)
    }
}

#[cfg(test)]
// Helper to build a bare trade for analyzer tests; the analyzer only needs
// growth, profit, and holding period unless risk or samples are involved.
fn make_trade(growth: f64, profit: f64, holding_period: usize) -> Trade {
    use crate::engine::{Direction, ExitReason};

    Trade {
        direction: Direction::Long,
        entry_time: DateTime::default(),
        entry_price: 100.0,
        exit_time: DateTime::default(),
        exit_price: 100.0 + profit,
        profit,
        profit_pct: profit,
        growth,
        holding_period,
        exit_reason: ExitReason::ExitRule,
        risk_pct: None,
        rmultiple: None,
        stop_price: None,
        profit_target: None,
        runup: profit.max(0.0),
        risk_series: None,
        stop_price_series: None,
        rate_of_return_series: None,
    }
}

#[cfg(test)]
#[test]
fn two_trade_sequence() {
    let trades = vec![make_trade(1.10, 100.0, 2), make_trade(0.95, -50.0, 3)];
    let analysis = analyze(1000.0, &trades, &AnalysisOptions::default()).unwrap();

    assert!((analysis.final_capital - 1045.0).abs() < 1e-9);
    assert!((analysis.profit - 45.0).abs() < 1e-9);
    assert!((analysis.profit_pct - 4.5).abs() < 1e-9);
    assert_eq!(analysis.total_trades, 2);
    assert_eq!(analysis.bar_count, 5);
    assert_eq!(analysis.num_winning_trades, 1);
    assert_eq!(analysis.num_losing_trades, 1);
    assert_eq!(analysis.profit_factor, Some(2.0));
    assert_eq!(analysis.avg_winning_trade, 100.0);
    assert_eq!(analysis.avg_losing_trade, -50.0);
    assert_eq!(analysis.expected_value, 25.0);

    // drawdown from the peak after the winning trade
    assert!(analysis.max_drawdown <= 0.0);
    assert!(analysis.max_drawdown_pct <= 0.0);
    assert!((analysis.max_drawdown - (-55.0)).abs() < 1e-9);
    assert!((analysis.max_drawdown_pct - (-5.0)).abs() < 1e-9);
    assert!((analysis.return_on_account - 0.9).abs() < 1e-9);

    // no starting date: Sharpe defaults to 0
    assert_eq!(analysis.sharpe_ratio, 0.0);
}

#[cfg(test)]
#[test]
fn growth_factors_compound_into_final_capital() {
    let trades = vec![
        make_trade(1.04, 4.0, 1),
        make_trade(0.97, -3.0, 2),
        make_trade(1.12, 12.0, 4),
    ];
    let analysis = analyze(2500.0, &trades, &AnalysisOptions::default()).unwrap();

    let log_sum: f64 = trades.iter().map(|trade| trade.growth.ln()).sum();
    let log_ratio = (analysis.final_capital / analysis.starting_capital).ln();
    assert!((log_sum - log_ratio).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn empty_trades_are_neutral() {
    let analysis = analyze(1000.0, &[], &AnalysisOptions::default()).unwrap();

    assert_eq!(analysis.final_capital, 1000.0);
    assert_eq!(analysis.profit, 0.0);
    assert_eq!(analysis.growth, 1.0);
    assert_eq!(analysis.total_trades, 0);
    assert_eq!(analysis.max_drawdown, 0.0);
    assert_eq!(analysis.max_drawdown_pct, 0.0);
    assert_eq!(analysis.max_risk_pct, None);
    assert_eq!(analysis.expectancy, None);
    assert_eq!(analysis.rmultiple_std_dev, None);
    assert_eq!(analysis.system_quality, None);
    assert_eq!(analysis.profit_factor, None);
    assert_eq!(analysis.proportion_winning, 0.0);
    assert_eq!(analysis.avg_winning_trade, 0.0);
    assert_eq!(analysis.return_on_account, 0.0);
    assert_eq!(analysis.sharpe_ratio, 0.0);
}

#[cfg(test)]
#[test]
fn non_positive_capital_is_rejected() {
    assert!(matches!(
        analyze(0.0, &[], &AnalysisOptions::default()),
        Err(Error::NegZeroCapital(_))
    ));
    assert!(matches!(
        analyze(-100.0, &[], &AnalysisOptions::default()),
        Err(Error::NegZeroCapital(_))
    ));
}

#[cfg(test)]
#[test]
fn zero_profit_trade_counts_as_loser() {
    let trades = vec![make_trade(1.0, 0.0, 1)];
    let analysis = analyze(1000.0, &trades, &AnalysisOptions::default()).unwrap();

    assert_eq!(analysis.num_winning_trades, 0);
    assert_eq!(analysis.num_losing_trades, 1);
    // the zero-profit loser contributes nothing to losses
    assert_eq!(analysis.profit_factor, None);
    assert_eq!(analysis.avg_losing_trade, 0.0);
}

#[cfg(test)]
#[test]
fn rmultiple_statistics() {
    let mut winner = make_trade(1.10, 10.0, 1);
    winner.rmultiple = Some(2.0);
    winner.risk_pct = Some(2.0);
    let mut loser = make_trade(0.95, -5.0, 1);
    loser.rmultiple = Some(-1.0);
    loser.risk_pct = Some(4.0);

    let analysis = analyze(1000.0, &[winner, loser], &AnalysisOptions::default()).unwrap();

    assert_eq!(analysis.expectancy, Some(0.5));
    assert_eq!(analysis.rmultiple_std_dev, Some(1.5));
    assert!((analysis.system_quality.unwrap() - 0.5 / 1.5).abs() < 1e-12);
    assert_eq!(analysis.max_risk_pct, Some(4.0));
}

#[cfg(test)]
#[test]
fn identical_rmultiples_leave_system_quality_undefined() {
    let mut first = make_trade(1.05, 5.0, 1);
    first.rmultiple = Some(1.0);
    let mut second = make_trade(1.05, 5.0, 1);
    second.rmultiple = Some(1.0);

    let analysis = analyze(1000.0, &[first, second], &AnalysisOptions::default()).unwrap();

    assert_eq!(analysis.expectancy, Some(1.0));
    assert_eq!(analysis.rmultiple_std_dev, Some(0.0));
    assert_eq!(analysis.system_quality, None);
}

#[cfg(test)]
#[test]
fn sharpe_reconstruction_matches_direct_formula() {
    use crate::engine::Sample;

    let start = DateTime::from_timestamp_secs(1_600_000_000).unwrap();
    let timeframe = TimeDelta::hours(1);
    let samples = (0..100)
        .map(|i| {
            let value = 0.001 + 0.01 * ((i % 5) as f64 - 2.0);
            Sample::from((start + timeframe * i, value))
        })
        .collect::<Vec<_>>();

    let mut trade = make_trade(1.0, 0.0, 99);
    trade.entry_time = start;
    trade.exit_time = start + timeframe * 100;
    trade.rate_of_return_series = Some(samples.clone());

    // the timeframe is left to be inferred: (exit - entry) / samples = 1h
    let options = AnalysisOptions {
        starting_date: Some(start),
        ending_date: Some(start + timeframe * 100),
        timeframe: None,
    };
    let analysis = analyze(1000.0, &[trade], &options).unwrap();

    let values = samples.iter().map(|sample| sample.value()).collect::<Vec<_>>();
    let mu = values.iter().sum::<f64>() / values.len() as f64;
    let sigma = (values.iter().map(|value| (value - mu).powi(2)).sum::<f64>()
        / values.len() as f64)
        .sqrt();
    let expected = mu / sigma * (365.0 * 24.0_f64).sqrt();

    assert!((analysis.sharpe_ratio - expected).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn sharpe_respects_explicit_timeframe() {
    use crate::engine::Sample;

    let start = DateTime::from_timestamp_secs(1_600_000_000).unwrap();
    let timeframe = TimeDelta::minutes(30);
    let samples = (0..10)
        .map(|i| Sample::from((start + timeframe * i, 0.01 * (i % 3) as f64 + 0.001)))
        .collect::<Vec<_>>();

    let mut trade = make_trade(1.0, 0.0, 9);
    trade.entry_time = start;
    // deliberately gapped exit so the inferred timeframe would be wrong
    trade.exit_time = start + TimeDelta::hours(24);
    trade.rate_of_return_series = Some(samples);

    let options = AnalysisOptions {
        starting_date: Some(start),
        ending_date: Some(start + timeframe * 10),
        timeframe: Some(timeframe),
    };
    let analysis = analyze(1000.0, &[trade], &options).unwrap();

    assert!(analysis.sharpe_ratio != 0.0);
}

#[cfg(test)]
#[test]
fn analysis_report_formatting() {
    let analysis = analyze(1000.0, &[make_trade(1.10, 100.0, 2)], &AnalysisOptions::default())
        .unwrap();
    let report = analysis.to_string();

    assert!(report.contains("=== Backtest Analysis ==="));
    assert!(report.contains("Final Capital: 1100.00"));
    assert!(report.contains("Profit Factor: n/a"));
}
