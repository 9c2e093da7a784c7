use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// Read-only OHLC accessors for a price bar.
///
/// The engine is parametric over the bar type: anything that can report a
/// timestamp and open/high/low/close prices can be driven through a backtest.
/// Strategies that precompute indicator columns implement this trait on their
/// own bar type and return it from
/// [`prep_indicators`](crate::engine::Strategy::prep_indicators).
pub trait Ohlc {
    /// The instant the bar opened.
    fn time(&self) -> DateTime<Utc>;

    /// The opening price.
    fn open(&self) -> f64;

    /// The highest traded price.
    fn high(&self) -> f64;

    /// The lowest traded price.
    fn low(&self) -> f64;

    /// The closing price.
    fn close(&self) -> f64;
}

/// A plain OHLC bar over a fixed time interval.
///
/// Field names carry serde aliases for common exchange kline exports, so a
/// raw JSON dump can be loaded directly (see
/// [`bars_from_file`](crate::bars_from_file), `serde` feature).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    #[cfg_attr(
        feature = "serde",
        serde(with = "chrono::serde::ts_milliseconds", alias = "open_time")
    )]
    time: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(alias = "open_price"))]
    open: f64,
    #[cfg_attr(feature = "serde", serde(alias = "high_price"))]
    high: f64,
    #[cfg_attr(feature = "serde", serde(alias = "low_price"))]
    low: f64,
    #[cfg_attr(feature = "serde", serde(alias = "close_price"))]
    close: f64,
}

impl From<(DateTime<Utc>, f64, f64, f64, f64)> for Bar {
    fn from((time, open, high, low, close): (DateTime<Utc>, f64, f64, f64, f64)) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }
}

impl Ohlc for Bar {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }
}

/// Builder for [`Bar`] with price-order validation.
///
/// ### Example
/// ```rust
/// use bta_rs::prelude::*;
/// use chrono::DateTime;
///
/// let bar = BarBuilder::builder()
///     .time(DateTime::default())
///     .open(100.0)
///     .high(110.0)
///     .low(95.0)
///     .close(105.0)
///     .build()
///     .unwrap();
///
/// assert_eq!(bar.close(), 105.0);
/// ```
#[derive(Debug, Default)]
pub struct BarBuilder {
    time: Option<DateTime<Utc>>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
}

impl BarBuilder {
    /// Starts a new empty builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the bar timestamp.
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the opening price.
    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    /// Sets the highest price.
    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    /// Sets the lowest price.
    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    /// Sets the closing price.
    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    /// Validates the fields and builds the bar.
    ///
    /// ### Returns
    /// The bar, or an error if a field is missing or the prices are not
    /// ordered as `low ≤ open, close ≤ high`.
    pub fn build(self) -> Result<Bar> {
        let time = self.time.ok_or(Error::MissingField("time"))?;
        let open = self.open.ok_or(Error::MissingField("open"))?;
        let high = self.high.ok_or(Error::MissingField("high"))?;
        let low = self.low.ok_or(Error::MissingField("low"))?;
        let close = self.close.ok_or(Error::MissingField("close"))?;

        if !(low <= open && open <= high && low <= close && close <= high) {
            return Err(Error::InvalidPriceOrder(open, low, high, close));
        }

        Ok(Bar {
            time,
            open,
            high,
            low,
            close,
        })
    }
}

#[cfg(test)]
#[test]
fn build_valid_bar() {
    use chrono::DateTime;

    let bar = BarBuilder::builder()
        .time(DateTime::from_timestamp_secs(1515151515).unwrap())
        .open(100.0)
        .high(111.0)
        .low(99.0)
        .close(110.0)
        .build()
        .unwrap();

    assert_eq!(bar.open(), 100.0);
    assert_eq!(bar.high(), 111.0);
    assert_eq!(bar.low(), 99.0);
    assert_eq!(bar.close(), 110.0);
}

#[cfg(test)]
#[test]
fn build_missing_field() {
    let result = BarBuilder::builder().open(100.0).build();
    assert!(matches!(result, Err(Error::MissingField("time"))));
}

#[cfg(test)]
#[test]
fn build_invalid_price_order() {
    use chrono::DateTime;

    // high below the open
    let result = BarBuilder::builder()
        .time(DateTime::default())
        .open(100.0)
        .high(99.0)
        .low(98.0)
        .close(98.5)
        .build();
    assert!(matches!(result, Err(Error::InvalidPriceOrder(..))));
}

#[cfg(test)]
#[test]
fn bar_from_tuple() {
    use chrono::{DateTime, Utc};

    let bar = Bar::from((DateTime::<Utc>::default(), 100.0, 111.0, 99.0, 110.0));
    assert_eq!(bar.time(), DateTime::<Utc>::default());
    assert_eq!(bar.high(), 111.0);
}
