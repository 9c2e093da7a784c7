use chrono::{DateTime, TimeDelta, Utc};

/// Infers the bar interval of a series from its endpoints and bar count.
pub(crate) fn infer_timeframe(first: DateTime<Utc>, last: DateTime<Utc>, count: usize) -> TimeDelta {
    let span_ms = (last - first).num_milliseconds() as f64;
    TimeDelta::milliseconds((span_ms / count as f64).round() as i64)
}

/// Arithmetic mean. Callers guarantee a non-empty slice.
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation. Callers guarantee a non-empty slice.
pub(crate) fn population_std_dev(values: &[f64]) -> f64 {
    let mu = mean(values);
    (values.iter().map(|value| (value - mu).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Reads a JSON array of bars from `filepath`.
///
/// Accepts both this crate's field names and common exchange kline exports
/// (`open_time`, `open_price`, ...) with millisecond timestamps.
#[cfg(feature = "serde")]
pub fn bars_from_file(filepath: std::path::PathBuf) -> crate::errors::Result<Vec<crate::engine::Bar>> {
    use crate::errors::Error;
    use std::{fs::File, io::BufReader};

    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(Error::from)
}

#[cfg(test)]
#[test]
fn timeframe_from_endpoints() {
    let first = DateTime::from_timestamp_secs(0).unwrap();
    let last = DateTime::from_timestamp_secs(7200).unwrap();
    assert_eq!(infer_timeframe(first, last, 3), TimeDelta::seconds(2400));
}

#[cfg(test)]
#[test]
fn mean_and_std_dev() {
    let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    assert_eq!(mean(&values), 5.0);
    assert_eq!(population_std_dev(&values), 2.0);
}
