//! Error types for the BTA library.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Custom error types for the `bta` library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bar data provided is empty.
    ///
    /// Backtesting requires at least one bar to execute.
    #[error("Bar data is empty: backtesting requires at least one bar")]
    BarDataEmpty,

    /// The bar series is shorter than the strategy's lookback period.
    ///
    /// ### Arguments
    /// * `0` - The required number of bars (the lookback period).
    /// * `1` - The number of bars provided.
    #[error("Not enough bars: lookback period requires {0}, got {1}")]
    InsufficientBars(usize, usize),

    /// The strategy declared a lookback period of zero.
    #[error("Lookback period must be at least 1")]
    ZeroLookback,

    /// A required field is missing.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Prices are not in valid order (low ≤ open, close ≤ high).
    #[error("Invalid price order: open={0}, low={1}, high={2}, close={3}")]
    InvalidPriceOrder(f64, f64, f64, f64),

    /// The starting capital is not positive.
    ///
    /// ### Arguments
    /// * `0` - The invalid capital value.
    #[error("Starting capital must be positive (got: {0})")]
    NegZeroCapital(f64),

    /// The fee fraction is outside `[0, 1)`.
    ///
    /// ### Arguments
    /// * `0` - The invalid fee fraction.
    #[error("Fees must be a fraction in [0, 1) (got: {0})")]
    InvalidFees(f64),

    /// A stop-loss or trailing-stop rule returned a negative distance.
    #[error("Stop distance must be non-negative (got: {0})")]
    NegativeStopDistance(f64),

    /// A profit-target rule returned a negative distance.
    #[error("Target distance must be non-negative (got: {0})")]
    NegativeTargetDistance(f64),

    /// `enter_position` was called twice within the same bar.
    #[error("Entry already requested for this bar")]
    EntryAlreadyRequested,

    /// `exit_position` was called twice within the same bar.
    #[error("Exit already requested for this bar")]
    ExitAlreadyRequested,

    /// The engine tried to close a position while none was open.
    #[error("No open position to close")]
    NoOpenPosition,

    /// A generic error with a custom message.
    ///
    /// ### Arguments
    /// * `0` - The error message.
    #[error("{0}")]
    Msg(String),

    /// An I/O error occurred.
    ///
    /// ### Arguments
    /// * `0` - The underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A JSON (de)serialization error occurred.
    ///
    /// ### Arguments
    /// * `0` - The underlying serde error.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
