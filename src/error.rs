// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

/// Failures of the market-data collaborator. Forwarded as-is by the controller.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("no quote yet for {connector}/{trading_pair}")]
    NoQuote { connector: String, trading_pair: String },
    #[error("unknown trading pair {connector}/{trading_pair}")]
    UnknownPair { connector: String, trading_pair: String },
    #[error("market data not processed yet")]
    NotReady,
    #[error("price source returned an unusable price: {0}")]
    BadPrice(f64),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Malformed numeric input in spreads/amounts (or a malformed level id).
    #[error("parse error: {0}")]
    Parse(String),
    /// Length mismatch, zero-sum weights, or an out-of-range scalar.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("level index {index} out of range for {side} side with {len} levels")]
    Index { side: crate::domain::Side, index: usize, len: usize },
    #[error("resolved price {price} for {level_id} is not positive")]
    Domain { level_id: String, price: f64 },
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
