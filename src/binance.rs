// ===============================
// src/binance.rs
// ===============================
use serde::Deserialize;

use crate::error::MarketDataError;
use crate::feed::BookQuote;

// ---- bookTicker models (WS stream & REST) ----
#[derive(Debug, Deserialize)]
pub struct WsBookTicker {
    #[serde(rename = "u", default)]
    pub update_id: Option<u64>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid: String, // best bid price
    #[serde(rename = "B", default)]
    pub bid_qty: Option<String>,
    #[serde(rename = "a")]
    pub ask: String, // best ask price
    #[serde(rename = "A", default)]
    pub ask_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestBookTicker {
    pub symbol: String,
    pub bid_price: String,
    #[serde(default)]
    pub bid_qty: Option<String>,
    pub ask_price: String,
    #[serde(default)]
    pub ask_qty: Option<String>,
}

/// "WLD-USDT" -> "WLDUSDT"
pub fn exchange_symbol(trading_pair: &str) -> String {
    trading_pair.replace(['-', '/'], "").to_ascii_uppercase()
}

/// Perpetual connectors live on the futures API (own host, own paths).
pub fn is_perpetual(connector: &str) -> bool {
    connector.ends_with("_perpetual")
}

pub fn book_ticker_path(connector: &str) -> &'static str {
    if is_perpetual(connector) {
        "/fapi/v1/ticker/bookTicker"
    } else {
        "/api/v3/ticker/bookTicker"
    }
}

pub fn to_quote(bid: &str, ask: &str, ts_ms: i64) -> Result<BookQuote, MarketDataError> {
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| MarketDataError::Decode(format!("bad price '{s}'")))
    };
    let best_bid = parse(bid)?;
    let best_ask = parse(ask)?;
    if best_bid <= 0.0 || best_ask <= 0.0 {
        return Err(MarketDataError::BadPrice(best_bid.min(best_ask)));
    }
    Ok(BookQuote { ts_ms, best_bid, best_ask })
}
