// ===============================
// src/feed.rs
// ===============================
//
// Market data for the controller:
// - QuoteBook         : latest top-of-book per (connector, pair), fed via watch channels
// - run_mock          : random-walk generator
// - run_binance       : Binance WS bookTicker (sandbox & mainnet, base URL from config)
// - BinanceRestPrices : pull-based provider hitting the REST bookTicker endpoint
//
// The controller only sees the MarketDataProvider trait.
//
use std::time::Duration;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use futures_util::StreamExt; // for .next()
use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::binance::{self, RestBookTicker, WsBookTicker};
use crate::domain::{now_ms, PriceType};
use crate::error::MarketDataError;
use crate::metrics::{FEED_CONNECTED, FEED_RECONNECTS, QUOTES};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookQuote { pub ts_ms: i64, pub best_bid: f64, pub best_ask: f64 }

impl BookQuote {
    pub fn mid(&self) -> f64 { (self.best_bid + self.best_ask) / 2.0 }

    pub fn price(&self, price_type: PriceType) -> f64 {
        match price_type {
            PriceType::MidPrice => self.mid(),
            PriceType::BestBid => self.best_bid,
            PriceType::BestAsk => self.best_ask,
        }
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_price(&self, connector: &str, trading_pair: &str, price_type: PriceType) -> Result<f64, MarketDataError>;
}

pub type QuoteTx = watch::Sender<Option<BookQuote>>;

/// Latest quote per (connector, trading pair).
#[derive(Debug, Default)]
pub struct QuoteBook {
    feeds: HashMap<(String, String), watch::Receiver<Option<BookQuote>>>,
}

impl QuoteBook {
    pub fn new() -> Self { Self::default() }

    /// Register a pair; the returned sender is handed to a feed task.
    pub fn register(&mut self, connector: &str, trading_pair: &str) -> QuoteTx {
        let (tx, rx) = watch::channel(None);
        self.feeds.insert((connector.to_string(), trading_pair.to_string()), rx);
        tx
    }

    pub fn latest(&self, connector: &str, trading_pair: &str) -> Result<BookQuote, MarketDataError> {
        let rx = self
            .feeds
            .get(&(connector.to_string(), trading_pair.to_string()))
            .ok_or_else(|| MarketDataError::UnknownPair {
                connector: connector.to_string(),
                trading_pair: trading_pair.to_string(),
            })?;
        let quote = *rx.borrow();
        quote.ok_or_else(|| MarketDataError::NoQuote {
            connector: connector.to_string(),
            trading_pair: trading_pair.to_string(),
        })
    }
}

#[async_trait]
impl MarketDataProvider for QuoteBook {
    async fn get_price(&self, connector: &str, trading_pair: &str, price_type: PriceType) -> Result<f64, MarketDataError> {
        let px = self.latest(connector, trading_pair)?.price(price_type);
        if px.is_nan() || px <= 0.0 {
            return Err(MarketDataError::BadPrice(px));
        }
        Ok(px)
    }
}

/// Random-walk quotes around `start_px`, 1 tick = 0.01% of price.
pub async fn run_mock(tx: QuoteTx, start_px: f64, interval: Duration) {
    let mut mid = start_px;
    loop {
        // jangan simpan ThreadRng melewati .await
        let step = rand::thread_rng().gen_range(-3..=3) as f64;
        mid = (mid * (1.0 + step * 0.0001)).max(start_px * 0.5);
        let half_spread = mid * 0.00005;
        let quote = BookQuote { ts_ms: now_ms(), best_bid: mid - half_spread, best_ask: mid + half_spread };
        if tx.send(Some(quote)).is_err() {
            debug!("mock feed: no receivers left, stopping");
            return;
        }
        QUOTES.inc();
        sleep(interval).await;
    }
}

/// Binance WS `bookTicker` into the quote book.
///
/// - `ws_base` from config:
///     * Sandbox: wss://testnet.binance.vision/ws
///     * Mainnet: wss://stream.binance.com:9443/ws
/// - `trading_pair` is the controller pair (e.g. "WLD-USDT"); lower-cased exchange symbol for the topic.
pub async fn run_binance(tx: QuoteTx, trading_pair: String, ws_base: String) {
    let topic = format!("{}@bookTicker", binance::exchange_symbol(&trading_pair).to_lowercase());
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);

    let url = match Url::parse(&ws_url) {
        Ok(u) => u,
        Err(e) => {
            error!(?e, %ws_url, "bad ws url");
            return;
        }
    };

    let mut attempt: u32 = 0;
    loop {
        info!(%ws_url, "connecting binance bookTicker");
        match connect_async(url.as_str()).await {
            Ok((mut ws, _resp)) => {
                info!(%trading_pair, "connected to bookTicker");
                FEED_CONNECTED.set(1);
                attempt = 0; // reset backoff

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            let quote = serde_json::from_str::<WsBookTicker>(&txt)
                                .map_err(|e| MarketDataError::Decode(e.to_string()))
                                .and_then(|m| binance::to_quote(&m.bid, &m.ask, now_ms()));
                            match quote {
                                Ok(q) => {
                                    if tx.send(Some(q)).is_err() {
                                        info!("bookTicker: no receivers left, stopping");
                                        FEED_CONNECTED.set(0);
                                        return;
                                    }
                                    QUOTES.inc();
                                }
                                Err(e) => debug!(?e, "skip bookTicker frame"),
                            }
                        }
                        Ok(_) => {
                            // ignore non-text frames
                        }
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                FEED_CONNECTED.set(0);
                info!("bookTicker disconnected, will reconnect");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }
        FEED_RECONNECTS.inc();

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let factor = 1u64 << attempt.min(6); // 2,4,...,64
        let base_ms = 500u64.saturating_mul(factor);
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

/// Pull-based provider: one REST bookTicker call per price request.
/// Spot connectors hit `spot_base`, `*_perpetual` connectors hit `futures_base`.
#[derive(Debug, Clone)]
pub struct BinanceRestPrices {
    http: reqwest::Client,
    spot_base: String,
    futures_base: String,
}

impl BinanceRestPrices {
    pub fn new(spot_base: impl Into<String>, futures_base: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), spot_base: spot_base.into(), futures_base: futures_base.into() }
    }

    pub fn url_for(&self, connector: &str, trading_pair: &str) -> String {
        let base = if binance::is_perpetual(connector) { &self.futures_base } else { &self.spot_base };
        format!(
            "{}{}?symbol={}",
            base.trim_end_matches('/'),
            binance::book_ticker_path(connector),
            urlencoding::encode(&binance::exchange_symbol(trading_pair))
        )
    }
}

#[async_trait]
impl MarketDataProvider for BinanceRestPrices {
    async fn get_price(&self, connector: &str, trading_pair: &str, price_type: PriceType) -> Result<f64, MarketDataError> {
        let url = self.url_for(connector, trading_pair);
        let rsp = self.http.get(&url).send().await?;
        if !rsp.status().is_success() {
            let code = rsp.status();
            let body = rsp.text().await.unwrap_or_default();
            warn!(%code, %body, %url, "bookTicker request failed");
            return Err(MarketDataError::UnknownPair {
                connector: connector.to_string(),
                trading_pair: trading_pair.to_string(),
            });
        }
        let t: RestBookTicker = rsp.json().await?;
        Ok(binance::to_quote(&t.bid_price, &t.ask_price, now_ms())?.price(price_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quote_book_serves_latest_quote() {
        let mut book = QuoteBook::new();
        let tx = book.register("binance", "BTC-USDT");
        tx.send(Some(BookQuote { ts_ms: 1, best_bid: 99.0, best_ask: 101.0 })).unwrap();

        assert_eq!(book.get_price("binance", "BTC-USDT", PriceType::MidPrice).await.unwrap(), 100.0);
        assert_eq!(book.get_price("binance", "BTC-USDT", PriceType::BestAsk).await.unwrap(), 101.0);

        tx.send(Some(BookQuote { ts_ms: 2, best_bid: 109.0, best_ask: 111.0 })).unwrap();
        assert_eq!(book.get_price("binance", "BTC-USDT", PriceType::MidPrice).await.unwrap(), 110.0);
    }

    #[tokio::test]
    async fn quote_book_errors_before_first_quote_and_on_unknown_pair() {
        let mut book = QuoteBook::new();
        let _tx = book.register("binance", "BTC-USDT");

        let err = book.get_price("binance", "BTC-USDT", PriceType::MidPrice).await.unwrap_err();
        assert!(matches!(err, MarketDataError::NoQuote { .. }));

        let err = book.get_price("binance", "ETH-USDT", PriceType::MidPrice).await.unwrap_err();
        assert!(matches!(err, MarketDataError::UnknownPair { .. }));
    }

    #[tokio::test]
    async fn mock_feed_publishes_positive_quotes() {
        let mut book = QuoteBook::new();
        let tx = book.register("mock", "WLD-USDT");
        let handle = tokio::spawn(run_mock(tx, 2.0, Duration::from_millis(1)));

        let mut rx = book.feeds.get(&("mock".to_string(), "WLD-USDT".to_string())).unwrap().clone();
        rx.changed().await.unwrap();
        let px = book.get_price("mock", "WLD-USDT", PriceType::MidPrice).await.unwrap();
        assert!(px > 0.0);
        handle.abort();
    }

    #[test]
    fn rest_url_uses_exchange_symbol() {
        let p = BinanceRestPrices::new("https://testnet.binance.vision/", "https://testnet.binancefuture.com");
        assert_eq!(
            p.url_for("binance", "WLD-USDT"),
            "https://testnet.binance.vision/api/v3/ticker/bookTicker?symbol=WLDUSDT"
        );
        assert_eq!(
            p.url_for("binance_perpetual", "WLD-USDT"),
            "https://testnet.binancefuture.com/fapi/v1/ticker/bookTicker?symbol=WLDUSDT"
        );
    }
}
