// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : mm_grid_rust — grid market-making controller in Rust
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Reconciles a buy/sell price ladder against live executors each
          cycle (create missing levels, refresh stale executors, early
          stop, buffer terminated executors), fed by mock/Binance market
          data, with Prometheus metrics and JSONL event recording.
=============================================================================
*/
use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::domain::TripleBarrier;
use crate::error::{ControllerError, Result};
use crate::grid::{GridConfig, GridConfigInput, RawLevels};

/// Mode sumber market data
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn parse(value: Option<&str>, default_mode: MarketMode) -> MarketMode {
        match value.unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"             => MarketMode::Mock,
            "binance_sandbox"  => MarketMode::BinanceSandbox,
            "binance_mainnet"  => MarketMode::BinanceMainnet,
            _ => default_mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock           => "mock",
            MarketMode::BinanceSandbox => "binance_sandbox",
            MarketMode::BinanceMainnet => "binance_mainnet",
        }
    }

    // Endpoint default per mode
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "wss://testnet.binance.vision/ws", // tidak dipakai saat mock
            MarketMode::BinanceSandbox  => "wss://testnet.binance.vision/ws",
            MarketMode::BinanceMainnet  => "wss://stream.binance.com:9443/ws",
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "https://testnet.binance.vision", // placeholder
            MarketMode::BinanceSandbox  => "https://testnet.binance.vision",
            MarketMode::BinanceMainnet  => "https://api.binance.com",
        }
    }

    // Host USD-M futures, dipakai connector *_perpetual
    pub fn default_futures_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "https://testnet.binancefuture.com", // placeholder
            MarketMode::BinanceSandbox  => "https://testnet.binancefuture.com",
            MarketMode::BinanceMainnet  => "https://fapi.binance.com",
        }
    }
}

/// Push (WS stream into a quote book) or pull (REST per cycle).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PriceSource {
    Stream,
    Rest,
}

#[derive(Clone, Debug)]
pub struct Args {
    pub feed_mode: MarketMode,
    pub price_source: PriceSource,
    pub binance_ws_url: String,
    pub binance_rest_url: String,
    pub binance_futures_rest_url: String,
    pub mock_start_px: f64,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub args: Args,
    pub grid: GridConfig,
    pub triple_barrier: TripleBarrier,
}

/// Read `.env` + process environment.
pub fn load() -> Result<Settings> {
    // Pastikan .env dibaca dulu
    let _ = dotenv();
    from_lookup(|key| env::var(key).ok())
}

fn value<F: Fn(&str) -> Option<String>>(get: &F, key: &str) -> Option<String> {
    get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_opt<T: FromStr, F: Fn(&str) -> Option<String>>(get: &F, key: &str) -> Result<Option<T>> {
    match value(get, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ControllerError::Parse(format!("{key}='{raw}' is not a valid value"))),
    }
}

fn parse_or<T: FromStr, F: Fn(&str) -> Option<String>>(get: &F, key: &str, default: T) -> Result<T> {
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

/// Build settings from any key lookup (env, map in tests, ...).
pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Settings> {
    let d = GridConfigInput::default();

    // ===== Controller =====
    // Contoh:
    //   BUY_SPREADS=0.01,0.02
    //   BUY_AMOUNTS_PCT=60,40   (kosong = rata)
    let input = GridConfigInput {
        controller_id: value(&get, "CONTROLLER_ID").unwrap_or(d.controller_id),
        connector_name: value(&get, "CONNECTOR_NAME").unwrap_or(d.connector_name),
        trading_pair: value(&get, "TRADING_PAIR").unwrap_or(d.trading_pair),
        total_quote_amount: parse_or(&get, "TOTAL_AMOUNT_QUOTE", d.total_quote_amount)?,
        buy_spreads: value(&get, "BUY_SPREADS").map(RawLevels::Text).unwrap_or(d.buy_spreads),
        buy_amounts_pct: value(&get, "BUY_AMOUNTS_PCT").map(RawLevels::Text),
        sell_spreads: value(&get, "SELL_SPREADS").map(RawLevels::Text).unwrap_or(d.sell_spreads),
        sell_amounts_pct: value(&get, "SELL_AMOUNTS_PCT").map(RawLevels::Text),
        executor_refresh_seconds: parse_or(&get, "EXECUTOR_REFRESH_TIME", d.executor_refresh_seconds)?,
        cooldown_seconds: parse_or(&get, "COOLDOWN_TIME", d.cooldown_seconds)?,
        closed_executor_buffer_size: parse_or(&get, "CLOSED_EXECUTORS_BUFFER", d.closed_executor_buffer_size)?,
        leverage: parse_or(&get, "LEVERAGE", d.leverage)?,
        position_mode: value(&get, "POSITION_MODE").unwrap_or(d.position_mode),
    };
    let grid = GridConfig::build(input)?;

    let triple_barrier = TripleBarrier {
        stop_loss: parse_opt(&get, "STOP_LOSS")?,
        take_profit: parse_opt(&get, "TAKE_PROFIT")?,
        time_limit_secs: parse_opt(&get, "TIME_LIMIT")?,
    };

    // ===== Runtime =====
    let feed_mode = MarketMode::parse(value(&get, "FEED_MODE").as_deref(), MarketMode::Mock);
    let price_source = match value(&get, "PRICE_SOURCE").unwrap_or_default().to_ascii_lowercase().as_str() {
        "rest" => PriceSource::Rest,
        _ => PriceSource::Stream,
    };
    let binance_ws_url = value(&get, "BINANCE_WS_URL").unwrap_or_else(|| feed_mode.default_ws_url().to_string());
    let binance_rest_url = value(&get, "BINANCE_REST_URL").unwrap_or_else(|| feed_mode.default_rest_url().to_string());
    let binance_futures_rest_url = value(&get, "BINANCE_FUTURES_REST_URL")
        .unwrap_or_else(|| feed_mode.default_futures_rest_url().to_string());
    let mock_start_px = value(&get, "MOCK_START_PX").and_then(|s| s.parse().ok()).unwrap_or(100.0);

    let record_file = value(&get, "RECORD_FILE");
    let metrics_port = value(&get, "METRICS_PORT").and_then(|s| s.parse().ok()).unwrap_or(9898);

    let args = Args {
        feed_mode,
        price_source,
        binance_ws_url,
        binance_rest_url,
        binance_futures_rest_url,
        mock_start_px,
        record_file,
        metrics_port,
    };
    Ok(Settings { args, grid, triple_barrier })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PositionMode, Side};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_a_two_level_ladder() {
        let s = from_lookup(lookup(&[])).unwrap();
        assert_eq!(s.grid.trading_pair(), "WLD-USDT");
        assert_eq!(s.grid.level_count(Side::Buy), 2);
        assert_eq!(s.grid.level_count(Side::Sell), 2);
        assert_eq!(s.grid.executor_refresh_seconds(), 300);
        assert_eq!(s.grid.position_mode(), PositionMode::Hedge);
        assert_eq!(s.args.feed_mode, MarketMode::Mock);
        assert_eq!(s.args.price_source, PriceSource::Stream);
        assert_eq!(s.args.metrics_port, 9898);
        assert_eq!(s.triple_barrier, TripleBarrier::default());
    }

    #[test]
    fn env_overrides_controller_and_runtime() {
        let s = from_lookup(lookup(&[
            ("BUY_SPREADS", "0.005, 0.01, 0.02"),
            ("BUY_AMOUNTS_PCT", "50,30,20"),
            ("POSITION_MODE", "oneway"),
            ("TAKE_PROFIT", "0.02"),
            ("TIME_LIMIT", "600"),
            ("FEED_MODE", "binance_mainnet"),
            ("PRICE_SOURCE", "REST"),
            ("METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(s.grid.level_count(Side::Buy), 3);
        assert!((s.grid.amount_fractions(Side::Buy)[0] - 0.5).abs() < 1e-12);
        assert_eq!(s.grid.position_mode(), PositionMode::Oneway);
        assert_eq!(s.triple_barrier.take_profit, Some(0.02));
        assert_eq!(s.triple_barrier.time_limit_secs, Some(600));
        assert_eq!(s.args.binance_ws_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(s.args.price_source, PriceSource::Rest);
        assert_eq!(s.args.metrics_port, 9100);
    }

    #[test]
    fn rest_price_source_targets_the_host_matching_the_connector() {
        use crate::feed::BinanceRestPrices;

        let rest = |pairs: &[(&str, &str)]| {
            let s = from_lookup(lookup(pairs)).unwrap();
            let p = BinanceRestPrices::new(s.args.binance_rest_url, s.args.binance_futures_rest_url);
            p.url_for(s.grid.connector_name(), s.grid.trading_pair())
        };

        // default connector is binance_perpetual
        assert_eq!(
            rest(&[("FEED_MODE", "binance_mainnet"), ("PRICE_SOURCE", "rest")]),
            "https://fapi.binance.com/fapi/v1/ticker/bookTicker?symbol=WLDUSDT"
        );
        assert_eq!(
            rest(&[("FEED_MODE", "binance_sandbox"), ("PRICE_SOURCE", "rest")]),
            "https://testnet.binancefuture.com/fapi/v1/ticker/bookTicker?symbol=WLDUSDT"
        );
        assert_eq!(
            rest(&[("FEED_MODE", "binance_mainnet"), ("PRICE_SOURCE", "rest"), ("CONNECTOR_NAME", "binance")]),
            "https://api.binance.com/api/v3/ticker/bookTicker?symbol=WLDUSDT"
        );
    }

    #[test]
    fn malformed_controller_values_fail_fast() {
        assert!(matches!(from_lookup(lookup(&[("LEVERAGE", "twenty")])), Err(ControllerError::Parse(_))));
        assert!(matches!(from_lookup(lookup(&[("SELL_SPREADS", "0.01, abc")])), Err(ControllerError::Parse(_))));
        assert!(matches!(from_lookup(lookup(&[("POSITION_MODE", "isolated")])), Err(ControllerError::Validation(_))));
        assert!(matches!(
            from_lookup(lookup(&[("SELL_AMOUNTS_PCT", "10,20,30")])),
            Err(ControllerError::Validation(_))
        ));
    }
}
