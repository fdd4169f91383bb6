// ===============================
// src/main.rs
// ===============================
/*
 # jalankan paper loop dengan feed mock
 RUST_LOG=info cargo run -- --tick-ms 500 --fill-probability 0.05

 # lihat aktivitas controller
 curl -s localhost:9898/metrics | egrep '^controller_(cycles|actions)_total'
*/
/*
=============================================================================
Project : mm_grid_rust — grid market-making controller in Rust
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Reconciles a buy/sell price ladder against live executors each
          cycle (create missing levels, refresh stale executors, early
          stop, buffer terminated executors), fed by mock/Binance market
          data, with Prometheus metrics and JSONL event recording.
=============================================================================
*/
use std::time::Duration;

use clap::Parser;
use tokio::{select, sync::mpsc, time::{interval, MissedTickBehavior}};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mm_grid_rust::buffer::{BufferPolicy, ExecutorBuffer};
use mm_grid_rust::config::{self, MarketMode, PriceSource};
use mm_grid_rust::domain::{self, Event, ExecutorInfo, ExecutorStatus, Side};
use mm_grid_rust::feed::{self, BinanceRestPrices, MarketDataProvider, QuoteBook};
use mm_grid_rust::gateway::{ExecutorRegistry, SimExecutorRegistry};
use mm_grid_rust::metrics;
use mm_grid_rust::recorder;
use mm_grid_rust::strategy::LimitMakerStrategy;
use mm_grid_rust::{ControllerError, MarketMakingController};

/// Paper-trading loop for the grid market-making controller.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Milliseconds between reconciliation cycles
    #[arg(long, default_value_t = 1_000)]
    tick_ms: u64,
    /// Stop after N cycles (runs until Ctrl-C if unset)
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Chance per cycle that a resting paper executor fills without a price cross
    #[arg(long, default_value_t = 0.0)]
    fill_probability: f64,
    /// Which terminated executors are disposed once the buffer overflows
    #[arg(long, value_enum, default_value_t = BufferPolicy::SnapshotIndex)]
    buffer_policy: BufferPolicy,
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(%e, "fatal");
        std::process::exit(1);
    }
}

fn publish_snapshot_metrics(snapshot: &[ExecutorInfo]) {
    for (label, status) in [
        ("not_started", ExecutorStatus::NotStarted),
        ("active", ExecutorStatus::Active),
        ("trading", ExecutorStatus::Trading),
        ("shutting_down", ExecutorStatus::ShuttingDown),
        ("terminated", ExecutorStatus::Terminated),
    ] {
        let n = snapshot.iter().filter(|e| e.status == status).count();
        metrics::EXECUTORS.with_label_values(&[label]).set(n as i64);
    }
}

async fn run(cli: Cli) -> Result<(), ControllerError> {
    // ---- Load config ----
    let settings = config::load()?;
    let args = settings.args;

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        controller_id = %settings.grid.controller_id(),
        connector = %settings.grid.connector_name(),
        pair = %settings.grid.trading_pair(),
        buy_spreads = ?settings.grid.spreads(Side::Buy),
        sell_spreads = ?settings.grid.spreads(Side::Sell),
        total_quote = settings.grid.total_quote_amount(),
        refresh_s = settings.grid.executor_refresh_seconds(),
        feed_mode = %args.feed_mode.as_str(),
        price_source = ?args.price_source,
        buffer_policy = ?cli.buffer_policy,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);
    for side in Side::ALL {
        metrics::CONFIG_LEVELS
            .with_label_values(&[side.as_str()])
            .set(settings.grid.level_count(side) as i64);
    }

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let rec_handle = args.record_file.clone().map(|path| tokio::spawn(recorder::run(rec_rx, path)));

    // ---- Market data ----
    let connector = settings.grid.connector_name().to_string();
    let pair = settings.grid.trading_pair().to_string();
    let provider: Box<dyn MarketDataProvider> = match (&args.price_source, &args.feed_mode) {
        (PriceSource::Rest, MarketMode::BinanceSandbox | MarketMode::BinanceMainnet) => {
            Box::new(BinanceRestPrices::new(args.binance_rest_url.clone(), args.binance_futures_rest_url.clone()))
        }
        (_, mode) => {
            let mut book = QuoteBook::new();
            let tx = book.register(&connector, &pair);
            match mode {
                MarketMode::Mock => {
                    tokio::spawn(feed::run_mock(tx, args.mock_start_px, Duration::from_millis(100)));
                }
                MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
                    tokio::spawn(feed::run_binance(tx, pair.clone(), args.binance_ws_url.clone()));
                }
            }
            Box::new(book)
        }
    };

    // ---- Controller + paper executors ----
    let strategy = LimitMakerStrategy::new(settings.triple_barrier);
    let mut controller = MarketMakingController::new(settings.grid, strategy)
        .with_buffer(ExecutorBuffer::new(cli.buffer_policy));
    let mut registry = SimExecutorRegistry::new(connector, cli.fill_probability);

    // ---- Control loop: satu cycle selesai sebelum cycle berikutnya ----
    let mut tick = interval(Duration::from_millis(cli.tick_ms.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle: u64 = 0;

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c, shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        let market = match controller.update_market_data(provider.as_ref()).await {
            Ok(md) => md,
            Err(e) => {
                warn!(%e, "market data unavailable, skip cycle");
                metrics::CYCLE_ERRORS.with_label_values(&["market_data"]).inc();
                continue;
            }
        };
        let now = domain::now_ms();
        metrics::REFERENCE_PRICE.set(market.reference_price);
        metrics::SPREAD_MULTIPLIER.set(market.spread_multiplier);
        let _ = rec_tx.try_send(Event::Market { ts_ms: now, data: market });

        registry.on_market(&market, now);
        let snapshot = registry.executors_info();
        publish_snapshot_metrics(&snapshot);

        let (actions, report) = match controller.run_cycle(&snapshot, now) {
            Ok(out) => out,
            Err(e) => {
                warn!(%e, "cycle aborted");
                metrics::CYCLE_ERRORS.with_label_values(&["reconcile"]).inc();
                continue;
            }
        };
        metrics::ACTIONS.with_label_values(&["create"]).inc_by(report.created as u64);
        metrics::ACTIONS.with_label_values(&["refresh"]).inc_by(report.refreshed as u64);
        metrics::ACTIONS.with_label_values(&["early_stop"]).inc_by(report.early_stopped as u64);
        metrics::ACTIONS.with_label_values(&["store"]).inc_by(report.stored as u64);

        for action in &actions {
            let _ = rec_tx.try_send(Event::Action { ts_ms: now, action: action.clone() });
        }
        for info in registry.apply(&actions, now) {
            let _ = rec_tx.try_send(Event::Stored(info));
        }

        cycle += 1;
        metrics::CYCLES.inc();
        info!(
            cycle,
            reference_price = market.reference_price,
            executors = snapshot.len(),
            created = report.created,
            refreshed = report.refreshed,
            early_stopped = report.early_stopped,
            stored = report.stored,
            "cycle"
        );

        if cli.max_cycles.is_some_and(|max| cycle >= max) {
            info!(cycle, "max cycles reached");
            break;
        }
    }

    // flush recorder
    let _ = rec_tx.try_send(Event::Note(format!("shutdown after {cycle} cycles")));
    drop(rec_tx);
    if let Some(h) = rec_handle {
        let _ = h.await;
    }
    Ok(())
}
