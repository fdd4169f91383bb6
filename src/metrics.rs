// ===============================
// src/metrics.rs
// ===============================
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Controller cycle --------
pub static CYCLES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("controller_cycles_total", "reconciliation cycles completed").unwrap());

pub static CYCLE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("controller_cycle_errors_total", "cycles aborted (label: stage)"),
        &["stage"],
    )
    .unwrap()
});

pub static ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("controller_actions_total", "proposed actions by pass (create/refresh/early_stop/store)"),
        &["pass"],
    )
    .unwrap()
});

pub static REFERENCE_PRICE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("controller_reference_price", "reference price of the last cycle").unwrap());

pub static SPREAD_MULTIPLIER: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("controller_spread_multiplier", "spread multiplier of the last cycle").unwrap());

// -------- Executors (paper registry) --------
pub static EXECUTOR_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("executor_events_total", "executor lifecycle events"),
        &["event", "venue"],
    )
    .unwrap()
});

pub static EXECUTORS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("executors", "executors in snapshot by status"), &["status"]).unwrap()
});

// -------- Market data --------
pub static QUOTES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("quotes_total", "top-of-book quotes received").unwrap());

pub static FEED_CONNECTED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("feed_ws_connected", "1 if the bookTicker WS is connected").unwrap());

pub static FEED_RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("feed_ws_reconnects_total", "bookTicker WS reconnects").unwrap());

// ---- Config visibility ----
pub static CONFIG_LEVELS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_levels", "configured ladder levels (label: side)"), &["side"]).unwrap()
});

pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_feed_mode", "feed mode (label: mode)"), &["mode"]).unwrap()
});

pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CYCLES.clone()),
        Box::new(CYCLE_ERRORS.clone()),
        Box::new(ACTIONS.clone()),
        Box::new(REFERENCE_PRICE.clone()),
        Box::new(SPREAD_MULTIPLIER.clone()),
        Box::new(EXECUTOR_EVENTS.clone()),
        Box::new(EXECUTORS.clone()),
        Box::new(QUOTES.clone()),
        Box::new(FEED_CONNECTED.clone()),
        Box::new(FEED_RECONNECTS.clone()),
        Box::new(CONFIG_LEVELS.clone()),
        Box::new(CONFIG_FEED_MODE.clone()),
    ];
    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            error!(?e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let rsp = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") | (&Method::GET, "/metrics") => Response::builder()
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Body::from(encode_metrics())),
        (&Method::GET, "/health") => Response::builder().body(Body::from("OK")),
        _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()),
    };
    Ok(rsp.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Serve `/metrics` (and `/`, `/health`) until the task is dropped.
pub async fn serve_metrics(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });

    let server = match Server::try_bind(&addr) {
        Ok(b) => b.serve(make_svc),
        Err(e) => {
            error!(?e, %addr, "metrics bind failed");
            return;
        }
    };
    info!("metrics listening on http://{addr}/metrics");
    if let Err(e) = server.await {
        error!(?e, "metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_endpoint_answers_and_unknown_paths_404() {
        ACTIONS.with_label_values(&["create"]).inc();
        let rsp = handle(Request::get("/metrics").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);

        let rsp = handle(Request::get("/nope").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    }
}
