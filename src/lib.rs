// ===============================
// src/lib.rs
// ===============================
pub mod binance;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod feed;
pub mod gateway;        // paper executor registry
pub mod grid;
pub mod metrics;
pub mod pricing;
pub mod recorder;
pub mod strategy;

pub use controller::{CycleReport, MarketMakingController};
pub use error::{ControllerError, MarketDataError};
