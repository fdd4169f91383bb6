// ===============================
// src/gateway.rs (paper executor registry)
// ===============================
//
// Registry executor simulasi untuk binary:
// - CreateExecutor  -> executor baru (Active), terikat ke level_id
// - harga melewati entry (atau fill_probability) -> Trading
// - triple barrier (tp/sl/time limit) pada executor Trading -> Terminated
// - StopExecutor pada executor hidup -> Terminated (closed_at diisi)
// - StopExecutor pada executor Terminated -> di-store (dihapus dari memori)
//
use std::collections::BTreeMap;

use ahash::AHashSet;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::domain::{secs_to_ms, Action, ExecutorConfig, ExecutorInfo, ExecutorStatus, ProcessedMarketData, Side};
use crate::metrics::EXECUTOR_EVENTS;

/// Source of the per-cycle executor snapshot.
pub trait ExecutorRegistry {
    fn executors_info(&self) -> Vec<ExecutorInfo>;
}

#[derive(Debug, Clone)]
struct SimExecutor {
    info: ExecutorInfo,
    config: ExecutorConfig,
}

impl SimExecutor {
    fn terminate(&mut self, now_ms: i64) {
        self.info.status = ExecutorStatus::Terminated;
        self.info.is_active = false;
        self.info.is_trading = false;
        self.info.closed_at_ms = Some(now_ms);
    }

    /// Signed return since entry, positive when the position is in profit.
    fn pnl_fraction(&self, reference_price: f64) -> f64 {
        let entry = self.config.entry_price;
        match self.config.side {
            Side::Buy => (reference_price - entry) / entry,
            Side::Sell => (entry - reference_price) / entry,
        }
    }

    fn hit_barrier(&self, reference_price: f64, now_ms: i64) -> Option<&'static str> {
        let tb = &self.config.triple_barrier;
        let pnl = self.pnl_fraction(reference_price);
        if tb.take_profit.is_some_and(|tp| pnl >= tp) {
            return Some("take_profit");
        }
        if tb.stop_loss.is_some_and(|sl| pnl <= -sl) {
            return Some("stop_loss");
        }
        let limit_ms = tb.time_limit_secs.map(secs_to_ms);
        if limit_ms.is_some_and(|l| self.info.age_ms(now_ms) > l) {
            return Some("time_limit");
        }
        None
    }
}

pub struct SimExecutorRegistry {
    venue: String,
    fill_probability: f64,
    next_id: u64,
    // urutan insert = urutan snapshot
    executors: Vec<SimExecutor>,
}

impl SimExecutorRegistry {
    pub fn new(venue: impl Into<String>, fill_probability: f64) -> Self {
        Self { venue: venue.into(), fill_probability: fill_probability.clamp(0.0, 1.0), next_id: 0, executors: Vec::new() }
    }

    pub fn len(&self) -> usize { self.executors.len() }

    pub fn is_empty(&self) -> bool { self.executors.is_empty() }

    fn event(&self, kind: &str) {
        EXECUTOR_EVENTS.with_label_values(&[kind, &self.venue]).inc();
    }

    /// Apply one cycle's actions. Returns executors that were stored (removed).
    ///
    /// An executor terminated by this batch is not stored by the same batch:
    /// refresh and buffer passes may both name it, and it still has to sit
    /// in the buffer for at least one cycle.
    pub fn apply(&mut self, actions: &[Action], now_ms: i64) -> Vec<ExecutorInfo> {
        let mut stored = Vec::new();
        let mut stopped_now: AHashSet<&str> = AHashSet::new();
        for action in actions {
            match action {
                Action::CreateExecutor { executor_config, .. } => self.create(executor_config.clone(), now_ms),
                Action::StopExecutor { executor_id } => {
                    let Some(pos) = self.executors.iter().position(|e| &e.info.id == executor_id) else {
                        warn!(%executor_id, "stop for unknown executor");
                        continue;
                    };
                    if stopped_now.contains(executor_id.as_str()) {
                        debug!(%executor_id, "already stopped in this cycle, store deferred");
                    } else if self.executors[pos].info.is_terminated() {
                        stored.push(self.executors.remove(pos).info);
                        self.event("stored");
                    } else {
                        self.executors[pos].terminate(now_ms);
                        stopped_now.insert(executor_id.as_str());
                        self.event("stopped");
                    }
                }
            }
        }
        stored
    }

    fn create(&mut self, config: ExecutorConfig, now_ms: i64) {
        self.next_id += 1;
        let id = format!("{}-{}", self.venue, self.next_id);
        let mut custom_info = BTreeMap::new();
        custom_info.insert("level_id".to_string(), serde_json::json!(config.level_id));
        custom_info.insert("entry_price".to_string(), serde_json::json!(config.entry_price));
        custom_info.insert("amount".to_string(), serde_json::json!(config.amount));

        info!(executor_id = %id, level_id = %config.level_id, px = config.entry_price, qty = config.amount, "executor created");
        self.executors.push(SimExecutor {
            info: ExecutorInfo {
                id,
                side: Some(config.side),
                status: ExecutorStatus::Active,
                is_active: true,
                is_trading: false,
                created_at_ms: now_ms,
                closed_at_ms: None,
                custom_info,
            },
            config,
        });
        self.event("created");
    }

    /// Advance executors against the latest market snapshot.
    pub fn on_market(&mut self, market: &ProcessedMarketData, now_ms: i64) {
        let px = market.reference_price;
        let mut fills = 0usize;
        let mut exits = 0usize;
        for ex in self.executors.iter_mut().filter(|e| e.info.is_active) {
            if !ex.info.is_trading {
                let crossed = match ex.config.side {
                    Side::Buy => px <= ex.config.entry_price,
                    Side::Sell => px >= ex.config.entry_price,
                };
                let lucky = self.fill_probability > 0.0 && rand::thread_rng().gen_bool(self.fill_probability);
                if crossed || lucky {
                    ex.info.is_trading = true;
                    ex.info.status = ExecutorStatus::Trading;
                    fills += 1;
                    info!(executor_id = %ex.info.id, px = ex.config.entry_price, "executor filled");
                }
            } else if let Some(reason) = ex.hit_barrier(px, now_ms) {
                ex.terminate(now_ms);
                exits += 1;
                info!(executor_id = %ex.info.id, reason, "executor closed");
            }
        }
        EXECUTOR_EVENTS.with_label_values(&["filled", &self.venue]).inc_by(fills as u64);
        EXECUTOR_EVENTS.with_label_values(&["closed", &self.venue]).inc_by(exits as u64);
    }
}

impl ExecutorRegistry for SimExecutorRegistry {
    fn executors_info(&self) -> Vec<ExecutorInfo> {
        self.executors.iter().map(|e| e.info.clone()).collect()
    }
}
