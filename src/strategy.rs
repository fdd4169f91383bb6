// ===============================
// src/strategy.rs
// ===============================
//
// Extension points untuk controller:
// - get_executor_config     : wajib, bentuk executor per level
// - filter_not_active_levels: opsional, default identity
// - early_stop_conditions   : opsional, default tidak ada stop tambahan
// - process_market_data     : opsional, default spread_multiplier = 1
//
// LimitMakerStrategy adalah strategi konkret yang dipakai binary: entry limit
// di harga level, triple barrier opsional, cooldown per level.
//
use tracing::debug;

use crate::domain::{secs_to_ms, Action, ExecutorConfig, ExecutorInfo, LevelId, ProcessedMarketData, TripleBarrier};
use crate::grid::GridConfig;

/// Read-only view of one reconciliation cycle handed to the hooks.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub config: &'a GridConfig,
    pub market: &'a ProcessedMarketData,
    pub executors: &'a [ExecutorInfo],
    pub now_ms: i64,
}

pub trait ControllerStrategy: Send + Sync {
    /// Executor to launch for a missing level at the resolved price/amount.
    fn get_executor_config(&self, level_id: LevelId, price: f64, amount: f64, ctx: &CycleContext<'_>) -> ExecutorConfig;

    /// Narrow down the levels that are about to get a new executor.
    fn filter_not_active_levels(&self, levels: Vec<LevelId>, _ctx: &CycleContext<'_>) -> Vec<LevelId> {
        levels
    }

    /// Extra stops driven by strategy-specific market conditions.
    fn early_stop_conditions(&self, _ctx: &CycleContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    fn process_market_data(&self, reference_price: f64) -> ProcessedMarketData {
        ProcessedMarketData { reference_price, spread_multiplier: 1.0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LimitMakerStrategy {
    pub triple_barrier: TripleBarrier,
}

impl LimitMakerStrategy {
    pub fn new(triple_barrier: TripleBarrier) -> Self { Self { triple_barrier } }

    fn in_cooldown(level: LevelId, ctx: &CycleContext<'_>) -> bool {
        let cooldown_ms = secs_to_ms(ctx.config.cooldown_seconds());
        ctx.executors.iter().any(|e| {
            e.level_id() == Some(level)
                && e.closed_at_ms.is_some_and(|closed| ctx.now_ms.saturating_sub(closed) < cooldown_ms)
        })
    }
}

impl ControllerStrategy for LimitMakerStrategy {
    fn get_executor_config(&self, level_id: LevelId, price: f64, amount: f64, ctx: &CycleContext<'_>) -> ExecutorConfig {
        ExecutorConfig {
            timestamp_ms: ctx.now_ms,
            level_id,
            connector_name: ctx.config.connector_name().to_string(),
            trading_pair: ctx.config.trading_pair().to_string(),
            side: level_id.side,
            entry_price: price,
            amount,
            leverage: ctx.config.leverage(),
            position_mode: ctx.config.position_mode(),
            triple_barrier: self.triple_barrier,
        }
    }

    /// Skip levels whose last executor closed less than `cooldown_seconds` ago.
    fn filter_not_active_levels(&self, levels: Vec<LevelId>, ctx: &CycleContext<'_>) -> Vec<LevelId> {
        levels
            .into_iter()
            .filter(|&level| {
                let cooling = Self::in_cooldown(level, ctx);
                if cooling {
                    debug!(level_id = %level, "level in cooldown, skip create");
                }
                !cooling
            })
            .collect()
    }

    /// Stop idle executors bound to levels the ladder no longer has (after a
    /// shrinking `update_side`). Stale ones are left to the refresh pass.
    fn early_stop_conditions(&self, ctx: &CycleContext<'_>) -> Vec<Action> {
        let refresh_ms = secs_to_ms(ctx.config.executor_refresh_seconds());
        ctx.executors
            .iter()
            .filter(|e| e.is_active && !e.is_trading && e.age_ms(ctx.now_ms) <= refresh_ms)
            .filter(|e| e.level_id().is_some_and(|id| ctx.config.level(id).is_err()))
            .map(|e| Action::stop(&e.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutorStatus, Side};
    use crate::grid::GridConfigInput;
    use std::collections::BTreeMap;

    const MARKET: ProcessedMarketData = ProcessedMarketData { reference_price: 100.0, spread_multiplier: 1.0 };

    fn executor(id: &str, level: &str, closed_at_ms: Option<i64>) -> ExecutorInfo {
        let mut custom_info = BTreeMap::new();
        custom_info.insert("level_id".to_string(), serde_json::json!(level));
        ExecutorInfo {
            id: id.into(),
            side: Some(Side::Buy),
            status: if closed_at_ms.is_some() { ExecutorStatus::Terminated } else { ExecutorStatus::Active },
            is_active: closed_at_ms.is_none(),
            is_trading: false,
            created_at_ms: 0,
            closed_at_ms,
            custom_info,
        }
    }

    #[test]
    fn executor_config_carries_controller_settings() {
        let config = GridConfig::build(GridConfigInput { leverage: 5, ..Default::default() }).unwrap();
        let strategy = LimitMakerStrategy::new(TripleBarrier { stop_loss: Some(0.03), ..Default::default() });
        let ctx = CycleContext { config: &config, market: &MARKET, executors: &[], now_ms: 42 };

        let cfg = strategy.get_executor_config(LevelId::new(Side::Sell, 1), 102.0, 0.49, &ctx);
        assert_eq!(cfg.side, Side::Sell);
        assert_eq!(cfg.leverage, 5);
        assert_eq!(cfg.trading_pair, "WLD-USDT");
        assert_eq!(cfg.timestamp_ms, 42);
        assert_eq!(cfg.triple_barrier.stop_loss, Some(0.03));
    }

    #[test]
    fn recently_closed_levels_wait_for_cooldown() {
        let config = GridConfig::build(GridConfigInput { cooldown_seconds: 15, ..Default::default() }).unwrap();
        let executors = vec![executor("a", "buy_0", Some(90_000)), executor("b", "buy_1", Some(80_000))];
        let ctx = CycleContext { config: &config, market: &MARKET, executors: &executors, now_ms: 100_000 };

        let levels = config.all_level_ids();
        let kept = LimitMakerStrategy::default().filter_not_active_levels(levels, &ctx);

        // buy_0 closed 10s ago (cooling), buy_1 closed 20s ago (free)
        assert_eq!(kept.iter().map(ToString::to_string).collect::<Vec<_>>(), vec!["buy_1", "sell_0", "sell_1"]);
    }

    #[test]
    fn extreme_close_timestamps_do_not_overflow_cooldown() {
        let config = GridConfig::build(GridConfigInput { cooldown_seconds: u64::MAX, ..Default::default() }).unwrap();
        let executors = vec![executor("a", "buy_0", Some(i64::MIN)), executor("b", "buy_1", Some(i64::MAX))];
        let ctx = CycleContext { config: &config, market: &MARKET, executors: &executors, now_ms: 1_000 };

        let kept = LimitMakerStrategy::default().filter_not_active_levels(config.all_level_ids(), &ctx);
        // buy_0 closed "forever ago" (free), buy_1 closes in the future (cooling)
        assert_eq!(kept.iter().map(ToString::to_string).collect::<Vec<_>>(), vec!["buy_0", "sell_0", "sell_1"]);
    }

    #[test]
    fn idle_executors_on_removed_levels_are_stopped_early() {
        let mut config = GridConfig::build(GridConfigInput::default()).unwrap();
        config.update_side(Side::Buy, "0.01".into(), None).unwrap();
        let executors = vec![executor("keep", "buy_0", None), executor("orphan", "buy_1", None)];
        let ctx = CycleContext { config: &config, market: &MARKET, executors: &executors, now_ms: 1_000 };

        let actions = LimitMakerStrategy::default().early_stop_conditions(&ctx);
        assert_eq!(actions, vec![Action::stop("orphan")]);
    }

    #[test]
    fn default_market_processing_keeps_unit_multiplier() {
        let md = LimitMakerStrategy::default().process_market_data(123.4);
        assert_eq!(md, ProcessedMarketData { reference_price: 123.4, spread_multiplier: 1.0 });
    }
}
