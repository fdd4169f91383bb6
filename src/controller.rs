// ===============================
// src/controller.rs
// ===============================
//
// Reconciliation engine. Tiap cycle:
//   1) create  : level yang belum punya executor aktif
//   2) refresh : executor aktif, belum trading, umur > executor_refresh_seconds
//   3) early   : hook strategi
//   4) store   : buffer executor TERMINATED
// Urutan action = urutan pass di atas, dalam pass mengikuti urutan snapshot.
// Tidak ada state antar cycle selain GridConfig dan market data terakhir.
//
use ahash::AHashSet;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::ExecutorBuffer;
use crate::domain::{secs_to_ms, Action, ExecutorInfo, LevelId, PriceType, ProcessedMarketData, Side};
use crate::error::{MarketDataError, Result};
use crate::feed::MarketDataProvider;
use crate::grid::{GridConfig, RawLevels};
use crate::pricing;
use crate::strategy::{ControllerStrategy, CycleContext};

/// Per-pass action counts of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub created: usize,
    pub refreshed: usize,
    pub early_stopped: usize,
    pub stored: usize,
}

impl CycleReport {
    pub fn total(&self) -> usize { self.created + self.refreshed + self.early_stopped + self.stored }
}

pub struct MarketMakingController<S> {
    config: GridConfig,
    strategy: S,
    buffer: ExecutorBuffer,
    processed_data: Option<ProcessedMarketData>,
}

impl<S: ControllerStrategy> MarketMakingController<S> {
    pub fn new(config: GridConfig, strategy: S) -> Self {
        Self { config, strategy, buffer: ExecutorBuffer::default(), processed_data: None }
    }

    pub fn with_buffer(mut self, buffer: ExecutorBuffer) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn config(&self) -> &GridConfig { &self.config }

    pub fn strategy(&self) -> &S { &self.strategy }

    pub fn processed_data(&self) -> Option<&ProcessedMarketData> { self.processed_data.as_ref() }

    /// For callers that compute market data themselves.
    pub fn set_processed_data(&mut self, data: ProcessedMarketData) { self.processed_data = Some(data); }

    /// Pull the mid price and let the strategy turn it into this cycle's
    /// market snapshot. Provider failures are forwarded untouched and the
    /// previous snapshot is kept.
    pub async fn update_market_data<P>(&mut self, provider: &P) -> Result<ProcessedMarketData>
    where
        P: MarketDataProvider + ?Sized,
    {
        let reference_price = provider
            .get_price(self.config.connector_name(), self.config.trading_pair(), PriceType::MidPrice)
            .await?;
        let data = self.strategy.process_market_data(reference_price);
        self.processed_data = Some(data);
        Ok(data)
    }

    /// Administrative reconfiguration of one ladder side. Atomic: on error the
    /// previous ladder stays in place.
    pub fn update_side(&mut self, side: Side, spreads: RawLevels, amounts: Option<RawLevels>) -> Result<()> {
        self.config.update_side(side, spreads, amounts)?;
        info!(
            %side,
            spreads = ?self.config.spreads(side),
            amounts = ?self.config.amount_fractions(side),
            "ladder side updated"
        );
        Ok(())
    }

    /// Ordered action list for one cycle: create, refresh-stop, early-stop, buffer-stop.
    pub fn determine_actions(&self, executors_info: &[ExecutorInfo], now_ms: i64) -> Result<Vec<Action>> {
        self.run_cycle(executors_info, now_ms).map(|(actions, _)| actions)
    }

    pub fn run_cycle(&self, executors_info: &[ExecutorInfo], now_ms: i64) -> Result<(Vec<Action>, CycleReport)> {
        let market = self.processed_data.as_ref().ok_or(MarketDataError::NotReady)?;
        let ctx = CycleContext { config: &self.config, market, executors: executors_info, now_ms };

        let create = self.create_actions_proposal(&ctx)?;
        let refresh = self.executors_to_refresh(&ctx);
        let early = self.executors_to_early_stop(&ctx);
        let store = self.store_actions_proposal(executors_info);

        let report = CycleReport {
            created: create.len(),
            refreshed: refresh.len(),
            early_stopped: early.len(),
            stored: store.len(),
        };

        let mut actions = Vec::with_capacity(report.total());
        actions.extend(create);
        actions.extend(refresh);
        actions.extend(early);
        actions.extend(store);
        for a in &actions {
            debug!(action = ?a, "proposed");
        }
        Ok((actions, report))
    }

    /// Levels (buy first, then sell) without an active executor bound to them.
    pub fn not_active_level_ids(&self, active_level_ids: &AHashSet<LevelId>) -> Vec<LevelId> {
        self.config.all_level_ids().into_iter().filter(|id| !active_level_ids.contains(id)).collect()
    }

    fn active_level_ids(executors_info: &[ExecutorInfo]) -> AHashSet<LevelId> {
        let mut ids = AHashSet::new();
        for e in executors_info.iter().filter(|e| e.side.is_some() && e.is_active) {
            match e.level_id() {
                Some(id) => {
                    ids.insert(id);
                }
                None => warn!(executor_id = %e.id, "active executor without level_id"),
            }
        }
        ids
    }

    pub fn create_actions_proposal(&self, ctx: &CycleContext<'_>) -> Result<Vec<Action>> {
        let active = Self::active_level_ids(ctx.executors);
        let missing = self.not_active_level_ids(&active);
        let levels = self.strategy.filter_not_active_levels(missing, ctx);

        levels
            .into_iter()
            .map(|level_id| {
                let (price, amount) = pricing::resolve(level_id, ctx.config, ctx.market)?;
                Ok(Action::CreateExecutor {
                    controller_id: ctx.config.controller_id().to_string(),
                    executor_config: self.strategy.get_executor_config(level_id, price, amount, ctx),
                })
            })
            .collect()
    }

    /// Active, not trading, and older than `executor_refresh_seconds`.
    pub fn executors_to_refresh(&self, ctx: &CycleContext<'_>) -> Vec<Action> {
        let refresh_ms = secs_to_ms(ctx.config.executor_refresh_seconds());
        ctx.executors
            .iter()
            .filter(|e| e.is_active && !e.is_trading && e.age_ms(ctx.now_ms) > refresh_ms)
            .map(|e| Action::stop(&e.id))
            .collect()
    }

    pub fn executors_to_early_stop(&self, ctx: &CycleContext<'_>) -> Vec<Action> {
        self.strategy.early_stop_conditions(ctx)
    }

    pub fn store_actions_proposal(&self, executors_info: &[ExecutorInfo]) -> Vec<Action> {
        self.buffer.store_actions(executors_info)
    }
}
